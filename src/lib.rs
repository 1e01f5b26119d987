//! rust-lwm2m - LWM2M client object model and IPC request engine
//!
//! This library keeps an in-memory model of LWM2M objects, instances,
//! resources and resource instances, and serves it to local applications
//! over an XML IPC protocol: Connect, Define, Get, Set, Delete and Subscribe
//! requests, plus change and execute notifications.
//!
//! # Example
//!
//! ```no_run
//! use rust_lwm2m::{ClientConfig, IpcServer};
//!
//! // Bind the IPC socket with default settings
//! let mut server = IpcServer::bind(&ClientConfig::default()).unwrap();
//!
//! // Serve requests until the running flag is cleared
//! server.run().unwrap();
//! ```

pub mod codec;
pub mod config;
pub mod definitions;
mod error;
pub mod handler;
pub mod ipc_server;
pub mod ipc_types;
pub mod key;
pub mod loader;
pub mod object_node;
pub mod objects_tree;
pub mod read;
pub mod registration;
pub mod request_builder;
pub mod store;
pub mod subscriptions;
pub mod transport;
pub mod tree;

pub use codec::ResourceType;
pub use config::ClientConfig;
pub use definitions::{DefinitionRegistry, Operations, ResourceDefinition};
pub use error::{Lwm2mError, Result};
pub use handler::RequestHandler;
pub use ipc_server::IpcServer;
pub use ipc_types::{ErrorCode, MessageType, Request, Response, ResultCode, SubscriberTarget};
pub use key::{IdRange, Key};
pub use loader::ObjectDescription;
pub use request_builder::RequestBuilder;
pub use store::{MemoryStore, Store};
pub use transport::{QueuedTransport, Transport, UdpTransport};
pub use tree::TreeNode;
