//! Error types for rust-lwm2m

use thiserror::Error;

/// Main error type for the object model and IPC engine
#[derive(Debug, Error)]
pub enum Lwm2mError {
    /// IO error (sockets, file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// XML parsing/serialization error
    #[error("XML error: {0}")]
    Xml(String),

    /// Request tree is missing a mandatory element or has the wrong shape
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Text could not be decoded into a typed resource value
    #[error("Value decode error: {0}")]
    ValueDecode(String),

    /// Typed resource value could not be rendered as text
    #[error("Value encode error: {0}")]
    ValueEncode(String),

    /// Serialized message does not fit the configured message buffer
    #[error("Message needs {needed} bytes but buffer holds {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },

    /// Object or resource definition clashes with the registry (maps to Forbidden)
    #[error("Definition conflict: {0}")]
    DefinitionConflict(String),

    /// Address does not name anything in the store
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Datagram delivery failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for rust-lwm2m operations
pub type Result<T> = std::result::Result<T, Lwm2mError>;
