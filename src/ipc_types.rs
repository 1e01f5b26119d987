//! IPC message types, result codes and envelopes
//!
//! This module defines the vocabulary shared between the request engine and
//! the transport boundary: message type tags, the subscribe markers, the
//! per-leaf error codes carried in response trees and the CoAP-style result
//! codes returned by the store and placed in every response envelope.

use std::fmt;
use std::net::SocketAddr;

use crate::error::{Lwm2mError, Result};
use crate::tree::TreeNode;

pub const REQUEST: &str = "Request";
pub const RESPONSE: &str = "Response";
pub const TYPE: &str = "Type";
pub const CODE: &str = "Code";
pub const CONTENT: &str = "Content";

/// IPC message type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Connect,
    Disconnect,
    Define,
    Get,
    Set,
    Delete,
    Subscribe,
    /// Sent to a change observer when an observed path changes
    ChangeNotification,
    /// Sent to every execute subscriber when a resource is executed
    ExecuteNotification,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "Connect",
            Self::Disconnect => "Disconnect",
            Self::Define => "Define",
            Self::Get => "Get",
            Self::Set => "Set",
            Self::Delete => "Delete",
            Self::Subscribe => "Subscribe",
            Self::ChangeNotification => "ChangeNotification",
            Self::ExecuteNotification => "ExecuteNotification",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Connect" => Some(Self::Connect),
            "Disconnect" => Some(Self::Disconnect),
            "Define" => Some(Self::Define),
            "Get" => Some(Self::Get),
            "Set" => Some(Self::Set),
            "Delete" => Some(Self::Delete),
            "Subscribe" => Some(Self::Subscribe),
            "ChangeNotification" => Some(Self::ChangeNotification),
            "ExecuteNotification" => Some(Self::ExecuteNotification),
            _ => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker tags selecting the Subscribe sub-operation of a request leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscribeKind {
    Change,
    Execute,
    CancelChange,
    CancelExecute,
}

impl SubscribeKind {
    /// Checked in this order when a leaf carries more than one marker
    pub const ALL: [SubscribeKind; 4] = [
        Self::Change,
        Self::Execute,
        Self::CancelChange,
        Self::CancelExecute,
    ];

    pub fn marker(self) -> &'static str {
        match self {
            Self::Change => "SubscribeToChange",
            Self::Execute => "SubscribeToExecute",
            Self::CancelChange => "CancelSubscribeToChange",
            Self::CancelExecute => "CancelSubscribeToExecute",
        }
    }
}

/// Per-leaf outcome recorded in response trees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    /// Malformed or ambiguous request
    BadRequest,
    /// Address does not exist
    PathNotFound,
    /// Address exists but the operation is not legal there
    PathInvalid,
    CannotCreate,
    CannotDelete,
    /// Malformed IDRange filter
    RangeInvalid,
    /// Cancel with no matching subscription
    SubscriptionInvalid,
    /// Definition conflict
    Forbidden,
    Internal,
    Unspecified,
    /// Unrecognised or missing IPC marker
    IpcError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::BadRequest => "BadRequest",
            Self::PathNotFound => "PathNotFound",
            Self::PathInvalid => "PathInvalid",
            Self::CannotCreate => "CannotCreate",
            Self::CannotDelete => "CannotDelete",
            Self::RangeInvalid => "RangeInvalid",
            Self::SubscriptionInvalid => "SubscriptionInvalid",
            Self::Forbidden => "Forbidden",
            Self::Internal => "Internal",
            Self::Unspecified => "Unspecified",
            Self::IpcError => "IPCError",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Success" => Some(Self::Success),
            "BadRequest" => Some(Self::BadRequest),
            "PathNotFound" => Some(Self::PathNotFound),
            "PathInvalid" => Some(Self::PathInvalid),
            "CannotCreate" => Some(Self::CannotCreate),
            "CannotDelete" => Some(Self::CannotDelete),
            "RangeInvalid" => Some(Self::RangeInvalid),
            "SubscriptionInvalid" => Some(Self::SubscriptionInvalid),
            "Forbidden" => Some(Self::Forbidden),
            "Internal" => Some(Self::Internal),
            "Unspecified" => Some(Self::Unspecified),
            "IPCError" => Some(Self::IpcError),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store operation results and response envelope codes (CoAP class.detail)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    // Success codes
    /// 2.00 Success
    Success,
    /// 2.01 Created
    Created,
    /// 2.02 Deleted
    Deleted,
    /// 2.04 Changed
    Changed,
    /// 2.05 Content
    Content,

    // Client error codes
    /// 4.00 Bad Request
    BadRequest,
    /// 4.01 Unauthorized
    Unauthorized,
    /// 4.03 Forbidden
    Forbidden,
    /// 4.04 Not Found
    NotFound,
    /// 4.05 Method Not Allowed
    MethodNotAllowed,

    // Server error codes
    /// 5.00 Internal Server Error
    InternalError,
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (class, detail) = self.to_code_pair();
        write!(f, "{}.{:02}", class, detail)
    }
}

impl ResultCode {
    /// Convert to CoAP response code format (class.detail)
    pub fn to_code_pair(self) -> (u8, u8) {
        match self {
            Self::Success => (2, 0),
            Self::Created => (2, 1),
            Self::Deleted => (2, 2),
            Self::Changed => (2, 4),
            Self::Content => (2, 5),
            Self::BadRequest => (4, 0),
            Self::Unauthorized => (4, 1),
            Self::Forbidden => (4, 3),
            Self::NotFound => (4, 4),
            Self::MethodNotAllowed => (4, 5),
            Self::InternalError => (5, 0),
        }
    }

    /// Numeric form used in envelopes, e.g. 404
    pub fn as_u16(self) -> u16 {
        let (class, detail) = self.to_code_pair();
        u16::from(class) * 100 + u16::from(detail)
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            200 => Some(Self::Success),
            201 => Some(Self::Created),
            202 => Some(Self::Deleted),
            204 => Some(Self::Changed),
            205 => Some(Self::Content),
            400 => Some(Self::BadRequest),
            401 => Some(Self::Unauthorized),
            403 => Some(Self::Forbidden),
            404 => Some(Self::NotFound),
            405 => Some(Self::MethodNotAllowed),
            500 => Some(Self::InternalError),
            _ => None,
        }
    }

    /// Check if this is a success code
    pub fn is_success(self) -> bool {
        self.to_code_pair().0 == 2
    }

    /// Map to a per-leaf error code, using `default` for results with no
    /// direct counterpart
    pub fn to_error_code(self, default: ErrorCode) -> ErrorCode {
        match self {
            _ if self.is_success() => ErrorCode::Success,
            Self::NotFound => ErrorCode::PathNotFound,
            Self::MethodNotAllowed | Self::Unauthorized => ErrorCode::PathInvalid,
            Self::InternalError => ErrorCode::Internal,
            _ => default,
        }
    }
}

/// Who is asking the store to perform an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Local application over the IPC channel
    Client,
    /// Upstream management server
    Server,
    /// Bootstrap server, bypasses access checks
    Bootstrap,
}

/// Where to deliver a reply or deferred notification
///
/// Owned copies of this value are captured by execute subscriptions and
/// change observations and outlive the request that created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberTarget {
    /// Datagram destination
    pub address: SocketAddr,
    /// Transport handle the request arrived on
    pub channel: u32,
}

impl SubscriberTarget {
    pub fn new(address: SocketAddr, channel: u32) -> Self {
        Self { address, channel }
    }
}

impl fmt::Display for SubscriberTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.channel)
    }
}

/// An inbound IPC request (transport-agnostic)
#[derive(Debug, Clone)]
pub struct Request {
    /// Operation tag
    pub message_type: MessageType,
    /// Requesting endpoint
    pub from: SubscriberTarget,
    /// The `Content` node, if any
    pub content: Option<TreeNode>,
}

impl Request {
    pub fn new(message_type: MessageType, from: SubscriberTarget) -> Self {
        Self {
            message_type,
            from,
            content: None,
        }
    }

    /// Set the `Content` node
    pub fn with_content(mut self, content: TreeNode) -> Self {
        self.content = Some(content);
        self
    }

    /// Build from a parsed `<Request>` tree
    pub fn from_tree(tree: TreeNode, from: SubscriberTarget) -> Result<Self> {
        if tree.name() != REQUEST {
            return Err(Lwm2mError::MalformedRequest(format!(
                "expected <{}>, found <{}>",
                REQUEST,
                tree.name()
            )));
        }
        let type_name = tree
            .child_named(TYPE)
            .and_then(TreeNode::value)
            .ok_or_else(|| Lwm2mError::MalformedRequest("missing request type".into()))?;
        let message_type = MessageType::from_name(type_name.trim()).ok_or_else(|| {
            Lwm2mError::MalformedRequest(format!("unknown request type: {}", type_name))
        })?;

        Ok(Self {
            message_type,
            from,
            content: tree.child_named(CONTENT).cloned(),
        })
    }

    pub fn to_tree(&self) -> TreeNode {
        let mut tree = TreeNode::new(REQUEST);
        tree.add_child(TreeNode::with_value(TYPE, self.message_type));
        if let Some(content) = &self.content {
            tree.add_child(content.clone());
        }
        tree
    }
}

/// An outbound response or notification envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub message_type: MessageType,
    pub code: ResultCode,
    /// The `Content` node, present on success
    pub content: Option<TreeNode>,
}

impl Response {
    pub fn new(message_type: MessageType, code: ResultCode) -> Self {
        Self {
            message_type,
            code,
            content: None,
        }
    }

    /// Wrap `child` in a `Content` node
    pub fn with_content(mut self, child: TreeNode) -> Self {
        let mut content = TreeNode::new(CONTENT);
        content.add_child(child);
        self.content = Some(content);
        self
    }

    /// Navigate below the `Content` node, e.g. `"Objects"`
    pub fn content_at(&self, path: &str) -> Option<&TreeNode> {
        self.content
            .as_ref()?
            .navigate(&format!("{}/{}", CONTENT, path))
    }

    pub fn to_tree(&self) -> TreeNode {
        let mut tree = TreeNode::new(RESPONSE);
        tree.add_child(TreeNode::with_value(TYPE, self.message_type));
        tree.add_child(TreeNode::with_value(CODE, self.code.as_u16()));
        if let Some(content) = &self.content {
            tree.add_child(content.clone());
        }
        tree
    }

    /// Serialize the envelope into a bounded message buffer
    pub fn to_xml(&self, capacity: usize) -> Result<String> {
        self.to_tree().to_xml(capacity)
    }

    /// Parse a `<Response>` tree, as received by an IPC client
    pub fn from_tree(tree: &TreeNode) -> Result<Self> {
        if tree.name() != RESPONSE {
            return Err(Lwm2mError::MalformedRequest(format!(
                "expected <{}>, found <{}>",
                RESPONSE,
                tree.name()
            )));
        }
        let message_type = tree
            .child_named(TYPE)
            .and_then(TreeNode::value)
            .and_then(|v| MessageType::from_name(v.trim()))
            .ok_or_else(|| Lwm2mError::MalformedRequest("missing response type".into()))?;
        let code = tree
            .child_integer(CODE)
            .and_then(|c| u16::try_from(c).ok())
            .and_then(ResultCode::from_u16)
            .ok_or_else(|| Lwm2mError::MalformedRequest("missing response code".into()))?;

        Ok(Self {
            message_type,
            code,
            content: tree.child_named(CONTENT).cloned(),
        })
    }
}
