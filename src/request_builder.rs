//! Client-side request building utilities
//!
//! Helpers for constructing IPC request trees and parsing responses, used by
//! IPC clients and by the integration tests.

use crate::error::{Lwm2mError, Result};
use crate::ipc_types::{
    CONTENT, MessageType, REQUEST, Request, Response, SubscribeKind, SubscriberTarget, TYPE,
};
use crate::key::{Id, Key};
use crate::loader::{OBJECT_DEFINITIONS, ObjectDescription};
use crate::objects_tree::{
    CREATE, END_EXCLUSIVE, ID, ID_RANGE, OBJECT, OBJECT_INSTANCE, OBJECTS, START, VALUE,
    find_or_create_child, find_or_create_response_node, new_objects_tree,
};
use crate::tree::TreeNode;

/// Builder for one IPC request
///
/// Paths added to the same builder share their common prefix in the
/// resulting `Objects` tree.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    message_type: MessageType,
    content: TreeNode,
}

impl RequestBuilder {
    /// Start a request of any type with an empty `Content`
    pub fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            content: TreeNode::new(CONTENT),
        }
    }

    pub fn connect() -> Self {
        Self::new(MessageType::Connect)
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }

    pub fn get() -> Self {
        Self::new(MessageType::Get)
    }

    pub fn set() -> Self {
        Self::new(MessageType::Set)
    }

    pub fn delete() -> Self {
        Self::new(MessageType::Delete)
    }

    pub fn subscribe() -> Self {
        Self::new(MessageType::Subscribe)
    }

    /// Define request carrying `ObjectDefinitions`
    pub fn define(descriptions: &[ObjectDescription]) -> Self {
        let mut builder = Self::new(MessageType::Define);
        let definitions = builder.content.add_child(TreeNode::new(OBJECT_DEFINITIONS));
        for description in descriptions {
            definitions.add_child(description.to_tree());
        }
        builder
    }

    fn objects_mut(&mut self) -> &mut TreeNode {
        let index = match self.content.children().iter().position(|c| c.name() == OBJECTS) {
            Some(index) => index,
            None => {
                self.content.add_child(new_objects_tree());
                self.content.children().len() - 1
            }
        };
        &mut self.content.children_mut()[index]
    }

    fn node_mut(&mut self, key: &Key) -> Result<&mut TreeNode> {
        if !key.is_well_formed() {
            return Err(Lwm2mError::InvalidPath(key.to_string()));
        }
        find_or_create_response_node(self.objects_mut(), key)
            .ok_or_else(|| Lwm2mError::InvalidPath(key.to_string()))
    }

    /// Name a path (Get, Delete)
    pub fn path(mut self, key: &Key) -> Result<Self> {
        self.node_mut(key)?;
        Ok(self)
    }

    /// Name a resource with an `IDRange` filter; bounds are not checked here
    pub fn range(mut self, key: &Key, start: i64, end_exclusive: i64) -> Result<Self> {
        let node = self.node_mut(key)?;
        let range = node.add_child(TreeNode::new(ID_RANGE));
        range.add_child(TreeNode::with_value(START, start));
        range.add_child(TreeNode::with_value(END_EXCLUSIVE, end_exclusive));
        Ok(self)
    }

    /// Attach a text value to a resource or resource instance (Set)
    pub fn value(mut self, key: &Key, text: &str) -> Result<Self> {
        if key.resource_id.is_none() {
            return Err(Lwm2mError::InvalidPath(format!("{} is not a resource", key)));
        }
        let node = self.node_mut(key)?;
        match node.child_named_mut(VALUE) {
            Some(value) => value.set_value(text),
            None => {
                node.add_child(TreeNode::with_value(VALUE, text));
            }
        }
        Ok(self)
    }

    /// Flag the object, instance or resource at `key` for creation (Set)
    pub fn create(mut self, key: &Key) -> Result<Self> {
        let node = self.node_mut(key)?;
        if node.child_named(CREATE).is_none() {
            node.add_child(TreeNode::new(CREATE));
        }
        Ok(self)
    }

    /// Ask for a new instance of `object_id` with a store-chosen ID (Set)
    pub fn create_instance(mut self, object_id: Id) -> Self {
        let object = find_or_create_child(self.objects_mut(), OBJECT, object_id);
        let instance = object.add_child(TreeNode::new(OBJECT_INSTANCE));
        instance.add_child(TreeNode::new(CREATE));
        self
    }

    /// Add a subscribe marker to a path (Subscribe)
    pub fn subscription(mut self, key: &Key, kind: SubscribeKind) -> Result<Self> {
        let node = self.node_mut(key)?;
        node.add_child(TreeNode::new(kind.marker()));
        Ok(self)
    }

    /// The `Request` tree
    pub fn to_tree(&self) -> TreeNode {
        let mut tree = TreeNode::new(REQUEST);
        tree.add_child(TreeNode::with_value(TYPE, self.message_type));
        if !self.content.children().is_empty() {
            tree.add_child(self.content.clone());
        }
        tree
    }

    pub fn to_xml(&self, capacity: usize) -> Result<String> {
        self.to_tree().to_xml(capacity)
    }

    /// Finish as a request arriving from `from`
    pub fn build(self, from: SubscriberTarget) -> Request {
        let request = Request::new(self.message_type, from);
        if self.content.children().is_empty() {
            request
        } else {
            request.with_content(self.content)
        }
    }
}

/// Parse a serialized response or notification
pub fn parse_response(payload: &[u8]) -> Result<Response> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| Lwm2mError::MalformedRequest(format!("response is not UTF-8: {}", e)))?;
    Response::from_tree(&TreeNode::from_xml(text)?)
}

/// IDs of the `ID` children directly below `node`'s children named `name`
pub fn child_ids(node: &TreeNode, name: &str) -> Vec<Id> {
    node.children_named(name)
        .filter_map(|c| c.child_named(ID)?.value()?.trim().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_request_shares_prefix() {
        let xml = RequestBuilder::get()
            .path(&Key::resource(3, 0, 1))
            .unwrap()
            .path(&Key::resource(3, 0, 2))
            .unwrap()
            .to_xml(1024)
            .unwrap();
        assert_eq!(
            xml,
            "<Request><Type>Get</Type><Content><Objects><Object><ID>3</ID>\
             <ObjectInstance><ID>0</ID><Resource><ID>1</ID></Resource>\
             <Resource><ID>2</ID></Resource></ObjectInstance></Object></Objects>\
             </Content></Request>"
        );
    }

    #[test]
    fn test_set_with_create() {
        let request = RequestBuilder::set()
            .create(&Key::instance(1000, 4))
            .unwrap()
            .value(&Key::resource(1000, 4, 0), "x")
            .unwrap()
            .value(&Key::resource(1000, 4, 0), "y")
            .unwrap()
            .build(SubscriberTarget::new("127.0.0.1:1".parse().unwrap(), 0));

        let content = request.content.unwrap();
        let resource = content
            .navigate("Content/Objects/Object/ObjectInstance/Resource")
            .unwrap();
        assert_eq!(resource.child_named(VALUE).and_then(TreeNode::value), Some("y"));
        let instance = content
            .navigate("Content/Objects/Object/ObjectInstance")
            .unwrap();
        assert!(instance.child_named(CREATE).is_some());
    }

    #[test]
    fn test_rejects_bad_paths() {
        assert!(RequestBuilder::get().path(&Key::default()).is_err());
        assert!(RequestBuilder::set().value(&Key::instance(3, 0), "1").is_err());
    }

    #[test]
    fn test_connect_has_no_content() {
        let xml = RequestBuilder::connect().to_xml(128).unwrap();
        assert_eq!(xml, "<Request><Type>Connect</Type></Request>");
    }

    #[test]
    fn test_parse_response() {
        let response = parse_response(
            b"<Response><Type>Set</Type><Code>200</Code><Content><Objects/></Content></Response>",
        )
        .unwrap();
        assert_eq!(response.message_type, MessageType::Set);
        assert!(parse_response(b"<Request/>").is_err());
    }
}
