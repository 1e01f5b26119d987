//! IPC Request Handler
//!
//! Transport-agnostic request processing for the client object model. Every
//! request produces exactly one [`Response`]; batched requests record a
//! per-leaf [`ErrorCode`] in the response tree and keep going, and only a
//! structurally invalid request is rejected as a whole with `BadRequest`.

use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_MAX_MESSAGE_LEN;
use crate::definitions::ResourceHandler;
use crate::error::{Lwm2mError, Result};
use crate::ipc_types::{
    ErrorCode, MessageType, Origin, Request, Response, ResultCode, SubscriberTarget,
};
use crate::key::{Id, IdRange, Key, Level};
use crate::loader::{ObjectDescription, definitions_tree, metadata_nodes};
use crate::object_node::ObjectNode;
use crate::objects_tree::{
    END_EXCLUSIVE, ID_RANGE, OBJECT, OBJECT_INSTANCE, OBJECTS, RESOURCE, START,
    add_result_tag, add_result_tag_to_all_leaf_nodes, find_or_create_child,
    find_or_create_response_node, leaf_nodes, new_objects_tree,
};
use crate::read::populate;
use crate::registration::RegistrationFlag;
use crate::store::{MemoryStore, Store};
use crate::subscriptions::ExecuteSubscriptions;
use crate::transport::Transport;
use crate::tree::TreeNode;

/// Main IPC request handler
///
/// Owns the store, the execute subscription list and the transport used for
/// notifications. All state is reached through `&mut self`, so one handler is
/// one exclusive-access domain.
///
/// # Example
/// ```ignore
/// let mut handler = RequestHandler::new(MemoryStore::default(), QueuedTransport::new());
/// let response = handler.handle(&request);
/// handler.process_changes();
/// ```
#[derive(Debug)]
pub struct RequestHandler<S: Store = MemoryStore> {
    pub(crate) store: S,
    pub(crate) execute_subscriptions: ExecuteSubscriptions,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) registration: RegistrationFlag,
    pub(crate) max_message_len: usize,
}

impl<S: Store> RequestHandler<S> {
    /// Create a handler over `store`, delivering notifications via `transport`
    pub fn new(store: S, transport: impl Transport + 'static) -> Self {
        Self {
            store,
            execute_subscriptions: ExecuteSubscriptions::new(),
            transport: Box::new(transport),
            registration: RegistrationFlag::new(),
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    /// Share an existing registration flag
    pub fn with_registration(mut self, registration: RegistrationFlag) -> Self {
        self.registration = registration;
        self
    }

    /// Bound every serialized message to `len` bytes
    pub fn with_max_message_len(mut self, len: usize) -> Self {
        self.max_message_len = len;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn registration(&self) -> &RegistrationFlag {
        &self.registration
    }

    pub fn execute_subscriptions(&self) -> &ExecuteSubscriptions {
        &self.execute_subscriptions
    }

    /// Handle an incoming request
    pub fn handle(&mut self, request: &Request) -> Response {
        debug!(message_type = %request.message_type, from = %request.from, "request");
        match request.message_type {
            MessageType::Connect => self.handle_connect(),
            MessageType::Disconnect => Response::new(MessageType::Disconnect, ResultCode::Success),
            MessageType::Define => self.handle_define(request),
            MessageType::Get => self.handle_get(request),
            MessageType::Set => self.handle_set(request),
            MessageType::Delete => self.handle_delete(request),
            MessageType::Subscribe => self.handle_subscribe(request),
            MessageType::ChangeNotification | MessageType::ExecuteNotification => {
                warn!(message_type = %request.message_type, "notification received as request");
                Response::new(request.message_type, ResultCode::BadRequest)
            }
        }
    }

    /// Handle one raw request datagram and return the serialized reply
    ///
    /// Requests of an unknown type are dropped without a reply.
    pub fn handle_message(
        &mut self,
        payload: &[u8],
        from: SubscriberTarget,
    ) -> Result<Option<Vec<u8>>> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| Lwm2mError::MalformedRequest(format!("request is not UTF-8: {}", e)))?;
        let tree = TreeNode::from_xml(text)?;
        let request = match Request::from_tree(tree, from) {
            Ok(request) => request,
            Err(e) => {
                warn!(from = %from, error = %e, "dropping request");
                return Ok(None);
            }
        };

        let response = self.handle(&request);
        let xml = response.to_xml(self.max_message_len)?;
        Ok(Some(xml.into_bytes()))
    }

    /// Execute a resource on behalf of a server
    ///
    /// The resource must allow `Execute`; its bound handler then runs.
    pub fn execute_resource(&mut self, key: &Key, arguments: Option<&[u8]>) -> ResultCode {
        let (Some(object_id), Some(instance_id), Some(resource_id)) =
            (key.object_id, key.instance_id, key.resource_id)
        else {
            return ResultCode::BadRequest;
        };
        let Some(definition) = self.store.definitions().lookup_resource(object_id, resource_id)
        else {
            return ResultCode::NotFound;
        };
        if !definition.is_executable() {
            return ResultCode::MethodNotAllowed;
        }
        let handler = definition.handler;
        if !self.store.exists(&Key::instance(object_id, instance_id)) {
            return ResultCode::NotFound;
        }

        match handler {
            ResourceHandler::Storage => {}
            ResourceHandler::ExecuteNotify => {
                let key = Key::resource(object_id, instance_id, resource_id);
                let delivered = self.on_resource_executed(&key, arguments);
                debug!(key = %key, delivered, "executed");
            }
        }
        ResultCode::Changed
    }

    /// Deliver every queued change notification, returning how many events
    /// were processed
    pub fn process_changes(&mut self) -> usize {
        let events = self.store.take_changes();
        for event in &events {
            self.on_value_changed(event);
        }
        events.len()
    }

    pub(crate) fn send(&mut self, target: &SubscriberTarget, response: &Response) -> Result<()> {
        let xml = response.to_xml(self.max_message_len)?;
        self.transport.send_to(target, xml.as_bytes())
    }

    /// The `Content/Objects` node of a request
    pub(crate) fn request_objects(request: &Request) -> Option<&TreeNode> {
        request.content.as_ref()?.child_named(OBJECTS)
    }

    /// Response node for a leaf key; `None` when the key cannot address
    /// anything and the whole request must be rejected
    pub(crate) fn response_leaf<'a>(
        objects: &'a mut TreeNode,
        key: &Key,
    ) -> Option<&'a mut TreeNode> {
        if key.object_id.is_none() {
            error!(key = %key, "no object specified");
            return None;
        }
        if !key.is_well_formed() {
            error!(key = %key, "malformed key");
            return None;
        }
        find_or_create_response_node(objects, key)
    }

    fn handle_connect(&self) -> Response {
        Response::new(MessageType::Connect, ResultCode::Success)
            .with_content(definitions_tree(self.store.definitions()))
    }

    fn handle_define(&mut self, request: &Request) -> Response {
        let mut registered = 0;
        let mut rejected = 0;

        if let Some(content) = &request.content {
            for meta in metadata_nodes(content) {
                let outcome = ObjectDescription::from_tree(meta)
                    .and_then(|description| description.register(self.store.definitions_mut()));
                match outcome {
                    Ok(()) => registered += 1,
                    Err(e) => {
                        warn!(error = %e, result = %ResultCode::Forbidden, "object definition rejected");
                        rejected += 1;
                    }
                }
            }
        }

        info!(registered, rejected, "define complete");
        self.registration.mark_stale();
        Response::new(MessageType::Define, ResultCode::Success)
    }

    fn handle_get(&self, request: &Request) -> Response {
        let mut response_objects = new_objects_tree();

        if let Some(objects) = Self::request_objects(request) {
            for leaf in leaf_nodes(objects) {
                let key = leaf.key;
                let Some(node) = Self::response_leaf(&mut response_objects, &key) else {
                    return Response::new(MessageType::Get, ResultCode::BadRequest);
                };

                if !self.store.exists(&key) {
                    debug!(key = %key, "path does not exist");
                    add_result_tag(node, ErrorCode::PathNotFound);
                    continue;
                }

                match key.level() {
                    Level::Resource | Level::ResourceInstance => {
                        let result = match read_id_range(leaf.node) {
                            Ok(range) => populate(&self.store, &key, node, range),
                            Err(code) => {
                                debug!(key = %key, "IDRange out of bounds");
                                code
                            }
                        };
                        add_result_tag(node, result);
                    }
                    _ => {
                        let result = populate(&self.store, &key, node, None);
                        add_result_tag(node, result);
                        add_result_tag_to_all_leaf_nodes(node, result);
                    }
                }
            }
        }

        Response::new(MessageType::Get, ResultCode::Success).with_content(response_objects)
    }

    fn handle_set(&mut self, request: &Request) -> Response {
        let mut response_objects = new_objects_tree();

        if let Some(objects) = Self::request_objects(request) {
            for object_node in objects.children_named(OBJECT) {
                let object = match ObjectNode::from_request_tree(object_node, self.store.definitions())
                {
                    Ok(object) => object,
                    Err(e) => {
                        error!(error = %e, "failed to parse object");
                        return Response::new(MessageType::Set, ResultCode::BadRequest);
                    }
                };

                let mut result = self
                    .store
                    .check_write_permissions(Origin::Client, &object, false);
                let mut created_instance = None;
                if result.is_success() {
                    let outcome = self.store.write_object(Origin::Client, &object, false);
                    result = outcome.result;
                    created_instance = outcome.created_instance;
                }
                debug!(object = object.id, result = %result, "set");

                tag_set_response(&mut response_objects, &object, result, created_instance);
            }
        }

        Response::new(MessageType::Set, ResultCode::Success).with_content(response_objects)
    }

    fn handle_delete(&mut self, request: &Request) -> Response {
        let mut response_objects = new_objects_tree();

        if let Some(objects) = Self::request_objects(request) {
            for leaf in leaf_nodes(objects) {
                let key = leaf.key;
                let Some(node) = Self::response_leaf(&mut response_objects, &key) else {
                    return Response::new(MessageType::Delete, ResultCode::BadRequest);
                };

                let result = self.store.delete(Origin::Client, &key);
                debug!(key = %key, result = %result, "delete");
                add_result_tag(node, result.to_error_code(ErrorCode::CannotDelete));
            }
        }

        Response::new(MessageType::Delete, ResultCode::Success).with_content(response_objects)
    }
}

/// Read an optional `IDRange` filter below a request leaf
fn read_id_range(leaf: &TreeNode) -> std::result::Result<Option<IdRange>, ErrorCode> {
    let Some(range) = leaf.find(ID_RANGE) else {
        return Ok(None);
    };
    let bounds = range.child_integer(START).zip(range.child_integer(END_EXCLUSIVE));
    bounds
        .and_then(|(start, end)| IdRange::new(start, end))
        .map(Some)
        .ok_or(ErrorCode::RangeInvalid)
}

/// Tag the response nodes mirroring one written object
///
/// A failed write tags nodes that asked for creation with `CannotCreate`.
fn tag_set_response(
    response_objects: &mut TreeNode,
    object: &ObjectNode,
    result: ResultCode,
    created_instance: Option<Id>,
) {
    let error = result.to_error_code(ErrorCode::PathInvalid);
    let tag = |create: bool| {
        if !error.is_success() && create {
            ErrorCode::CannotCreate
        } else {
            error
        }
    };

    let response_object = find_or_create_child(response_objects, OBJECT, object.id);
    if object.instances.is_empty() {
        add_result_tag(response_object, tag(object.create));
        return;
    }

    for instance in &object.instances {
        let response_instance = match instance.id.or(created_instance) {
            Some(id) => find_or_create_child(response_object, OBJECT_INSTANCE, id),
            None => response_object.add_child(TreeNode::new(OBJECT_INSTANCE)),
        };
        if instance.resources.is_empty() {
            add_result_tag(response_instance, tag(instance.create));
            continue;
        }
        for resource in &instance.resources {
            let response_resource = find_or_create_child(response_instance, RESOURCE, resource.id);
            add_result_tag(response_resource, tag(resource.create));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ResourceType;
    use crate::definitions::{DefinitionRegistry, Operations, ResourceDefinition};
    use crate::ipc_types::CONTENT;
    use crate::objects_tree::{ID, VALUE, result_tag};
    use crate::request_builder::parse_response;
    use crate::transport::QueuedTransport;

    fn handler() -> (RequestHandler, QueuedTransport) {
        let mut defs = DefinitionRegistry::new();
        defs.register_object_type("Device", 3, 1, 1).unwrap();
        for (id, operations, data_type) in [
            (0, Operations::READ, ResourceType::String),
            (1, Operations::READ | Operations::WRITE, ResourceType::Integer),
            (4, Operations::EXECUTE, ResourceType::None),
        ] {
            defs.register_resource_type(
                3,
                ResourceDefinition {
                    id,
                    name: format!("R{}", id),
                    data_type,
                    min_instances: 1,
                    max_instances: 1,
                    operations,
                    handler: ResourceHandler::for_operations(operations),
                    default_value: None,
                },
            )
            .unwrap();
        }

        let transport = QueuedTransport::new();
        let mut handler = RequestHandler::new(MemoryStore::new(defs), transport.clone());
        let create = ObjectNode {
            id: 3,
            create: false,
            instances: vec![crate::object_node::InstanceNode {
                id: Some(0),
                create: true,
                resources: Vec::new(),
            }],
        };
        handler.store_mut().write_object(Origin::Bootstrap, &create, false);
        (handler, transport)
    }

    fn from() -> SubscriberTarget {
        SubscriberTarget::new("127.0.0.1:5000".parse().unwrap(), 0)
    }

    fn request(message_type: MessageType, objects: &str) -> Request {
        request_from(message_type, objects, from())
    }

    fn request_from(message_type: MessageType, objects: &str, from: SubscriberTarget) -> Request {
        let content = TreeNode::from_xml(&format!("<{0}>{1}</{0}>", CONTENT, objects)).unwrap();
        Request::new(message_type, from).with_content(content)
    }

    fn resource_xml(resource_id: Id, inner: &str) -> String {
        format!(
            "<Objects><Object><ID>3</ID><ObjectInstance><ID>0</ID>\
             <Resource><ID>{}</ID>{}</Resource></ObjectInstance></Object></Objects>",
            resource_id, inner
        )
    }

    fn resource_tag(response: &Response) -> Option<ErrorCode> {
        response
            .content_at("Objects/Object/ObjectInstance/Resource")
            .and_then(result_tag)
    }

    #[test]
    fn test_get_missing_object_is_bad_request() {
        let (mut handler, _) = handler();
        let response = handler.handle(&request(MessageType::Get, "<Objects><Object/></Objects>"));
        assert_eq!(response.code, ResultCode::BadRequest);
        assert!(response.content.is_none());
    }

    #[test]
    fn test_set_then_get() {
        let (mut handler, _) = handler();
        let set = request(
            MessageType::Set,
            "<Objects><Object><ID>3</ID><ObjectInstance><ID>0</ID>\
             <Resource><ID>1</ID><Value>42</Value></Resource></ObjectInstance></Object></Objects>",
        );
        let response = handler.handle(&set);
        let resource = response
            .content_at("Objects/Object/ObjectInstance/Resource")
            .unwrap();
        assert_eq!(result_tag(resource), Some(ErrorCode::Success));

        let get = request(
            MessageType::Get,
            "<Objects><Object><ID>3</ID><ObjectInstance><ID>0</ID>\
             <Resource><ID>1</ID></Resource></ObjectInstance></Object></Objects>",
        );
        let response = handler.handle(&get);
        let resource = response
            .content_at("Objects/Object/ObjectInstance/Resource")
            .unwrap();
        assert_eq!(resource.child_named(VALUE).and_then(TreeNode::value), Some("42"));
    }

    #[test]
    fn test_execute_resource_checks_definition() {
        let (mut handler, _) = handler();
        assert_eq!(
            handler.execute_resource(&Key::resource(3, 0, 1), None),
            ResultCode::MethodNotAllowed
        );
        assert_eq!(
            handler.execute_resource(&Key::resource(3, 0, 9), None),
            ResultCode::NotFound
        );
        assert_eq!(
            handler.execute_resource(&Key::resource(3, 5, 4), None),
            ResultCode::NotFound
        );
        assert_eq!(
            handler.execute_resource(&Key::resource(3, 0, 4), None),
            ResultCode::Changed
        );
    }

    #[test]
    fn test_define_marks_registration_stale() {
        let (mut handler, _) = handler();
        let flag = handler.registration().clone();
        let content = TreeNode::from_xml(
            "<Content><ObjectMetadata><ObjectID>3</ObjectID></ObjectMetadata></Content>",
        )
        .unwrap();
        let response = handler.handle(&Request::new(MessageType::Define, from()).with_content(content));

        // redefining object 3 fails, the response is still a success
        assert_eq!(response.code, ResultCode::Success);
        assert!(flag.is_stale());
    }

    #[test]
    fn test_unknown_type_gets_no_reply() {
        let (mut handler, _) = handler();
        let reply = handler
            .handle_message(b"<Request><Type>Reboot</Type></Request>", from())
            .unwrap();
        assert!(reply.is_none());

        let reply = handler
            .handle_message(b"<Request><Type>Disconnect</Type></Request>", from())
            .unwrap()
            .unwrap();
        assert_eq!(
            String::from_utf8(reply).unwrap(),
            "<Response><Type>Disconnect</Type><Code>200</Code></Response>"
        );
    }

    #[test]
    fn test_small_buffer_fails_serialization() {
        let (handler, _) = handler();
        let mut handler = handler.with_max_message_len(64);
        let result = handler.handle_message(b"<Request><Type>Connect</Type></Request>", from());
        assert!(matches!(result, Err(Lwm2mError::BufferTooSmall { .. })));
    }

    #[test]
    fn test_empty_value_survives_get_set_get() {
        let (mut handler, _) = handler();
        let get = format!(
            "<Request><Type>Get</Type><Content>{}</Content></Request>",
            resource_xml(1, "")
        );

        let read = |handler: &mut RequestHandler| {
            let reply = handler.handle_message(get.as_bytes(), from()).unwrap().unwrap();
            let response = parse_response(&reply).unwrap();
            let resource = response
                .content_at("Objects/Object/ObjectInstance/Resource")
                .unwrap();
            resource
                .child_named(VALUE)
                .and_then(TreeNode::value)
                .unwrap_or_default()
                .to_string()
        };

        let text = read(&mut handler);
        assert_eq!(text, "");

        let set = format!(
            "<Request><Type>Set</Type><Content>{}</Content></Request>",
            resource_xml(1, &format!("<Value>{}</Value>", text))
        );
        let reply = handler.handle_message(set.as_bytes(), from()).unwrap().unwrap();
        let response = parse_response(&reply).unwrap();
        assert_eq!(response.code, ResultCode::Success);
        assert_eq!(resource_tag(&response), Some(ErrorCode::Success));

        assert_eq!(read(&mut handler), text);
    }

    #[test]
    fn test_failed_create_is_cannot_create() {
        let (mut handler, _) = handler();
        let set = request(
            MessageType::Set,
            "<Objects><Object><ID>3</ID><ObjectInstance><ID>1</ID><Create/>\
             </ObjectInstance></Object></Objects>",
        );
        let response = handler.handle(&set);
        let instance = response.content_at("Objects/Object/ObjectInstance").unwrap();
        assert_eq!(instance.child_integer(ID), Some(1));
        assert_eq!(result_tag(instance), Some(ErrorCode::CannotCreate));
        assert!(!handler.store().exists(&Key::instance(3, 1)));
    }

    #[test]
    fn test_refused_delete_is_cannot_delete() {
        let (mut handler, _) = handler();
        let response = handler.handle(&request(MessageType::Delete, &resource_xml(1, "")));
        assert_eq!(resource_tag(&response), Some(ErrorCode::CannotDelete));
        assert!(handler.store().exists(&Key::resource(3, 0, 1)));

        let response = handler.handle(&request(MessageType::Delete, &resource_xml(9, "")));
        assert_eq!(resource_tag(&response), Some(ErrorCode::PathNotFound));
    }

    #[test]
    fn test_subscribe_without_known_marker() {
        let (mut handler, _) = handler();
        for inner in ["", "<SubscribeToEverything/>"] {
            let response = handler.handle(&request(MessageType::Subscribe, &resource_xml(1, inner)));
            assert_eq!(response.code, ResultCode::Success);
            assert_eq!(resource_tag(&response), Some(ErrorCode::IpcError));
        }
        assert!(handler.execute_subscriptions().is_empty());
        assert_eq!(handler.store().observation_count(), 0);
    }

    #[test]
    fn test_cancel_change_without_observation() {
        let (mut handler, _) = handler();
        let cancel = resource_xml(1, "<CancelSubscribeToChange/>");
        let response = handler.handle(&request(MessageType::Subscribe, &cancel));
        assert_eq!(resource_tag(&response), Some(ErrorCode::SubscriptionInvalid));

        let observe = resource_xml(1, "<SubscribeToChange/>");
        handler.handle(&request(MessageType::Subscribe, &observe));
        let response = handler.handle(&request(MessageType::Subscribe, &cancel));
        assert_eq!(resource_tag(&response), Some(ErrorCode::Success));
    }

    #[test]
    fn test_execute_fan_out_skips_failed_delivery() {
        let (mut handler, transport) = handler();
        let subscribers: Vec<SubscriberTarget> = (6001..=6003)
            .map(|port| SubscriberTarget::new(([127, 0, 0, 1], port).into(), 0))
            .collect();
        for target in &subscribers {
            let subscribe = resource_xml(4, "<SubscribeToExecute/>");
            handler.handle(&request_from(MessageType::Subscribe, &subscribe, *target));
        }
        transport.reject(subscribers[1].address);

        let delivered =
            handler.on_resource_executed(&Key::resource(3, 0, 4), Some(&b"go"[..]));
        assert_eq!(delivered, 2);
        let ports: Vec<u16> = transport
            .drain()
            .iter()
            .map(|(target, _)| target.address.port())
            .collect();
        assert_eq!(ports, vec![6001, 6003]);
    }

    #[test]
    fn test_queued_change_outlives_cancel() {
        let (mut handler, transport) = handler();
        handler.handle(&request(
            MessageType::Subscribe,
            &resource_xml(1, "<SubscribeToChange/>"),
        ));
        handler.handle(&request(MessageType::Set, &resource_xml(1, "<Value>5</Value>")));
        handler.handle(&request(
            MessageType::Subscribe,
            &resource_xml(1, "<CancelSubscribeToChange/>"),
        ));

        assert_eq!(handler.process_changes(), 1);
        let sent = transport.drain();
        assert_eq!(sent.len(), 1);
        let notification = parse_response(&sent[0].1).unwrap();
        assert_eq!(notification.message_type, MessageType::ChangeNotification);
        assert_eq!(notification.code, ResultCode::Changed);
        let value = notification
            .content_at("Objects/Object/ObjectInstance/Resource")
            .and_then(|r| r.child_named(VALUE))
            .and_then(TreeNode::value);
        assert_eq!(value, Some("5"));

        handler.handle(&request(MessageType::Set, &resource_xml(1, "<Value>6</Value>")));
        assert_eq!(handler.process_changes(), 0);
    }

    #[test]
    fn test_missing_object_id_after_valid_leaf_rejects_batch() {
        let (mut handler, _) = handler();
        let objects = "<Objects><Object><ID>3</ID><ObjectInstance><ID>0</ID></ObjectInstance>\
             </Object><Object><ObjectInstance><ID>0</ID></ObjectInstance></Object></Objects>";
        for message_type in [MessageType::Get, MessageType::Subscribe, MessageType::Delete] {
            let response = handler.handle(&request(message_type, objects));
            assert_eq!(response.code, ResultCode::BadRequest);
            assert!(response.content.is_none());
        }
    }
}
