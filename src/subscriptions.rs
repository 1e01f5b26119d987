//! Subscription engine
//!
//! Two independent delivery paths:
//! - execute subscriptions, an engine-owned list fanning one notification out
//!   to every subscriber of a resource when it is executed
//! - change observations, registered with the store and delivered when
//!   [`RequestHandler::process_changes`] drains the store's change queue

use tracing::{debug, warn};

use crate::codec::encode_opaque;
use crate::handler::RequestHandler;
use crate::ipc_types::{
    ErrorCode, MessageType, Request, Response, ResultCode, SubscribeKind, SubscriberTarget,
};
use crate::key::Key;
use crate::objects_tree::{
    VALUE, add_result_tag, find_or_create_response_node, leaf_nodes, new_objects_tree,
};
use crate::read::snapshot;
use crate::store::{ChangeEvent, Store};
use crate::tree::TreeNode;

/// One subscriber to a resource's execute events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteSubscription {
    pub key: Key,
    pub target: SubscriberTarget,
}

/// Execute subscriptions in registration order
///
/// Several entries may share a key, and even a (key, target) pair; each entry
/// receives its own notification.
#[derive(Debug, Clone, Default)]
pub struct ExecuteSubscriptions {
    entries: Vec<ExecuteSubscription>,
}

impl ExecuteSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: Key, target: SubscriberTarget) {
        self.entries.push(ExecuteSubscription { key, target });
    }

    /// Remove every entry for (key, target); false when none matched
    pub fn remove(&mut self, key: &Key, target: &SubscriberTarget) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.key == *key && e.target == *target));
        self.entries.len() < before
    }

    /// Subscribers of `key`, in registration order
    pub fn matching<'a>(&'a self, key: &'a Key) -> impl Iterator<Item = &'a ExecuteSubscription> + 'a {
        self.entries.iter().filter(move |e| e.key == *key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Store> RequestHandler<S> {
    /// Handle a Subscribe request
    pub(crate) fn handle_subscribe(&mut self, request: &Request) -> Response {
        let mut response_objects = new_objects_tree();

        if let Some(objects) = Self::request_objects(request) {
            for leaf in leaf_nodes(objects) {
                let key = leaf.key.resource_key();
                let Some(node) = Self::response_leaf(&mut response_objects, &key) else {
                    return Response::new(MessageType::Subscribe, ResultCode::BadRequest);
                };

                if !self.store.exists(&key) {
                    debug!(key = %key, "subscribe target does not exist");
                    add_result_tag(node, ErrorCode::PathNotFound);
                    continue;
                }

                let Some(kind) = SubscribeKind::ALL
                    .into_iter()
                    .find(|k| leaf.node.find(k.marker()).is_some())
                else {
                    debug!(key = %key, "unknown subscribe type");
                    add_result_tag(node, ErrorCode::IpcError);
                    continue;
                };
                node.add_child(TreeNode::new(kind.marker()));

                let result = match kind {
                    SubscribeKind::Execute => {
                        self.execute_subscriptions.add(key, request.from);
                        ErrorCode::Success
                    }
                    SubscribeKind::Change => match self.store.observe(request.from, key) {
                        Ok(id) => {
                            debug!(key = %key, observation = id.0, "observing");
                            ErrorCode::Success
                        }
                        Err(e) => {
                            debug!(key = %key, error = %e, "failed to observe");
                            ErrorCode::Unspecified
                        }
                    },
                    SubscribeKind::CancelChange => {
                        if self.store.cancel_observe(request.from.address, &key).is_success() {
                            ErrorCode::Success
                        } else {
                            ErrorCode::SubscriptionInvalid
                        }
                    }
                    SubscribeKind::CancelExecute => {
                        let result = self.cancel_execute(&key, &request.from);
                        // the change observation on the same key goes too
                        let change = self.store.cancel_observe(request.from.address, &key);
                        debug!(key = %key, result = %change, "cancelled change observation");
                        result
                    }
                };
                add_result_tag(node, result);
            }
        }

        Response::new(MessageType::Subscribe, ResultCode::Success).with_content(response_objects)
    }

    fn cancel_execute(&mut self, key: &Key, target: &SubscriberTarget) -> ErrorCode {
        let (Some(object_id), Some(resource_id)) = (key.object_id, key.resource_id) else {
            return ErrorCode::PathInvalid;
        };
        match self.store.definitions().lookup_resource(object_id, resource_id) {
            None => ErrorCode::PathNotFound,
            Some(definition) if !definition.is_executable() => ErrorCode::PathInvalid,
            Some(_) if self.execute_subscriptions.remove(key, target) => ErrorCode::Success,
            Some(_) => ErrorCode::SubscriptionInvalid,
        }
    }

    /// Notify every execute subscriber of `key`, in registration order
    ///
    /// Returns the number of notifications delivered. A failed delivery is
    /// logged and does not stop the remaining ones.
    pub fn on_resource_executed(&mut self, key: &Key, arguments: Option<&[u8]>) -> usize {
        let value = arguments.map(encode_opaque).unwrap_or_default();

        let mut objects = new_objects_tree();
        if let Some(resource) = find_or_create_response_node(&mut objects, key) {
            resource.add_child(TreeNode::with_value(VALUE, value));
        }
        let notification = Response::new(MessageType::ExecuteNotification, ResultCode::Success)
            .with_content(objects);

        let targets: Vec<SubscriberTarget> = self
            .execute_subscriptions
            .matching(key)
            .map(|s| s.target)
            .collect();

        let mut delivered = 0;
        for target in targets {
            match self.send(&target, &notification) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(key = %key, target = %target, error = %e, "execute notification failed"),
            }
        }
        delivered
    }

    /// Deliver one change event to its observer
    ///
    /// Success results carry a snapshot of everything beneath the observed
    /// key; failures carry only the code.
    pub fn on_value_changed(&mut self, event: &ChangeEvent) {
        let mut notification = Response::new(MessageType::ChangeNotification, event.result);
        if event.result.is_success() {
            notification = notification.with_content(snapshot(&self.store, &event.key));
        }

        if let Err(e) = self.send(&event.target, &notification) {
            warn!(key = %event.key, target = %event.target, error = %e, "change notification failed");
        }
    }
}
