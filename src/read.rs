//! Populating response trees from the store
//!
//! Get responses and change notification snapshots share these routines.
//! Every level walks the store with its ascending cursor, so values appear in
//! ID order.

use tracing::warn;

use crate::codec::{ResourceType, encode_value};
use crate::ipc_types::ErrorCode;
use crate::key::{Id, IdRange, Key, Level};
use crate::objects_tree::{
    OBJECT_INSTANCE, RESOURCE, RESOURCE_INSTANCE, VALUE, find_or_create_child,
    find_or_create_response_node, new_objects_tree,
};
use crate::store::Store;
use crate::tree::TreeNode;

/// Append a `Value` node holding one resource instance
///
/// Resources typed `None` and zero-length values read as an empty value.
pub fn add_resource_instance<S: Store + ?Sized>(
    store: &S,
    key: &Key,
    node: &mut TreeNode,
) -> ErrorCode {
    let (Some(object_id), Some(resource_id)) = (key.object_id, key.resource_id) else {
        return ErrorCode::PathNotFound;
    };
    let data_type = store
        .definitions()
        .resource_type(object_id, resource_id)
        .unwrap_or_default();

    let text = if data_type == ResourceType::None {
        String::new()
    } else {
        let Some(bytes) = store.value(key) else {
            return ErrorCode::PathNotFound;
        };
        if bytes.is_empty() {
            String::new()
        } else {
            match encode_value(data_type, bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!(key = %key, error = %e, "failed to encode value");
                    return ErrorCode::Internal;
                }
            }
        }
    };

    node.add_child(TreeNode::with_value(VALUE, text));
    ErrorCode::Success
}

/// Add a resource's values, keeping only resource instances inside `range`
pub fn add_resource<S: Store + ?Sized>(
    store: &S,
    object_id: Id,
    instance_id: Id,
    resource_id: Id,
    node: &mut TreeNode,
    range: Option<IdRange>,
) -> ErrorCode {
    if !store.definitions().is_multi_instance(object_id, resource_id) {
        let key = Key::resource(object_id, instance_id, resource_id);
        return add_resource_instance(store, &key, node);
    }

    let mut cursor = None;
    while let Some(ri) = store.next_resource_instance_id(object_id, instance_id, resource_id, cursor)
    {
        cursor = Some(ri);
        if range.is_some_and(|r| !r.contains(ri)) {
            continue;
        }
        let child = find_or_create_child(node, RESOURCE_INSTANCE, ri);
        let key = Key::resource_instance(object_id, instance_id, resource_id, ri);
        let result = add_resource_instance(store, &key, child);
        if !result.is_success() {
            return result;
        }
    }
    ErrorCode::Success
}

/// Add every resource of an instance
pub fn add_resources<S: Store + ?Sized>(
    store: &S,
    object_id: Id,
    instance_id: Id,
    node: &mut TreeNode,
) -> ErrorCode {
    let mut cursor = None;
    while let Some(resource_id) = store.next_resource_id(object_id, instance_id, cursor) {
        cursor = Some(resource_id);
        let child = find_or_create_child(node, RESOURCE, resource_id);
        let result = add_resource(store, object_id, instance_id, resource_id, child, None);
        if !result.is_success() {
            return result;
        }
    }
    ErrorCode::Success
}

/// Add every instance of an object
pub fn add_object_instances<S: Store + ?Sized>(
    store: &S,
    object_id: Id,
    node: &mut TreeNode,
) -> ErrorCode {
    let mut cursor = None;
    while let Some(instance_id) = store.next_instance_id(object_id, cursor) {
        cursor = Some(instance_id);
        let child = find_or_create_child(node, OBJECT_INSTANCE, instance_id);
        let result = add_resources(store, object_id, instance_id, child);
        if !result.is_success() {
            return result;
        }
    }
    ErrorCode::Success
}

/// Populate `node`, the response node mirroring `key`, with everything
/// reachable beneath the key
pub fn populate<S: Store + ?Sized>(
    store: &S,
    key: &Key,
    node: &mut TreeNode,
    range: Option<IdRange>,
) -> ErrorCode {
    match (key.level(), key.object_id, key.instance_id, key.resource_id) {
        (Level::ResourceInstance, ..) => add_resource_instance(store, key, node),
        (Level::Resource, Some(o), Some(i), Some(r)) => add_resource(store, o, i, r, node, range),
        (Level::Instance, Some(o), Some(i), _) => add_resources(store, o, i, node),
        (Level::Object, Some(o), _, _) => add_object_instances(store, o, node),
        _ => ErrorCode::PathNotFound,
    }
}

/// Build an `Objects` tree holding the current contents beneath `key`
pub fn snapshot<S: Store + ?Sized>(store: &S, key: &Key) -> TreeNode {
    let mut objects = new_objects_tree();
    if let Some(node) = find_or_create_response_node(&mut objects, key) {
        populate(store, key, node, None);
    }
    objects
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::definitions::{DefinitionRegistry, Operations, ResourceDefinition, ResourceHandler};
    use crate::ipc_types::Origin;
    use crate::object_node::{InstanceNode, ObjectNode, ResourceNode};
    use crate::objects_tree::node_id;
    use crate::store::MemoryStore;

    fn store() -> MemoryStore {
        let mut defs = DefinitionRegistry::new();
        defs.register_object_type("Meter", 2000, 4, 0).unwrap();
        for (id, data_type, max) in [
            (0, ResourceType::Integer, 1),
            (1, ResourceType::String, 10),
            (2, ResourceType::None, 1),
        ] {
            defs.register_resource_type(
                2000,
                ResourceDefinition {
                    id,
                    name: format!("R{}", id),
                    data_type,
                    min_instances: 1,
                    max_instances: max,
                    operations: Operations::READ | Operations::WRITE,
                    handler: ResourceHandler::Storage,
                    default_value: None,
                },
            )
            .unwrap();
        }

        let mut store = MemoryStore::new(defs);
        let object = ObjectNode {
            id: 2000,
            create: false,
            instances: vec![InstanceNode {
                id: Some(0),
                create: true,
                resources: vec![
                    ResourceNode {
                        id: 0,
                        create: false,
                        values: BTreeMap::from([(0, 5i64.to_le_bytes().to_vec())]),
                    },
                    ResourceNode {
                        id: 1,
                        create: false,
                        values: (0..5).map(|ri| (ri, format!("v{}", ri).into_bytes())).collect(),
                    },
                ],
            }],
        };
        assert!(store.write_object(Origin::Client, &object, false).result.is_success());
        store
    }

    fn values(node: &TreeNode) -> Vec<(Id, String)> {
        node.children_named(RESOURCE_INSTANCE)
            .map(|ri| {
                let value = ri.child_named(VALUE).and_then(TreeNode::value).unwrap_or("");
                (node_id(ri).unwrap(), value.to_string())
            })
            .collect()
    }

    #[test]
    fn test_range_filter() {
        let store = store();
        let mut node = TreeNode::new(RESOURCE);
        let result = add_resource(&store, 2000, 0, 1, &mut node, IdRange::new(2, 4));
        assert_eq!(result, ErrorCode::Success);
        assert_eq!(values(&node), vec![(2, "v2".into()), (3, "v3".into())]);
    }

    #[test]
    fn test_single_and_typeless_values() {
        let store = store();
        let mut node = TreeNode::new(RESOURCE);
        add_resource(&store, 2000, 0, 0, &mut node, None);
        assert_eq!(node.child_named(VALUE).and_then(TreeNode::value), Some("5"));

        let mut node = TreeNode::new(RESOURCE);
        add_resource(&store, 2000, 0, 2, &mut node, None);
        assert_eq!(node.child_named(VALUE).and_then(TreeNode::value), Some(""));
    }

    #[test]
    fn test_snapshot_of_instance() {
        let store = store();
        let objects = snapshot(&store, &Key::instance(2000, 0));
        let instance = objects
            .navigate("Objects/Object/ObjectInstance")
            .unwrap();
        let ids: Vec<Id> = instance
            .children_named(RESOURCE)
            .filter_map(node_id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
