//! Objects tree navigation: leaf enumeration, key decoding and response nodes
//!
//! Requests and responses share one shape:
//! `Objects/Object/ObjectInstance/Resource/ResourceInstance`, where every
//! level carries an `ID` child. A request may name several paths at once;
//! each leaf is processed independently.

use crate::ipc_types::ErrorCode;
use crate::key::{Id, Key};
use crate::tree::TreeNode;

pub const OBJECTS: &str = "Objects";
pub const OBJECT: &str = "Object";
pub const OBJECT_INSTANCE: &str = "ObjectInstance";
pub const RESOURCE: &str = "Resource";
pub const RESOURCE_INSTANCE: &str = "ResourceInstance";
pub const ID: &str = "ID";
pub const VALUE: &str = "Value";
pub const CREATE: &str = "Create";
pub const RESULT: &str = "Result";
pub const ERROR: &str = "Error";
pub const ID_RANGE: &str = "IDRange";
pub const START: &str = "Start";
pub const END_EXCLUSIVE: &str = "EndExclusive";

/// Create an empty `Objects` root
pub fn new_objects_tree() -> TreeNode {
    TreeNode::new(OBJECTS)
}

fn is_structural(node: &TreeNode) -> bool {
    matches!(
        node.name(),
        OBJECT | OBJECT_INSTANCE | RESOURCE | RESOURCE_INSTANCE
    )
}

/// The `ID` child of a structural node, if present and in range
pub fn node_id(node: &TreeNode) -> Option<Id> {
    node.child_named(ID)?.value()?.trim().parse().ok()
}

/// A leaf of a request tree together with the key derived from its ancestry
#[derive(Debug, Clone, Copy)]
pub struct Leaf<'a> {
    pub key: Key,
    pub node: &'a TreeNode,
}

/// Depth-first iterator over the leaves of an `Objects` tree
#[derive(Debug)]
pub struct LeafNodes<'a> {
    stack: Vec<(&'a TreeNode, Key)>,
}

/// Enumerate the leaves beneath `objects` in document order
pub fn leaf_nodes(objects: &TreeNode) -> LeafNodes<'_> {
    LeafNodes {
        stack: objects
            .children()
            .iter()
            .rev()
            .filter(|c| is_structural(c))
            .map(|c| (c, Key::default()))
            .collect(),
    }
}

impl<'a> Iterator for LeafNodes<'a> {
    type Item = Leaf<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, parent_key)) = self.stack.pop() {
            let key = extend_key(parent_key, node);

            let before = self.stack.len();
            self.stack.extend(
                node.children()
                    .iter()
                    .rev()
                    .filter(|c| is_structural(c))
                    .map(|c| (c, key)),
            );
            if self.stack.len() == before {
                return Some(Leaf { key, node });
            }
        }
        None
    }
}

fn extend_key(mut key: Key, node: &TreeNode) -> Key {
    let id = node_id(node);
    match node.name() {
        OBJECT => key.object_id = id,
        OBJECT_INSTANCE => key.instance_id = id,
        RESOURCE => key.resource_id = id,
        RESOURCE_INSTANCE => key.resource_instance_id = id,
        _ => {}
    }
    key
}

/// Return the child `name` whose `ID` is `id`, creating it if absent
pub fn find_or_create_child<'a>(parent: &'a mut TreeNode, name: &str, id: Id) -> &'a mut TreeNode {
    let existing = parent
        .children()
        .iter()
        .position(|c| c.name() == name && node_id(c) == Some(id));
    match existing {
        Some(index) => &mut parent.children_mut()[index],
        None => {
            let mut child = TreeNode::new(name);
            child.add_child(TreeNode::with_value(ID, id));
            parent.add_child(child)
        }
    }
}

/// Build (or reuse) the response chain mirroring `key` and return its leaf
///
/// Returns `None` when the key has no object ID.
pub fn find_or_create_response_node<'a>(
    objects: &'a mut TreeNode,
    key: &Key,
) -> Option<&'a mut TreeNode> {
    let mut node = find_or_create_child(objects, OBJECT, key.object_id?);
    let levels = [
        (OBJECT_INSTANCE, key.instance_id),
        (RESOURCE, key.resource_id),
        (RESOURCE_INSTANCE, key.resource_instance_id),
    ];
    for (name, id) in levels {
        let Some(id) = id else { break };
        node = find_or_create_child(node, name, id);
    }
    Some(node)
}

/// Tag a node with a result, replacing any earlier tag
pub fn add_result_tag(node: &mut TreeNode, code: ErrorCode) {
    match node.child_named_mut(RESULT) {
        Some(result) => match result.child_named_mut(ERROR) {
            Some(error) => error.set_value(code.as_str()),
            None => {
                result.add_child(TreeNode::with_value(ERROR, code));
            }
        },
        None => {
            let mut result = TreeNode::new(RESULT);
            result.add_child(TreeNode::with_value(ERROR, code));
            node.add_child(result);
        }
    }
}

/// Tag every structural leaf beneath `node` with the same result
pub fn add_result_tag_to_all_leaf_nodes(node: &mut TreeNode, code: ErrorCode) {
    for child in node.children_mut().iter_mut().filter(|c| is_structural(c)) {
        if child.children().iter().any(is_structural) {
            add_result_tag_to_all_leaf_nodes(child, code);
        } else {
            add_result_tag(child, code);
        }
    }
}

/// Read back the result tag of a response node
pub fn result_tag(node: &TreeNode) -> Option<ErrorCode> {
    node.child_named(RESULT)?
        .child_named(ERROR)?
        .value()
        .and_then(|v| ErrorCode::from_name(v.trim()))
}
