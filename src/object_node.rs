//! Typed object subtree used for writes
//!
//! A Set request is converted one `Object` at a time into an [`ObjectNode`]
//! so that permission checking and the store write treat the whole object as
//! a single unit.

use std::collections::BTreeMap;

use crate::codec::{ResourceType, decode_value};
use crate::definitions::DefinitionRegistry;
use crate::error::{Lwm2mError, Result};
use crate::key::Id;
use crate::objects_tree::{
    CREATE, ID, OBJECT, OBJECT_INSTANCE, RESOURCE, RESOURCE_INSTANCE, VALUE, node_id,
};
use crate::tree::TreeNode;

/// An object and the instances a write touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNode {
    pub id: Id,
    pub create: bool,
    pub instances: Vec<InstanceNode>,
}

/// An object instance; `id` is `None` when the store should pick one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceNode {
    pub id: Option<Id>,
    pub create: bool,
    pub resources: Vec<ResourceNode>,
}

/// A resource and the resource instance values to write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    pub id: Id,
    pub create: bool,
    pub values: BTreeMap<Id, Vec<u8>>,
}

impl ObjectNode {
    /// Convert a request `Object` node, decoding values with the registered
    /// data types. Values of undefined resources are kept as raw text so the
    /// store can report the path as missing.
    pub fn from_request_tree(node: &TreeNode, definitions: &DefinitionRegistry) -> Result<Self> {
        if node.name() != OBJECT {
            return Err(malformed(format!("expected <{}>, found <{}>", OBJECT, node.name())));
        }
        let object_id = required_id(node)?;

        let mut object = ObjectNode {
            id: object_id,
            create: node.child_named(CREATE).is_some(),
            instances: Vec::new(),
        };

        for instance_node in node.children_named(OBJECT_INSTANCE) {
            let id = match instance_node.child_named(ID) {
                Some(_) => Some(required_id(instance_node)?),
                None => None,
            };
            let mut instance = InstanceNode {
                id,
                create: instance_node.child_named(CREATE).is_some(),
                resources: Vec::new(),
            };

            for resource_node in instance_node.children_named(RESOURCE) {
                let resource_id = required_id(resource_node)?;
                let data_type = definitions
                    .resource_type(object_id, resource_id)
                    .unwrap_or(ResourceType::String);
                instance
                    .resources
                    .push(parse_resource(resource_node, resource_id, data_type)?);
            }
            object.instances.push(instance);
        }

        if object.instances.iter().filter(|i| i.id.is_none()).count() > 1 {
            return Err(malformed(format!(
                "object {} names more than one instance without an ID",
                object_id
            )));
        }
        Ok(object)
    }
}

fn parse_resource(node: &TreeNode, id: Id, data_type: ResourceType) -> Result<ResourceNode> {
    let mut values = BTreeMap::new();
    if let Some(value) = node.child_named(VALUE) {
        values.insert(0, decode_text(data_type, value.value().unwrap_or(""))?);
    }
    for instance in node.children_named(RESOURCE_INSTANCE) {
        let instance_id = required_id(instance)?;
        let text = instance
            .child_named(VALUE)
            .and_then(TreeNode::value)
            .unwrap_or("");
        values.insert(instance_id, decode_text(data_type, text)?);
    }

    Ok(ResourceNode {
        id,
        create: node.child_named(CREATE).is_some(),
        values,
    })
}

/// Empty text is an empty value for every data type, as a Get reports it
fn decode_text(data_type: ResourceType, text: &str) -> Result<Vec<u8>> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    decode_value(data_type, text)
}

fn required_id(node: &TreeNode) -> Result<Id> {
    node_id(node).ok_or_else(|| malformed(format!("<{}> has no valid ID", node.name())))
}

fn malformed(message: String) -> Lwm2mError {
    Lwm2mError::MalformedRequest(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{Operations, ResourceDefinition, ResourceHandler};

    fn registry() -> DefinitionRegistry {
        let mut registry = DefinitionRegistry::new();
        registry.register_object_type("Test", 1000, 4, 0).unwrap();
        registry
            .register_resource_type(
                1000,
                ResourceDefinition {
                    id: 1,
                    name: "Counter".into(),
                    data_type: ResourceType::Integer,
                    min_instances: 0,
                    max_instances: 1,
                    operations: Operations::READ | Operations::WRITE,
                    handler: ResourceHandler::Storage,
                    default_value: None,
                },
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_parse_set_object() {
        let xml = "<Object><ID>1000</ID><ObjectInstance><Create/><Resource><ID>1</ID>\
            <Value>12</Value></Resource></ObjectInstance></Object>";
        let node = TreeNode::from_xml(xml).unwrap();
        let object = ObjectNode::from_request_tree(&node, &registry()).unwrap();

        assert_eq!(object.id, 1000);
        assert_eq!(object.instances.len(), 1);
        assert!(object.instances[0].create);
        assert_eq!(object.instances[0].id, None);
        let resource = &object.instances[0].resources[0];
        assert_eq!(resource.values[&0], 12i64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_parse_rejects_bad_values_and_ids() {
        let bad_value = "<Object><ID>1000</ID><ObjectInstance><ID>0</ID><Resource><ID>1</ID>\
            <Value>twelve</Value></Resource></ObjectInstance></Object>";
        let node = TreeNode::from_xml(bad_value).unwrap();
        assert!(ObjectNode::from_request_tree(&node, &registry()).is_err());

        let no_id = TreeNode::from_xml("<Object><ObjectInstance/></Object>").unwrap();
        assert!(ObjectNode::from_request_tree(&no_id, &registry()).is_err());
    }

    #[test]
    fn test_parse_empty_value() {
        let xml = "<Object><ID>1000</ID><ObjectInstance><ID>0</ID><Resource><ID>1</ID>\
            <Value></Value></Resource></ObjectInstance></Object>";
        let node = TreeNode::from_xml(xml).unwrap();
        let object = ObjectNode::from_request_tree(&node, &registry()).unwrap();
        assert_eq!(object.instances[0].resources[0].values[&0], Vec::<u8>::new());
    }

    #[test]
    fn test_parse_rejects_ambiguous_creates() {
        let xml = "<Object><ID>1000</ID><ObjectInstance><Create/></ObjectInstance>\
            <ObjectInstance><Create/></ObjectInstance></Object>";
        let node = TreeNode::from_xml(xml).unwrap();
        assert!(ObjectNode::from_request_tree(&node, &registry()).is_err());
    }
}
