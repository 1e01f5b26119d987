//! Object descriptions and the definition loader
//!
//! An [`ObjectDescription`] is the textual form of an object type, as sent in
//! a Define request (`ObjectMetadata` trees) or preloaded from a JSON file.
//! Registering it populates the [`DefinitionRegistry`]; the reverse direction
//! builds the `ObjectDefinitions` listing returned on Connect.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::{ResourceType, encode_value};
use crate::definitions::{
    DefaultValueSpec, DefinitionRegistry, ObjectDefinition, Operations, ResourceDefinition,
    ResourceHandler,
};
use crate::error::{Lwm2mError, Result};
use crate::key::Id;
use crate::objects_tree::{ID, RESOURCE_INSTANCE, VALUE};
use crate::tree::TreeNode;

pub const OBJECT_DEFINITIONS: &str = "ObjectDefinitions";
pub const OBJECT_DEFINITION: &str = "ObjectDefinition";
pub const OBJECT_METADATA: &str = "ObjectMetadata";
pub const PROPERTIES: &str = "Properties";
pub const PROPERTY: &str = "Property";

const OBJECT_ID: &str = "ObjectID";
const PROPERTY_ID: &str = "PropertyID";
const SERIALISATION_NAME: &str = "SerialisationName";
const MAXIMUM_INSTANCES: &str = "MaximumInstances";
const MINIMUM_INSTANCES: &str = "MinimumInstances";
const DATA_TYPE: &str = "DataType";
const ACCESS: &str = "Access";
const DEFAULT_VALUE: &str = "DefaultValue";
const DEFAULT_VALUE_ARRAY: &str = "DefaultValueArray";

fn one() -> u16 {
    1
}

fn none_string() -> String {
    "None".to_string()
}

/// Description of an object type and its resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectDescription {
    #[serde(rename = "ObjectID")]
    pub object_id: Id,
    #[serde(default)]
    pub serialisation_name: String,
    #[serde(default = "one")]
    pub maximum_instances: u16,
    #[serde(default)]
    pub minimum_instances: u16,
    #[serde(default)]
    pub properties: Vec<PropertyDescription>,
}

/// Description of one resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PropertyDescription {
    #[serde(rename = "PropertyID")]
    pub property_id: Id,
    #[serde(default)]
    pub serialisation_name: String,
    #[serde(default = "none_string")]
    pub data_type: String,
    #[serde(default = "one")]
    pub maximum_instances: u16,
    #[serde(default)]
    pub minimum_instances: u16,
    #[serde(default = "none_string")]
    pub access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value_array: Option<Vec<DefaultInstance>>,
}

/// One entry of a `DefaultValueArray`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DefaultInstance {
    #[serde(rename = "ID")]
    pub id: Id,
    pub value: String,
}

impl ObjectDescription {
    /// Parse an `ObjectMetadata` (or `ObjectDefinition`) node
    pub fn from_tree(meta: &TreeNode) -> Result<Self> {
        let object_id = parse_field(meta, OBJECT_ID)?.ok_or_else(|| {
            Lwm2mError::MalformedRequest(format!("<{}> has no {}", meta.name(), OBJECT_ID))
        })?;

        let properties = match meta.child_named(PROPERTIES) {
            Some(properties) => properties
                .children_named(PROPERTY)
                .map(PropertyDescription::from_tree)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Self {
            object_id,
            serialisation_name: text_field(meta, SERIALISATION_NAME).unwrap_or_default(),
            maximum_instances: parse_field(meta, MAXIMUM_INSTANCES)?.unwrap_or(1),
            minimum_instances: parse_field(meta, MINIMUM_INSTANCES)?.unwrap_or(0),
            properties,
        })
    }

    /// Describe a registered object type, re-encoding default values as text
    pub fn from_definition(definition: &ObjectDefinition) -> Result<Self> {
        let properties = definition
            .resources
            .values()
            .map(PropertyDescription::from_definition)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            object_id: definition.id,
            serialisation_name: definition.name.clone(),
            maximum_instances: definition.max_instances,
            minimum_instances: definition.min_instances,
            properties,
        })
    }

    /// Register the object type and then each of its resource types
    ///
    /// Registration stops at the first failing resource; resources registered
    /// before it stay in place.
    pub fn register(&self, registry: &mut DefinitionRegistry) -> Result<()> {
        registry.register_object_type(
            &self.serialisation_name,
            self.object_id,
            self.maximum_instances,
            self.minimum_instances,
        )?;
        for property in &self.properties {
            registry.register_resource_type(self.object_id, property.to_definition()?)?;
        }
        Ok(())
    }

    pub fn to_tree(&self) -> TreeNode {
        let mut meta = TreeNode::new(OBJECT_METADATA);
        meta.add_child(TreeNode::with_value(OBJECT_ID, self.object_id));
        meta.add_child(TreeNode::with_value(SERIALISATION_NAME, &self.serialisation_name));
        meta.add_child(TreeNode::with_value(MAXIMUM_INSTANCES, self.maximum_instances));
        meta.add_child(TreeNode::with_value(MINIMUM_INSTANCES, self.minimum_instances));

        let properties = meta.add_child(TreeNode::new(PROPERTIES));
        for property in &self.properties {
            properties.add_child(property.to_tree());
        }
        meta
    }
}

impl PropertyDescription {
    pub fn from_tree(property: &TreeNode) -> Result<Self> {
        let property_id = parse_field(property, PROPERTY_ID)?.ok_or_else(|| {
            Lwm2mError::MalformedRequest(format!("<{}> has no {}", PROPERTY, PROPERTY_ID))
        })?;

        let default_value_array = match property.child_named(DEFAULT_VALUE_ARRAY) {
            Some(array) => Some(
                array
                    .children_named(RESOURCE_INSTANCE)
                    .map(|instance| {
                        let id = parse_field(instance, ID)?.ok_or_else(|| {
                            Lwm2mError::MalformedRequest(format!(
                                "default for property {} has no {}",
                                property_id, ID
                            ))
                        })?;
                        Ok(DefaultInstance {
                            id,
                            value: text_field(instance, VALUE).unwrap_or_default(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        Ok(Self {
            property_id,
            serialisation_name: text_field(property, SERIALISATION_NAME).unwrap_or_default(),
            data_type: text_field(property, DATA_TYPE).unwrap_or_else(none_string),
            maximum_instances: parse_field(property, MAXIMUM_INSTANCES)?.unwrap_or(1),
            minimum_instances: parse_field(property, MINIMUM_INSTANCES)?.unwrap_or(0),
            access: text_field(property, ACCESS).unwrap_or_else(none_string),
            // an empty DefaultValue element still declares a default
            default_value: property
                .child_named(DEFAULT_VALUE)
                .map(|n| n.value().unwrap_or_default().to_string()),
            default_value_array,
        })
    }

    fn from_definition(definition: &ResourceDefinition) -> Result<Self> {
        let mut default_value = None;
        let mut default_value_array = None;
        if let Some(defaults) = &definition.default_value {
            let encoded = defaults
                .iter()
                .map(|(id, bytes)| {
                    Ok(DefaultInstance {
                        id: *id,
                        value: encode_value(definition.data_type, bytes)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            if definition.is_multi_instance() {
                default_value_array = Some(encoded);
            } else {
                default_value = encoded.into_iter().next().map(|d| d.value);
            }
        }

        Ok(Self {
            property_id: definition.id,
            serialisation_name: definition.name.clone(),
            data_type: definition.data_type.as_str().to_string(),
            maximum_instances: definition.max_instances,
            minimum_instances: definition.min_instances,
            access: definition.operations.as_access().to_string(),
            default_value,
            default_value_array,
        })
    }

    /// Decode into a resource definition, binding the handler from the
    /// access flags
    pub fn to_definition(&self) -> Result<ResourceDefinition> {
        let data_type = ResourceType::from_name(&self.data_type).ok_or_else(|| {
            Lwm2mError::DefinitionConflict(format!(
                "property {} has unknown data type '{}'",
                self.property_id, self.data_type
            ))
        })?;
        let operations = Operations::from_access(&self.access).ok_or_else(|| {
            Lwm2mError::DefinitionConflict(format!(
                "property {} has unknown access '{}'",
                self.property_id, self.access
            ))
        })?;

        let spec = match (&self.default_value, &self.default_value_array) {
            (Some(value), _) => Some(DefaultValueSpec::Scalar(value.clone())),
            (None, Some(array)) => Some(DefaultValueSpec::Array(
                array.iter().map(|d| (d.id, d.value.clone())).collect(),
            )),
            (None, None) => None,
        };
        let default_value = spec.map(|s| s.materialize(data_type)).transpose()?;

        Ok(ResourceDefinition {
            id: self.property_id,
            name: self.serialisation_name.clone(),
            data_type,
            min_instances: self.minimum_instances,
            max_instances: self.maximum_instances,
            operations,
            handler: ResourceHandler::for_operations(operations),
            default_value,
        })
    }

    pub fn to_tree(&self) -> TreeNode {
        let mut property = TreeNode::new(PROPERTY);
        property.add_child(TreeNode::with_value(PROPERTY_ID, self.property_id));
        property.add_child(TreeNode::with_value(SERIALISATION_NAME, &self.serialisation_name));
        property.add_child(TreeNode::with_value(DATA_TYPE, &self.data_type));
        property.add_child(TreeNode::with_value(MAXIMUM_INSTANCES, self.maximum_instances));
        property.add_child(TreeNode::with_value(MINIMUM_INSTANCES, self.minimum_instances));
        property.add_child(TreeNode::with_value(ACCESS, &self.access));

        if let Some(value) = &self.default_value {
            property.add_child(TreeNode::with_value(DEFAULT_VALUE, value));
        } else if let Some(array) = &self.default_value_array {
            let node = property.add_child(TreeNode::new(DEFAULT_VALUE_ARRAY));
            for default in array {
                let instance = node.add_child(TreeNode::new(RESOURCE_INSTANCE));
                instance.add_child(TreeNode::with_value(ID, default.id));
                instance.add_child(TreeNode::with_value(VALUE, &default.value));
            }
        }
        property
    }
}

/// The `ObjectMetadata` nodes of a Define request's `Content`
///
/// Accepts `Content/ObjectDefinitions/*` or a single
/// `Content/ObjectMetadata` (also spelled `ObjectDefinition`).
pub fn metadata_nodes(content: &TreeNode) -> Vec<&TreeNode> {
    if let Some(definitions) = content.child_named(OBJECT_DEFINITIONS) {
        return definitions.children().iter().collect();
    }
    content
        .child_named(OBJECT_METADATA)
        .or_else(|| content.child_named(OBJECT_DEFINITION))
        .into_iter()
        .collect()
}

/// Build the `ObjectDefinitions` listing of every registered object
pub fn definitions_tree(registry: &DefinitionRegistry) -> TreeNode {
    let mut definitions = TreeNode::new(OBJECT_DEFINITIONS);
    for object in registry.objects() {
        match ObjectDescription::from_definition(object) {
            Ok(description) => {
                definitions.add_child(description.to_tree());
            }
            Err(e) => warn!(object = object.id, error = %e, "cannot describe object"),
        }
    }
    definitions
}

/// Parse a JSON array of object descriptions
pub fn descriptions_from_json_str(content: &str) -> Result<Vec<ObjectDescription>> {
    Ok(serde_json::from_str(content)?)
}

/// Load a JSON array of object descriptions from a file
pub fn load_descriptions(path: impl AsRef<Path>) -> Result<Vec<ObjectDescription>> {
    let content = fs::read_to_string(path.as_ref())?;
    descriptions_from_json_str(&content)
}

fn text_field(node: &TreeNode, name: &str) -> Option<String> {
    node.child_named(name)?.value().map(|v| v.trim().to_string())
}

fn parse_field<T: FromStr>(node: &TreeNode, name: &str) -> Result<Option<T>> {
    match node.child_named(name).and_then(TreeNode::value) {
        None => Ok(None),
        Some(text) => text.trim().parse().map(Some).map_err(|_| {
            Lwm2mError::MalformedRequest(format!("<{}> has invalid value '{}'", name, text))
        }),
    }
}
