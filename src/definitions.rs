//! Object and resource definitions registry
//!
//! Definitions describe the shape of every object type: its instance
//! cardinality and the resources it carries. Cardinality follows a min/max
//! convention: `max_instances > 1` makes an object or resource a collection,
//! `min_instances > 0` makes it mandatory.

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::codec::{ResourceType, decode_value};
use crate::error::{Lwm2mError, Result};
use crate::key::Id;

bitflags! {
    /// Operations a resource permits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Operations: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl Operations {
    /// Decode an `Access` value from an object definition
    pub fn from_access(access: &str) -> Option<Self> {
        let ops = match access.trim() {
            "None" | "" => Self::empty(),
            "Read" | "R" => Self::READ,
            "Write" | "W" => Self::WRITE,
            "ReadWrite" | "RW" => Self::READ | Self::WRITE,
            "Execute" | "E" => Self::EXECUTE,
            "ReadExecute" | "RE" => Self::READ | Self::EXECUTE,
            "WriteExecute" | "WE" => Self::WRITE | Self::EXECUTE,
            "ReadWriteExecute" | "RWE" => Self::all(),
            _ => return None,
        };
        Some(ops)
    }

    pub fn as_access(self) -> &'static str {
        match (
            self.contains(Self::READ),
            self.contains(Self::WRITE),
            self.contains(Self::EXECUTE),
        ) {
            (false, false, false) => "None",
            (true, false, false) => "Read",
            (false, true, false) => "Write",
            (true, true, false) => "ReadWrite",
            (false, false, true) => "Execute",
            (true, false, true) => "ReadExecute",
            (false, true, true) => "WriteExecute",
            (true, true, true) => "ReadWriteExecute",
        }
    }
}

/// Operation handler bound to a resource when it is registered
///
/// Both variants answer the same two capabilities, execute and create
/// optional resource. Creating an optional resource is a storage concern in
/// both cases; they differ only in what executing the resource does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceHandler {
    /// Plain storage-backed resource, executing it does nothing
    #[default]
    Storage,
    /// Executing the resource notifies every execute subscriber
    ExecuteNotify,
}

impl ResourceHandler {
    /// Handler chosen for a resource with the given operations
    pub fn for_operations(operations: Operations) -> Self {
        if operations.contains(Operations::EXECUTE) {
            Self::ExecuteNotify
        } else {
            Self::Storage
        }
    }
}

/// Default resource instances, keyed by resource instance ID
pub type DefaultValue = BTreeMap<Id, Vec<u8>>;

/// Textual default value as found in an object description
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultValueSpec {
    /// One value, materialized as resource instance 0
    Scalar(String),
    /// Explicit `(id, value)` resource instances
    Array(Vec<(Id, String)>),
}

impl DefaultValueSpec {
    /// Decode through the value codec using the resource's data type
    pub fn materialize(&self, data_type: ResourceType) -> Result<DefaultValue> {
        match self {
            Self::Scalar(text) => Ok(BTreeMap::from([(0, decode_value(data_type, text)?)])),
            Self::Array(items) => items
                .iter()
                .map(|(id, text)| Ok((*id, decode_value(data_type, text)?)))
                .collect(),
        }
    }
}

/// Shape and access rules of one resource type
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDefinition {
    pub id: Id,
    pub name: String,
    pub data_type: ResourceType,
    pub min_instances: u16,
    pub max_instances: u16,
    pub operations: Operations,
    pub handler: ResourceHandler,
    pub default_value: Option<DefaultValue>,
}

impl ResourceDefinition {
    pub fn is_multi_instance(&self) -> bool {
        self.max_instances > 1
    }

    pub fn is_mandatory(&self) -> bool {
        self.min_instances > 0
    }

    pub fn is_executable(&self) -> bool {
        self.operations.contains(Operations::EXECUTE)
    }
}

/// Shape of one object type
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDefinition {
    pub id: Id,
    pub name: String,
    pub min_instances: u16,
    pub max_instances: u16,
    pub resources: BTreeMap<Id, ResourceDefinition>,
}

impl ObjectDefinition {
    pub fn is_multi_instance(&self) -> bool {
        self.max_instances > 1
    }

    pub fn is_mandatory(&self) -> bool {
        self.min_instances > 0
    }

    pub fn resource(&self, resource_id: Id) -> Option<&ResourceDefinition> {
        self.resources.get(&resource_id)
    }
}

/// Registry of every defined object type
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
    objects: BTreeMap<Id, ObjectDefinition>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object type with no resources
    pub fn register_object_type(
        &mut self,
        name: &str,
        object_id: Id,
        max_instances: u16,
        min_instances: u16,
    ) -> Result<()> {
        if self.objects.contains_key(&object_id) {
            return Err(Lwm2mError::DefinitionConflict(format!(
                "object {} already defined",
                object_id
            )));
        }
        check_cardinality(max_instances, min_instances)?;

        self.objects.insert(
            object_id,
            ObjectDefinition {
                id: object_id,
                name: name.to_string(),
                min_instances,
                max_instances,
                resources: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Add a resource type to an already registered object
    pub fn register_resource_type(
        &mut self,
        object_id: Id,
        definition: ResourceDefinition,
    ) -> Result<()> {
        check_cardinality(definition.max_instances, definition.min_instances)?;
        let object = self.objects.get_mut(&object_id).ok_or_else(|| {
            Lwm2mError::DefinitionConflict(format!("object {} is not defined", object_id))
        })?;
        if object.resources.contains_key(&definition.id) {
            return Err(Lwm2mError::DefinitionConflict(format!(
                "resource /{}/{} already defined",
                object_id, definition.id
            )));
        }
        if let Some(default) = &definition.default_value
            && !definition.is_multi_instance()
            && default.keys().any(|&id| id != 0)
        {
            return Err(Lwm2mError::DefinitionConflict(format!(
                "single-instance resource /{}/{} has indexed defaults",
                object_id, definition.id
            )));
        }

        object.resources.insert(definition.id, definition);
        Ok(())
    }

    pub fn lookup_object(&self, object_id: Id) -> Option<&ObjectDefinition> {
        self.objects.get(&object_id)
    }

    pub fn lookup_resource(&self, object_id: Id, resource_id: Id) -> Option<&ResourceDefinition> {
        self.objects.get(&object_id)?.resource(resource_id)
    }

    /// False for undefined resources
    pub fn is_multi_instance(&self, object_id: Id, resource_id: Id) -> bool {
        self.lookup_resource(object_id, resource_id)
            .is_some_and(ResourceDefinition::is_multi_instance)
    }

    pub fn resource_type(&self, object_id: Id, resource_id: Id) -> Option<ResourceType> {
        self.lookup_resource(object_id, resource_id)
            .map(|r| r.data_type)
    }

    /// All object definitions in ascending ID order
    pub fn objects(&self) -> impl Iterator<Item = &ObjectDefinition> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

fn check_cardinality(max_instances: u16, min_instances: u16) -> Result<()> {
    if max_instances == 0 || min_instances > max_instances {
        return Err(Lwm2mError::DefinitionConflict(format!(
            "invalid cardinality min={} max={}",
            min_instances, max_instances
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(id: Id, max: u16, operations: Operations) -> ResourceDefinition {
        ResourceDefinition {
            id,
            name: format!("Res{}", id),
            data_type: ResourceType::String,
            min_instances: 0,
            max_instances: max,
            operations,
            handler: ResourceHandler::for_operations(operations),
            default_value: None,
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = DefinitionRegistry::new();
        registry.register_object_type("Device", 3, 1, 1).unwrap();
        registry
            .register_resource_type(3, resource(0, 1, Operations::READ))
            .unwrap();
        registry
            .register_resource_type(3, resource(7, 8, Operations::READ))
            .unwrap();

        assert!(registry.lookup_object(3).unwrap().is_mandatory());
        assert!(!registry.lookup_object(3).unwrap().is_multi_instance());
        assert!(registry.is_multi_instance(3, 7));
        assert!(!registry.is_multi_instance(3, 0));
        assert!(!registry.is_multi_instance(3, 99));
        assert_eq!(registry.resource_type(3, 0), Some(ResourceType::String));
    }

    #[test]
    fn test_conflicts_rejected() {
        let mut registry = DefinitionRegistry::new();
        registry.register_object_type("Device", 3, 1, 1).unwrap();
        assert!(registry.register_object_type("Again", 3, 1, 0).is_err());
        assert!(registry.register_object_type("Zero", 4, 0, 0).is_err());
        assert!(registry.register_object_type("Inverted", 5, 1, 2).is_err());

        registry
            .register_resource_type(3, resource(1, 1, Operations::READ))
            .unwrap();
        assert!(
            registry
                .register_resource_type(3, resource(1, 1, Operations::WRITE))
                .is_err()
        );
        assert!(
            registry
                .register_resource_type(9, resource(1, 1, Operations::READ))
                .is_err()
        );
    }

    #[test]
    fn test_handler_binding() {
        assert_eq!(
            ResourceHandler::for_operations(Operations::EXECUTE),
            ResourceHandler::ExecuteNotify
        );
        assert_eq!(
            ResourceHandler::for_operations(Operations::READ | Operations::WRITE),
            ResourceHandler::Storage
        );
    }

    #[test]
    fn test_access_strings() {
        assert_eq!(
            Operations::from_access("ReadWrite"),
            Some(Operations::READ | Operations::WRITE)
        );
        assert_eq!(Operations::from_access("E"), Some(Operations::EXECUTE));
        assert_eq!(Operations::from_access("Sometimes"), None);
        assert_eq!((Operations::READ | Operations::EXECUTE).as_access(), "ReadExecute");
    }

    #[test]
    fn test_default_materialization() {
        let scalar = DefaultValueSpec::Scalar("7".into());
        let values = scalar.materialize(ResourceType::Integer).unwrap();
        assert_eq!(values.get(&0), Some(&7i64.to_le_bytes().to_vec()));

        let array = DefaultValueSpec::Array(vec![(0, "A".into()), (2, "B".into())]);
        let values = array.materialize(ResourceType::String).unwrap();
        assert_eq!(values.keys().copied().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(values[&2], b"B".to_vec());

        let bad = DefaultValueSpec::Scalar("x".into());
        assert!(bad.materialize(ResourceType::Integer).is_err());
    }
}
