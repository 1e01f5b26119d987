//! Resource store contract and in-memory implementation
//!
//! The request engine never owns entity storage; it addresses the live tree
//! through the [`Store`] trait by key. Enumeration cursors take the last seen
//! ID and return the next strictly greater existing ID, so walking a level
//! always yields ascending order.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::ops::Bound::{Excluded, Unbounded};

use tracing::debug;

use crate::definitions::{DefinitionRegistry, ObjectDefinition, ResourceDefinition};
use crate::error::{Lwm2mError, Result};
use crate::ipc_types::{Origin, ResultCode, SubscriberTarget};
use crate::key::{Id, Key, Level, MAX_ID};
use crate::object_node::{InstanceNode, ObjectNode};

/// Handle returned by [`Store::observe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObservationId(pub u64);

/// A change to an observed path, queued for the notification pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// The observed key (not necessarily the exact path written)
    pub key: Key,
    /// Success codes carry a snapshot; failures are delivered without content
    pub result: ResultCode,
    pub target: SubscriberTarget,
}

/// Result of a structural write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub result: ResultCode,
    /// Instance generated for a request that named none
    pub created_instance: Option<Id>,
}

impl WriteOutcome {
    fn failed(result: ResultCode) -> Self {
        Self {
            result,
            created_instance: None,
        }
    }
}

/// Storage contract used by the request engine
pub trait Store {
    fn definitions(&self) -> &DefinitionRegistry;

    fn definitions_mut(&mut self) -> &mut DefinitionRegistry;

    /// Whether the entity named by `key` exists; objects exist once defined
    fn exists(&self, key: &Key) -> bool;

    fn next_instance_id(&self, object_id: Id, after: Option<Id>) -> Option<Id>;

    fn next_resource_id(&self, object_id: Id, instance_id: Id, after: Option<Id>) -> Option<Id>;

    fn next_resource_instance_id(
        &self,
        object_id: Id,
        instance_id: Id,
        resource_id: Id,
        after: Option<Id>,
    ) -> Option<Id>;

    /// Stored bytes of a resource instance; an unspecified resource instance
    /// level means instance 0
    fn value(&self, key: &Key) -> Option<&[u8]>;

    fn check_write_permissions(
        &self,
        origin: Origin,
        object: &ObjectNode,
        allow_partial: bool,
    ) -> ResultCode;

    /// Write an object subtree, creating instances or resources flagged for
    /// creation. Nothing is written when any part of the subtree is invalid.
    fn write_object(&mut self, origin: Origin, object: &ObjectNode, allow_create: bool)
    -> WriteOutcome;

    fn delete(&mut self, origin: Origin, key: &Key) -> ResultCode;

    /// Register a change observation, one per (address, key)
    fn observe(&mut self, target: SubscriberTarget, key: Key) -> Result<ObservationId>;

    fn cancel_observe(&mut self, address: SocketAddr, key: &Key) -> ResultCode;

    /// Drain change events queued since the last call
    fn take_changes(&mut self) -> Vec<ChangeEvent>;
}

type ResourceData = BTreeMap<Id, Vec<u8>>;
type InstanceData = BTreeMap<Id, ResourceData>;

#[derive(Debug, Clone)]
struct Observation {
    id: ObservationId,
    key: Key,
    target: SubscriberTarget,
}

/// In-memory [`Store`] backed by ordered maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    definitions: DefinitionRegistry,
    objects: BTreeMap<Id, BTreeMap<Id, InstanceData>>,
    observations: Vec<Observation>,
    pending: Vec<ChangeEvent>,
    next_observation: u64,
}

impl MemoryStore {
    /// Create an empty store over the given definitions
    pub fn new(definitions: DefinitionRegistry) -> Self {
        Self {
            definitions,
            ..Self::default()
        }
    }

    /// Number of active change observations
    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }

    fn instance(&self, object_id: Id, instance_id: Id) -> Option<&InstanceData> {
        self.objects.get(&object_id)?.get(&instance_id)
    }

    fn resource(&self, object_id: Id, instance_id: Id, resource_id: Id) -> Option<&ResourceData> {
        self.instance(object_id, instance_id)?.get(&resource_id)
    }

    fn queue_changes(&mut self, changed: &[Key]) {
        for observation in &self.observations {
            if changed.iter().any(|c| observation.key.contains(c)) {
                self.pending.push(ChangeEvent {
                    key: observation.key,
                    result: ResultCode::Changed,
                    target: observation.target,
                });
            }
        }
    }

    fn queue_deleted(&mut self, deleted: &Key) {
        // Objects outlive their instances, so an object-level observer only
        // sees a change.
        let removes = |observed: &Key| {
            deleted.contains(observed)
                && !(deleted.level() == Level::Object && observed.level() == Level::Object)
        };

        let mut kept = Vec::with_capacity(self.observations.len());
        for observation in self.observations.drain(..) {
            if removes(&observation.key) {
                self.pending.push(ChangeEvent {
                    key: observation.key,
                    result: ResultCode::NotFound,
                    target: observation.target,
                });
            } else {
                if observation.key.contains(deleted) || deleted.contains(&observation.key) {
                    self.pending.push(ChangeEvent {
                        key: observation.key,
                        result: ResultCode::Changed,
                        target: observation.target,
                    });
                }
                kept.push(observation);
            }
        }
        self.observations = kept;
    }
}

fn next_after<V>(map: &BTreeMap<Id, V>, after: Option<Id>) -> Option<Id> {
    match after {
        None => map.keys().next().copied(),
        Some(after) => map.range((Excluded(after), Unbounded)).next().map(|(id, _)| *id),
    }
}

fn default_resource(definition: &ResourceDefinition) -> ResourceData {
    match &definition.default_value {
        Some(default) => default.clone(),
        None if definition.is_multi_instance() => BTreeMap::new(),
        None => BTreeMap::from([(0, Vec::new())]),
    }
}

/// Resources present on a freshly created instance
fn default_instance(definition: &ObjectDefinition) -> InstanceData {
    definition
        .resources
        .values()
        .filter(|r| r.is_mandatory() || r.default_value.is_some())
        .map(|r| (r.id, default_resource(r)))
        .collect()
}

struct PlannedInstance<'a> {
    id: Id,
    created: bool,
    node: &'a InstanceNode,
}

/// Validate a write against the current contents without touching them
fn plan_write<'a>(
    definition: &ObjectDefinition,
    existing: Option<&BTreeMap<Id, InstanceData>>,
    object: &'a ObjectNode,
    allow_create: bool,
) -> std::result::Result<Vec<PlannedInstance<'a>>, ResultCode> {
    let stored = |id: Id| existing.is_some_and(|m| m.contains_key(&id));
    let mut count = existing.map_or(0, BTreeMap::len);
    let mut reserved = BTreeSet::new();
    let mut plan = Vec::with_capacity(object.instances.len());

    for node in &object.instances {
        let may_create = allow_create || object.create || node.create;
        let (id, created) = match node.id {
            Some(id) if stored(id) && node.create => return Err(ResultCode::Forbidden),
            Some(id) if stored(id) => (id, false),
            Some(_) if !may_create => return Err(ResultCode::NotFound),
            Some(id) if reserved.contains(&id) => return Err(ResultCode::BadRequest),
            Some(id) => (id, true),
            None if !may_create => return Err(ResultCode::BadRequest),
            None => {
                let free = (0..=MAX_ID).find(|id| !stored(*id) && !reserved.contains(id));
                (free.ok_or(ResultCode::Forbidden)?, true)
            }
        };

        if created {
            if count >= usize::from(definition.max_instances) {
                debug!(object = definition.id, "instance limit reached");
                return Err(ResultCode::Forbidden);
            }
            count += 1;
            reserved.insert(id);
        }

        for resource in &node.resources {
            let resource_def = definition
                .resource(resource.id)
                .ok_or(ResultCode::NotFound)?;
            let stored_values = existing
                .and_then(|m| m.get(&id))
                .and_then(|i| i.get(&resource.id));
            if stored_values.is_none() && !(created || resource.create || allow_create) {
                return Err(ResultCode::NotFound);
            }
            if resource_def.is_multi_instance() {
                // incoming instances merge with what is stored (or the defaults)
                let base = match stored_values {
                    Some(values) => values.keys().copied().collect::<BTreeSet<_>>(),
                    None => default_resource(resource_def).into_keys().collect(),
                };
                let added = resource.values.keys().filter(|ri| !base.contains(ri)).count();
                if base.len() + added > usize::from(resource_def.max_instances) {
                    debug!(
                        object = definition.id,
                        resource = resource.id,
                        "resource instance limit reached"
                    );
                    return Err(ResultCode::BadRequest);
                }
            } else if resource.values.keys().any(|&ri| ri != 0) {
                return Err(ResultCode::BadRequest);
            }
        }

        plan.push(PlannedInstance { id, created, node });
    }
    Ok(plan)
}

impl Store for MemoryStore {
    fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    fn definitions_mut(&mut self) -> &mut DefinitionRegistry {
        &mut self.definitions
    }

    fn exists(&self, key: &Key) -> bool {
        if !key.is_well_formed() {
            return false;
        }
        let Some(object_id) = key.object_id else {
            return false;
        };
        let Some(instance_id) = key.instance_id else {
            return self.definitions.lookup_object(object_id).is_some();
        };
        let Some(resource_id) = key.resource_id else {
            return self.instance(object_id, instance_id).is_some();
        };
        let Some(resource) = self.resource(object_id, instance_id, resource_id) else {
            return false;
        };
        key.resource_instance_id
            .is_none_or(|ri| resource.contains_key(&ri))
    }

    fn next_instance_id(&self, object_id: Id, after: Option<Id>) -> Option<Id> {
        next_after(self.objects.get(&object_id)?, after)
    }

    fn next_resource_id(&self, object_id: Id, instance_id: Id, after: Option<Id>) -> Option<Id> {
        next_after(self.instance(object_id, instance_id)?, after)
    }

    fn next_resource_instance_id(
        &self,
        object_id: Id,
        instance_id: Id,
        resource_id: Id,
        after: Option<Id>,
    ) -> Option<Id> {
        next_after(self.resource(object_id, instance_id, resource_id)?, after)
    }

    fn value(&self, key: &Key) -> Option<&[u8]> {
        let resource = self.resource(key.object_id?, key.instance_id?, key.resource_id?)?;
        resource
            .get(&key.resource_instance_id.unwrap_or(0))
            .map(Vec::as_slice)
    }

    fn check_write_permissions(
        &self,
        origin: Origin,
        object: &ObjectNode,
        allow_partial: bool,
    ) -> ResultCode {
        let Some(definition) = self.definitions.lookup_object(object.id) else {
            return ResultCode::NotFound;
        };

        let mut result = ResultCode::Success;
        let mut any_allowed = false;
        for resource in object.instances.iter().flat_map(|i| &i.resources) {
            let outcome = match definition.resource(resource.id) {
                None => ResultCode::NotFound,
                Some(_) if origin == Origin::Bootstrap => ResultCode::Success,
                Some(r) if !r.operations.contains(crate::definitions::Operations::WRITE) => {
                    ResultCode::MethodNotAllowed
                }
                Some(_) => ResultCode::Success,
            };
            if outcome.is_success() {
                any_allowed = true;
            } else if !allow_partial {
                return outcome;
            } else {
                result = outcome;
            }
        }

        if allow_partial && any_allowed {
            ResultCode::Success
        } else {
            result
        }
    }

    fn write_object(
        &mut self,
        _origin: Origin,
        object: &ObjectNode,
        allow_create: bool,
    ) -> WriteOutcome {
        let Some(definition) = self.definitions.lookup_object(object.id) else {
            return WriteOutcome::failed(ResultCode::NotFound);
        };
        let plan = match plan_write(definition, self.objects.get(&object.id), object, allow_create) {
            Ok(plan) => plan,
            Err(result) => return WriteOutcome::failed(result),
        };

        let mut changed = Vec::new();
        let mut created_instance = None;
        let mut any_created = false;
        let instances = self.objects.entry(object.id).or_default();

        for planned in plan {
            if planned.created {
                instances.insert(planned.id, default_instance(definition));
                changed.push(Key::instance(object.id, planned.id));
                any_created = true;
                if planned.node.id.is_none() {
                    created_instance = Some(planned.id);
                }
            }

            let data = instances.entry(planned.id).or_default();
            for resource in &planned.node.resources {
                let Some(resource_def) = definition.resource(resource.id) else {
                    continue;
                };
                let stored = data
                    .entry(resource.id)
                    .or_insert_with(|| default_resource(resource_def));
                if resource_def.is_multi_instance() {
                    stored.extend(resource.values.clone());
                } else if let Some(value) = resource.values.get(&0) {
                    stored.insert(0, value.clone());
                }
                changed.push(Key::resource(object.id, planned.id, resource.id));
            }
        }

        self.queue_changes(&changed);
        WriteOutcome {
            result: if any_created {
                ResultCode::Created
            } else {
                ResultCode::Changed
            },
            created_instance,
        }
    }

    fn delete(&mut self, origin: Origin, key: &Key) -> ResultCode {
        let Some(object_id) = key.object_id else {
            return ResultCode::BadRequest;
        };
        if !key.is_well_formed() {
            return ResultCode::BadRequest;
        }
        let Some(definition) = self.definitions.lookup_object(object_id) else {
            return ResultCode::NotFound;
        };

        let result = match (key.instance_id, key.resource_id, key.resource_instance_id) {
            (None, _, _) => {
                self.objects.remove(&object_id);
                ResultCode::Deleted
            }
            (Some(instance_id), None, _) => {
                match self.objects.get_mut(&object_id).and_then(|m| m.remove(&instance_id)) {
                    Some(_) => ResultCode::Deleted,
                    None => ResultCode::NotFound,
                }
            }
            (Some(instance_id), Some(resource_id), resource_instance_id) => {
                let resource_def = definition.resource(resource_id);
                let Some(instance) = self
                    .objects
                    .get_mut(&object_id)
                    .and_then(|m| m.get_mut(&instance_id))
                else {
                    return ResultCode::NotFound;
                };
                match (resource_def, resource_instance_id) {
                    (None, _) => ResultCode::NotFound,
                    (Some(_), _) if !instance.contains_key(&resource_id) => ResultCode::NotFound,
                    (Some(def), None) => {
                        if def.is_mandatory() && origin != Origin::Bootstrap {
                            ResultCode::Forbidden
                        } else {
                            instance.remove(&resource_id);
                            ResultCode::Deleted
                        }
                    }
                    (Some(def), Some(_)) if !def.is_multi_instance() => {
                        ResultCode::MethodNotAllowed
                    }
                    (Some(_), Some(ri)) => match instance
                        .get_mut(&resource_id)
                        .and_then(|r| r.remove(&ri))
                    {
                        Some(_) => ResultCode::Deleted,
                        None => ResultCode::NotFound,
                    },
                }
            }
        };

        if result == ResultCode::Deleted {
            self.queue_deleted(key);
        }
        result
    }

    fn observe(&mut self, target: SubscriberTarget, key: Key) -> Result<ObservationId> {
        if !self.exists(&key) {
            return Err(Lwm2mError::InvalidPath(key.to_string()));
        }

        if let Some(existing) = self
            .observations
            .iter_mut()
            .find(|o| o.key == key && o.target.address == target.address)
        {
            existing.target = target;
            return Ok(existing.id);
        }

        self.next_observation += 1;
        let id = ObservationId(self.next_observation);
        self.observations.push(Observation { id, key, target });
        Ok(id)
    }

    fn cancel_observe(&mut self, address: SocketAddr, key: &Key) -> ResultCode {
        let before = self.observations.len();
        self.observations
            .retain(|o| !(o.key == *key && o.target.address == address));
        if self.observations.len() < before {
            ResultCode::Deleted
        } else {
            ResultCode::NotFound
        }
    }

    fn take_changes(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.pending)
    }
}
