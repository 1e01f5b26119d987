//! Object/Instance/Resource/ResourceInstance addressing
//!
//! A [`Key`] names a node at any depth of the object model. Each level is
//! either a concrete ID or unspecified (`None`); a key is well-formed only
//! when no unspecified level precedes a specified one.

use std::fmt;
use std::str::FromStr;

use crate::error::{Lwm2mError, Result};

/// Object, instance, resource and resource instance identifier
pub type Id = u16;

/// Largest addressable ID at any level
pub const MAX_ID: Id = Id::MAX;

/// Depth of a well-formed key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Root,
    Object,
    Instance,
    Resource,
    ResourceInstance,
}

/// A 4-level address into the object model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub object_id: Option<Id>,
    pub instance_id: Option<Id>,
    pub resource_id: Option<Id>,
    pub resource_instance_id: Option<Id>,
}

impl Key {
    pub fn object(object_id: Id) -> Self {
        Self {
            object_id: Some(object_id),
            ..Self::default()
        }
    }

    pub fn instance(object_id: Id, instance_id: Id) -> Self {
        Self {
            instance_id: Some(instance_id),
            ..Self::object(object_id)
        }
    }

    pub fn resource(object_id: Id, instance_id: Id, resource_id: Id) -> Self {
        Self {
            resource_id: Some(resource_id),
            ..Self::instance(object_id, instance_id)
        }
    }

    pub fn resource_instance(
        object_id: Id,
        instance_id: Id,
        resource_id: Id,
        resource_instance_id: Id,
    ) -> Self {
        Self {
            resource_instance_id: Some(resource_instance_id),
            ..Self::resource(object_id, instance_id, resource_id)
        }
    }

    fn levels(&self) -> [Option<Id>; 4] {
        [
            self.object_id,
            self.instance_id,
            self.resource_id,
            self.resource_instance_id,
        ]
    }

    /// No unspecified level precedes a specified one
    pub fn is_well_formed(&self) -> bool {
        let levels = self.levels();
        let depth = levels.iter().take_while(|l| l.is_some()).count();
        levels[depth..].iter().all(Option::is_none)
    }

    /// The most specific level named by this key
    pub fn level(&self) -> Level {
        match self.levels().iter().take_while(|l| l.is_some()).count() {
            0 => Level::Root,
            1 => Level::Object,
            2 => Level::Instance,
            3 => Level::Resource,
            _ => Level::ResourceInstance,
        }
    }

    /// True when `other` is this key or lies beneath it
    pub fn contains(&self, other: &Key) -> bool {
        self.levels()
            .iter()
            .zip(other.levels().iter())
            .all(|(mine, theirs)| mine.is_none() || mine == theirs)
    }

    /// Drop the resource instance level
    pub fn resource_key(&self) -> Self {
        Self {
            resource_instance_id: None,
            ..*self
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut any = false;
        for id in self.levels().iter().map_while(|l| *l) {
            write!(f, "/{}", id)?;
            any = true;
        }
        if !any {
            f.write_str("/")?;
        }
        Ok(())
    }
}

impl FromStr for Key {
    type Err = Lwm2mError;

    fn from_str(s: &str) -> Result<Self> {
        let mut levels = [None; 4];
        let segments: Vec<&str> = s.split('/').filter(|p| !p.is_empty()).collect();
        if segments.len() > levels.len() {
            return Err(Lwm2mError::InvalidPath(s.to_string()));
        }
        for (slot, segment) in levels.iter_mut().zip(&segments) {
            let id = segment
                .parse::<Id>()
                .map_err(|_| Lwm2mError::InvalidPath(s.to_string()))?;
            *slot = Some(id);
        }
        let [object_id, instance_id, resource_id, resource_instance_id] = levels;
        Ok(Self {
            object_id,
            instance_id,
            resource_id,
            resource_instance_id,
        })
    }
}

/// Half-open `[start, end_exclusive)` filter over resource instance IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    start: u32,
    end_exclusive: u32,
}

impl IdRange {
    /// Validate raw bounds: `0 <= start < end_exclusive <= MAX_ID + 1`
    pub fn new(start: i64, end_exclusive: i64) -> Option<Self> {
        let limit = i64::from(MAX_ID) + 1;
        if start < 0 || end_exclusive <= start || end_exclusive > limit {
            return None;
        }
        Some(Self {
            start: u32::try_from(start).ok()?,
            end_exclusive: u32::try_from(end_exclusive).ok()?,
        })
    }

    pub fn contains(&self, id: Id) -> bool {
        (self.start..self.end_exclusive).contains(&u32::from(id))
    }
}
