use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::addr::ResourceId;
use crate::graph::ResourceGraph;

/// What currently exists in the remote system for one declared id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedInstance {
    pub resource_id: ResourceId,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub remote_identifier: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    pub exists: bool,
    /// Dependencies recorded when the instance was last written. Used to
    /// order deletes of resources that are no longer declared.
    #[serde(default)]
    pub depends_on: BTreeSet<ResourceId>,
}

impl ObservedInstance {
    pub fn absent(resource_id: ResourceId) -> Self {
        Self {
            resource_id,
            resource_type: String::new(),
            remote_identifier: None,
            attributes: BTreeMap::new(),
            exists: false,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn present(
        resource_id: ResourceId,
        resource_type: impl Into<String>,
        remote_identifier: impl Into<String>,
        attributes: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            resource_id,
            resource_type: resource_type.into(),
            remote_identifier: Some(remote_identifier.into()),
            attributes,
            exists: true,
            depends_on: BTreeSet::new(),
        }
    }
}

/// The observed state of every resource the core knows about.
///
/// Entries are only ever replaced wholesale, never edited field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    instances: BTreeMap<ResourceId, ObservedInstance>,
    /// Instances superseded by a replacement and not yet destroyed, keyed
    /// by remote identifier.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    retired: BTreeMap<String, ObservedInstance>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ObservedInstance> {
        self.instances.get(id).filter(|i| i.exists)
    }

    pub fn exists(&self, id: &ResourceId) -> bool {
        self.get(id).is_some()
    }

    pub fn remote_identifier(&self, id: &ResourceId) -> Option<&str> {
        self.get(id).and_then(|i| i.remote_identifier.as_deref())
    }

    /// Replace the entry for the instance's resource id. An instance with
    /// `exists == false` removes the entry.
    pub fn replace(&mut self, instance: ObservedInstance) {
        if instance.exists {
            self.instances
                .insert(instance.resource_id.clone(), instance);
        } else {
            self.instances.remove(&instance.resource_id);
        }
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<ObservedInstance> {
        self.instances.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObservedInstance> {
        self.instances.values().filter(|i| i.exists)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Track an instance that a replacement has superseded. Instances
    /// without a remote identifier cannot be addressed and are dropped.
    pub fn retire(&mut self, instance: ObservedInstance) {
        if let Some(remote) = instance.remote_identifier.clone() {
            self.retired.insert(remote, instance);
        }
    }

    /// Stop tracking a retired instance once it has been destroyed.
    pub fn release(&mut self, remote_identifier: &str) -> Option<ObservedInstance> {
        self.retired.remove(remote_identifier)
    }

    pub fn retired(&self) -> impl Iterator<Item = &ObservedInstance> {
        self.retired.values()
    }

    /// Existing instances whose id is no longer declared.
    pub fn orphans<'a>(&'a self, graph: &'a ResourceGraph) -> impl Iterator<Item = &'a ObservedInstance> {
        self.iter().filter(move |i| !graph.contains(&i.resource_id))
    }
}

impl FromIterator<ObservedInstance> for Snapshot {
    fn from_iter<T: IntoIterator<Item = ObservedInstance>>(iter: T) -> Self {
        let mut snapshot = Self::new();
        for instance in iter {
            snapshot.replace(instance);
        }
        snapshot
    }
}
