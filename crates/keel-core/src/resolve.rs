//! Substituting references with concrete values.
//!
//! Identity references resolve to the target's observed remote identifier.
//! Attribute references resolve to the target's declared value when it
//! declares the attribute, and to its observed value otherwise.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::addr::ResourceId;
use crate::graph::ResourceGraph;
use crate::reference::{self, Reference};
use crate::resource::Resource;
use crate::snapshot::Snapshot;

/// Attribute references can chain through declared values; a well-formed
/// graph never gets near this.
const MAX_DEPTH: usize = 64;

/// Lookup of declared resources by id.
pub trait Declared {
    fn declared(&self, id: &ResourceId) -> Option<&Resource>;
}

impl Declared for ResourceGraph {
    fn declared(&self, id: &ResourceId) -> Option<&Resource> {
        self.get(id)
    }
}

impl Declared for BTreeMap<ResourceId, Resource> {
    fn declared(&self, id: &ResourceId) -> Option<&Resource> {
        self.get(id)
    }
}

pub struct Resolver<'a, D: Declared + ?Sized> {
    declared: &'a D,
    snapshot: &'a Snapshot,
}

impl<'a, D: Declared + ?Sized> Resolver<'a, D> {
    pub fn new(declared: &'a D, snapshot: &'a Snapshot) -> Self {
        Self { declared, snapshot }
    }

    /// `None` when some reference in `value` has nothing to resolve to yet.
    pub fn value(&self, value: &Value) -> Option<Value> {
        self.value_at(value, 0)
    }

    fn value_at(&self, value: &Value, depth: usize) -> Option<Value> {
        if depth > MAX_DEPTH {
            return None;
        }
        reference::resolve(value, &|r: &Reference| self.lookup(r, depth))
    }

    fn lookup(&self, reference: &Reference, depth: usize) -> Option<Value> {
        match &reference.attr {
            None => self
                .snapshot
                .remote_identifier(&reference.target)
                .map(|id| Value::String(id.to_string())),
            Some(attr) => {
                let declared = self
                    .declared
                    .declared(&reference.target)
                    .and_then(|r| r.attributes.get(attr));
                match declared {
                    Some(value) => self.value_at(value, depth + 1),
                    None => self
                        .snapshot
                        .get(&reference.target)
                        .and_then(|i| i.attributes.get(attr))
                        .cloned(),
                }
            }
        }
    }

    /// Resolve every declared attribute of `resource`. On failure, returns
    /// the first field that could not be resolved.
    pub fn attributes(&self, resource: &Resource) -> Result<BTreeMap<String, Value>, String> {
        resource
            .attributes
            .iter()
            .map(|(field, value)| {
                self.value(value)
                    .map(|v| (field.clone(), v))
                    .ok_or_else(|| field.clone())
            })
            .collect()
    }
}
