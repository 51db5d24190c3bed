use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::addr::ResourceId;
use crate::error::CoreError;
use crate::reference::{self, Reference};
use crate::schema::SchemaRegistry;

/// A declared resource: what the user wants to exist.
///
/// Read-only for the duration of a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub resource_type: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Explicit edges, on top of the ones implied by attribute references.
    #[serde(default)]
    pub depends_on: BTreeSet<ResourceId>,
}

impl Resource {
    pub fn new(id: impl Into<ResourceId>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            attributes: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn attr(mut self, field: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(field.into(), value);
        self
    }

    pub fn after(mut self, dependency: impl Into<ResourceId>) -> Self {
        self.depends_on.insert(dependency.into());
        self
    }

    /// `(field, reference)` for every reference in the declared attributes.
    pub fn references(&self) -> Vec<(&str, Reference)> {
        self.attributes
            .iter()
            .flat_map(|(field, value)| {
                reference::collect(value)
                    .into_iter()
                    .map(move |r| (field.as_str(), r))
            })
            .collect()
    }

    /// Fields whose value references `target`, with the reference itself.
    pub fn references_to(&self, target: &ResourceId) -> Vec<(&str, Reference)> {
        self.references()
            .into_iter()
            .filter(|(_, r)| &r.target == target)
            .collect()
    }

    /// Direct dependencies: explicit edges plus referenced resources.
    pub fn dependencies(&self) -> BTreeSet<ResourceId> {
        let mut deps = self.depends_on.clone();
        deps.extend(self.references().into_iter().map(|(_, r)| r.target));
        deps
    }

    /// Check the declared attributes against the registry: the type must be
    /// known, every field must have a spec, and every required field must be
    /// present.
    pub fn validate(&self, registry: &SchemaRegistry) -> Result<(), CoreError> {
        for field in self.attributes.keys() {
            registry.spec_for(&self.resource_type, field)?;
        }
        for field in registry.required_fields(&self.resource_type)? {
            if !self.attributes.contains_key(field) {
                return Err(CoreError::MissingRequiredField {
                    resource: self.id.clone(),
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Everything the declaration source hands over for one pass.
#[derive(Debug, Clone, Default)]
pub struct Declaration {
    pub resources: Vec<Resource>,
    pub registry: SchemaRegistry,
}

/// The external collaborator that produces declared resources and schema
/// entries. It must return a complete, self-consistent set; nothing is
/// added mid-pass.
pub trait DeclarationSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn declare(&self) -> Result<Declaration, Self::Error>;
}
