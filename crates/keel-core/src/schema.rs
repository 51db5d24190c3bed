//! Type Schema Registry.
//!
//! Per resource type, a table of attribute change policies plus the rule
//! for how the type's identity behaves across a replacement. The registry
//! is filled by the declaration source before a pass starts and only read
//! afterwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// What happens when a declared attribute differs from the observed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangePolicy {
    /// Any change is a configuration error.
    Immutable,
    /// Applied through an update operation.
    UpdateInPlace,
    /// Requires destroying and recreating the resource.
    ForceReplace,
    /// Server-assigned; never diffed.
    ComputedIgnore,
}

impl fmt::Display for ChangePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Immutable => "immutable",
            Self::UpdateInPlace => "update_in_place",
            Self::ForceReplace => "force_replace",
            Self::ComputedIgnore => "computed_ignore",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub policy: ChangePolicy,
    /// Must be declared on every resource of the type, and must be present
    /// on every observed instance.
    #[serde(default)]
    pub required: bool,
}

impl AttributeSpec {
    pub fn new(policy: ChangePolicy) -> Self {
        Self {
            policy,
            required: false,
        }
    }
}

/// How a type's remote identifier behaves when the resource is recreated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    /// The remote system assigns a fresh identifier on every create, so a
    /// replacement changes what dependents point at.
    #[default]
    Ephemeral,
    /// The identifier is chosen by the declaration (a bucket name, say)
    /// and survives recreation.
    Stable,
}

/// Schema entries contributed for one resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeSchema {
    pub resource_type: String,
    #[serde(default)]
    pub identity: Identity,
    pub fields: Vec<(String, AttributeSpec)>,
}

impl TypeSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            identity: Identity::default(),
            fields: Vec::new(),
        }
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn field(mut self, name: impl Into<String>, policy: ChangePolicy) -> Self {
        self.fields.push((name.into(), AttributeSpec::new(policy)));
        self
    }

    pub fn required(mut self, name: impl Into<String>, policy: ChangePolicy) -> Self {
        self.fields.push((
            name.into(),
            AttributeSpec {
                policy,
                required: true,
            },
        ));
        self
    }
}

#[derive(Debug, Clone, Default)]
struct RegisteredType {
    identity: Identity,
    fields: BTreeMap<String, AttributeSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, RegisteredType>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a type schema into the registry.
    ///
    /// A type may be registered more than once (several collaborators can
    /// contribute fields to it). The same field registered twice must agree
    /// on its policy, except that `ComputedIgnore` always wins over any other
    /// policy. Any other disagreement is a `SchemaConflict`.
    pub fn register(&mut self, schema: TypeSchema) -> Result<(), CoreError> {
        let is_new = !self.types.contains_key(&schema.resource_type);
        let entry = self
            .types
            .entry(schema.resource_type.clone())
            .or_insert_with(|| RegisteredType {
                identity: schema.identity,
                fields: BTreeMap::new(),
            });

        if !is_new && entry.identity != schema.identity {
            return Err(CoreError::SchemaConflict {
                resource_type: schema.resource_type,
                field: "<identity>".into(),
                existing: format!("{:?}", entry.identity),
                requested: format!("{:?}", schema.identity),
            });
        }

        for (name, spec) in schema.fields {
            match entry.fields.get(&name).copied() {
                None => {
                    entry.fields.insert(name, spec);
                }
                Some(existing) => {
                    let merged = merge_spec(&schema.resource_type, &name, existing, spec)?;
                    entry.fields.insert(name, merged);
                }
            }
        }

        Ok(())
    }

    pub fn contains_type(&self, resource_type: &str) -> bool {
        self.types.contains_key(resource_type)
    }

    pub fn spec_for(&self, resource_type: &str, field: &str) -> Result<AttributeSpec, CoreError> {
        let registered = self
            .types
            .get(resource_type)
            .ok_or_else(|| CoreError::UnknownResourceType(resource_type.to_string()))?;

        registered
            .fields
            .get(field)
            .copied()
            .ok_or_else(|| CoreError::UnknownField {
                resource_type: resource_type.to_string(),
                field: field.to_string(),
            })
    }

    pub fn identity(&self, resource_type: &str) -> Result<Identity, CoreError> {
        self.types
            .get(resource_type)
            .map(|t| t.identity)
            .ok_or_else(|| CoreError::UnknownResourceType(resource_type.to_string()))
    }

    pub fn required_fields(&self, resource_type: &str) -> Result<Vec<&str>, CoreError> {
        let registered = self
            .types
            .get(resource_type)
            .ok_or_else(|| CoreError::UnknownResourceType(resource_type.to_string()))?;

        Ok(registered
            .fields
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect())
    }
}

fn merge_spec(
    resource_type: &str,
    field: &str,
    existing: AttributeSpec,
    requested: AttributeSpec,
) -> Result<AttributeSpec, CoreError> {
    let required = existing.required || requested.required;

    if existing.policy == requested.policy {
        return Ok(AttributeSpec {
            policy: existing.policy,
            required,
        });
    }

    if existing.policy == ChangePolicy::ComputedIgnore
        || requested.policy == ChangePolicy::ComputedIgnore
    {
        tracing::debug!(
            resource_type,
            field,
            existing = %existing.policy,
            requested = %requested.policy,
            "computed_ignore overrides conflicting policy"
        );
        return Ok(AttributeSpec {
            policy: ChangePolicy::ComputedIgnore,
            required,
        });
    }

    Err(CoreError::SchemaConflict {
        resource_type: resource_type.to_string(),
        field: field.to_string(),
        existing: existing.policy.to_string(),
        requested: requested.policy.to_string(),
    })
}
