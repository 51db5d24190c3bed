//! Diff Classifier.
//!
//! Compares each declared resource to its observed instance and produces a
//! verdict using the per-field change policies from the schema registry.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::addr::ResourceId;
use crate::error::CoreError;
use crate::graph::ResourceGraph;
use crate::resolve::Resolver;
use crate::schema::{ChangePolicy, SchemaRegistry};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum Verdict {
    NoOp,
    Update(BTreeSet<String>),
    Create,
    Replace(BTreeSet<String>),
}

impl Verdict {
    /// Position in the cascade lattice `NoOp < Update < Replace`. `Create`
    /// sits above everything: a resource that does not exist yet cannot be
    /// upgraded.
    pub fn severity(&self) -> u8 {
        match self {
            Self::NoOp => 0,
            Self::Update(_) => 1,
            Self::Replace(_) => 2,
            Self::Create => 3,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }

    pub fn is_replace(&self) -> bool {
        matches!(self, Self::Replace(_))
    }

    /// The changed fields, for `Update` and `Replace`.
    pub fn fields(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::Update(fields) | Self::Replace(fields) => Some(fields),
            Self::NoOp | Self::Create => None,
        }
    }
}

/// Why a resource ended up with its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Cause {
    InSync,
    FirstProvision,
    Drift,
    Cascade { from: ResourceId },
    Orphaned,
    /// An old instance from an earlier replacement that was never destroyed.
    Superseded { remote_identifier: Option<String> },
}

/// Before/after for a single field that differs from the declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDrift {
    pub field: String,
    pub policy: ChangePolicy,
    /// What the declaration wants, with references resolved where possible.
    pub expected: Value,
    /// What the remote system has.
    pub actual: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDiff {
    pub resource_id: ResourceId,
    pub verdict: Verdict,
    pub cause: Cause,
    pub drift: Vec<FieldDrift>,
}

/// Verdicts for every declared resource, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verdicts {
    diffs: BTreeMap<ResourceId, ResourceDiff>,
}

impl Verdicts {
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceDiff> {
        self.diffs.get(id)
    }

    pub fn get_mut(&mut self, id: &ResourceId) -> Option<&mut ResourceDiff> {
        self.diffs.get_mut(id)
    }

    pub fn verdict(&self, id: &ResourceId) -> Option<&Verdict> {
        self.diffs.get(id).map(|d| &d.verdict)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceDiff> {
        self.diffs.values()
    }

    pub fn insert(&mut self, diff: ResourceDiff) {
        self.diffs.insert(diff.resource_id.clone(), diff);
    }

    pub fn len(&self) -> usize {
        self.diffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }
}

/// Classify every declared resource against the snapshot.
///
/// Fails the whole pass on the first configuration error: an unknown field,
/// a changed `Immutable` field, or a required field missing from an
/// existing instance.
pub fn classify(
    graph: &ResourceGraph,
    registry: &SchemaRegistry,
    snapshot: &Snapshot,
) -> Result<Verdicts, CoreError> {
    let resolver = Resolver::new(graph, snapshot);
    let mut verdicts = Verdicts::default();

    for resource in graph.resources() {
        let Some(observed) = snapshot.get(&resource.id) else {
            tracing::debug!(resource = %resource.id, "not observed, will create");
            verdicts.insert(ResourceDiff {
                resource_id: resource.id.clone(),
                verdict: Verdict::Create,
                cause: Cause::FirstProvision,
                drift: vec![],
            });
            continue;
        };

        let mut force_fields = BTreeSet::new();
        let mut update_fields = BTreeSet::new();
        let mut drift = Vec::new();

        for (field, declared) in &resource.attributes {
            let spec = registry.spec_for(&resource.resource_type, field)?;
            if spec.policy == ChangePolicy::ComputedIgnore {
                continue;
            }

            let Some(actual) = observed.attributes.get(field) else {
                if spec.required {
                    return Err(CoreError::ObservedFieldMissing {
                        resource: resource.id.clone(),
                        field: field.clone(),
                    });
                }
                // Creation-only default the remote system does not echo back.
                continue;
            };

            let expected = resolver.value(declared);
            if expected.as_ref() == Some(actual) {
                continue;
            }

            match spec.policy {
                ChangePolicy::Immutable => {
                    return Err(CoreError::ImmutableFieldViolation {
                        resource: resource.id.clone(),
                        field: field.clone(),
                    });
                }
                ChangePolicy::ForceReplace => {
                    force_fields.insert(field.clone());
                }
                ChangePolicy::UpdateInPlace => {
                    update_fields.insert(field.clone());
                }
                ChangePolicy::ComputedIgnore => continue,
            }

            drift.push(FieldDrift {
                field: field.clone(),
                policy: spec.policy,
                expected: expected.unwrap_or_else(|| declared.clone()),
                actual: actual.clone(),
            });
        }

        let verdict = if !force_fields.is_empty() {
            Verdict::Replace(force_fields)
        } else if !update_fields.is_empty() {
            Verdict::Update(update_fields)
        } else {
            Verdict::NoOp
        };
        let cause = if verdict.is_noop() {
            Cause::InSync
        } else {
            Cause::Drift
        };

        tracing::debug!(resource = %resource.id, ?verdict, "classified");
        verdicts.insert(ResourceDiff {
            resource_id: resource.id.clone(),
            verdict,
            cause,
            drift,
        });
    }

    Ok(verdicts)
}
