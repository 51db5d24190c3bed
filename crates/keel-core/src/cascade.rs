//! Cascade Propagator.
//!
//! A replacement that changes a resource's identity leaves every dependent
//! pointing at something that is about to disappear. This pass walks the
//! graph from each replaced resource to its direct dependents and upgrades
//! their verdicts so they get repointed (or recreated themselves).
//!
//! Verdicts only ever move up the lattice `NoOp < Update < Replace`, and a
//! resource is queued only when it first becomes `Replace`, so the work
//! queue drains after at most one visit per resource.

use std::collections::{BTreeSet, VecDeque};

use serde_json::Value;

use crate::addr::ResourceId;
use crate::diff::{Cause, FieldDrift, Verdict, Verdicts};
use crate::error::CoreError;
use crate::graph::ResourceGraph;
use crate::reference::Reference;
use crate::schema::{ChangePolicy, Identity, SchemaRegistry};
use crate::snapshot::Snapshot;

pub fn propagate(
    graph: &ResourceGraph,
    registry: &SchemaRegistry,
    snapshot: &Snapshot,
    verdicts: &mut Verdicts,
) -> Result<(), CoreError> {
    let mut queue: VecDeque<ResourceId> = graph
        .topological_order()
        .into_iter()
        .filter(|id| verdicts.verdict(id).is_some_and(Verdict::is_replace))
        .cloned()
        .collect();
    let mut upgrades = 0usize;

    while let Some(replaced_id) = queue.pop_front() {
        let Some(replaced) = graph.get(&replaced_id) else {
            continue;
        };

        for dependent_id in graph.direct_dependents_of(&replaced_id) {
            let Some(dependent) = graph.get(dependent_id) else {
                continue;
            };

            for (field, reference) in dependent.references_to(&replaced_id) {
                if !replacement_changes(registry, &replaced.resource_type, &reference)? {
                    continue;
                }

                let spec = registry.spec_for(&dependent.resource_type, field)?;
                let Some(diff) = verdicts.get_mut(dependent_id) else {
                    continue;
                };
                let before = diff.verdict.severity();

                if matches!(diff.verdict, Verdict::Create) {
                    continue;
                }

                match spec.policy {
                    ChangePolicy::ComputedIgnore => continue,
                    ChangePolicy::Immutable => {
                        return Err(CoreError::ImmutableFieldViolation {
                            resource: dependent_id.clone(),
                            field: field.to_string(),
                        });
                    }
                    ChangePolicy::ForceReplace => match &mut diff.verdict {
                        Verdict::Replace(fields) => {
                            fields.insert(field.to_string());
                        }
                        _ => {
                            diff.verdict = Verdict::Replace(BTreeSet::from([field.to_string()]));
                            queue.push_back(dependent_id.clone());
                        }
                    },
                    ChangePolicy::UpdateInPlace => match &mut diff.verdict {
                        Verdict::Update(fields) => {
                            fields.insert(field.to_string());
                        }
                        Verdict::NoOp => {
                            diff.verdict = Verdict::Update(BTreeSet::from([field.to_string()]));
                        }
                        // Recreated wholesale; the new instance gets the new value.
                        Verdict::Replace(_) | Verdict::Create => continue,
                    },
                }

                if !diff.drift.iter().any(|d| d.field == field) {
                    let actual = snapshot
                        .get(dependent_id)
                        .and_then(|i| i.attributes.get(field))
                        .cloned()
                        .unwrap_or(Value::Null);
                    diff.drift.push(FieldDrift {
                        field: field.to_string(),
                        policy: spec.policy,
                        expected: reference.to_value(),
                        actual,
                    });
                }

                if diff.verdict.severity() > before {
                    upgrades += 1;
                    diff.cause = Cause::Cascade {
                        from: replaced_id.clone(),
                    };
                    tracing::debug!(
                        resource = %dependent_id,
                        from = %replaced_id,
                        field,
                        verdict = ?diff.verdict,
                        "verdict upgraded by cascade"
                    );
                }
            }
        }
    }

    if upgrades > 0 {
        tracing::info!(upgrades, "cascade propagated replacements to dependents");
    }
    Ok(())
}

/// Whether recreating a resource of `target_type` changes the value that
/// `reference` resolves to.
fn replacement_changes(
    registry: &SchemaRegistry,
    target_type: &str,
    reference: &Reference,
) -> Result<bool, CoreError> {
    match &reference.attr {
        None => Ok(registry.identity(target_type)? == Identity::Ephemeral),
        // Declared attributes are re-derived from the declaration and are
        // already compared by the classifier; only server-assigned ones
        // change behind its back.
        Some(attr) => {
            Ok(registry.spec_for(target_type, attr)?.policy == ChangePolicy::ComputedIgnore)
        }
    }
}
