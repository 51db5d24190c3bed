#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use keel_core::{
    attr_of, identity_of, ActionId, ActionKind, ChangePolicy, Declaration, ObservedInstance, Plan,
    Resource, ResourceId, SchemaRegistry, Snapshot, TypeSchema,
};
use serde_json::{json, Value};

/// model (M) ← promoted_asset (P) ← deployment (D)
pub fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            TypeSchema::new("model")
                .required("name", ChangePolicy::UpdateInPlace)
                .field("software_spec", ChangePolicy::ForceReplace)
                .field("region", ChangePolicy::Immutable)
                .field("created_at", ChangePolicy::ComputedIgnore),
        )
        .unwrap();
    registry
        .register(
            TypeSchema::new("promoted_asset")
                .required("model", ChangePolicy::ForceReplace)
                .field("model_name", ChangePolicy::UpdateInPlace),
        )
        .unwrap();
    registry
        .register(
            TypeSchema::new("deployment")
                .required("asset", ChangePolicy::UpdateInPlace)
                .field("replicas", ChangePolicy::UpdateInPlace),
        )
        .unwrap();
    registry
}

pub fn model(name: &str, software_spec: &str) -> Resource {
    Resource::new("M", "model")
        .attr("name", json!(name))
        .attr("software_spec", json!(software_spec))
        .attr("region", json!("eu-west-1"))
}

pub fn asset() -> Resource {
    Resource::new("P", "promoted_asset")
        .attr("model", identity_of("M"))
        .attr("model_name", attr_of("M", "name"))
}

pub fn deployment() -> Resource {
    Resource::new("D", "deployment")
        .attr("asset", identity_of("P"))
        .attr("replicas", json!(2))
}

pub fn declaration(resources: Vec<Resource>) -> Declaration {
    Declaration {
        resources,
        registry: registry(),
    }
}

/// The baseline chain, in sync with [`in_sync_snapshot`].
pub fn baseline() -> Declaration {
    declaration(vec![model("churn", "v1"), asset(), deployment()])
}

pub fn attrs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn observed(
    id: &str,
    resource_type: &str,
    remote_id: &str,
    pairs: &[(&str, Value)],
    depends_on: &[&str],
) -> ObservedInstance {
    let mut instance = ObservedInstance::present(id.into(), resource_type, remote_id, attrs(pairs));
    instance.depends_on = depends_on.iter().map(|d| ResourceId::from(*d)).collect();
    instance
}

pub fn in_sync_snapshot() -> Snapshot {
    [
        observed(
            "M",
            "model",
            "m-1",
            &[
                ("name", json!("churn")),
                ("software_spec", json!("v1")),
                ("region", json!("eu-west-1")),
                ("created_at", json!("2026-01-01T00:00:00Z")),
            ],
            &[],
        ),
        observed(
            "P",
            "promoted_asset",
            "p-1",
            &[("model", json!("m-1")), ("model_name", json!("churn"))],
            &["M"],
        ),
        observed(
            "D",
            "deployment",
            "d-1",
            &[("asset", json!("p-1")), ("replicas", json!(2))],
            &["P"],
        ),
    ]
    .into_iter()
    .collect()
}

pub fn id(s: &str) -> ResourceId {
    ResourceId::from(s)
}

/// The single action of `label` kind for `resource`.
pub fn action_of(plan: &Plan, resource: &str, label: &str) -> ActionId {
    let matches: Vec<ActionId> = plan
        .actions_for(&id(resource))
        .filter(|a| a.kind.label() == label)
        .map(|a| a.id)
        .collect();
    assert_eq!(matches.len(), 1, "expected one {label} action for {resource}");
    matches[0]
}

pub fn has_action(plan: &Plan, resource: &str, label: &str) -> bool {
    plan.actions_for(&id(resource)).any(|a| a.kind.label() == label)
}

/// Whether `before` is a direct or transitive prerequisite of `after`.
pub fn precedes(plan: &Plan, before: ActionId, after: ActionId) -> bool {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<ActionId> = plan.actions[after.0].prerequisites.iter().copied().collect();
    while let Some(next) = stack.pop() {
        if next == before {
            return true;
        }
        if seen.insert(next) {
            stack.extend(plan.actions[next.0].prerequisites.iter().copied());
        }
    }
    false
}

pub fn kinds(plan: &Plan) -> Vec<(String, &'static str)> {
    plan.actions
        .iter()
        .map(|a| (a.resource_id.to_string(), a.kind.label()))
        .collect()
}

pub fn repointed(plan: &Plan, resource: &str) -> Vec<ResourceId> {
    let repoint = action_of(plan, resource, "repoint_dependents");
    match &plan.actions[repoint.0].kind {
        ActionKind::RepointDependents { dependents } => dependents.clone(),
        other => panic!("unexpected kind {other}"),
    }
}
