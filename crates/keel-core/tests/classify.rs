mod common;

use std::collections::BTreeSet;

use common::{asset, baseline, declaration, deployment, id, in_sync_snapshot, model};
use keel_core::{
    classify, preflight, Cause, ChangePolicy, CoreError, ObservedInstance, Snapshot, Verdict,
    Verdicts,
};
use serde_json::json;

fn run(resources: Vec<keel_core::Resource>, snapshot: &Snapshot) -> Result<Verdicts, CoreError> {
    let declaration = declaration(resources);
    let graph = preflight(&declaration)?;
    classify(&graph, &declaration.registry, snapshot)
}

fn fields(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn matching_state_is_noop() {
    let declaration = baseline();
    let graph = preflight(&declaration).unwrap();
    let verdicts = classify(&graph, &declaration.registry, &in_sync_snapshot()).unwrap();

    assert_eq!(verdicts.len(), 3);
    for diff in verdicts.iter() {
        assert_eq!(diff.verdict, Verdict::NoOp, "{}", diff.resource_id);
        assert_eq!(diff.cause, Cause::InSync);
        assert!(diff.drift.is_empty());
    }
}

#[test]
fn missing_instance_is_create() {
    let verdicts = run(vec![model("churn", "v1")], &Snapshot::new()).unwrap();
    let diff = verdicts.get(&id("M")).unwrap();
    assert_eq!(diff.verdict, Verdict::Create);
    assert_eq!(diff.cause, Cause::FirstProvision);
}

#[test]
fn absent_instance_is_create_even_when_attributes_differ() {
    let snapshot: Snapshot = [ObservedInstance::absent(id("M"))].into_iter().collect();
    let verdicts = run(vec![model("renamed", "v9")], &snapshot).unwrap();
    assert_eq!(verdicts.verdict(&id("M")), Some(&Verdict::Create));
}

#[test]
fn update_in_place_field_change_is_update() {
    let verdicts = run(vec![model("churn-v2", "v1")], &in_sync_snapshot()).unwrap();
    let diff = verdicts.get(&id("M")).unwrap();

    assert_eq!(diff.verdict, Verdict::Update(fields(&["name"])));
    assert_eq!(diff.cause, Cause::Drift);
    assert_eq!(diff.drift.len(), 1);
    assert_eq!(diff.drift[0].field, "name");
    assert_eq!(diff.drift[0].policy, ChangePolicy::UpdateInPlace);
    assert_eq!(diff.drift[0].expected, json!("churn-v2"));
    assert_eq!(diff.drift[0].actual, json!("churn"));
}

#[test]
fn force_replace_dominates_update() {
    let verdicts = run(vec![model("churn-v2", "v2")], &in_sync_snapshot()).unwrap();
    let diff = verdicts.get(&id("M")).unwrap();

    assert_eq!(diff.verdict, Verdict::Replace(fields(&["software_spec"])));
    assert_eq!(diff.drift.len(), 2);
}

#[test]
fn computed_fields_are_never_diffed() {
    let declared = model("churn", "v1").attr("created_at", json!("yesterday"));
    let verdicts = run(vec![declared], &in_sync_snapshot()).unwrap();
    assert_eq!(verdicts.verdict(&id("M")), Some(&Verdict::NoOp));
}

#[test]
fn optional_field_not_reported_back_is_skipped() {
    let mut snapshot = in_sync_snapshot();
    let mut m = snapshot.get(&id("M")).unwrap().clone();
    m.attributes.remove("software_spec");
    snapshot.replace(m);

    let verdicts = run(vec![model("churn", "v1")], &snapshot).unwrap();
    assert_eq!(verdicts.verdict(&id("M")), Some(&Verdict::NoOp));
}

#[test]
fn immutable_field_change_is_a_configuration_error() {
    let declared = model("churn", "v1").attr("region", json!("us-east-1"));
    let err = run(vec![declared], &in_sync_snapshot()).unwrap_err();

    match err {
        CoreError::ImmutableFieldViolation { resource, field } => {
            assert_eq!(resource.as_str(), "M");
            assert_eq!(field, "region");
        }
        other => panic!("expected immutable violation, got {other:?}"),
    }
}

#[test]
fn references_are_compared_by_resolved_value() {
    let verdicts = run(
        vec![model("churn", "v1"), asset(), deployment()],
        &in_sync_snapshot(),
    )
    .unwrap();
    assert_eq!(verdicts.verdict(&id("P")), Some(&Verdict::NoOp));
    assert_eq!(verdicts.verdict(&id("D")), Some(&Verdict::NoOp));

    // P derives model_name from M's declared name.
    let verdicts = run(
        vec![model("churn-v2", "v1"), asset(), deployment()],
        &in_sync_snapshot(),
    )
    .unwrap();
    let p = verdicts.get(&id("P")).unwrap();
    assert_eq!(p.verdict, Verdict::Update(fields(&["model_name"])));
    assert_eq!(p.drift[0].expected, json!("churn-v2"));
}

#[test]
fn identity_reference_to_a_different_instance_is_drift() {
    let mut snapshot = in_sync_snapshot();
    let mut d = snapshot.get(&id("D")).unwrap().clone();
    d.attributes.insert("asset".into(), json!("p-0"));
    snapshot.replace(d);

    let verdicts = run(vec![model("churn", "v1"), asset(), deployment()], &snapshot).unwrap();
    assert_eq!(
        verdicts.verdict(&id("D")),
        Some(&Verdict::Update(fields(&["asset"])))
    );
}
