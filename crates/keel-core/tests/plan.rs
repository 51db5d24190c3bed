mod common;

use common::{
    action_of, asset, baseline, declaration, deployment, has_action, id, in_sync_snapshot, kinds,
    model, observed, precedes, repointed,
};
use std::collections::BTreeSet;

use keel_core::{
    identity_of, prepare, Action, ActionId, ActionKind, Cause, CoreError, Plan, PlanSummary,
    Resource, Snapshot, Verdict,
};
use serde_json::json;

#[test]
fn in_sync_declaration_plans_nothing() {
    let plan = prepare(&baseline(), &in_sync_snapshot()).unwrap();

    assert!(plan.is_empty());
    assert!(!plan.summary.has_changes());
    assert_eq!(plan.entries.len(), 3);
    assert!(plan.entries.iter().all(|e| e.cause == Cause::InSync));
}

#[test]
fn fresh_provision_creates_in_dependency_order() {
    let plan = prepare(&baseline(), &Snapshot::new()).unwrap();

    assert_eq!(
        plan.summary,
        PlanSummary {
            to_add: 3,
            to_change: 0,
            to_destroy: 0
        }
    );
    let m = action_of(&plan, "M", "create");
    let p = action_of(&plan, "P", "create");
    let d = action_of(&plan, "D", "create");
    assert!(precedes(&plan, m, p));
    assert!(precedes(&plan, p, d));
    assert_eq!(plan.linearize().unwrap(), vec![m, p, d]);
}

#[test]
fn rename_updates_model_and_derived_asset() {
    let plan = prepare(
        &declaration(vec![model("churn-v2", "v1"), asset(), deployment()]),
        &in_sync_snapshot(),
    )
    .unwrap();

    assert_eq!(
        plan.summary,
        PlanSummary {
            to_add: 0,
            to_change: 2,
            to_destroy: 0
        }
    );
    let m = action_of(&plan, "M", "update");
    let p = action_of(&plan, "P", "update");
    assert!(precedes(&plan, m, p));
    assert!(!has_action(&plan, "D", "update"));

    let entry = plan.entries.iter().find(|e| e.resource_id == id("P")).unwrap();
    assert!(matches!(entry.verdict, Some(Verdict::Update(_))));
}

#[test]
fn forced_replace_cascade_orders_create_before_destroy() {
    let plan = prepare(
        &declaration(vec![model("churn", "v2"), asset(), deployment()]),
        &in_sync_snapshot(),
    )
    .unwrap();

    assert_eq!(
        plan.summary,
        PlanSummary {
            to_add: 2,
            to_change: 1,
            to_destroy: 2
        }
    );

    let create_m = action_of(&plan, "M", "create_new");
    let repoint_m = action_of(&plan, "M", "repoint_dependents");
    let destroy_m = action_of(&plan, "M", "destroy_old");
    let create_p = action_of(&plan, "P", "create_new");
    let repoint_p = action_of(&plan, "P", "repoint_dependents");
    let destroy_p = action_of(&plan, "P", "destroy_old");
    let update_d = action_of(&plan, "D", "update");

    // D's update sees both new identities and runs before either old one goes.
    assert!(precedes(&plan, create_m, update_d));
    assert!(precedes(&plan, create_p, update_d));
    assert!(precedes(&plan, update_d, destroy_m));
    assert!(precedes(&plan, update_d, destroy_p));

    // Within each replacement: create → repoint → destroy.
    assert!(precedes(&plan, create_m, repoint_m));
    assert!(precedes(&plan, repoint_m, destroy_m));
    assert!(precedes(&plan, create_p, repoint_p));
    assert!(precedes(&plan, repoint_p, destroy_p));

    // The old asset still points at the old model until it is gone.
    assert!(precedes(&plan, destroy_p, destroy_m));

    assert_eq!(repointed(&plan, "M"), vec![id("P")]);
    assert_eq!(repointed(&plan, "P"), vec![id("D")]);

    let destroy = &plan.actions[destroy_m.0];
    assert_eq!(
        destroy.prior.as_ref().and_then(|p| p.remote_identifier.as_deref()),
        Some("m-1")
    );
}

#[test]
fn linearize_respects_every_prerequisite() {
    let plan = prepare(
        &declaration(vec![model("churn", "v2"), asset(), deployment()]),
        &in_sync_snapshot(),
    )
    .unwrap();

    let order = plan.linearize().unwrap();
    assert_eq!(order.len(), plan.actions.len());
    let position = |id: keel_core::ActionId| order.iter().position(|a| *a == id).unwrap();
    for action in &plan.actions {
        for prereq in &action.prerequisites {
            assert!(position(*prereq) < position(action.id), "{action}");
        }
    }
}

#[test]
fn undeclared_resources_are_deleted_dependents_first() {
    let mut snapshot = in_sync_snapshot();
    snapshot.replace(observed("X", "deployment", "x-1", &[("asset", json!("p-1"))], &["P"]));
    snapshot.replace(observed("Y", "deployment", "y-1", &[("asset", json!("x-1"))], &["X"]));

    let plan = prepare(&baseline(), &snapshot).unwrap();
    assert_eq!(plan.summary.to_destroy, 2);
    assert_eq!(
        kinds(&plan),
        vec![
            ("X".to_string(), "delete"),
            ("Y".to_string(), "delete"),
        ]
    );

    let x = action_of(&plan, "X", "delete");
    let y = action_of(&plan, "Y", "delete");
    assert!(precedes(&plan, y, x));

    let orphan = plan.entries.iter().find(|e| e.resource_id == id("Y")).unwrap();
    assert_eq!(orphan.cause, Cause::Orphaned);
    assert!(orphan.verdict.is_none());
}

#[test]
fn old_instance_is_destroyed_after_undeclared_holder() {
    let mut snapshot = in_sync_snapshot();
    snapshot.replace(observed("X", "deployment", "x-1", &[("asset", json!("p-1"))], &["P"]));

    let plan = prepare(
        &declaration(vec![model("churn", "v2"), asset(), deployment()]),
        &snapshot,
    )
    .unwrap();

    let delete_x = action_of(&plan, "X", "delete");
    let destroy_p = action_of(&plan, "P", "destroy_old");
    assert!(precedes(&plan, delete_x, destroy_p));
}

#[test]
fn reversed_dependency_with_both_replaced_still_orders() {
    // Before: Y points at X. Now: X points at Y, and Y stands alone.
    let snapshot: Snapshot = [
        observed(
            "X",
            "model",
            "x-1",
            &[("name", json!("x")), ("software_spec", json!("v1"))],
            &[],
        ),
        observed("Y", "promoted_asset", "y-1", &[("model", json!("x-1"))], &["X"]),
    ]
    .into_iter()
    .collect();
    let x = Resource::new("X", "model")
        .attr("name", json!("x"))
        .attr("software_spec", identity_of("Y"));
    let y = Resource::new("Y", "promoted_asset").attr("model", json!("standalone"));

    let plan = prepare(&declaration(vec![x, y]), &snapshot).unwrap();
    assert_eq!(plan.summary.to_add, 2);
    assert_eq!(plan.summary.to_destroy, 2);

    let create_x = action_of(&plan, "X", "create_new");
    let create_y = action_of(&plan, "Y", "create_new");
    let destroy_x = action_of(&plan, "X", "destroy_old");
    let destroy_y = action_of(&plan, "Y", "destroy_old");

    // New X needs new Y; old Y still holds old X until it is gone.
    assert!(precedes(&plan, create_y, create_x));
    assert!(precedes(&plan, destroy_y, destroy_x));
    assert!(!precedes(&plan, destroy_x, destroy_y));
    assert_eq!(plan.linearize().unwrap().len(), plan.actions.len());
}

fn bare_action(index: usize, prerequisites: &[usize]) -> Action {
    Action {
        id: ActionId(index),
        resource_id: id(&format!("R{index}")),
        resource_type: "deployment".to_string(),
        kind: ActionKind::Create,
        prerequisites: prerequisites.iter().copied().map(ActionId).collect::<BTreeSet<_>>(),
        prior: None,
    }
}

#[test]
fn cyclic_prerequisites_are_rejected() {
    let plan = Plan {
        actions: vec![bare_action(0, &[2]), bare_action(1, &[0]), bare_action(2, &[1])],
        ..Plan::default()
    };

    match plan.linearize().unwrap_err() {
        CoreError::PlanCycle { actions } => assert_eq!(actions.len(), 3),
        other => panic!("expected plan cycle, got {other}"),
    }
}

#[test]
fn misnumbered_or_dangling_actions_are_rejected() {
    let mut shuffled = Plan {
        actions: vec![bare_action(0, &[]), bare_action(1, &[0])],
        ..Plan::default()
    };
    shuffled.actions.swap(0, 1);
    assert!(matches!(
        shuffled.linearize(),
        Err(CoreError::MalformedPlan(_))
    ));

    let dangling = Plan {
        actions: vec![bare_action(0, &[7])],
        ..Plan::default()
    };
    assert!(matches!(
        dangling.linearize(),
        Err(CoreError::MalformedPlan(_))
    ));
}

#[test]
fn cycle_fails_before_planning() {
    let a = keel_core::Resource::new("A", "deployment")
        .attr("asset", keel_core::identity_of("B"));
    let b = keel_core::Resource::new("B", "deployment")
        .attr("asset", keel_core::identity_of("A"));

    let err = prepare(&declaration(vec![a, b]), &Snapshot::new()).unwrap_err();
    assert!(matches!(err, CoreError::Cycle { .. }));
}

#[test]
fn plan_round_trips_through_json() {
    let plan = prepare(
        &declaration(vec![model("churn", "v2"), asset(), deployment()]),
        &in_sync_snapshot(),
    )
    .unwrap();

    let json = serde_json::to_string(&plan).unwrap();
    let back: Plan = serde_json::from_str(&json).unwrap();
    assert_eq!(back, plan);
}
