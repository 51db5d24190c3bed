mod common;

use common::{asset, deployment, id, model, registry};
use keel_core::{identity_of, CoreError, Resource, ResourceGraph};
use serde_json::json;

#[test]
fn topological_order_puts_dependencies_first() {
    let graph = ResourceGraph::build(vec![deployment(), asset(), model("churn", "v1")]).unwrap();

    let order: Vec<String> = graph
        .topological_order()
        .into_iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(order, vec!["M", "P", "D"]);
}

#[test]
fn independent_resources_keep_declaration_order() {
    let graph = ResourceGraph::build(vec![
        Resource::new("b", "thing"),
        Resource::new("a", "thing"),
        Resource::new("c", "thing").after("a"),
    ])
    .unwrap();

    let order: Vec<&str> = graph
        .topological_order()
        .into_iter()
        .map(|id| id.as_str())
        .collect();
    assert_eq!(order, vec!["b", "a", "c"]);
}

#[test]
fn references_and_explicit_edges_are_dependencies() {
    let graph = ResourceGraph::build(vec![
        model("churn", "v1"),
        asset(),
        deployment().after("M"),
    ])
    .unwrap();

    let deps: Vec<String> = graph
        .dependencies_of(&id("D"))
        .into_iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(deps, vec!["M", "P"]);
}

#[test]
fn dependents_are_transitive() {
    let graph =
        ResourceGraph::build(vec![model("churn", "v1"), asset(), deployment()]).unwrap();

    let direct: Vec<String> = graph
        .direct_dependents_of(&id("M"))
        .into_iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(direct, vec!["P"]);

    let all: Vec<String> = graph
        .dependents_of(&id("M"))
        .into_iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(all, vec!["P", "D"]);
    assert!(graph.dependents_of(&id("D")).is_empty());
}

#[test]
fn cycle_is_reported_with_its_path() {
    let err = ResourceGraph::build(vec![
        Resource::new("A", "thing").after("B"),
        Resource::new("B", "thing").after("C"),
        Resource::new("C", "thing").attr("parent", identity_of("A")),
    ])
    .unwrap_err();

    match &err {
        CoreError::Cycle { cycle } => {
            let path: Vec<&str> = cycle.iter().map(|id| id.as_str()).collect();
            assert_eq!(path, vec!["A", "B", "C", "A"]);
        }
        other => panic!("expected cycle, got {other:?}"),
    }
    assert_eq!(err.to_string(), "dependency cycle: A -> B -> C -> A");
}

#[test]
fn self_reference_is_a_cycle() {
    let err = ResourceGraph::build(vec![Resource::new("A", "thing").after("A")]).unwrap_err();
    assert!(matches!(err, CoreError::Cycle { .. }));
}

#[test]
fn duplicate_ids_are_rejected() {
    let err = ResourceGraph::build(vec![model("a", "v1"), model("b", "v1")]).unwrap_err();
    assert!(matches!(err, CoreError::DuplicateResource(ref dup) if dup.as_str() == "M"));
}

#[test]
fn reference_to_undeclared_resource_is_rejected() {
    let err = ResourceGraph::build(vec![asset()]).unwrap_err();
    match err {
        CoreError::UnknownReference { resource, target } => {
            assert_eq!(resource.as_str(), "P");
            assert_eq!(target.as_str(), "M");
        }
        other => panic!("expected unknown reference, got {other:?}"),
    }
}

#[test]
fn validate_checks_fields_against_registry() {
    let graph = ResourceGraph::build(vec![model("churn", "v1").attr("colour", json!("red"))])
        .unwrap();
    let err = graph.validate(&registry()).unwrap_err();
    assert!(matches!(
        err,
        CoreError::UnknownField { ref resource_type, ref field }
            if resource_type == "model" && field == "colour"
    ));
}
