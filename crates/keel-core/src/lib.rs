//! keel-core
//!
//! Pure reconciliation core: declared resources, the type schema registry,
//! the dependency graph, diff classification, cascade propagation and plan
//! construction. No async runtime and no I/O; the provisioner crate drives
//! the remote side.
//!
//! Public API:
//! - `ResourceGraph::build()` — arena of declared resources, cycle-checked
//! - `classify()` — per-resource verdict against the observed snapshot
//! - `propagate()` — expand replacements onto dependents
//! - `build_plan()` — ordered actions with prerequisite edges
//! - `preflight()` / `plan_graph()` — the two halves of a pass
//! - `prepare()` — all of the above in one call

pub mod addr;
pub mod cascade;
pub mod diff;
pub mod error;
pub mod graph;
pub mod plan;
pub mod reference;
pub mod resolve;
pub mod resource;
pub mod schema;
pub mod snapshot;

pub use crate::addr::ResourceId;
pub use crate::cascade::propagate;
pub use crate::diff::{classify, Cause, FieldDrift, ResourceDiff, Verdict, Verdicts};
pub use crate::error::CoreError;
pub use crate::graph::ResourceGraph;
pub use crate::plan::{build_plan, Action, ActionId, ActionKind, Plan, PlanEntry, PlanSummary};
pub use crate::reference::{attr_of, identity_of, Reference};
pub use crate::resolve::Resolver;
pub use crate::resource::{Declaration, DeclarationSource, Resource};
pub use crate::schema::{AttributeSpec, ChangePolicy, Identity, SchemaRegistry, TypeSchema};
pub use crate::snapshot::{ObservedInstance, Snapshot};

/// Build and validate the resource graph. Every configuration error in the
/// declaration itself surfaces here, before anything touches the remote
/// system.
pub fn preflight(declaration: &Declaration) -> Result<ResourceGraph, CoreError> {
    let graph = ResourceGraph::build(declaration.resources.clone())?;
    graph.validate(&declaration.registry)?;
    Ok(graph)
}

/// Classify, cascade and order against an observed snapshot.
pub fn plan_graph(
    graph: &ResourceGraph,
    registry: &SchemaRegistry,
    snapshot: &Snapshot,
) -> Result<Plan, CoreError> {
    let mut verdicts = diff::classify(graph, registry, snapshot)?;
    cascade::propagate(graph, registry, snapshot, &mut verdicts)?;
    plan::build_plan(graph, snapshot, &verdicts)
}

/// Pre-flight plus planning: graph → validate → classify → cascade → plan.
pub fn prepare(declaration: &Declaration, snapshot: &Snapshot) -> Result<Plan, CoreError> {
    let graph = preflight(declaration)?;
    plan_graph(&graph, &declaration.registry, snapshot)
}
