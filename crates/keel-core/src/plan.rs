//! Plan Builder / Orderer.
//!
//! Turns verdicts into atomic actions with explicit prerequisite edges. The
//! edges form a DAG over actions (not over resources): a replacement is
//! split into `CreateNew`, `RepointDependents` and `DestroyOld`, and each of
//! those is ordered on its own.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::addr::ResourceId;
use crate::diff::{Cause, FieldDrift, Verdict, Verdicts};
use crate::error::CoreError;
use crate::graph::ResourceGraph;
use crate::resource::Resource;
use crate::snapshot::{ObservedInstance, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub usize);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update { fields: BTreeSet<String> },
    /// First step of a replacement: bring up the new instance.
    CreateNew,
    /// Cutover point of a replacement. Completes once every listed
    /// dependent has been moved to the new identity by its own action.
    RepointDependents { dependents: Vec<ResourceId> },
    /// Last step of a replacement: tear down the old instance.
    DestroyOld,
    /// Remove a resource that is no longer declared.
    Delete,
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update { .. } => "update",
            Self::CreateNew => "create_new",
            Self::RepointDependents { .. } => "repoint_dependents",
            Self::DestroyOld => "destroy_old",
            Self::Delete => "delete",
        }
    }

    /// Whether the action writes the declared state of its resource.
    pub fn writes_declared(&self) -> bool {
        matches!(self, Self::Create | Self::Update { .. } | Self::CreateNew)
    }

    /// Whether the action removes a remote instance.
    pub fn destroys(&self) -> bool {
        matches!(self, Self::DestroyOld | Self::Delete)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub resource_id: ResourceId,
    pub resource_type: String,
    pub kind: ActionKind,
    /// Actions that must have succeeded before this one may start.
    pub prerequisites: BTreeSet<ActionId>,
    /// The instance being torn down, for `DestroyOld` and `Delete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior: Option<ObservedInstance>,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.id, self.kind, self.resource_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub to_add: usize,
    pub to_change: usize,
    pub to_destroy: usize,
}

impl PlanSummary {
    pub fn total(&self) -> usize {
        self.to_add + self.to_change + self.to_destroy
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// One row per resource for rendering: what will happen and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub resource_id: ResourceId,
    pub resource_type: String,
    /// `None` for resources that are no longer declared.
    pub verdict: Option<Verdict>,
    pub cause: Cause,
    pub drift: Vec<FieldDrift>,
}

/// The executable translation of verdicts into remote operations.
///
/// Self-contained: it carries the declared payloads it needs, so it can be
/// written out by a dry run and executed later.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub entries: Vec<PlanEntry>,
    pub summary: PlanSummary,
    pub resources: BTreeMap<ResourceId, Resource>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn action(&self, id: ActionId) -> Option<&Action> {
        self.actions.get(id.0)
    }

    pub fn actions_for<'a>(&'a self, resource: &'a ResourceId) -> impl Iterator<Item = &'a Action> {
        self.actions.iter().filter(move |a| &a.resource_id == resource)
    }

    /// A valid topological order of the actions, lowest id first among
    /// actions that are ready at the same time.
    pub fn linearize(&self) -> Result<Vec<ActionId>, CoreError> {
        let n = self.actions.len();
        let mut remaining = vec![0usize; n];
        let mut followers = vec![Vec::new(); n];

        for (index, action) in self.actions.iter().enumerate() {
            if action.id.0 != index {
                return Err(CoreError::MalformedPlan(format!(
                    "action {action} is stored at position {index}"
                )));
            }
        }

        for action in &self.actions {
            for prereq in &action.prerequisites {
                if prereq.0 >= n {
                    return Err(CoreError::MalformedPlan(format!(
                        "action {action} waits on unknown action {prereq}"
                    )));
                }
                remaining[action.id.0] += 1;
                followers[prereq.0].push(action.id.0);
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = ready.pop_first() {
            order.push(ActionId(i));
            for &next in &followers[i] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() != n {
            let stuck = self
                .actions
                .iter()
                .filter(|a| remaining[a.id.0] > 0)
                .map(ToString::to_string)
                .collect();
            return Err(CoreError::PlanCycle { actions: stuck });
        }

        Ok(order)
    }
}

/// Per-resource handles on the actions created for it.
#[derive(Debug, Default, Clone, Copy)]
struct Slots {
    /// `Create`, `Update` or `CreateNew`.
    write: Option<ActionId>,
    /// `Create` or `CreateNew`: the action that brings the new identity up.
    create: Option<ActionId>,
    update: Option<ActionId>,
    repoint: Option<ActionId>,
    destroy: Option<ActionId>,
}

struct Builder<'a> {
    graph: &'a ResourceGraph,
    snapshot: &'a Snapshot,
    verdicts: &'a Verdicts,
    actions: Vec<Action>,
    slots: BTreeMap<ResourceId, Slots>,
}

impl<'a> Builder<'a> {
    fn push(
        &mut self,
        resource_id: &ResourceId,
        resource_type: &str,
        kind: ActionKind,
        prior: Option<ObservedInstance>,
    ) -> ActionId {
        let id = ActionId(self.actions.len());
        self.actions.push(Action {
            id,
            resource_id: resource_id.clone(),
            resource_type: resource_type.to_string(),
            kind,
            prerequisites: BTreeSet::new(),
            prior,
        });
        id
    }

    fn after(&mut self, action: ActionId, prerequisite: ActionId) {
        if action != prerequisite {
            self.actions[action.0].prerequisites.insert(prerequisite);
        }
    }

    fn slots(&self, id: &ResourceId) -> Slots {
        self.slots.get(id).copied().unwrap_or_default()
    }

    fn emit_actions(&mut self) {
        for id in self.graph.topological_order() {
            let Some(resource) = self.graph.get(id) else {
                continue;
            };
            let Some(verdict) = self.verdicts.verdict(id) else {
                continue;
            };
            let mut slots = Slots::default();

            match verdict {
                Verdict::NoOp => {}
                Verdict::Create => {
                    let a = self.push(id, &resource.resource_type, ActionKind::Create, None);
                    slots.write = Some(a);
                    slots.create = Some(a);
                }
                Verdict::Update(fields) => {
                    let kind = ActionKind::Update {
                        fields: fields.clone(),
                    };
                    let a = self.push(id, &resource.resource_type, kind, None);
                    slots.write = Some(a);
                    slots.update = Some(a);
                }
                Verdict::Replace(_) => {
                    let create = self.push(id, &resource.resource_type, ActionKind::CreateNew, None);
                    let repoint = self.push(
                        id,
                        &resource.resource_type,
                        ActionKind::RepointDependents { dependents: vec![] },
                        None,
                    );
                    let prior = self.snapshot.get(id).cloned();
                    let destroy =
                        self.push(id, &resource.resource_type, ActionKind::DestroyOld, prior);
                    slots.write = Some(create);
                    slots.create = Some(create);
                    slots.repoint = Some(repoint);
                    slots.destroy = Some(destroy);
                }
            }

            self.slots.insert(id.clone(), slots);
        }

        // Orphans: dependents before their dependencies, so reverse the
        // recorded edges when ordering below.
        let orphans: Vec<ObservedInstance> =
            self.snapshot.orphans(self.graph).cloned().collect();
        for orphan in orphans {
            let a = self.push(
                &orphan.resource_id,
                &orphan.resource_type,
                ActionKind::Delete,
                Some(orphan.clone()),
            );
            self.slots.insert(
                orphan.resource_id.clone(),
                Slots {
                    destroy: Some(a),
                    ..Slots::default()
                },
            );
        }

        // Old instances left behind by a replacement that did not finish.
        // They share an id with the live resource, so they get no slots.
        let retired: Vec<ObservedInstance> = self.snapshot.retired().cloned().collect();
        for instance in retired {
            self.push(
                &instance.resource_id,
                &instance.resource_type,
                ActionKind::Delete,
                Some(instance.clone()),
            );
        }
    }

    fn order_writes(&mut self) {
        for resource in self.graph.resources() {
            let Some(write) = self.slots(&resource.id).write else {
                continue;
            };

            // Create/update only once every dependency's new identity exists.
            for dep in self.graph.dependencies_of(&resource.id) {
                if let Some(create) = self.slots(dep).create {
                    self.after(write, create);
                }
            }

            // Derived values must be read after the dependency has been
            // updated to the value they derive from.
            for (_, reference) in resource.references() {
                if reference.is_identity() {
                    continue;
                }
                if let Some(update) = self.slots(&reference.target).update {
                    self.after(write, update);
                }
            }
        }
    }

    fn order_replacements(&mut self) {
        for resource in self.graph.resources() {
            let slots = self.slots(&resource.id);
            let (Some(create), Some(repoint), Some(destroy)) =
                (slots.create, slots.repoint, slots.destroy)
            else {
                continue;
            };

            self.after(repoint, create);
            self.after(destroy, repoint);

            let mut repointed = Vec::new();
            for dependent_id in self.graph.direct_dependents_of(&resource.id) {
                let Some(dependent) = self.graph.get(dependent_id) else {
                    continue;
                };
                let dependent_slots = self.slots(dependent_id);

                if dependent.references_to(&resource.id).is_empty() {
                    continue;
                }
                let moves_reference = matches!(
                    self.verdicts.verdict(dependent_id),
                    Some(Verdict::Update(_) | Verdict::Replace(_))
                );
                if let (true, Some(write)) = (moves_reference, dependent_slots.write) {
                    self.after(repoint, write);
                    repointed.push(dependent_id.clone());
                }
            }

            if let ActionKind::RepointDependents { dependents } = &mut self.actions[repoint.0].kind
            {
                *dependents = repointed;
            }
        }
    }

    /// Tearing an instance down waits for every action that drops a live
    /// reference to it, using the dependencies recorded in the snapshot.
    /// Old instances hold what they depended on when they were written, not
    /// what the declaration says now, so a reversed edge orders correctly.
    /// This is also what orders deletes of undeclared resources.
    fn order_destroys(&mut self) {
        let destroys: Vec<(ResourceId, ActionId)> = self
            .actions
            .iter()
            .filter(|a| a.kind.destroys())
            .map(|a| (a.resource_id.clone(), a.id))
            .collect();
        let holders: Vec<(ResourceId, BTreeSet<ResourceId>)> = self
            .snapshot
            .iter()
            .map(|i| (i.resource_id.clone(), i.depends_on.clone()))
            .collect();

        for (target, destroy) in destroys {
            for (holder, depends_on) in &holders {
                if holder == &target || !depends_on.contains(&target) {
                    continue;
                }
                let slots = self.slots(holder);
                if let Some(update) = slots.update {
                    self.after(destroy, update);
                }
                if let Some(holder_destroy) = slots.destroy {
                    self.after(destroy, holder_destroy);
                }
            }
        }
    }

    fn entries(&self) -> Vec<PlanEntry> {
        let mut entries: Vec<PlanEntry> = self
            .graph
            .topological_order()
            .into_iter()
            .filter_map(|id| {
                let resource = self.graph.get(id)?;
                let diff = self.verdicts.get(id)?;
                Some(PlanEntry {
                    resource_id: id.clone(),
                    resource_type: resource.resource_type.clone(),
                    verdict: Some(diff.verdict.clone()),
                    cause: diff.cause.clone(),
                    drift: diff.drift.clone(),
                })
            })
            .collect();

        entries.extend(self.snapshot.orphans(self.graph).map(|orphan| PlanEntry {
            resource_id: orphan.resource_id.clone(),
            resource_type: orphan.resource_type.clone(),
            verdict: None,
            cause: Cause::Orphaned,
            drift: vec![],
        }));

        entries.extend(self.snapshot.retired().map(|instance| PlanEntry {
            resource_id: instance.resource_id.clone(),
            resource_type: instance.resource_type.clone(),
            verdict: None,
            cause: Cause::Superseded {
                remote_identifier: instance.remote_identifier.clone(),
            },
            drift: vec![],
        }));

        entries
    }
}

/// Build the ordered plan for a classified (and cascaded) set of verdicts.
pub fn build_plan(
    graph: &ResourceGraph,
    snapshot: &Snapshot,
    verdicts: &Verdicts,
) -> Result<Plan, CoreError> {
    let mut builder = Builder {
        graph,
        snapshot,
        verdicts,
        actions: Vec::new(),
        slots: BTreeMap::new(),
    };

    builder.emit_actions();
    builder.order_writes();
    builder.order_replacements();
    builder.order_destroys();

    let mut summary = PlanSummary::default();
    for action in &builder.actions {
        match action.kind {
            ActionKind::Create | ActionKind::CreateNew => summary.to_add += 1,
            ActionKind::Update { .. } => summary.to_change += 1,
            ActionKind::DestroyOld | ActionKind::Delete => summary.to_destroy += 1,
            ActionKind::RepointDependents { .. } => {}
        }
    }

    let plan = Plan {
        entries: builder.entries(),
        actions: builder.actions,
        summary,
        resources: graph
            .resources()
            .map(|r| (r.id.clone(), r.clone()))
            .collect(),
    };

    // Only reachable if the resource graph itself had a cycle.
    plan.linearize()?;

    tracing::info!(
        actions = plan.actions.len(),
        to_add = summary.to_add,
        to_change = summary.to_change,
        to_destroy = summary.to_destroy,
        "plan built"
    );
    Ok(plan)
}
