//! Plan executor.
//!
//! Walks the action DAG: an action is dispatched once all of its
//! prerequisites have succeeded, with at most `parallelism` remote calls in
//! flight. Transient provider errors are retried with backoff. A failed
//! action aborts its transitive dependents and nothing else; independent
//! branches keep going. Cancellation stops new dispatches and lets in-flight
//! actions finish.
//!
//! The snapshot is updated after each successful action and flushed to the
//! store, so a pass that stops halfway leaves an accurate record of what it
//! did.

use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use keel_core::{Action, ActionId, ActionKind, ObservedInstance, Plan, Resolver, Snapshot};

use crate::cancel::CancelSignal;
use crate::config::ExecutorConfig;
use crate::error::{ProviderError, ProvisionerError, format_err_chain};
use crate::persistence::SnapshotStore;
use crate::provider::{ApplyRequest, BoxFuture, Operation, StateProvider};
use crate::report::{
    ActionEvent, ActionOutcome, ActionPhase, ActionStatus, AppliedSummary, ExecutionReport,
    PlanState, ReportingSink,
};
use crate::retry::with_retry;

pub struct Executor<'a> {
    provider: &'a dyn StateProvider,
    sink: &'a dyn ReportingSink,
    config: ExecutorConfig,
    store: Option<&'a SnapshotStore>,
    cancel: Option<CancelSignal>,
}

struct Completion {
    action: ActionId,
    attempts: u32,
    duration: Duration,
    result: Result<ObservedInstance, ProviderError>,
}

/// Mutable bookkeeping for one execution.
struct Run<'p> {
    plan: &'p Plan,
    statuses: Vec<ActionStatus>,
    outcomes: Vec<ActionOutcome>,
    followers: Vec<Vec<usize>>,
    snapshot: Snapshot,
    applied: AppliedSummary,
}

impl<'p> Run<'p> {
    fn new(plan: &'p Plan, snapshot: Snapshot) -> Self {
        let n = plan.actions.len();
        let mut followers = vec![Vec::new(); n];
        for action in &plan.actions {
            for prereq in &action.prerequisites {
                followers[prereq.0].push(action.id.0);
            }
        }

        Self {
            plan,
            statuses: vec![ActionStatus::Pending; n],
            outcomes: plan
                .actions
                .iter()
                .map(|a| ActionOutcome {
                    action: a.id,
                    resource_id: a.resource_id.clone(),
                    kind: a.kind.clone(),
                    status: ActionStatus::Pending,
                    attempts: 0,
                    duration_ms: None,
                    remote_identifier: None,
                    error: None,
                })
                .collect(),
            followers,
            snapshot,
            applied: AppliedSummary::default(),
        }
    }

    fn ready(&self, i: usize) -> bool {
        self.statuses[i] == ActionStatus::Pending
            && self.plan.actions[i]
                .prerequisites
                .iter()
                .all(|p| self.statuses[p.0] == ActionStatus::Succeeded)
    }

    /// Whether the live entry for the action's resource still carries the
    /// remote identifier of the instance the action would tear down.
    fn replaced_in_place(&self, action: &Action) -> bool {
        let prior = action.prior.as_ref().and_then(|p| p.remote_identifier.as_deref());
        prior.is_some() && self.snapshot.remote_identifier(&action.resource_id) == prior
    }

    fn set_status(&mut self, i: usize, status: ActionStatus) {
        self.statuses[i] = status;
        self.outcomes[i].status = status;
    }
}

impl<'a> Executor<'a> {
    pub fn new(
        provider: &'a dyn StateProvider,
        sink: &'a dyn ReportingSink,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            provider,
            sink,
            config,
            store: None,
            cancel: None,
        }
    }

    /// Flush the snapshot to `store` after every action that changes it.
    pub fn with_store(mut self, store: &'a SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Execute `plan` against the remote system, starting from `snapshot`.
    ///
    /// Action failures are reported in the returned report, not as `Err`.
    /// `Err` means the pass could not run at all (invalid config or plan)
    /// or the final snapshot could not be persisted.
    pub async fn execute(
        &self,
        plan: Plan,
        snapshot: Snapshot,
    ) -> Result<ExecutionReport, ProvisionerError> {
        self.config.validate()?;
        plan.linearize()?;

        let mut run = Run::new(&plan, snapshot);
        let mut in_flight: FuturesUnordered<BoxFuture<'a, Completion>> = FuturesUnordered::new();
        let mut cancel = self.cancel.clone();
        let mut cancelled = false;

        tracing::info!(
            actions = plan.actions.len(),
            parallelism = self.config.parallelism,
            "executing plan"
        );
        self.sink.on_state(PlanState::NotStarted);
        for action in &plan.actions {
            self.emit(action, ActionPhase::Pending);
        }
        if !plan.actions.is_empty() {
            self.sink.on_state(PlanState::InProgress);
        }

        loop {
            if !cancelled && cancel.as_ref().is_some_and(CancelSignal::is_cancelled) {
                cancelled = true;
                tracing::warn!(
                    in_flight = in_flight.len(),
                    "cancellation requested, no new actions will start"
                );
            }
            if !cancelled {
                self.dispatch_ready(&mut run, &mut in_flight).await;
            }
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                Some(done) = in_flight.next() => self.complete(&mut run, done).await,
                () = wait_for_cancel(&mut cancel), if !cancelled => {
                    cancelled = true;
                    tracing::warn!(
                        in_flight = in_flight.len(),
                        "cancellation requested, waiting for in-flight actions"
                    );
                }
                else => break,
            }
        }

        let mut cut_short = false;
        for i in 0..plan.actions.len() {
            if run.statuses[i] == ActionStatus::Pending {
                cut_short = true;
                let reason = if cancelled {
                    "pass cancelled before the action started"
                } else {
                    "prerequisites did not complete"
                };
                self.abort(&mut run, i, reason);
            }
        }

        let failed = run.statuses.iter().any(|s| *s != ActionStatus::Succeeded);
        let state = if cancelled && cut_short {
            PlanState::Aborted
        } else if failed {
            PlanState::PartiallyFailed
        } else {
            PlanState::Completed
        };

        let report = ExecutionReport {
            state,
            planned: plan.summary,
            applied: run.applied,
            outcomes: run.outcomes,
            snapshot: run.snapshot,
        };

        if let Some(store) = self.store {
            store.flush(&report.snapshot).await?;
        }
        self.sink.on_state(state);
        self.sink.on_finish(&report);
        Ok(report)
    }

    /// Start every ready action while there is capacity. Local actions
    /// complete immediately and may unblock more, so repeat until stable.
    async fn dispatch_ready(
        &self,
        run: &mut Run<'_>,
        in_flight: &mut FuturesUnordered<BoxFuture<'a, Completion>>,
    ) {
        let plan = run.plan;
        loop {
            let mut progressed = false;

            for (i, action) in plan.actions.iter().enumerate() {
                if !run.ready(i) {
                    continue;
                }

                if let ActionKind::RepointDependents { dependents } = &action.kind {
                    run.set_status(i, ActionStatus::Running);
                    self.emit(action, ActionPhase::Running { attempt: 1 });
                    tracing::debug!(
                        resource = %action.resource_id,
                        dependents = dependents.len(),
                        "dependents repointed"
                    );
                    self.succeed(run, i, None, 0, Duration::ZERO).await;
                    progressed = true;
                    continue;
                }

                // A stable identity comes back from CreateNew under the same
                // remote identifier: the old instance is already gone and
                // deleting that identifier would take the new one with it.
                if matches!(action.kind, ActionKind::DestroyOld) && run.replaced_in_place(action) {
                    run.set_status(i, ActionStatus::Running);
                    self.emit(action, ActionPhase::Running { attempt: 1 });
                    tracing::info!(
                        resource = %action.resource_id,
                        "replacement kept its remote identifier, nothing to destroy"
                    );
                    self.succeed(run, i, None, 0, Duration::ZERO).await;
                    progressed = true;
                    continue;
                }

                if in_flight.len() >= self.config.parallelism {
                    continue;
                }

                match self.request_for(action, run) {
                    Ok(request) => {
                        run.set_status(i, ActionStatus::Running);
                        self.emit(action, ActionPhase::Running { attempt: 1 });
                        in_flight.push(self.spawn(action, request));
                    }
                    Err(error) => {
                        self.fail(run, i, 0, Duration::ZERO, error);
                        progressed = true;
                    }
                }
            }

            if !progressed {
                return;
            }
        }
    }

    fn spawn(&self, action: &Action, request: ApplyRequest) -> BoxFuture<'a, Completion> {
        let provider = self.provider;
        let sink = self.sink;
        let retry = self.config.retry;
        let id = action.id;
        let resource_id = action.resource_id.clone();
        let kind = action.kind.label().to_string();

        Box::pin(async move {
            let started = Instant::now();
            let (attempts, result) = with_retry(
                &retry,
                || provider.apply(request.clone()),
                |attempt, delay, error| {
                    sink.on_event(&ActionEvent {
                        action: id,
                        resource_id: resource_id.clone(),
                        kind: kind.clone(),
                        phase: ActionPhase::Retrying {
                            attempt,
                            delay_ms: delay.as_millis() as u64,
                            error: error.to_string(),
                        },
                    });
                },
            )
            .await;

            Completion {
                action: id,
                attempts,
                duration: started.elapsed(),
                result,
            }
        })
    }

    /// Build the provider call for a remote action, resolving references
    /// against the snapshot as it stands now.
    fn request_for(&self, action: &Action, run: &Run<'_>) -> Result<ApplyRequest, String> {
        let plan = run.plan;
        match &action.kind {
            ActionKind::Create | ActionKind::CreateNew | ActionKind::Update { .. } => {
                let declared = plan
                    .resources
                    .get(&action.resource_id)
                    .ok_or_else(|| format!("plan carries no declaration for {}", action.resource_id))?;
                let attributes = Resolver::new(&plan.resources, &run.snapshot)
                    .attributes(declared)
                    .map_err(|field| {
                        format!("field `{field}` references a value that does not exist yet")
                    })?;

                let (operation, remote_identifier, changed_fields) = match &action.kind {
                    ActionKind::Update { fields } => {
                        let remote = run
                            .snapshot
                            .remote_identifier(&action.resource_id)
                            .ok_or_else(|| {
                                format!("no existing instance of {} to update", action.resource_id)
                            })?;
                        (Operation::Update, Some(remote.to_string()), fields.clone())
                    }
                    _ => (Operation::Create, None, BTreeSet::new()),
                };

                Ok(ApplyRequest {
                    resource_id: action.resource_id.clone(),
                    resource_type: action.resource_type.clone(),
                    operation,
                    attributes,
                    changed_fields,
                    remote_identifier,
                })
            }
            ActionKind::DestroyOld | ActionKind::Delete => Ok(ApplyRequest {
                resource_id: action.resource_id.clone(),
                resource_type: action.resource_type.clone(),
                operation: Operation::Delete,
                attributes: Default::default(),
                changed_fields: BTreeSet::new(),
                remote_identifier: action
                    .prior
                    .as_ref()
                    .and_then(|p| p.remote_identifier.clone()),
            }),
            ActionKind::RepointDependents { .. } => {
                Err("repointing has no remote operation".to_string())
            }
        }
    }

    async fn complete(&self, run: &mut Run<'_>, done: Completion) {
        let i = done.action.0;
        match done.result {
            Ok(instance) => {
                self.succeed(run, i, Some(instance), done.attempts, done.duration)
                    .await
            }
            Err(e) => self.fail(run, i, done.attempts, done.duration, format_err_chain(&e)),
        }
    }

    async fn succeed(
        &self,
        run: &mut Run<'_>,
        i: usize,
        observed: Option<ObservedInstance>,
        attempts: u32,
        duration: Duration,
    ) {
        let plan = run.plan;
        let action = &plan.actions[i];
        let mut remote_identifier = None;
        let mut changed_snapshot = false;

        match (&action.kind, observed) {
            (ActionKind::Create | ActionKind::CreateNew | ActionKind::Update { .. }, Some(mut instance)) => {
                // Until its DestroyOld succeeds, the old instance is tracked
                // separately so a failed pass does not lose it.
                if matches!(action.kind, ActionKind::CreateNew)
                    && let Some(old) = run.snapshot.get(&action.resource_id).cloned()
                    && old.remote_identifier != instance.remote_identifier
                {
                    run.snapshot.retire(old);
                }

                instance.resource_id = action.resource_id.clone();
                instance.resource_type = action.resource_type.clone();
                instance.exists = true;
                instance.depends_on = plan
                    .resources
                    .get(&action.resource_id)
                    .map(|r| r.dependencies())
                    .unwrap_or_default();
                remote_identifier = instance.remote_identifier.clone();
                run.snapshot.replace(instance);
                changed_snapshot = true;

                if matches!(action.kind, ActionKind::Update { .. }) {
                    run.applied.changed += 1;
                } else {
                    run.applied.added += 1;
                }
            }
            (ActionKind::DestroyOld | ActionKind::Delete, _) => {
                remote_identifier = action.prior.as_ref().and_then(|p| p.remote_identifier.clone());
                if let Some(remote) = &remote_identifier {
                    run.snapshot.release(remote);
                }
                // After a replacement the live entry is the new instance,
                // even when it kept the old remote identifier. Only a delete
                // of an undeclared resource drops it.
                if matches!(action.kind, ActionKind::Delete)
                    && run.snapshot.exists(&action.resource_id)
                    && run.snapshot.remote_identifier(&action.resource_id) == remote_identifier.as_deref()
                {
                    run.snapshot.remove(&action.resource_id);
                }
                changed_snapshot = true;
                run.applied.destroyed += 1;
            }
            _ => {}
        }

        let duration_ms = duration.as_millis() as u64;
        run.set_status(i, ActionStatus::Succeeded);
        let outcome = &mut run.outcomes[i];
        outcome.attempts = attempts;
        outcome.duration_ms = Some(duration_ms);
        outcome.remote_identifier = remote_identifier.clone();
        self.emit(
            action,
            ActionPhase::Succeeded {
                duration_ms,
                remote_identifier,
            },
        );

        if changed_snapshot && let Some(store) = self.store {
            if let Err(e) = store.flush(&run.snapshot).await {
                tracing::error!(
                    error = %format_err_chain(&e),
                    action = %action,
                    "failed to flush snapshot after action"
                );
            }
        }
    }

    fn fail(&self, run: &mut Run<'_>, i: usize, attempts: u32, duration: Duration, error: String) {
        let plan = run.plan;
        let action = &plan.actions[i];
        let duration_ms = duration.as_millis() as u64;
        run.set_status(i, ActionStatus::Failed);
        let outcome = &mut run.outcomes[i];
        outcome.attempts = attempts;
        outcome.duration_ms = Some(duration_ms);
        outcome.error = Some(error.clone());
        self.emit(action, ActionPhase::Failed { duration_ms, error });

        // Everything downstream of a failure is abandoned.
        let reason = format!("prerequisite {action} failed");
        let mut queue: VecDeque<usize> = run.followers[i].iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if run.statuses[next] != ActionStatus::Pending {
                continue;
            }
            self.abort(run, next, &reason);
            queue.extend(run.followers[next].iter().copied());
        }
    }

    fn abort(&self, run: &mut Run<'_>, i: usize, reason: &str) {
        run.set_status(i, ActionStatus::Aborted);
        run.outcomes[i].error = Some(reason.to_string());
        self.emit(
            &run.plan.actions[i],
            ActionPhase::Aborted {
                reason: reason.to_string(),
            },
        );
    }

    fn emit(&self, action: &Action, phase: ActionPhase) {
        self.sink.on_event(&ActionEvent {
            action: action.id,
            resource_id: action.resource_id.clone(),
            kind: action.kind.label().to_string(),
            phase,
        });
    }
}

async fn wait_for_cancel(cancel: &mut Option<CancelSignal>) {
    match cancel {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending().await,
    }
}
