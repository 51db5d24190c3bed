//! keel-provisioner
//!
//! Drives a reconciliation pass against a remote system through a
//! [`StateProvider`]: read the snapshot, plan with `keel-core`, execute the
//! plan, persist what happened.
//!
//! Public API:
//! - `plan()` — read + plan, no mutations (dry run)
//! - `apply()` — execute a plan, flushing the snapshot after each action
//! - `reconcile()` — convenience: load → read → plan → apply
//! - `reconcile_with_config()` — `reconcile()` against the configured state path

pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod memory;
pub mod persistence;
pub mod provider;
pub mod reader;
pub mod report;
pub mod retry;

pub use crate::cancel::{cancellation, CancelHandle, CancelSignal};
pub use crate::config::{load_config, save_config, ExecutorConfig, KeelConfig, RetryPolicy};
pub use crate::error::{format_err_chain, ProviderError, ProvisionerError};
pub use crate::executor::Executor;
pub use crate::logging::{init_logging, try_init_logging, LogFormat};
pub use crate::memory::MemoryProvider;
pub use crate::persistence::SnapshotStore;
pub use crate::provider::{ApplyRequest, BoxFuture, Operation, ReadRequest, StateProvider};
pub use crate::reader::read_snapshot;
pub use crate::report::{
    ActionEvent, ActionOutcome, ActionPhase, ActionStatus, AppliedSummary, ExecutionReport,
    NoopSink, PlanState, RecordingSink, ReportingSink, TracingSink,
};

use keel_core::{Declaration, Plan, Snapshot};

/// A plan together with the snapshot it was computed against. Executing the
/// plan must start from the same snapshot.
#[derive(Debug, Clone)]
pub struct PlannedPass {
    pub plan: Plan,
    pub snapshot: Snapshot,
}

/// Dry run: validate the declaration, read the remote state and build the
/// plan. Nothing is mutated.
pub async fn plan(
    declaration: &Declaration,
    provider: &dyn StateProvider,
    prior: &Snapshot,
    config: &ExecutorConfig,
) -> Result<PlannedPass, ProvisionerError> {
    config.validate()?;
    let graph = keel_core::preflight(declaration)?;
    let snapshot = reader::read_snapshot(provider, graph.resources(), prior, config).await?;
    let plan = keel_core::plan_graph(&graph, &declaration.registry, &snapshot)?;
    Ok(PlannedPass { plan, snapshot })
}

/// Execute a previously built plan.
pub async fn apply(
    pass: PlannedPass,
    provider: &dyn StateProvider,
    sink: &dyn ReportingSink,
    config: &ExecutorConfig,
    store: Option<&SnapshotStore>,
    cancel: Option<CancelSignal>,
) -> Result<ExecutionReport, ProvisionerError> {
    let mut executor = Executor::new(provider, sink, config.clone());
    if let Some(store) = store {
        executor = executor.with_store(store);
    }
    if let Some(cancel) = cancel {
        executor = executor.with_cancel(cancel);
    }
    executor.execute(pass.plan, pass.snapshot).await
}

/// Full pass: load the last snapshot → read → plan → apply.
pub async fn reconcile(
    declaration: &Declaration,
    provider: &dyn StateProvider,
    store: &SnapshotStore,
    sink: &dyn ReportingSink,
    config: &ExecutorConfig,
) -> Result<ExecutionReport, ProvisionerError> {
    let prior = store.load().await?;
    let pass = plan(declaration, provider, &prior, config).await?;

    if pass.plan.summary.has_changes() {
        tracing::info!(
            to_add = pass.plan.summary.to_add,
            to_change = pass.plan.summary.to_change,
            to_destroy = pass.plan.summary.to_destroy,
            "executing reconciliation plan"
        );
    } else {
        tracing::info!("all resources in sync, no changes needed");
    }

    apply(pass, provider, sink, config, Some(store), None).await
}

/// Full pass driven by a loaded [`KeelConfig`]: the snapshot lives at
/// `config.state_path`.
pub async fn reconcile_with_config(
    declaration: &Declaration,
    provider: &dyn StateProvider,
    sink: &dyn ReportingSink,
    config: &KeelConfig,
) -> Result<ExecutionReport, ProvisionerError> {
    config.validate()?;
    let store = SnapshotStore::new(config.state_path.clone());
    reconcile(declaration, provider, &store, sink, &config.executor).await
}
