//! Execution reporting.
//!
//! The executor emits one event per action lifecycle transition, one per
//! plan state transition, and a final report. Sinks decide what to do with
//! them; nothing here affects execution.

use std::sync::Mutex;

use keel_core::{ActionId, ActionKind, PlanSummary, ResourceId, Snapshot};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Never attempted: a prerequisite failed or the pass was cancelled.
    Aborted,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

/// `NotStarted → InProgress → {Completed, PartiallyFailed, Aborted}`. A plan
/// with no actions goes straight from `NotStarted` to `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    NotStarted,
    InProgress,
    Completed,
    PartiallyFailed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ActionPhase {
    Pending,
    Running {
        attempt: u32,
    },
    Retrying {
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    Succeeded {
        duration_ms: u64,
        remote_identifier: Option<String>,
    },
    Failed {
        duration_ms: u64,
        error: String,
    },
    Aborted {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub action: ActionId,
    pub resource_id: ResourceId,
    pub kind: String,
    #[serde(flatten)]
    pub phase: ActionPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: ActionId,
    pub resource_id: ResourceId,
    pub kind: ActionKind,
    pub status: ActionStatus,
    pub attempts: u32,
    pub duration_ms: Option<u64>,
    pub remote_identifier: Option<String>,
    pub error: Option<String>,
}

/// What actually happened, counted the same way as [`PlanSummary`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedSummary {
    pub added: usize,
    pub changed: usize,
    pub destroyed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub state: PlanState,
    pub planned: PlanSummary,
    pub applied: AppliedSummary,
    pub outcomes: Vec<ActionOutcome>,
    /// The snapshot after every successful action was recorded.
    pub snapshot: Snapshot,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.state == PlanState::Completed
    }

    pub fn outcome(&self, action: ActionId) -> Option<&ActionOutcome> {
        self.outcomes.iter().find(|o| o.action == action)
    }

    pub fn with_status(&self, status: ActionStatus) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(move |o| o.status == status)
    }

    pub fn count(&self, status: ActionStatus) -> usize {
        self.with_status(status).count()
    }
}

pub trait ReportingSink: Send + Sync {
    fn on_event(&self, event: &ActionEvent);

    fn on_state(&self, _state: PlanState) {}

    fn on_finish(&self, _report: &ExecutionReport) {}
}

/// Discards everything.
pub struct NoopSink;

impl ReportingSink for NoopSink {
    fn on_event(&self, _event: &ActionEvent) {}
}

/// Logs every transition through `tracing`.
pub struct TracingSink;

impl ReportingSink for TracingSink {
    fn on_event(&self, event: &ActionEvent) {
        let action = event.action;
        let resource = &event.resource_id;
        let kind = event.kind.as_str();
        match &event.phase {
            ActionPhase::Pending => {
                tracing::debug!(%action, %resource, kind, "action pending");
            }
            ActionPhase::Running { attempt } => {
                tracing::info!(%action, %resource, kind, attempt, "action running");
            }
            ActionPhase::Retrying {
                attempt,
                delay_ms,
                error,
            } => {
                tracing::warn!(%action, %resource, kind, attempt, delay_ms, error = %error, "transient failure, retrying");
            }
            ActionPhase::Succeeded {
                duration_ms,
                remote_identifier,
            } => {
                tracing::info!(%action, %resource, kind, duration_ms, remote_identifier = ?remote_identifier, "action succeeded");
            }
            ActionPhase::Failed { duration_ms, error } => {
                tracing::error!(%action, %resource, kind, duration_ms, error = %error, "action failed");
            }
            ActionPhase::Aborted { reason } => {
                tracing::warn!(%action, %resource, kind, reason = %reason, "action aborted");
            }
        }
    }

    fn on_state(&self, state: PlanState) {
        tracing::debug!(state = ?state, "plan state changed");
    }

    fn on_finish(&self, report: &ExecutionReport) {
        tracing::info!(
            state = ?report.state,
            added = report.applied.added,
            changed = report.applied.changed,
            destroyed = report.applied.destroyed,
            failed = report.count(ActionStatus::Failed),
            aborted = report.count(ActionStatus::Aborted),
            "execution finished"
        );
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ActionEvent>>,
    states: Mutex<Vec<PlanState>>,
    finished: Mutex<Option<ExecutionReport>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ActionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn events_for(&self, action: ActionId) -> Vec<ActionPhase> {
        self.events()
            .into_iter()
            .filter(|e| e.action == action)
            .map(|e| e.phase)
            .collect()
    }

    pub fn states(&self) -> Vec<PlanState> {
        self.states.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn finished(&self) -> Option<ExecutionReport> {
        self.finished.lock().ok().and_then(|r| r.clone())
    }
}

impl ReportingSink for RecordingSink {
    fn on_event(&self, event: &ActionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }

    fn on_state(&self, state: PlanState) {
        if let Ok(mut states) = self.states.lock() {
            states.push(state);
        }
    }

    fn on_finish(&self, report: &ExecutionReport) {
        if let Ok(mut finished) = self.finished.lock() {
            *finished = Some(report.clone());
        }
    }
}
