//! Typed error hierarchy for the Foreman orchestrator.
//!
//! One enum per subsystem:
//! - `StateError` — state machine and state store failures
//! - `WorkerError` — agent dispatch and execution failures
//! - `SetupError` — setup-phase step failures, one variant per step
//! - `PollError` — signal polling failures
//! - `LabelSyncError` — label reconciliation failures
//!
//! `OrchestratorError` wraps all of them transparently so callers can catch
//! broadly or narrowly. Every variant carries a stable machine-readable code
//! via `code()` in addition to its display message.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the state machine and state store. All non-retryable.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("No workflow exists for feature {feature_id}")]
    NotFound { feature_id: u64 },

    #[error("Workflow already exists for feature {feature_id}")]
    AlreadyExists { feature_id: u64 },

    #[error("Invalid transition from {from}: {message}")]
    InvalidTransition { from: String, message: String },

    #[error("Operation not valid in phase {phase}: {message}")]
    InvalidState { phase: String, message: String },

    #[error("State file corrupted at {path}: {source}")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to access state file at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StateError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            StateError::NotFound { .. } => "WORKFLOW_NOT_FOUND",
            StateError::AlreadyExists { .. } => "WORKFLOW_EXISTS",
            StateError::InvalidTransition { .. } => "INVALID_TRANSITION",
            StateError::InvalidState { .. } => "INVALID_STATE",
            StateError::Corrupted { .. } => "STATE_CORRUPTED",
            StateError::Io { .. } => "STATE_IO",
        }
    }
}

/// Errors from agent dispatch and execution.
///
/// Dispatch conflicts abort the requested dispatch. Execution failures of a
/// spawned worker are observed only indirectly (no completion signal ever
/// arrives) and are handled by workflow-level timeout policy, not here.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Worker {worker} already dispatched for feature {feature_id}")]
    DispatchConflict { worker: String, feature_id: u64 },

    #[error("Failed to dispatch worker {worker}: {source}")]
    DispatchFailed {
        worker: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Worker {worker} failed during execution: {message}")]
    ExecutionFailed { worker: String, message: String },

    #[error("Worker {worker} exceeded timeout of {timeout_secs}s")]
    TimedOut { worker: String, timeout_secs: u64 },

    #[error("Worker runner '{command}' is not available")]
    RunnerUnavailable { command: String },
}

impl WorkerError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            WorkerError::DispatchConflict { .. } => "WORKER_DISPATCH_CONFLICT",
            WorkerError::DispatchFailed { .. } => "WORKER_DISPATCH_FAILED",
            WorkerError::ExecutionFailed { .. } => "WORKER_EXECUTION_FAILED",
            WorkerError::TimedOut { .. } => "WORKER_TIMEOUT",
            WorkerError::RunnerUnavailable { .. } => "WORKER_RUNNER_UNAVAILABLE",
        }
    }
}

/// Errors from the resumable setup executor, one variant per step.
///
/// Each leaves prior steps' completion markers intact so a retry resumes
/// from the failed step. Never retried automatically inside the executor.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Failed to create issue: {source}")]
    Issue {
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to create branch {branch}: {source}")]
    Branch {
        branch: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to create worktree for feature {feature_id}: {source}")]
    Worktree {
        feature_id: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to initialize plans directory for feature {feature_id}: {source}")]
    Plans {
        feature_id: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

impl SetupError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            SetupError::Issue { .. } => "ISSUE_CREATION_ERROR",
            SetupError::Branch { .. } => "BRANCH_CREATION_ERROR",
            SetupError::Worktree { .. } => "WORKTREE_CREATION_ERROR",
            SetupError::Plans { .. } => "PLANS_INIT_ERROR",
            SetupError::State(e) => e.code(),
        }
    }
}

/// Errors from signal polling. A transient fetch failure during a single
/// attempt is not an error at this level; only timeout exhaustion is.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Signal {signal} not detected on feature {feature_id} after {timeout_secs}s")]
    Timeout {
        feature_id: u64,
        signal: String,
        timeout_secs: u64,
    },

    #[error("Failed to fetch comments for feature {feature_id}: {source}")]
    Fetch {
        feature_id: u64,
        #[source]
        source: anyhow::Error,
    },
}

impl PollError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            PollError::Timeout { .. } => "POLL_TIMEOUT",
            PollError::Fetch { .. } => "POLL_ERROR",
        }
    }
}

/// Errors from label synchronization. Individual removal failures are
/// accumulated in the operation result, not raised; only a hard failure to
/// reach the backend surfaces here.
#[derive(Debug, Error)]
pub enum LabelSyncError {
    #[error("Failed to sync labels on feature {feature_id}: {message}")]
    Sync { feature_id: u64, message: String },
}

impl LabelSyncError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            LabelSyncError::Sync { .. } => "LABEL_SYNC_ERROR",
        }
    }
}

/// Top-level error for the orchestration loop and CLI.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    LabelSync(#[from] LabelSyncError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::State(e) => e.code(),
            OrchestratorError::Worker(e) => e.code(),
            OrchestratorError::Setup(e) => e.code(),
            OrchestratorError::Poll(e) => e.code(),
            OrchestratorError::LabelSync(e) => e.code(),
            OrchestratorError::Other(_) => "UNKNOWN_ERROR",
        }
    }
}
