//! Workflow state: the per-feature aggregate and its state machine.
//!
//! `WorkflowState` is the aggregate root, one per feature. The state machine
//! operates directly on it: `can_advance` / `advance` consult the fixed phase
//! table in [`crate::phase`], and phase history is append-only so the full
//! transition record is always reconstructible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::StateError;
use crate::phase::WorkflowPhase;

/// Completion status of one worker within one phase.
///
/// Created uninitialized when the phase starts; mutated only by marking
/// complete; never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCompletion {
    pub worker: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub artifact: Option<String>,
    pub comment_id: Option<String>,
}

impl WorkerCompletion {
    fn pending(worker: &str) -> Self {
        Self {
            worker: worker.to_string(),
            completed: false,
            completed_at: None,
            artifact: None,
            comment_id: None,
        }
    }
}

/// One entry in a feature's append-only phase history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: WorkflowPhase,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Worker handle → completion status, populated from the phase table at
    /// phase start.
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerCompletion>,
    /// Meaningful only when the phase is a gate.
    #[serde(default)]
    pub human_approved: bool,
    pub human_approved_at: Option<DateTime<Utc>>,
}

impl PhaseRecord {
    fn open(phase: WorkflowPhase) -> Self {
        let workers = phase
            .required_workers()
            .iter()
            .map(|w| (w.to_string(), WorkerCompletion::pending(w)))
            .collect();
        Self {
            phase,
            started_at: Utc::now(),
            completed_at: None,
            workers,
            human_approved: false,
            human_approved_at: None,
        }
    }

    /// Whether every required worker in this record has completed.
    /// A record with no required workers is vacuously complete.
    pub fn all_workers_complete(&self) -> bool {
        self.workers.values().all(|w| w.completed)
    }
}

/// Complete state of a feature moving through the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Feature identifier, positive, primary key in the store.
    pub feature_id: u64,
    pub title: String,
    pub description: String,
    pub branch_name: String,
    pub worktree_path: PathBuf,
    /// Ticket id on the external tracker, once created.
    pub ticket_id: Option<u64>,
    pub current_phase: WorkflowPhase,
    /// Append-only; the last record is always the active one.
    pub phase_history: Vec<PhaseRecord>,
    /// Completed setup-step names, in execution order. The resumable setup
    /// executor consults this to skip already-performed side effects.
    #[serde(default)]
    pub setup_steps: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Create a fresh state with no phase history. Callers start the first
    /// phase explicitly via [`WorkflowState::start_phase`].
    pub fn new(feature_id: u64, title: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            feature_id,
            title: title.to_string(),
            description: description.to_string(),
            branch_name: String::new(),
            worktree_path: PathBuf::new(),
            ticket_id: None,
            current_phase: WorkflowPhase::Phase1Setup,
            phase_history: Vec::new(),
            setup_steps: Vec::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The record for the current phase, if any phase has been started.
    pub fn active_record(&self) -> Option<&PhaseRecord> {
        self.phase_history.last()
    }

    fn active_record_mut(&mut self) -> Option<&mut PhaseRecord> {
        self.phase_history.last_mut()
    }

    /// Enter a phase: stamp the previous record complete, append a new
    /// record pre-populated with the phase's required workers, and move
    /// `current_phase` forward.
    pub fn start_phase(&mut self, phase: WorkflowPhase) {
        let now = Utc::now();
        if let Some(prev) = self.phase_history.last_mut() {
            prev.completed_at = Some(now);
        }
        self.phase_history.push(PhaseRecord::open(phase));
        self.current_phase = phase;
        self.updated_at = now;
    }

    /// Mark a worker complete in the current phase.
    ///
    /// Idempotent: re-marking an already-complete worker is a no-op. A
    /// worker outside the active phase's required set is an error.
    pub fn record_worker_complete(
        &mut self,
        worker: &str,
        artifact: Option<String>,
        comment_id: Option<String>,
    ) -> Result<(), StateError> {
        let phase = self.current_phase;
        let Some(record) = self.active_record_mut() else {
            return Err(StateError::InvalidState {
                phase: phase.to_string(),
                message: "no active phase record".to_string(),
            });
        };
        let Some(completion) = record.workers.get_mut(worker) else {
            return Err(StateError::InvalidState {
                phase: phase.to_string(),
                message: format!("worker {worker} is not required in this phase"),
            });
        };
        if completion.completed {
            return Ok(());
        }
        completion.completed = true;
        completion.completed_at = Some(Utc::now());
        completion.artifact = artifact;
        completion.comment_id = comment_id;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record human approval of the current gate.
    pub fn record_human_approval(&mut self) -> Result<(), StateError> {
        let phase = self.current_phase;
        if !phase.is_gate() {
            return Err(StateError::InvalidState {
                phase: phase.to_string(),
                message: "human approval is only valid at a gate".to_string(),
            });
        }
        let Some(record) = self.active_record_mut() else {
            return Err(StateError::InvalidState {
                phase: phase.to_string(),
                message: "no active phase record".to_string(),
            });
        };
        record.human_approved = true;
        record.human_approved_at = Some(Utc::now());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether the workflow can advance to the successor phase.
    ///
    /// Terminal phases never advance. Gates advance once approved. Work
    /// phases advance once every required worker has completed; a phase
    /// with no required workers is vacuously advanceable.
    pub fn can_advance(&self) -> bool {
        if self.current_phase.is_terminal() {
            return false;
        }
        let Some(record) = self.active_record() else {
            return false;
        };
        if self.current_phase.is_gate() {
            return record.human_approved;
        }
        record.all_workers_complete()
    }

    /// Advance to the successor phase if possible.
    ///
    /// Returns `Ok(false)` when the completion predicate is not met (no-op).
    /// Returns `InvalidTransition` if the predicate is met but the phase
    /// table defines no successor.
    pub fn advance(&mut self) -> Result<bool, StateError> {
        if !self.can_advance() {
            return Ok(false);
        }
        let Some(next) = self.current_phase.successor() else {
            return Err(StateError::InvalidTransition {
                from: self.current_phase.to_string(),
                message: "phase has no successor".to_string(),
            });
        };
        self.start_phase(next);
        Ok(true)
    }

    /// Cancel the workflow from any non-terminal phase.
    pub fn cancel(&mut self) -> Result<(), StateError> {
        if self.current_phase.is_terminal() {
            return Err(StateError::InvalidTransition {
                from: self.current_phase.to_string(),
                message: "cannot cancel a terminal workflow".to_string(),
            });
        }
        self.start_phase(WorkflowPhase::Cancelled);
        Ok(())
    }

    /// Workers in the current phase that have not yet completed.
    pub fn pending_workers(&self) -> Vec<String> {
        self.active_record()
            .map(|r| {
                r.workers
                    .values()
                    .filter(|w| !w.completed)
                    .map(|w| w.worker.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Workers in the current phase that have completed.
    pub fn completed_workers(&self) -> Vec<String> {
        self.active_record()
            .map(|r| {
                r.workers
                    .values()
                    .filter(|w| w.completed)
                    .map(|w| w.worker.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The status label for the current phase.
    pub fn status_label(&self) -> &'static str {
        self.current_phase.status_label()
    }
}
