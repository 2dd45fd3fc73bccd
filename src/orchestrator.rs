//! The orchestration loop tying every component together.
//!
//! One logical scheduler tick runs on a fixed interval: for each stored
//! feature, poll for signals since that feature's last check, apply them to
//! the state machine, persist, attempt to advance, persist again, and on
//! entering a new phase reconcile labels, post the kickoff comment, and
//! dispatch the phase's required workers.
//!
//! Features are processed concurrently within a tick; ticks themselves are
//! serialized, so per-feature processing is never concurrent with itself.
//! Errors from one feature's tick are logged and never break the loop.
//! Advancing after a gate approval is tick-driven: the approval handler only
//! records state, and the following tick performs the advance and dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ForemanConfig;
use crate::dispatch::{AgentDispatcher, WorkerLauncher};
use crate::errors::{OrchestratorError, StateError, WorkerError};
use crate::github::TicketBackend;
use crate::labels::LabelSync;
use crate::phase::WorkflowPhase;
use crate::setup::{SetupExecutor, SetupRequest};
use crate::signals::SignalPoller;
use crate::state::WorkflowState;
use crate::store::StateStore;
use crate::worktree::WorktreeProvisioner;

/// Something observable that happened during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    WorkerCompleted {
        feature_id: u64,
        worker: String,
        summary: String,
    },
    HumanApproved {
        feature_id: u64,
        approver: String,
    },
    PhaseAdvanced {
        feature_id: u64,
        phase: WorkflowPhase,
    },
}

/// Coordinates the store, poller, dispatcher, and label sync for all
/// features.
pub struct Orchestrator {
    config: Arc<ForemanConfig>,
    backend: Arc<dyn TicketBackend>,
    store: Arc<StateStore>,
    poller: SignalPoller,
    dispatcher: AgentDispatcher,
    labels: LabelSync,
    setup: SetupExecutor,
    /// Last successful poll time per feature, for strict greater-than
    /// comment filtering.
    last_poll: Mutex<HashMap<u64, DateTime<Utc>>>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<ForemanConfig>,
        backend: Arc<dyn TicketBackend>,
        worktrees: Arc<dyn WorktreeProvisioner>,
        launcher: Arc<dyn WorkerLauncher>,
        store: Arc<StateStore>,
    ) -> Self {
        let poller = SignalPoller::new(backend.clone(), config.worker_handles());
        let dispatcher = AgentDispatcher::new(launcher, config.clone());
        let labels = LabelSync::new(backend.clone());
        let setup = SetupExecutor::new(backend.clone(), worktrees, store.clone());
        Self {
            config,
            backend,
            store,
            poller,
            dispatcher,
            labels,
            setup,
            last_poll: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new feature: run the setup phase and reconcile labels.
    pub async fn create_feature(
        &self,
        title: &str,
        description: &str,
    ) -> Result<WorkflowState, OrchestratorError> {
        let outcome = self
            .setup
            .execute(SetupRequest {
                title: title.to_string(),
                description: description.to_string(),
                labels: Vec::new(),
                resume: None,
            })
            .await?;

        // Setup's final advance entered the first work phase; perform its
        // entry side effects (label, kickoff comment, worker dispatch) now
        // rather than waiting a tick.
        self.enter_phase(&outcome.state).await;
        Ok(outcome.state)
    }

    /// Resume an interrupted setup phase for an existing feature.
    pub async fn resume_setup(&self, feature_id: u64) -> Result<WorkflowState, OrchestratorError> {
        let state = self.store.load(feature_id)?.ok_or(StateError::NotFound { feature_id })?;
        let outcome = self
            .setup
            .execute(SetupRequest {
                title: state.title.clone(),
                description: state.description.clone(),
                labels: Vec::new(),
                resume: Some(feature_id),
            })
            .await?;
        // If the resume landed the feature in the first work phase, perform
        // the entry side effects it missed. Dispatch conflicts from an
        // earlier partial entry are tolerated inside enter_phase.
        if outcome.state.current_phase == WorkflowPhase::Phase2Specs {
            self.enter_phase(&outcome.state).await;
        }
        Ok(outcome.state)
    }

    /// Record a manual gate approval. The advance happens on the next tick.
    pub async fn approve_gate(&self, feature_id: u64) -> Result<(), OrchestratorError> {
        let mut state = self
            .store
            .load(feature_id)?
            .ok_or(StateError::NotFound { feature_id })?;
        state.record_human_approval()?;
        self.store.save(&state)?;
        info!(feature_id, phase = %state.current_phase, "gate approved manually");
        Ok(())
    }

    /// Cancel a feature and reconcile its label.
    pub async fn cancel_feature(&self, feature_id: u64) -> Result<(), OrchestratorError> {
        let mut state = self
            .store
            .load(feature_id)?
            .ok_or(StateError::NotFound { feature_id })?;
        state.cancel()?;
        self.store.save(&state)?;
        self.labels
            .sync_labels(feature_id, WorkflowPhase::Cancelled)
            .await;
        info!(feature_id, "feature cancelled");
        Ok(())
    }

    /// Ensure the status label set exists on the tracker.
    pub async fn ensure_labels(&self) -> crate::labels::OperationResult {
        self.labels.ensure_labels_exist().await
    }

    /// Current state of one feature.
    pub fn feature_state(&self, feature_id: u64) -> Result<Option<WorkflowState>, StateError> {
        self.store.load(feature_id)
    }

    /// All stored features, ascending by id.
    pub fn list_features(&self) -> Result<Vec<WorkflowState>, StateError> {
        self.store.list()
    }

    /// Run the loop until the shutdown signal flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            "orchestration loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    for event in self.tick().await {
                        debug!(?event, "update");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("orchestration loop shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One scheduler tick over all non-terminal features.
    pub async fn tick(&self) -> Vec<UpdateEvent> {
        let states = match self.store.list() {
            Ok(states) => states,
            Err(e) => {
                error!(code = e.code(), error = %e, "failed to list features");
                return Vec::new();
            }
        };

        let tasks = states
            .into_iter()
            .filter(|s| !s.current_phase.is_terminal())
            .map(|state| async move {
                let feature_id = state.feature_id;
                match self.tick_feature(state).await {
                    Ok(events) => events,
                    Err(e) => {
                        error!(feature_id, code = e.code(), error = %e, "feature tick failed");
                        Vec::new()
                    }
                }
            });

        join_all(tasks).await.into_iter().flatten().collect()
    }

    /// Process one feature: apply detected signals, then advance as far as
    /// the completion predicates allow.
    async fn tick_feature(
        &self,
        mut state: WorkflowState,
    ) -> Result<Vec<UpdateEvent>, OrchestratorError> {
        let feature_id = state.feature_id;
        let last_check = self.last_poll.lock().unwrap().get(&feature_id).copied();
        let mut events = Vec::new();

        let completions = self.poller.check_completions(feature_id, last_check).await?;
        for completion in completions {
            match state.record_worker_complete(
                &completion.worker,
                None,
                Some(completion.comment_id.clone()),
            ) {
                Ok(()) => {
                    self.dispatcher
                        .remove_session(&completion.worker, feature_id)
                        .await;
                    self.store.save(&state)?;
                    events.push(UpdateEvent::WorkerCompleted {
                        feature_id,
                        worker: completion.worker,
                        summary: completion.summary,
                    });
                }
                Err(e) => {
                    // A completion from a worker outside the active phase is
                    // stale chatter, not a failure of this feature's tick.
                    debug!(feature_id, worker = %completion.worker, error = %e,
                        "ignoring completion outside active phase");
                }
            }
        }

        if state.current_phase.is_gate()
            && let Some(approval) = self.poller.check_approval(feature_id, last_check).await?
        {
            state.record_human_approval()?;
            self.store.save(&state)?;
            events.push(UpdateEvent::HumanApproved {
                feature_id,
                approver: approval.approver,
            });
        }

        // Phases with no pending requirement fall through immediately, so a
        // freshly approved gate and any program-executed phases behind it
        // resolve in one tick.
        while state.advance()? {
            self.store.save(&state)?;
            events.push(UpdateEvent::PhaseAdvanced {
                feature_id,
                phase: state.current_phase,
            });
            self.enter_phase(&state).await;
        }

        // Stamped after phase-entry side effects so the orchestrator's own
        // kickoff comments (which mention the approval keywords) fall below
        // the next tick's cutoff.
        self.last_poll.lock().unwrap().insert(feature_id, Utc::now());
        Ok(events)
    }

    /// Side effects of entering a phase: label sync, kickoff comment, worker
    /// dispatch. All best-effort; failures are logged and retried implicitly
    /// by later syncs or operator action.
    async fn enter_phase(&self, state: &WorkflowState) {
        let feature_id = state.feature_id;
        let phase = state.current_phase;
        info!(feature_id, phase = %phase, "entered phase");

        self.labels.sync_labels(feature_id, phase).await;

        if let Some(body) = kickoff_comment(state)
            && let Err(e) = self.backend.post_comment(feature_id, &body).await
        {
            warn!(feature_id, error = %e, "failed to post kickoff comment");
        }

        for worker in phase.required_workers().iter().copied() {
            match self
                .dispatcher
                .dispatch(worker, feature_id, &state.worktree_path, phase)
                .await
            {
                Ok(session) => {
                    debug!(feature_id, worker, process_id = session.process_id, "dispatched");
                }
                Err(WorkerError::DispatchConflict { .. }) => {
                    warn!(feature_id, worker, "session already tracked, skipping dispatch");
                }
                Err(e) => {
                    warn!(feature_id, worker, code = e.code(), error = %e, "dispatch failed");
                }
            }
        }
    }
}

/// The comment announcing a phase entry, if the phase warrants one.
fn kickoff_comment(state: &WorkflowState) -> Option<String> {
    let phase = state.current_phase;
    let feature_id = state.feature_id;

    if phase.is_gate() {
        return Some(format!(
            "\u{23f8}\u{fe0f} **{phase}: approval required**\n\n\
             Review the artifacts under `.plans/{feature_id}/`.\n\n\
             To approve and proceed, comment `approved` or `lgtm`.\n\
             To request changes, comment with feedback.",
        ));
    }

    let workers = phase.required_workers();
    if !workers.is_empty() {
        let mentions: Vec<String> = workers.iter().map(|w| format!("@{w}")).collect();
        return Some(format!(
            "\u{1f4cb} **{phase}**\n\n\
             {} — you are up. Post \u{2705} with a summary when complete.\n\n\
             **Context**:\n\
             - Branch: `{}`\n\
             - Worktree: `{}`",
            mentions.join(" "),
            state.branch_name,
            state.worktree_path.display(),
        ));
    }

    if phase == WorkflowPhase::Done {
        return Some(format!(
            "\u{1f389} Feature #{feature_id} has completed the workflow."
        ));
    }

    None
}
