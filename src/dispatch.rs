//! Agent dispatch: launching worker processes and tracking their sessions.
//!
//! Sessions are keyed by (worker handle, feature id). At most one session
//! may exist per key at any time; that invariant is enforced here, not by
//! the state machine. Dispatched processes are fire-and-forget: completion
//! is observed only through the signal poller, never by waiting on exit.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::config::ForemanConfig;
use crate::errors::WorkerError;
use crate::phase::WorkflowPhase;

/// Everything needed to start one worker process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub worker: String,
    pub model: String,
    pub prompt: String,
    pub env: BTreeMap<String, String>,
    pub work_dir: PathBuf,
}

/// Worker process launcher, substitutable in tests.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Start the process and return its id. Must not wait for exit.
    async fn launch(&self, spec: &LaunchSpec) -> Result<u32>;
}

/// Production launcher spawning the runner CLI via tokio.
pub struct ProcessWorkerLauncher {
    command: String,
}

impl ProcessWorkerLauncher {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<u32> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg("--model")
            .arg(&spec.model)
            .arg("--prompt")
            .arg(&spec.prompt)
            .current_dir(&spec.work_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(false);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn worker runner '{}'", self.command))?;
        // The child handle is dropped here on purpose; the orchestrator
        // learns of completion via the signal poller.
        Ok(child.id().unwrap_or(0))
    }
}

/// A tracked, currently-dispatched worker process. Ephemeral, never
/// persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSession {
    pub id: Uuid,
    pub worker: String,
    pub feature_id: u64,
    pub phase: WorkflowPhase,
    pub process_id: u32,
    pub work_dir: PathBuf,
    pub dispatched_at: DateTime<Utc>,
}

/// Launches workers and tracks one session per (worker, feature) pair.
pub struct AgentDispatcher {
    launcher: Arc<dyn WorkerLauncher>,
    config: Arc<ForemanConfig>,
    sessions: Mutex<HashMap<(String, u64), AgentSession>>,
}

impl AgentDispatcher {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, config: Arc<ForemanConfig>) -> Self {
        Self {
            launcher,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Launch a worker for a feature phase and track the session.
    ///
    /// Fails with `DispatchConflict` if a session already exists for this
    /// (worker, feature) pair; the conflicting dispatch is aborted, the
    /// existing session untouched.
    pub async fn dispatch(
        &self,
        worker: &str,
        feature_id: u64,
        work_dir: &Path,
        phase: WorkflowPhase,
    ) -> Result<AgentSession, WorkerError> {
        let key = (worker.to_string(), feature_id);

        // Hold the session table across the launch so two concurrent
        // dispatches for the same key cannot both pass the conflict check.
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&key) {
            return Err(WorkerError::DispatchConflict {
                worker: worker.to_string(),
                feature_id,
            });
        }

        let spec = LaunchSpec {
            worker: worker.to_string(),
            model: self.config.model_for(worker),
            prompt: build_prompt(worker, feature_id, phase),
            env: self.build_env(worker, feature_id),
            work_dir: work_dir.to_path_buf(),
        };

        let process_id =
            self.launcher
                .launch(&spec)
                .await
                .map_err(|source| WorkerError::DispatchFailed {
                    worker: worker.to_string(),
                    source,
                })?;

        let session = AgentSession {
            id: Uuid::new_v4(),
            worker: worker.to_string(),
            feature_id,
            phase,
            process_id,
            work_dir: work_dir.to_path_buf(),
            dispatched_at: Utc::now(),
        };
        info!(
            worker,
            feature_id,
            phase = %phase,
            process_id,
            "worker dispatched"
        );
        sessions.insert(key, session.clone());
        Ok(session)
    }

    fn build_env(&self, worker: &str, feature_id: u64) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("FOREMAN_WORKER_HANDLE".to_string(), worker.to_string()),
            ("FOREMAN_FEATURE_ID".to_string(), feature_id.to_string()),
            (
                "FOREMAN_CALLBACK_URL".to_string(),
                self.config.callback_url.clone(),
            ),
        ])
    }

    /// The tracked session for a (worker, feature) pair, if any.
    pub async fn get_session(&self, worker: &str, feature_id: u64) -> Option<AgentSession> {
        self.sessions
            .lock()
            .await
            .get(&(worker.to_string(), feature_id))
            .cloned()
    }

    /// Stop tracking a session once its completion signal has been matched.
    /// Safe to call on a non-existent key.
    pub async fn remove_session(&self, worker: &str, feature_id: u64) {
        self.sessions
            .lock()
            .await
            .remove(&(worker.to_string(), feature_id));
    }

    /// All tracked sessions.
    pub async fn sessions(&self) -> Vec<AgentSession> {
        self.sessions.lock().await.values().cloned().collect()
    }
}

/// Build the prompt for a worker in a phase. Phases without a template get
/// a generic fallback naming the feature and phase.
fn build_prompt(worker: &str, feature_id: u64, phase: WorkflowPhase) -> String {
    match phase.prompt_template() {
        Some(template) => template
            .replace("{worker}", worker)
            .replace("{feature_id}", &feature_id.to_string()),
        None => format!("Work on feature #{feature_id} for {phase}"),
    }
}
