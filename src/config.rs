//! Configuration for the Foreman orchestrator.
//!
//! One explicit `ForemanConfig` is constructed at process start (from
//! `foreman.toml` plus environment) and passed into every component
//! constructor. There is no ambient global lookup.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default orchestration loop tick interval.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
/// Default budget for a blocking signal poll.
const DEFAULT_SIGNAL_TIMEOUT_SECS: u64 = 3600;
/// Default wait between blocking poll attempts.
const DEFAULT_SIGNAL_INTERVAL_SECS: u64 = 30;
/// Default worker runner command.
const DEFAULT_RUNNER_CMD: &str = "claude";

/// One configured worker agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerSpec {
    /// Short handle used in phase tables and author matching (e.g. "duc").
    pub handle: String,
    /// Display name (e.g. "Viollet le Duc").
    pub name: String,
    /// Model identifier passed to the runner.
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_model() -> String {
    "sonnet".to_string()
}

#[derive(Debug, Default, Deserialize)]
struct OrchestratorSection {
    poll_interval_secs: Option<u64>,
    signal_timeout_secs: Option<u64>,
    signal_interval_secs: Option<u64>,
    runner_cmd: Option<String>,
    callback_url: Option<String>,
}

/// Raw `foreman.toml` layout.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    /// Tracker repository slug, `owner/repo`.
    repository: String,
    /// Local clone the worktrees are created from.
    repo_path: Option<PathBuf>,
    /// Where per-feature state files live.
    storage_dir: Option<PathBuf>,
    /// Where worktrees are created.
    worktree_base: Option<PathBuf>,
    #[serde(default)]
    orchestrator: OrchestratorSection,
    #[serde(default)]
    workers: Vec<WorkerSpec>,
}

/// Runtime configuration, fully resolved.
#[derive(Debug, Clone)]
pub struct ForemanConfig {
    pub repository: String,
    pub github_token: String,
    pub repo_path: PathBuf,
    pub storage_dir: PathBuf,
    pub worktree_base: PathBuf,
    pub runner_cmd: String,
    pub callback_url: String,
    pub poll_interval: Duration,
    pub signal_timeout: Duration,
    pub signal_interval: Duration,
    pub workers: Vec<WorkerSpec>,
}

impl ForemanConfig {
    /// Load configuration from `foreman.toml` and the environment.
    ///
    /// The token comes from `GITHUB_TOKEN` (populated by `.env` via dotenvy
    /// in the binary). A missing workers table falls back to the default
    /// crew so the phase table's required workers are always resolvable.
    pub fn load(config_path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        let file: ConfigFile = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        let github_token = std::env::var("GITHUB_TOKEN")
            .map_err(|_| anyhow!("GITHUB_TOKEN is not set; export it or add it to .env"))?;

        Self::from_parts(file, github_token)
    }

    fn from_parts(file: ConfigFile, github_token: String) -> Result<Self> {
        if !file.repository.contains('/') {
            return Err(anyhow!(
                "repository must be an owner/repo slug, got '{}'",
                file.repository
            ));
        }

        let home_base = || {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".foreman")
        };

        let workers = if file.workers.is_empty() {
            default_workers()
        } else {
            file.workers
        };

        Ok(Self {
            repository: file.repository,
            github_token,
            repo_path: file.repo_path.unwrap_or_else(|| PathBuf::from(".")),
            storage_dir: file
                .storage_dir
                .unwrap_or_else(|| home_base().join("features")),
            worktree_base: file
                .worktree_base
                .unwrap_or_else(|| home_base().join("worktrees")),
            runner_cmd: file
                .orchestrator
                .runner_cmd
                .unwrap_or_else(|| DEFAULT_RUNNER_CMD.to_string()),
            callback_url: file
                .orchestrator
                .callback_url
                .unwrap_or_else(|| "http://127.0.0.1:8787".to_string()),
            poll_interval: Duration::from_secs(
                file.orchestrator
                    .poll_interval_secs
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            signal_timeout: Duration::from_secs(
                file.orchestrator
                    .signal_timeout_secs
                    .unwrap_or(DEFAULT_SIGNAL_TIMEOUT_SECS),
            ),
            signal_interval: Duration::from_secs(
                file.orchestrator
                    .signal_interval_secs
                    .unwrap_or(DEFAULT_SIGNAL_INTERVAL_SECS),
            ),
            workers,
        })
    }

    /// All worker handles, in configuration order.
    pub fn worker_handles(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.handle.clone()).collect()
    }

    /// Look up a worker by handle (case-insensitive).
    pub fn worker(&self, handle: &str) -> Option<&WorkerSpec> {
        self.workers
            .iter()
            .find(|w| w.handle.eq_ignore_ascii_case(handle))
    }

    /// Model for a worker, falling back to the default.
    pub fn model_for(&self, handle: &str) -> String {
        self.worker(handle)
            .map(|w| w.model.clone())
            .unwrap_or_else(default_model)
    }
}

/// The default crew, matching the phase table's required workers.
fn default_workers() -> Vec<WorkerSpec> {
    [
        ("duc", "Viollet le Duc"),
        ("dede", "Dede"),
        ("dali", "Dali"),
        ("gus", "Gus"),
        ("marie", "Marie"),
    ]
    .iter()
    .map(|(handle, name)| WorkerSpec {
        handle: handle.to_string(),
        name: name.to_string(),
        model: default_model(),
    })
    .collect()
}
