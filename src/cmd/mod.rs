//! CLI command implementations.
//!
//! `run` owns the long-running orchestration loop; `feature` owns the
//! one-shot feature commands (create, resume, approve, status, list,
//! cancel).

pub mod feature;
pub mod run;

pub use feature::{cmd_approve, cmd_cancel, cmd_create, cmd_list, cmd_resume, cmd_status};
pub use run::cmd_run;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use foreman::config::ForemanConfig;
use foreman::dispatch::ProcessWorkerLauncher;
use foreman::github::GithubBackend;
use foreman::orchestrator::Orchestrator;
use foreman::store::StateStore;
use foreman::worktree::GitWorktreeProvisioner;

use crate::Cli;

/// Wire up the orchestrator with its production collaborators.
pub fn build_orchestrator(cli: &Cli) -> Result<Orchestrator> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("foreman.toml"));
    let config = Arc::new(ForemanConfig::load(&config_path)?);

    let backend = Arc::new(GithubBackend::new(
        &config.repository,
        &config.github_token,
    ));
    let worktrees = Arc::new(GitWorktreeProvisioner::new(
        &config.repo_path,
        &config.worktree_base,
    ));
    let launcher = Arc::new(ProcessWorkerLauncher::new(&config.runner_cmd));
    let store =
        Arc::new(StateStore::new(&config.storage_dir).context("Failed to open state store")?);

    Ok(Orchestrator::new(
        config, backend, worktrees, launcher, store,
    ))
}
