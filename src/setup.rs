//! Resumable executor for the setup phase.
//!
//! Setup performs ordered side effects against external systems: create the
//! ticket, create the branch, provision the worktree, scaffold the plans
//! directory. None of that is transactional, so each completed step is
//! recorded on the workflow state and persisted before the next begins. A
//! crash between steps, followed by re-invocation with the same feature id,
//! completes only the remaining steps using the previously recorded outputs.
//!
//! This relies on the collaborators being safe to query-before-create; that
//! is a stated precondition, not re-verified here.

use std::sync::Arc;
use std::sync::LazyLock;

use anyhow::Context;
use regex::Regex;
use tracing::{info, warn};

use crate::errors::{SetupError, StateError};
use crate::github::TicketBackend;
use crate::phase::WorkflowPhase;
use crate::state::WorkflowState;
use crate::store::StateStore;
use crate::worktree::WorktreeProvisioner;

const STEP_ISSUE: &str = "issue";
const STEP_BRANCH: &str = "branch";
const STEP_WORKTREE: &str = "worktree";
const STEP_PLANS: &str = "plans";

static NON_SLUG_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9-]").unwrap());
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s_]+").unwrap());
static HYPHEN_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").unwrap());

/// Kebab-case slug of a feature title, suitable for branch names.
fn slugify(text: &str) -> String {
    let text = text.to_lowercase();
    let text = SEPARATORS.replace_all(&text, "-");
    let text = NON_SLUG_CHARS.replace_all(&text, "");
    let text = HYPHEN_RUNS.replace_all(&text, "-");
    let trimmed = text.trim_matches('-');
    trimmed.chars().take(50).collect()
}

/// Input to one setup execution.
#[derive(Debug, Clone)]
pub struct SetupRequest {
    pub title: String,
    pub description: String,
    /// Extra tracker labels beyond the status label.
    pub labels: Vec<String>,
    /// Re-run for an existing feature, completing only the remaining steps.
    pub resume: Option<u64>,
}

/// What a setup execution produced.
#[derive(Debug, Clone)]
pub struct SetupOutcome {
    pub state: WorkflowState,
    /// Steps performed by this invocation (not ones skipped on resume).
    pub steps_completed: Vec<String>,
}

/// Executes the setup phase with durable step tracking.
pub struct SetupExecutor {
    backend: Arc<dyn TicketBackend>,
    worktrees: Arc<dyn WorktreeProvisioner>,
    store: Arc<StateStore>,
}

impl SetupExecutor {
    pub fn new(
        backend: Arc<dyn TicketBackend>,
        worktrees: Arc<dyn WorktreeProvisioner>,
        store: Arc<StateStore>,
    ) -> Self {
        Self {
            backend,
            worktrees,
            store,
        }
    }

    /// Run setup to completion, then advance the state machine out of the
    /// setup phase.
    pub async fn execute(&self, request: SetupRequest) -> Result<SetupOutcome, SetupError> {
        let mut steps_completed = Vec::new();

        let mut state = match request.resume {
            Some(feature_id) => self
                .store
                .load(feature_id)?
                .ok_or(StateError::NotFound { feature_id })?,
            None => {
                let state = self.create_issue_step(&request).await?;
                steps_completed.push(STEP_ISSUE.to_string());
                state
            }
        };
        let feature_id = state.feature_id;
        let slug = slugify(&state.title);

        if !state.setup_steps.iter().any(|s| s == STEP_BRANCH) {
            let branch = format!("{feature_id}-{slug}");
            self.backend
                .create_branch(&branch)
                .await
                .map_err(|source| SetupError::Branch {
                    branch: branch.clone(),
                    source,
                })?;
            state.branch_name = branch.clone();
            state.setup_steps.push(STEP_BRANCH.to_string());
            self.store.save(&state)?;
            steps_completed.push(STEP_BRANCH.to_string());
            info!(feature_id, branch = %branch, "branch created");
        }

        if !state.setup_steps.iter().any(|s| s == STEP_WORKTREE) {
            let info = self
                .worktrees
                .create_worktree(feature_id, &state.branch_name)
                .map_err(|source| SetupError::Worktree { feature_id, source })?;
            state.worktree_path = info.path;
            state.setup_steps.push(STEP_WORKTREE.to_string());
            self.store.save(&state)?;
            steps_completed.push(STEP_WORKTREE.to_string());
            info!(feature_id, path = %state.worktree_path.display(), "worktree created");
        }

        if !state.setup_steps.iter().any(|s| s == STEP_PLANS) {
            self.initialize_plans(&state)
                .map_err(|source| SetupError::Plans { feature_id, source })?;
            state.setup_steps.push(STEP_PLANS.to_string());
            self.store.save(&state)?;
            steps_completed.push(STEP_PLANS.to_string());
            info!(feature_id, "plans directory initialized");
        }

        // Announce the feature on its ticket. Not a tracked step: the next
        // phase does not depend on it, so a failure only warns.
        let announcement = format!(
            "\u{1f680} Foreman initialized this feature!\n\n\
             **Branch**: `{}`\n\
             **Worktree**: `{}`\n\n\
             Setup complete. Ready for specs.",
            state.branch_name,
            state.worktree_path.display(),
        );
        if let Err(e) = self.backend.post_comment(feature_id, &announcement).await {
            warn!(feature_id, error = %e, "failed to post setup announcement");
        }

        state.advance()?;
        self.store.save(&state)?;

        Ok(SetupOutcome {
            state,
            steps_completed,
        })
    }

    /// First step: create the ticket and the workflow state keyed by it.
    async fn create_issue_step(&self, request: &SetupRequest) -> Result<WorkflowState, SetupError> {
        let mut labels = request.labels.clone();
        labels.push("foreman".to_string());
        labels.push(WorkflowPhase::Phase1Setup.status_label().to_string());

        let feature_id = self
            .backend
            .create_issue(&request.title, &request.description, &labels)
            .await
            .map_err(|source| SetupError::Issue { source })?;

        if self.store.exists(feature_id) {
            return Err(StateError::AlreadyExists { feature_id }.into());
        }

        let mut state = WorkflowState::new(feature_id, &request.title, &request.description);
        state.ticket_id = Some(feature_id);
        state.start_phase(WorkflowPhase::Phase1Setup);
        state.setup_steps.push(STEP_ISSUE.to_string());
        self.store.save(&state)?;
        info!(feature_id, title = %request.title, "issue created");
        Ok(state)
    }

    fn initialize_plans(&self, state: &WorkflowState) -> anyhow::Result<()> {
        let plans_dir = state
            .worktree_path
            .join(".plans")
            .join(state.feature_id.to_string());
        std::fs::create_dir_all(&plans_dir)
            .with_context(|| format!("Failed to create {}", plans_dir.display()))?;

        let state_file = plans_dir.join("state.json");
        if !state_file.exists() {
            std::fs::write(&state_file, "{}\n")
                .with_context(|| format!("Failed to write {}", state_file.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worktree::WorktreeInfo;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tempfile::tempdir;

    /// Backend double counting issue and branch creations.
    #[derive(Default)]
    struct CountingBackend {
        issues_created: AtomicU32,
        branches_created: AtomicU32,
        comments: Mutex<Vec<String>>,
        fail_branch: AtomicBool,
    }

    #[async_trait]
    impl TicketBackend for CountingBackend {
        async fn create_issue(&self, _: &str, _: &str, _: &[String]) -> Result<u64> {
            self.issues_created.fetch_add(1, Ordering::SeqCst);
            Ok(104)
        }
        async fn post_comment(&self, _: u64, body: &str) -> Result<String> {
            self.comments.lock().unwrap().push(body.to_string());
            Ok("c1".into())
        }
        async fn add_label(&self, _: u64, _: &str) -> Result<()> {
            Ok(())
        }
        async fn remove_label(&self, _: u64, _: &str) -> Result<()> {
            Ok(())
        }
        async fn get_labels(&self, _: u64) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn create_label(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn get_comments(
            &self,
            _: u64,
            _: Option<DateTime<Utc>>,
        ) -> Result<Vec<crate::github::IssueComment>> {
            Ok(Vec::new())
        }
        async fn create_branch(&self, _: &str) -> Result<()> {
            if self.fail_branch.load(Ordering::SeqCst) {
                anyhow::bail!("ref already exists");
            }
            self.branches_created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Provisioner double creating real directories under a tempdir.
    struct CountingProvisioner {
        base: PathBuf,
        calls: AtomicU32,
        fail: AtomicBool,
    }

    impl CountingProvisioner {
        fn new(base: PathBuf) -> Self {
            Self {
                base,
                calls: AtomicU32::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    impl WorktreeProvisioner for CountingProvisioner {
        fn create_worktree(&self, feature_id: u64, branch: &str) -> Result<WorktreeInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("worktree path locked");
            }
            let path = self.base.join(format!("feature-{feature_id}"));
            std::fs::create_dir_all(&path)?;
            Ok(WorktreeInfo {
                path,
                branch: branch.to_string(),
            })
        }
    }

    struct Fixture {
        backend: Arc<CountingBackend>,
        provisioner: Arc<CountingProvisioner>,
        store: Arc<StateStore>,
        executor: SetupExecutor,
        _dirs: (tempfile::TempDir, tempfile::TempDir),
    }

    fn fixture() -> Fixture {
        let store_dir = tempdir().unwrap();
        let tree_dir = tempdir().unwrap();
        let backend = Arc::new(CountingBackend::default());
        let provisioner = Arc::new(CountingProvisioner::new(tree_dir.path().to_path_buf()));
        let store = Arc::new(StateStore::new(store_dir.path()).unwrap());
        let executor = SetupExecutor::new(backend.clone(), provisioner.clone(), store.clone());
        Fixture {
            backend,
            provisioner,
            store,
            executor,
            _dirs: (store_dir, tree_dir),
        }
    }

    fn request() -> SetupRequest {
        SetupRequest {
            title: "Add OAuth Login!".to_string(),
            description: "Support OAuth login".to_string(),
            labels: vec![],
            resume: None,
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add OAuth Login!"), "add-oauth-login");
        assert_eq!(slugify("snake_case  and   spaces"), "snake-case-and-spaces");
        assert_eq!(slugify("--edges--"), "edges");
        assert!(slugify(&"long word ".repeat(20)).len() <= 50);
    }

    #[tokio::test]
    async fn test_full_setup_run() {
        let f = fixture();
        let outcome = f.executor.execute(request()).await.unwrap();

        assert_eq!(
            outcome.steps_completed,
            vec!["issue", "branch", "worktree", "plans"]
        );
        let state = &outcome.state;
        assert_eq!(state.feature_id, 104);
        assert_eq!(state.branch_name, "104-add-oauth-login");
        assert_eq!(state.current_phase, WorkflowPhase::Phase2Specs);
        assert!(state.worktree_path.join(".plans/104/state.json").exists());

        // Persisted state matches the returned one.
        let loaded = f.store.load(104).unwrap().unwrap();
        assert_eq!(loaded.current_phase, WorkflowPhase::Phase2Specs);
        assert_eq!(
            loaded.setup_steps,
            vec!["issue", "branch", "worktree", "plans"]
        );

        // The announcement comment went out.
        assert!(f.backend.comments.lock().unwrap()[0].contains("104-add-oauth-login"));
    }

    #[tokio::test]
    async fn test_step_failure_preserves_earlier_steps() {
        let f = fixture();
        f.provisioner.fail.store(true, Ordering::SeqCst);

        let err = f.executor.execute(request()).await.unwrap_err();
        assert_eq!(err.code(), "WORKTREE_CREATION_ERROR");

        // Issue and branch markers survived the crash.
        let state = f.store.load(104).unwrap().unwrap();
        assert_eq!(state.setup_steps, vec!["issue", "branch"]);
        assert_eq!(state.current_phase, WorkflowPhase::Phase1Setup);
    }

    #[tokio::test]
    async fn test_resume_performs_only_remaining_steps() {
        let f = fixture();
        f.provisioner.fail.store(true, Ordering::SeqCst);
        f.executor.execute(request()).await.unwrap_err();

        assert_eq!(f.backend.issues_created.load(Ordering::SeqCst), 1);
        assert_eq!(f.backend.branches_created.load(Ordering::SeqCst), 1);
        assert_eq!(f.provisioner.calls.load(Ordering::SeqCst), 1);

        // Retry with the same feature id.
        f.provisioner.fail.store(false, Ordering::SeqCst);
        let outcome = f
            .executor
            .execute(SetupRequest {
                resume: Some(104),
                ..request()
            })
            .await
            .unwrap();

        // Steps 1-2 were not re-invoked; only 3-4 ran.
        assert_eq!(outcome.steps_completed, vec!["worktree", "plans"]);
        assert_eq!(f.backend.issues_created.load(Ordering::SeqCst), 1);
        assert_eq!(f.backend.branches_created.load(Ordering::SeqCst), 1);
        assert_eq!(f.provisioner.calls.load(Ordering::SeqCst), 2);

        // Recorded branch output was reused.
        assert_eq!(outcome.state.branch_name, "104-add-oauth-login");
        assert_eq!(outcome.state.current_phase, WorkflowPhase::Phase2Specs);
    }

    #[tokio::test]
    async fn test_resume_of_unknown_feature_is_not_found() {
        let f = fixture();
        let err = f
            .executor
            .execute(SetupRequest {
                resume: Some(999),
                ..request()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WORKFLOW_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_branch_failure_is_step_specific() {
        let f = fixture();
        f.backend.fail_branch.store(true, Ordering::SeqCst);

        let err = f.executor.execute(request()).await.unwrap_err();
        assert_eq!(err.code(), "BRANCH_CREATION_ERROR");
        assert!(err.to_string().contains("104-add-oauth-login"));

        let state = f.store.load(104).unwrap().unwrap();
        assert_eq!(state.setup_steps, vec!["issue"]);
    }
}
