//! Worktree provisioner: the version-control collaborator interface and its
//! git2 implementation.
//!
//! Provisioning is safe to query-before-create: re-requesting a worktree
//! that already exists returns the existing one, which is what lets the
//! resumable setup executor re-run after a crash without side effects.

use anyhow::{Context, Result};
use git2::Repository;
use std::path::{Path, PathBuf};

/// A provisioned worktree.
#[derive(Debug, Clone, PartialEq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
}

/// Worktree operations the setup executor depends on.
pub trait WorktreeProvisioner: Send + Sync {
    /// Create (or find) the worktree for a feature, checked out on
    /// `branch_name`.
    fn create_worktree(&self, feature_id: u64, branch_name: &str) -> Result<WorktreeInfo>;
}

/// git2-backed provisioner creating worktrees under a base directory.
pub struct GitWorktreeProvisioner {
    repo_path: PathBuf,
    worktree_base: PathBuf,
}

impl GitWorktreeProvisioner {
    pub fn new(repo_path: &Path, worktree_base: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            worktree_base: worktree_base.to_path_buf(),
        }
    }

    fn worktree_path(&self, feature_id: u64) -> PathBuf {
        self.worktree_base.join(format!("feature-{feature_id}"))
    }

    /// Find the local branch, creating it from HEAD if it does not exist
    /// yet (it may only have been created on the remote).
    fn ensure_branch<'r>(
        &self,
        repo: &'r Repository,
        branch_name: &str,
    ) -> Result<git2::Branch<'r>> {
        if let Ok(branch) = repo.find_branch(branch_name, git2::BranchType::Local) {
            return Ok(branch);
        }
        let head = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .context("Failed to resolve HEAD commit")?;
        repo.branch(branch_name, &head, false)
            .with_context(|| format!("Failed to create branch {branch_name}"))
    }
}

impl WorktreeProvisioner for GitWorktreeProvisioner {
    fn create_worktree(&self, feature_id: u64, branch_name: &str) -> Result<WorktreeInfo> {
        let path = self.worktree_path(feature_id);
        if path.exists() {
            return Ok(WorktreeInfo {
                path,
                branch: branch_name.to_string(),
            });
        }

        let repo = Repository::open(&self.repo_path).context("Failed to open git repository")?;
        let branch = self.ensure_branch(&repo, branch_name)?;

        std::fs::create_dir_all(&self.worktree_base)
            .context("Failed to create worktree base directory")?;

        let mut opts = git2::WorktreeAddOptions::new();
        let reference = branch.into_reference();
        opts.reference(Some(&reference));

        repo.worktree(&format!("feature-{feature_id}"), &path, Some(&opts))
            .with_context(|| format!("Failed to create worktree at {}", path.display()))?;

        Ok(WorktreeInfo {
            path,
            branch: branch_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn setup_repo(dir: &Path) {
        let repo = Repository::init(dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);

        fs::write(dir.join("README.md"), "# test").unwrap();
        let mut index = repo.index().unwrap();
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@test.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();
    }

    #[test]
    fn test_create_worktree_on_new_branch() {
        let repo_dir = tempdir().unwrap();
        let base_dir = tempdir().unwrap();
        setup_repo(repo_dir.path());

        let provisioner = GitWorktreeProvisioner::new(repo_dir.path(), base_dir.path());
        let info = provisioner.create_worktree(7, "7-add-auth").unwrap();

        assert_eq!(info.branch, "7-add-auth");
        assert_eq!(info.path, base_dir.path().join("feature-7"));
        assert!(info.path.join(".git").exists());
    }

    #[test]
    fn test_create_worktree_is_idempotent() {
        let repo_dir = tempdir().unwrap();
        let base_dir = tempdir().unwrap();
        setup_repo(repo_dir.path());

        let provisioner = GitWorktreeProvisioner::new(repo_dir.path(), base_dir.path());
        let first = provisioner.create_worktree(7, "7-add-auth").unwrap();
        let second = provisioner.create_worktree(7, "7-add-auth").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_separate_features_get_separate_paths() {
        let repo_dir = tempdir().unwrap();
        let base_dir = tempdir().unwrap();
        setup_repo(repo_dir.path());

        let provisioner = GitWorktreeProvisioner::new(repo_dir.path(), base_dir.path());
        let a = provisioner.create_worktree(7, "7-add-auth").unwrap();
        let b = provisioner.create_worktree(8, "8-fix-login").unwrap();
        assert_ne!(a.path, b.path);
    }
}
