//! Working trees for jobs

use crate::core::CiError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

/// A job's working directory, removed when dropped or released
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new(dir: TempDir) -> Self {
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Remove the directory now, logging instead of failing
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove workspace {}: {}", path.display(), e);
        } else {
            debug!("Released workspace {}", path.display());
        }
    }
}

/// Produces a fresh working tree per job
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    async fn prepare(&self, job_id: &str, revision: &str) -> Result<Workspace, CiError>;
}

fn temp_dir(base: Option<&Path>, job_id: &str) -> Result<TempDir, CiError> {
    let prefix = format!("matrixci-{}-", crate::cache::key::sanitize_key(job_id));
    let mut builder = tempfile::Builder::new();
    builder.prefix(&prefix);
    let dir = match base {
        Some(base) => builder.tempdir_in(base),
        None => builder.tempdir(),
    };
    dir.map_err(|e| CiError::Workspace(format!("failed to create working directory: {}", e)))
}

/// Empty directory per job
#[derive(Debug, Clone, Default)]
pub struct ScratchWorkspace {
    base: Option<PathBuf>,
}

impl ScratchWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create workspaces under `base` instead of the system temp dir
    pub fn in_dir(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }
}

#[async_trait]
impl WorkspaceProvider for ScratchWorkspace {
    async fn prepare(&self, job_id: &str, _revision: &str) -> Result<Workspace, CiError> {
        Ok(Workspace::new(temp_dir(self.base.as_deref(), job_id)?))
    }
}

/// Clones a local repository and detaches at the revision
#[derive(Debug, Clone)]
pub struct GitCheckout {
    repo: PathBuf,
    base: Option<PathBuf>,
}

impl GitCheckout {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            base: None,
        }
    }

    pub fn with_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.base = Some(base.into());
        self
    }

    async fn git(&self, args: &[&str], cwd: Option<&Path>) -> Result<(), CiError> {
        let mut command = Command::new("git");
        command.args(args).kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let output = command
            .output()
            .await
            .map_err(|e| CiError::Workspace(format!("failed to run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CiError::Workspace(format!(
                "git {} failed: {}",
                args.first().copied().unwrap_or_default(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkspaceProvider for GitCheckout {
    async fn prepare(&self, job_id: &str, revision: &str) -> Result<Workspace, CiError> {
        let dir = temp_dir(self.base.as_deref(), job_id)?;
        let repo = self.repo.to_string_lossy();
        let target = dir.path().to_string_lossy().into_owned();

        debug!("Cloning {} into {} for job {}", repo, target, job_id);
        self.git(&["clone", "--quiet", "--no-checkout", &repo, &target], None)
            .await?;
        self.git(&["checkout", "--quiet", "--detach", revision], Some(dir.path()))
            .await?;

        Ok(Workspace::new(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scratch_workspace_is_removed_on_release() {
        let provider = ScratchWorkspace::new();
        let workspace = provider.prepare("stable", "abc").await.unwrap();
        let path = workspace.path().to_path_buf();
        assert!(path.is_dir());

        workspace.release();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_scratch_workspace_is_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let provider = ScratchWorkspace::in_dir(base.path());
        let path = {
            let workspace = provider.prepare("linux-stable", "abc").await.unwrap();
            assert!(workspace.path().starts_with(base.path()));
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_git_checkout_of_missing_repo_is_workspace_error() {
        let missing = tempfile::tempdir().unwrap();
        let provider = GitCheckout::new(missing.path().join("no-such-repo"));

        let err = provider.prepare("stable", "abc").await.unwrap_err();
        assert!(matches!(err, CiError::Workspace(_)));
    }

    #[tokio::test]
    async fn test_failed_checkout_leaves_base_dir_clean() {
        let base = tempfile::tempdir().unwrap();
        let missing = tempfile::tempdir().unwrap();
        let provider = GitCheckout::new(missing.path().join("no-such-repo")).with_base(base.path());

        assert!(provider.prepare("stable", "abc").await.is_err());
        assert_eq!(std::fs::read_dir(base.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires git
    async fn test_git_checkout_detaches_at_revision() {
        let repo = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            let status = std::process::Command::new("git")
                .args(args)
                .current_dir(repo.path())
                .status()
                .unwrap();
            assert!(status.success());
        };
        run(&["init", "--quiet"]);
        std::fs::write(repo.path().join("Cargo.lock"), "v1").unwrap();
        run(&["add", "."]);
        run(&[
            "-c",
            "user.name=ci",
            "-c",
            "user.email=ci@example.com",
            "commit",
            "--quiet",
            "-m",
            "init",
        ]);

        let base = tempfile::tempdir().unwrap();
        let workspace = GitCheckout::new(repo.path())
            .with_base(base.path())
            .prepare("stable", "HEAD")
            .await
            .unwrap();
        assert!(workspace.path().starts_with(base.path()));
        let lock = std::fs::read_to_string(workspace.path().join("Cargo.lock")).unwrap();
        assert_eq!(lock, "v1");
    }
}
