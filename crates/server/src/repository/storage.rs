use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use git_ssh::{RepositoryProvider, ResolvedRepo};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::resolve_named;
use crate::config::Config;

/// Bare repositories under a single root directory.
///
/// Creation is serialized by one process-wide lock shared by every clone of
/// the storage, so concurrent first pushes initialize a repository once.
#[derive(Clone)]
pub struct RepositoryStorage {
    pub local_root: PathBuf,
    git: PathBuf,
    default_branch: String,
    provision_lock: Arc<Mutex<()>>,
}

impl RepositoryStorage {
    pub fn new(local_root: PathBuf, git: PathBuf, default_branch: impl Into<String>) -> Self {
        RepositoryStorage {
            local_root,
            git,
            default_branch: default_branch.into(),
            provision_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.repos_dir.clone(),
            config.git.git.clone(),
            config.default_branch.clone(),
        )
    }

    /// Create the root directory if it does not exist yet.
    pub async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.local_root)
            .await
            .with_context(|| {
                format!(
                    "failed to create repository root {}",
                    self.local_root.display()
                )
            })
    }

    /// Delete repository `name` and everything in it.
    ///
    /// Holds the provisioning lock so a concurrent first push cannot observe a
    /// half-removed directory.
    pub async fn remove_repository(&self, name: &str) -> Result<ResolvedRepo> {
        let resolved = resolve_named(&self.local_root, name)?;
        let _guard = self.provision_lock.lock().await;

        if !tokio::fs::try_exists(&resolved.absolute)
            .await
            .unwrap_or(false)
        {
            bail!("repository not found: {}", resolved.relative.display());
        }

        tokio::fs::remove_dir_all(&resolved.absolute)
            .await
            .with_context(|| {
                format!("failed to remove repository {}", resolved.absolute.display())
            })?;
        info!(repo = %resolved.relative.display(), "removed repository");
        Ok(resolved)
    }

    async fn init_bare(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        self.run_git(&[
            OsStr::new("init"),
            OsStr::new("--bare"),
            OsStr::new("--quiet"),
            path.as_os_str(),
        ])
        .await
        .context("failed to init repository")
    }

    async fn set_default_branch(&self, path: &Path) -> Result<()> {
        let head = format!("refs/heads/{}", self.default_branch);
        self.run_git(&[
            OsStr::new("-C"),
            path.as_os_str(),
            OsStr::new("symbolic-ref"),
            OsStr::new("HEAD"),
            OsStr::new(&head),
        ])
        .await
        .context("failed to set default branch")
    }

    async fn run_git(&self, args: &[&OsStr]) -> Result<()> {
        let output = Command::new(&self.git)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.git.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} {}: {}", self.git.display(), output.status, stderr.trim());
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryProvider for RepositoryStorage {
    fn root(&self) -> &Path {
        &self.local_root
    }

    async fn ensure_repository(&self, path: &Path) -> Result<bool> {
        let _guard = self.provision_lock.lock().await;

        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(false);
        }

        debug!(path = %path.display(), "initializing bare repository");
        if let Err(err) = self.init_bare(path).await {
            // Leave nothing behind that would look like a repository.
            if let Err(cleanup) = tokio::fs::remove_dir_all(path).await
                && cleanup.kind() != ErrorKind::NotFound
            {
                warn!(path = %path.display(), error = %cleanup, "failed to clean up after init");
            }
            return Err(err);
        }

        // Once initialized the repository stays, even without its default branch.
        self.set_default_branch(path).await?;
        Ok(true)
    }
}
