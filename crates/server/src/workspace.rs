//! Client side: point local working copies at the server.
//!
//! Remotes use the scp form `git@<host>:<name>.git`, which makes git send a
//! root-relative path in its exec request. The port travels in
//! `core.sshCommand`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use git_ssh::path::clean_relative;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::Config;
use crate::repository::{self, REPO_SUFFIX};

/// How long [`server_reachable`] waits for a TCP connection.
pub const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(2);

const REMOTE_NAME: &str = "origin";

/// Whether `init` created or repointed the `origin` remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteChange {
    Added,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub name: String,
    pub url: String,
    /// False when the directory already was a git working copy.
    pub initialized: bool,
    pub remote: RemoteChange,
}

/// Remote URL for repository `name` (`.git` appended when missing).
pub fn remote_url(config: &Config, name: &str) -> Result<String> {
    let relative = clean_relative(&repository::with_suffix(name))?;
    Ok(format!(
        "git@{}:{}",
        config.server_host,
        relative.to_string_lossy()
    ))
}

/// Value for `core.sshCommand` so git reaches the configured port.
pub fn ssh_command(config: &Config) -> String {
    format!("ssh -p {}", config.port)
}

/// Make `dir` a working copy whose `origin` is the server repository named
/// after the directory.
pub async fn init_workspace(config: &Config, dir: &Path) -> Result<InitReport> {
    let dir = tokio::fs::canonicalize(dir)
        .await
        .with_context(|| format!("failed to resolve {}", dir.display()))?;
    let Some(name) = dir.file_name().map(|name| name.to_string_lossy().into_owned()) else {
        bail!("cannot name a repository after {}", dir.display());
    };
    let url = remote_url(config, &name)?;

    let initialized = !tokio::fs::try_exists(dir.join(".git")).await.unwrap_or(false);
    if initialized {
        git_in(config, &dir, &["init", "-b", &config.default_branch])
            .await
            .context("failed to initialize git repository")?;
    }

    let remote = match git_in(config, &dir, &["remote", "add", REMOTE_NAME, &url]).await {
        Ok(()) => RemoteChange::Added,
        Err(err) => {
            debug!(error = %format!("{err:#}"), "remote add failed, updating instead");
            git_in(config, &dir, &["remote", "set-url", REMOTE_NAME, &url])
                .await
                .context("failed to add remote")?;
            RemoteChange::Updated
        }
    };

    git_in(
        config,
        &dir,
        &["config", "core.sshCommand", &ssh_command(config)],
    )
    .await
    .context("failed to set core.sshCommand")?;

    info!(repo = %name, url = %url, "working copy linked to server");
    Ok(InitReport {
        name,
        url,
        initialized,
        remote,
    })
}

/// Clone repository `name` into `target`, or into a directory named after
/// the repository inside `parent` when no target is given.
pub async fn clone_repository(
    config: &Config,
    name: &str,
    parent: &Path,
    target: Option<&Path>,
) -> Result<PathBuf> {
    let url = remote_url(config, name)?;

    if is_local_host(&config.server_host) {
        let resolved = repository::resolve_named(&config.repos_dir, name)?;
        if !tokio::fs::try_exists(&resolved.absolute).await.unwrap_or(false) {
            bail!("repository not found: {}", resolved.relative.display());
        }
    }

    let target = match target {
        Some(target) => parent.join(target),
        None => parent.join(default_checkout_dir(name)),
    };
    if tokio::fs::try_exists(&target).await.unwrap_or(false) {
        bail!("destination already exists: {}", target.display());
    }

    let status = Command::new(&config.git.git)
        .arg("clone")
        .arg("--config")
        .arg(format!("core.sshCommand={}", ssh_command(config)))
        .arg(&url)
        .arg(&target)
        .stdin(Stdio::inherit())
        .status()
        .await
        .with_context(|| format!("failed to run {}", config.git.git.display()))?;
    if !status.success() {
        bail!("git clone {url} failed ({status})");
    }

    info!(url = %url, target = %target.display(), "cloned repository");
    Ok(target)
}

/// TCP reachability of `server_host:port`.
pub async fn server_reachable(config: &Config, timeout: Duration) -> bool {
    let addr = (config.server_host.as_str(), config.port);
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

fn default_checkout_dir(name: &str) -> String {
    let name = name.trim().trim_end_matches('/');
    let base = name.rsplit('/').next().unwrap_or(name);
    base.strip_suffix(REPO_SUFFIX).unwrap_or(base).to_string()
}

fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

async fn git_in(config: &Config, dir: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new(&config.git.git)
        .arg("-C")
        .arg(dir)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("failed to run {}", config.git.git.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git {}: {}", args.join(" "), stderr.trim());
    }
    Ok(())
}
