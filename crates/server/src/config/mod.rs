//! Configuration management for gitden
//!
//! Configuration is stored in RON format under `~/.gitden/config.ron`. Every
//! field has a default so partial files load; see [`loader`] for discovery.

pub mod loader;

use git_ssh::GitBinaries;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Directory holding config, host key, pid file and logs.
pub const STATE_DIR_NAME: &str = ".gitden";

const LOG_FILENAME: &str = "server.log";

/// Top-level configuration for gitden
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// TCP port the SSH listener binds
    pub port: u16,

    /// Interface the SSH listener binds
    pub listen_host: String,

    /// Host name clients use to reach the server
    pub server_host: String,

    /// Root directory for bare repositories
    pub repos_dir: PathBuf,

    /// Persistent SSH host key (generated on first launch)
    pub host_key: PathBuf,

    /// Pid file written by `start`
    pub pid_file: PathBuf,

    /// Branch HEAD points at in newly provisioned repositories
    pub default_branch: String,

    /// Destination for `backup` archives
    pub backup_dir: PathBuf,

    /// Seconds of transport inactivity before a connection is dropped
    pub idle_timeout_secs: u64,

    /// git binaries used for provisioning and serving
    pub git: GitBinaries,

    /// Address for the Prometheus scrape endpoint; metrics stay in-process when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_state_dir(&default_state_dir())
    }
}

impl Config {
    /// Default configuration rooted at `state_dir` instead of `~/.gitden`.
    pub fn with_state_dir(state_dir: &Path) -> Self {
        Self {
            port: 2222,
            listen_host: "0.0.0.0".to_string(),
            server_host: "localhost".to_string(),
            repos_dir: state_dir.join("repos"),
            host_key: state_dir.join("host_key"),
            pid_file: state_dir.join("gitden.pid"),
            default_branch: "main".to_string(),
            backup_dir: state_dir.join("backups"),
            idle_timeout_secs: 3600,
            git: GitBinaries::default(),
            metrics_addr: None,
        }
    }

    /// Address the SSH listener binds, `host:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.port)
    }

    /// Log file the daemon redirects its output to, next to the pid file
    pub fn log_file(&self) -> PathBuf {
        self.pid_file
            .parent()
            .map(|dir| dir.join(LOG_FILENAME))
            .unwrap_or_else(|| PathBuf::from(LOG_FILENAME))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("port must be between 1 and 65535".to_string());
        }
        validate_branch_name(&self.default_branch)
    }
}

/// `~/.gitden`, falling back to the working directory when no home is known
pub fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_DIR_NAME)
}

fn validate_branch_name(branch: &str) -> Result<(), String> {
    if branch.is_empty() {
        return Err("default branch cannot be empty".to_string());
    }

    if branch.chars().any(char::is_whitespace) || branch.contains("..") {
        return Err(format!(
            "default branch '{}' is not a valid branch name",
            branch
        ));
    }

    if branch.starts_with('/') || branch.ends_with('/') || branch.starts_with('-') {
        return Err(format!(
            "default branch '{}' cannot start or end with '/' or start with '-'",
            branch
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::with_state_dir(Path::new("/var/lib/gitden"));
        assert_eq!(config.port, 2222);
        assert_eq!(config.server_host, "localhost");
        assert_eq!(config.default_branch, "main");
        assert_eq!(config.repos_dir, PathBuf::from("/var/lib/gitden/repos"));
        assert_eq!(config.host_key, PathBuf::from("/var/lib/gitden/host_key"));
        assert_eq!(config.git, GitBinaries::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_file_sits_next_to_pid_file() {
        let config = Config::with_state_dir(Path::new("/srv/gitden"));
        assert_eq!(config.log_file(), PathBuf::from("/srv/gitden/server.log"));
    }

    #[test]
    fn test_listen_addr() {
        let mut config = Config::with_state_dir(Path::new("/srv"));
        config.listen_host = "127.0.0.1".to_string();
        config.port = 2022;
        assert_eq!(config.listen_addr(), "127.0.0.1:2022");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::with_state_dir(Path::new("/srv"));
        config.port = 0;
        assert!(config.validate().is_err());

        for branch in ["", "my branch", "a..b", "-main", "main/"] {
            let mut config = Config::with_state_dir(Path::new("/srv"));
            config.default_branch = branch.to_string();
            assert!(config.validate().is_err(), "{branch:?}");
        }

        let mut config = Config::with_state_dir(Path::new("/srv"));
        config.default_branch = "trunk".to_string();
        assert!(config.validate().is_ok());
    }
}
