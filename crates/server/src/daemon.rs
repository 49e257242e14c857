//! Background server lifecycle: start, stop, restart, status.
//!
//! The daemon is the current executable re-run with `serve` in a new session,
//! its output appended to the log file and its pid recorded in the pid file.

use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use nix::sys::signal::{Signal, kill};
use nix::unistd::{Pid, setsid};
use tracing::{debug, info, warn};

use crate::config::Config;

const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Running(i32),
    Stopped,
}

/// Whether the pid file names a live process.
pub fn status(config: &Config) -> DaemonStatus {
    match read_pid(&config.pid_file) {
        Some(pid) if is_alive(pid) => DaemonStatus::Running(pid),
        _ => DaemonStatus::Stopped,
    }
}

/// Launch the server in the background and return its pid.
///
/// `config_path` is forwarded to the child so it serves the same
/// configuration the caller loaded.
pub fn start(config: &Config, config_path: Option<&Path>) -> Result<i32> {
    if let DaemonStatus::Running(pid) = status(config) {
        bail!("server is already running (pid {pid})");
    }

    let exe = std::env::current_exe().context("failed to locate current executable")?;
    let log_path = config.log_file();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;
    let log_err = log.try_clone().context("failed to duplicate log handle")?;

    let mut command = Command::new(exe);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    command
        .arg("serve")
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(|| setsid().map(|_| ()).map_err(std::io::Error::from));
    }

    let child = command.spawn().context("failed to spawn server process")?;
    let pid = i32::try_from(child.id()).context("server pid out of range")?;

    if let Some(dir) = config.pid_file.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    std::fs::write(&config.pid_file, pid.to_string())
        .with_context(|| format!("failed to write pid file {}", config.pid_file.display()))?;

    info!(pid, log = %log_path.display(), "server started in background");
    Ok(pid)
}

/// Send SIGTERM to the recorded server, wait for it to exit and remove the
/// pid file. Returns the pid that was stopped.
pub fn stop(config: &Config) -> Result<i32> {
    let Some(pid) = read_pid(&config.pid_file) else {
        bail!("server is not running");
    };

    if !is_alive(pid) {
        remove_pid_file(&config.pid_file);
        info!(pid, "server already exited; cleared stale pid file");
        return Ok(pid);
    }

    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        remove_pid_file(&config.pid_file);
        bail!("failed to stop server: {err}");
    }

    let deadline = Instant::now() + STOP_TIMEOUT;
    while is_alive(pid) && Instant::now() < deadline {
        thread::sleep(STOP_POLL);
    }
    if is_alive(pid) {
        warn!(pid, "server still running after SIGTERM; in-flight sessions may be draining");
    }

    remove_pid_file(&config.pid_file);
    info!(pid, "server stopped");
    Ok(pid)
}

/// Stop the server if it is running, then start it again.
pub fn restart(config: &Config, config_path: Option<&Path>) -> Result<i32> {
    if let DaemonStatus::Running(_) = status(config) {
        stop(config)?;
    }
    start(config, config_path)
}

fn read_pid(path: &Path) -> Option<i32> {
    let content = std::fs::read_to_string(path).ok()?;
    match content.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Some(pid),
        _ => {
            debug!(path = %path.display(), "ignoring malformed pid file");
            None
        }
    }
}

fn is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

fn remove_pid_file(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        debug!(path = %path.display(), error = %err, "failed to remove pid file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &Path) -> Config {
        Config::with_state_dir(dir)
    }

    #[test]
    fn missing_pid_file_is_stopped() {
        let dir = TempDir::new().unwrap();
        assert_eq!(status(&config(dir.path())), DaemonStatus::Stopped);
    }

    #[test]
    fn live_pid_is_running() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        let own = std::process::id() as i32;
        std::fs::write(&config.pid_file, format!("{own}\n")).unwrap();

        assert_eq!(status(&config), DaemonStatus::Running(own));
    }

    #[test]
    fn malformed_pid_file_is_stopped() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());

        for content in ["garbage", "", "0", "-12"] {
            std::fs::write(&config.pid_file, content).unwrap();
            assert_eq!(status(&config), DaemonStatus::Stopped, "{content:?}");
        }
    }

    #[test]
    fn stop_without_pid_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = stop(&config(dir.path())).unwrap_err();
        assert_eq!(err.to_string(), "server is not running");
    }

    #[test]
    fn stop_with_dead_pid_cleans_up() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        std::fs::write(&config.pid_file, i32::MAX.to_string()).unwrap();

        assert_eq!(stop(&config).unwrap(), i32::MAX);
        assert!(!config.pid_file.exists());
    }

    #[test]
    fn start_refuses_when_running() {
        let dir = TempDir::new().unwrap();
        let config = config(dir.path());
        std::fs::write(&config.pid_file, std::process::id().to_string()).unwrap();

        let err = start(&config, None).unwrap_err();
        assert!(err.to_string().starts_with("server is already running"));
    }
}
