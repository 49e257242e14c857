use std::future::Future;

use anyhow::{Error, Result};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Runs named long-lived tasks and cancels all of them when one fails or the
/// process receives SIGINT/SIGTERM.
pub struct Supervisor {
    shutdown: CancellationToken,
    tasks: JoinSet<(String, Result<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self::with_shutdown(CancellationToken::new())
    }

    /// Supervisor driven by an external token; cancelling it stops every child.
    pub fn with_shutdown(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            tasks: JoinSet::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn spawn<F, Fut>(&mut self, name: &'static str, factory: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let shutdown = self.shutdown.child_token();
        self.tasks.spawn(async move {
            let result = factory(shutdown).await;
            (name.to_string(), result)
        });
    }

    pub async fn run(mut self) -> Result<()> {
        let mut first_err: Option<Error> = None;
        let terminate = terminate_signal();
        tokio::pin!(terminate);

        while !self.tasks.is_empty() {
            tokio::select! {
                Some(outcome) = self.tasks.join_next() => {
                    self.handle_task_outcome(&mut first_err, outcome);
                }
                _ = tokio::signal::ctrl_c(), if !self.shutdown.is_cancelled() => {
                    info!("received SIGINT, shutting down");
                    self.shutdown.cancel();
                }
                _ = &mut terminate, if !self.shutdown.is_cancelled() => {
                    info!("received SIGTERM, shutting down");
                    self.shutdown.cancel();
                }
            }
        }

        if let Some(err) = first_err {
            Err(err)
        } else {
            Ok(())
        }
    }

    fn handle_task_outcome(
        &self,
        first_err: &mut Option<Error>,
        outcome: std::result::Result<(String, Result<()>), JoinError>,
    ) {
        match outcome {
            Ok((name, Ok(()))) => {
                info!(task = %name, "child exited gracefully");
            }
            Ok((name, Err(err))) => {
                error!(task = %name, error = %format!("{err:#}"), "child exited with error");
                if first_err.is_none() {
                    *first_err = Some(err);
                }
                self.cancel_all();
            }
            Err(join_err) => {
                error!(error = ?join_err, "child panicked");
                if first_err.is_none() {
                    *first_err = Some(join_err.into());
                }
                self.cancel_all();
            }
        }
    }

    fn cancel_all(&self) {
        if !self.shutdown.is_cancelled() {
            info!("supervisor shutting down");
            self.shutdown.cancel();
        }
    }
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(err) => {
            error!(error = %err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
