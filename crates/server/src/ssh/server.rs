//! SSH listener and accept loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics::counter;
use russh::MethodSet;
use russh::server;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::host_key;
use super::{ServeContext, SessionHandler};
use crate::config::Config;
use crate::repository::RepositoryStorage;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound SSH listener ready to serve git commands.
pub struct SshServer {
    listener: TcpListener,
    ssh_config: Arc<server::Config>,
    context: ServeContext,
}

impl SshServer {
    /// Load the host identity, prepare the repository root and bind the
    /// listener described by `config`.
    pub async fn bind(config: &Config) -> Result<Self> {
        let host_key = host_key::load_or_generate(&config.host_key)?;

        let storage = RepositoryStorage::from_config(config);
        storage.prepare().await?;

        let ssh_config = Arc::new(server::Config {
            keys: vec![host_key],
            methods: MethodSet::NONE | MethodSet::PASSWORD | MethodSet::PUBLICKEY,
            inactivity_timeout: Some(Duration::from_secs(config.idle_timeout_secs)),
            auth_rejection_time: Duration::from_secs(1),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            ..Default::default()
        });

        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to listen on {addr}"))?;

        Ok(Self {
            listener,
            ssh_config,
            context: ServeContext::new(storage, config.git.clone()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read listener address")
    }

    /// Accept connections until `shutdown` fires, then wait for every
    /// in-flight connection and command to finish.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            listener,
            ssh_config,
            context,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            info!(address = %addr, root = %context.storage.local_root.display(), "SSH server listening");
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        counter!("gitden.ssh.connections").increment(1);
                        let handler = SessionHandler::new(context.clone(), Some(peer));
                        let span = info_span!("connection", %peer);
                        context
                            .tracker
                            .spawn(handle_connection(ssh_config.clone(), stream, handler).instrument(span));
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to accept connection");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        info!(active = context.tracker.len(), "listener closed, waiting for active sessions");
        context.tracker.close();
        context.tracker.wait().await;
        info!("all sessions finished");
        Ok(())
    }
}

async fn handle_connection(
    ssh_config: Arc<server::Config>,
    stream: TcpStream,
    handler: SessionHandler,
) {
    debug!("connection accepted");
    let session = match server::run_stream(ssh_config, stream, handler).await {
        Ok(session) => session,
        Err(err) => {
            warn!(error = %err, "SSH handshake failed");
            return;
        }
    };

    match session.await {
        Ok(()) => debug!("connection closed"),
        Err(err) => warn!(error = %err, "connection ended with error"),
    }
}
