//! Per-connection russh handler.
//!
//! Each session channel is parked until its first `exec` request, then handed
//! to its own task so channels on one connection run independently.

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use git_ssh::{GitSshError, decode_exec_data, report_failure, serve_command};
use metrics::counter;
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, Pty};
use russh_keys::key::PublicKey;
use tracing::{Instrument, debug, info, info_span, warn};

use super::ServeContext;

pub struct SessionHandler {
    context: ServeContext,
    peer: Option<SocketAddr>,
    // Channels opened but not yet given a command.
    pending: HashMap<ChannelId, Channel<Msg>>,
}

impl SessionHandler {
    pub fn new(context: ServeContext, peer: Option<SocketAddr>) -> Self {
        Self {
            context,
            peer,
            pending: HashMap::new(),
        }
    }
}

#[async_trait]
impl Handler for SessionHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        debug!(peer = ?self.peer, user, method = "none", "accepted authentication");
        Ok(Auth::Accept)
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        debug!(peer = ?self.peer, user, method = "password", "accepted authentication");
        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        debug!(
            peer = ?self.peer,
            user,
            fingerprint = %public_key.fingerprint(),
            method = "publickey",
            "accepted authentication"
        );
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!(channel = ?channel.id(), "session channel opened");
        self.pending.insert(channel.id(), channel);
        Ok(true)
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if self.pending.remove(&channel).is_some() {
            debug!(?channel, "channel closed before any command");
        }
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(channel) = self.pending.remove(&channel_id) else {
            debug!(channel = ?channel_id, "exec refused, channel already dispatched");
            session.channel_failure(channel_id);
            return Ok(());
        };

        let command = decode_exec_data(data).map(str::to_string);
        match &command {
            Ok(line) => {
                info!(peer = ?self.peer, channel = ?channel_id, command = %line, "exec request");
                session.channel_success(channel_id);
            }
            Err(err) => {
                warn!(peer = ?self.peer, channel = ?channel_id, error = %err, "malformed exec request");
                session.channel_failure(channel_id);
            }
        }

        counter!("gitden.ssh.exec_requests").increment(1);
        let span = info_span!("channel", channel = ?channel_id);
        let task = serve_channel(self.context.clone(), session.handle(), channel, command);
        self.context.tracker.spawn(task.instrument(span));
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        // Acknowledged so clients do not stall; no shell is started.
        session.channel_success(channel);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_failure(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(?channel, subsystem = name, "subsystem refused");
        session.channel_failure(channel);
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(?channel, variable = variable_name, "environment request refused");
        session.channel_failure(channel);
        Ok(())
    }

    async fn x11_request(
        &mut self,
        channel: ChannelId,
        _single_connection: bool,
        _x11_auth_protocol: &str,
        _x11_auth_cookie: &str,
        _x11_screen_number: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_failure(channel);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        session.channel_failure(channel);
        Ok(())
    }
}

/// Run one command on `channel`, then report its exit status, send EOF and
/// close the channel, in that order.
async fn serve_channel(
    context: ServeContext,
    handle: Handle,
    mut channel: Channel<Msg>,
    command: Result<String, GitSshError>,
) {
    let status = {
        let mut output = Box::pin(channel.make_writer());
        let mut errors = Box::pin(channel.make_writer_ext(Some(1)));
        let mut input = Box::pin(channel.make_reader());

        match &command {
            Ok(line) => {
                serve_command(
                    context.storage.as_ref(),
                    &context.binaries,
                    line,
                    &mut input,
                    &mut output,
                    &mut errors,
                )
                .await
            }
            Err(err) => report_failure(&mut errors, err).await,
        }
    };

    debug!(status, "command finished");
    let id = channel.id();
    if handle.exit_status_request(id, status).await.is_err() {
        debug!("failed to send exit status, session gone");
        return;
    }
    if handle.eof(id).await.is_err() || handle.close(id).await.is_err() {
        debug!("failed to close channel, session gone");
    }
}
