//! Runs a git service with the channel's streams as its stdio.

use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

use crate::errors::GitSshError;

/// Spawn `program <repo_dir>` and pump bytes until it exits.
///
/// Client input is copied to the child's stdin; stdout and stderr are copied
/// back. The call returns once the child has exited and both of its output
/// streams are drained. Input the child never consumed is dropped with it.
pub async fn run_service<R, W, E>(
    program: &Path,
    repo_dir: &Path,
    input: &mut R,
    output: &mut W,
    errors: &mut E,
) -> Result<(), GitSshError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    let mut child = Command::new(program)
        .arg(repo_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| {
            GitSshError::Internal(format!("failed to start {}: {err}", program.display()))
        })?;

    debug!(
        program = %program.display(),
        repo = %repo_dir.display(),
        pid = ?child.id(),
        "spawned git service"
    );

    let mut child_in = child
        .stdin
        .take()
        .ok_or_else(|| GitSshError::internal("child stdin was not piped"))?;
    let mut child_out = child
        .stdout
        .take()
        .ok_or_else(|| GitSshError::internal("child stdout was not piped"))?;
    let mut child_err = child
        .stderr
        .take()
        .ok_or_else(|| GitSshError::internal("child stderr was not piped"))?;

    let mut input_error: Option<io::Error> = None;
    let exit = {
        let pump = async move {
            let copied = tokio::io::copy(input, &mut child_in).await;
            // Dropping the pipe signals EOF to the child.
            let _ = child_in.shutdown().await;
            copied
        };
        let drain = async {
            let (out, err) = tokio::join!(
                tokio::io::copy(&mut child_out, &mut *output),
                tokio::io::copy(&mut child_err, &mut *errors),
            );
            out?;
            err?;
            child.wait().await
        };
        tokio::pin!(pump);
        tokio::pin!(drain);

        let mut pump_done = false;
        loop {
            tokio::select! {
                copied = &mut pump, if !pump_done => {
                    pump_done = true;
                    match copied {
                        Ok(bytes) => debug!(bytes, "client input closed"),
                        // The child stopped reading; its exit status decides the outcome.
                        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                            debug!("git service closed stdin early");
                        }
                        Err(err) => input_error = Some(err),
                    }
                }
                status = &mut drain => break status,
            }
        }
    };

    let status = exit.map_err(|err| {
        GitSshError::Internal(format!("{} i/o failed: {err}", program.display()))
    })?;

    if let Some(err) = input_error {
        return Err(GitSshError::Internal(format!(
            "failed to forward client input: {err}"
        )));
    }

    if !status.success() {
        return Err(GitSshError::Internal(format!(
            "{} {status}",
            program.display()
        )));
    }

    output.flush().await.map_err(GitSshError::internal)?;
    errors.flush().await.map_err(GitSshError::internal)?;
    Ok(())
}
