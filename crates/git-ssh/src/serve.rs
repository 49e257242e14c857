//! One exec request from command line to exit status.

use std::time::Instant;

use metrics::{counter, histogram};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::command::{GitBinaries, GitCommand, GitService};
use crate::errors::GitSshError;
use crate::path::resolve_repo_path;
use crate::process::run_service;
use crate::repo::{RepositoryProvider, repository_exists};

pub const EXIT_SUCCESS: u32 = 0;
pub const EXIT_FAILURE: u32 = 1;

/// Serve a decoded exec command and return the exit status for the channel.
///
/// Parse, validate the path, provision on push, check the repository exists,
/// then run the service. Any failure is written to `errors` as
/// `Error: <reason>` and yields [`EXIT_FAILURE`].
pub async fn serve_command<P, R, W, E>(
    provider: &P,
    binaries: &GitBinaries,
    line: &str,
    input: &mut R,
    output: &mut W,
    errors: &mut E,
) -> u32
where
    P: RepositoryProvider + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    let start = Instant::now();
    let command = match GitCommand::parse(line) {
        Ok(command) => command,
        Err(err) => return fail(errors, line, "unknown", &err).await,
    };
    let service = command.service;

    match execute(provider, binaries, command, input, output, errors).await {
        Ok(()) => {
            counter!("git_ssh.exec", "service" => service.verb(), "outcome" => "ok").increment(1);
            histogram!("git_ssh.exec_ms").record(start.elapsed().as_millis() as f64);
            EXIT_SUCCESS
        }
        Err(err) => fail(errors, line, service.verb(), &err).await,
    }
}

async fn fail<E>(errors: &mut E, line: &str, service: &'static str, err: &GitSshError) -> u32
where
    E: AsyncWrite + Unpin + ?Sized,
{
    warn!(command = %line, error = %err, "git command failed");
    counter!("git_ssh.exec", "service" => service, "outcome" => err.kind()).increment(1);
    report_failure(errors, err).await
}

async fn execute<P, R, W, E>(
    provider: &P,
    binaries: &GitBinaries,
    command: GitCommand,
    input: &mut R,
    output: &mut W,
    errors: &mut E,
) -> Result<(), GitSshError>
where
    P: RepositoryProvider + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    let resolved = resolve_repo_path(provider.root(), &command.repo_path)?;

    if command.service.is_write() {
        let created = provider
            .ensure_repository(&resolved.absolute)
            .await
            .map_err(|err| GitSshError::Internal(format!("{err:#}")))?;
        if created {
            info!(repo = %resolved.relative.display(), "provisioned bare repository");
        }
    }

    if !repository_exists(&resolved.absolute).await {
        return Err(GitSshError::NotFound(command.repo_path));
    }

    debug!(
        service = %command.service,
        repo = %resolved.relative.display(),
        "running git service"
    );
    run_service(
        binaries.program(command.service),
        &resolved.absolute,
        input,
        output,
        errors,
    )
    .await
}

/// Write the client-facing diagnostic for `err` and return its exit status.
pub async fn report_failure<E>(errors: &mut E, err: &GitSshError) -> u32
where
    E: AsyncWrite + Unpin + ?Sized,
{
    let line = format!("Error: {err}\n");
    if let Err(write_err) = errors.write_all(line.as_bytes()).await {
        debug!(error = %write_err, "failed to deliver diagnostic");
    }
    let _ = errors.flush().await;
    err.exit_status()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct DirProvider {
        root: PathBuf,
        ensured: AtomicUsize,
    }

    #[async_trait]
    impl RepositoryProvider for DirProvider {
        fn root(&self) -> &Path {
            &self.root
        }

        async fn ensure_repository(&self, path: &Path) -> anyhow::Result<bool> {
            self.ensured.fetch_add(1, Ordering::SeqCst);
            if path.exists() {
                return Ok(false);
            }
            std::fs::create_dir_all(path)?;
            Ok(true)
        }
    }

    struct Fixture {
        _dir: TempDir,
        provider: DirProvider,
        binaries: GitBinaries,
        log: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("repos");
        std::fs::create_dir_all(&root).unwrap();
        let log = dir.path().join("spawned.log");

        let mut binaries = GitBinaries::default();
        for (service, name) in [
            (GitService::UploadPack, "upload-pack"),
            (GitService::ReceivePack, "receive-pack"),
        ] {
            let path = dir.path().join(name);
            std::fs::write(
                &path,
                format!(
                    "#!/bin/sh\necho \"{name} $1\" >> '{}'\necho \"{name} served\"\n",
                    log.display()
                ),
            )
            .unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            match service {
                GitService::UploadPack => binaries.upload_pack = path,
                GitService::ReceivePack => binaries.receive_pack = path,
            }
        }

        Fixture {
            _dir: dir,
            provider: DirProvider {
                root,
                ensured: AtomicUsize::new(0),
            },
            binaries,
            log,
        }
    }

    async fn serve(fixture: &Fixture, line: &str) -> (u32, String, String) {
        let mut input: &[u8] = b"";
        let mut output = Vec::new();
        let mut errors = Vec::new();
        let status = serve_command(
            &fixture.provider,
            &fixture.binaries,
            line,
            &mut input,
            &mut output,
            &mut errors,
        )
        .await;
        (
            status,
            String::from_utf8(output).unwrap(),
            String::from_utf8(errors).unwrap(),
        )
    }

    #[tokio::test]
    async fn fetch_from_existing_repository() {
        let fixture = fixture();
        std::fs::create_dir_all(fixture.provider.root.join("demo.git")).unwrap();

        let (status, output, errors) = serve(&fixture, "git-upload-pack 'demo.git'").await;

        assert_eq!(status, EXIT_SUCCESS);
        assert_eq!(output, "upload-pack served\n");
        assert!(errors.is_empty());
        let log = std::fs::read_to_string(&fixture.log).unwrap();
        assert!(log.starts_with("upload-pack "));
        assert!(log.trim_end().ends_with("demo.git"));
        assert_eq!(fixture.provider.ensured.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_from_missing_repository_is_not_found() {
        let fixture = fixture();

        let (status, output, errors) = serve(&fixture, "git-upload-pack 'ghost.git'").await;

        assert_eq!(status, EXIT_FAILURE);
        assert!(output.is_empty());
        assert_eq!(errors, "Error: repository not found: ghost.git\n");
        assert!(!fixture.provider.root.join("ghost.git").exists());
    }

    #[tokio::test]
    async fn push_provisions_then_runs_receive_pack() {
        let fixture = fixture();

        let (status, output, _) = serve(&fixture, "git-receive-pack 'new.git'").await;

        assert_eq!(status, EXIT_SUCCESS);
        assert_eq!(output, "receive-pack served\n");
        assert!(fixture.provider.root.join("new.git").is_dir());
        assert_eq!(fixture.provider.ensured.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn traversal_is_rejected_without_spawning() {
        let fixture = fixture();

        let (status, output, errors) = serve(&fixture, "git-upload-pack '../../etc'").await;

        assert_eq!(status, EXIT_FAILURE);
        assert!(output.is_empty());
        assert_eq!(errors, "Error: invalid repository path: ../../etc\n");
        assert!(!fixture.log.exists(), "no service may be spawned");
    }

    #[tokio::test]
    async fn push_traversal_never_reaches_the_provider() {
        let fixture = fixture();

        let (status, _, _) = serve(&fixture, "git-receive-pack '/tmp/evil.git'").await;

        assert_eq!(status, EXIT_FAILURE);
        assert_eq!(fixture.provider.ensured.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_command_reports_parse_error() {
        let fixture = fixture();

        let (status, _, errors) = serve(&fixture, "rm -rf /").await;

        assert_eq!(status, EXIT_FAILURE);
        assert_eq!(errors, "Error: unsupported command: rm\n");
    }

    #[test]
    fn failures_are_labelled_with_the_parsed_service() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let fixture = fixture();

        metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            runtime.block_on(async {
                serve(&fixture, "git-upload-pack 'ghost.git'").await;
                serve(&fixture, "rm -rf /").await;
            });
        });

        let rendered = handle.render();
        let line_for = |service: &str| {
            rendered
                .lines()
                .find(|line| line.contains(&format!("service=\"{service}\"")))
                .unwrap_or_else(|| panic!("no sample for {service} in:\n{rendered}"))
                .to_string()
        };
        assert!(line_for("git-upload-pack").contains("outcome=\"not_found\""));
        assert!(line_for("unknown").contains("outcome=\"bad_request\""));
    }

    #[tokio::test]
    async fn report_failure_writes_diagnostic_line() {
        let mut errors = Vec::new();
        let status = report_failure(
            &mut errors,
            &GitSshError::BadRequest("invalid SSH payload".into()),
        )
        .await;

        assert_eq!(status, EXIT_FAILURE);
        assert_eq!(errors, b"Error: invalid SSH payload\n");
    }
}
