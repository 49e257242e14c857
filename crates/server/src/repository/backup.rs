use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use flate2::Compression;
use flate2::write::GzEncoder;
use tokio::task;
use tracing::info;

use super::{REPO_SUFFIX, resolve_named};
use crate::config::Config;

/// A finished backup archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArchive {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl BackupArchive {
    pub fn size_mib(&self) -> f64 {
        self.size_bytes as f64 / 1024.0 / 1024.0
    }
}

/// Archive repository `name` into `<backup_dir>/<name>-<YYYYMMDD-HHMMSS>.tar.gz`.
///
/// The archive holds the repository directory under its own name, so it
/// unpacks straight into a repos directory.
pub async fn backup_repository(config: &Config, name: &str) -> Result<BackupArchive> {
    let resolved = resolve_named(&config.repos_dir, name)?;
    if !tokio::fs::try_exists(&resolved.absolute)
        .await
        .unwrap_or(false)
    {
        bail!("repository not found: {}", resolved.relative.display());
    }

    let file_name = resolved
        .relative
        .file_name()
        .and_then(|name| name.to_str())
        .context("repository name is not valid UTF-8")?
        .to_string();
    let base = file_name.trim_end_matches(REPO_SUFFIX);
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let archive_path = config
        .backup_dir
        .join(format!("{base}-{timestamp}.tar.gz"));

    tokio::fs::create_dir_all(&config.backup_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create backup directory {}",
                config.backup_dir.display()
            )
        })?;

    let source = resolved.absolute.clone();
    let target = archive_path.clone();
    let size_bytes = task::spawn_blocking(move || -> Result<u64> {
        let tar_file = File::create(&target)
            .with_context(|| format!("failed to create archive {}", target.display()))?;
        let encoder = GzEncoder::new(tar_file, Compression::default());
        let mut tar_builder = tar::Builder::new(encoder);
        tar_builder
            .append_dir_all(&file_name, &source)
            .context("failed to add repository to archive")?;
        let encoder = tar_builder
            .into_inner()
            .context("failed to finish tar archive")?;
        let tar_file = encoder.finish().context("failed to finish gzip compression")?;
        Ok(tar_file.metadata()?.len())
    })
    .await
    .context("backup task panicked")??;

    info!(
        repo = %resolved.relative.display(),
        archive = %archive_path.display(),
        size_bytes,
        "created backup"
    );
    Ok(BackupArchive {
        path: archive_path,
        size_bytes,
    })
}
