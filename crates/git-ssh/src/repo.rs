use std::path::Path;

use async_trait::async_trait;

/// Storage that owns the repository root and can create bare repositories
/// beneath it.
#[async_trait]
pub trait RepositoryProvider: Send + Sync {
    /// Directory every served repository must live under.
    fn root(&self) -> &Path;

    /// Make sure a bare repository exists at `path`, creating it if absent.
    /// Returns `true` when this call created it.
    ///
    /// Implementations serialize creation so concurrent first pushes cannot
    /// initialize the same directory twice.
    async fn ensure_repository(&self, path: &Path) -> anyhow::Result<bool>;
}

/// Whether `dir` is present on disk. Checked on every command; nothing is
/// cached between requests.
pub async fn repository_exists(dir: &Path) -> bool {
    tokio::fs::try_exists(dir).await.unwrap_or(false)
}
