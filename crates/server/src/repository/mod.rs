pub mod backup;
pub mod listing;
pub mod storage;

use std::path::Path;

use anyhow::Result;
use git_ssh::{ResolvedRepo, resolve_repo_path};

pub use backup::{BackupArchive, backup_repository};
pub use listing::list_repositories;
pub use storage::RepositoryStorage;

/// Suffix every stored repository directory carries.
pub const REPO_SUFFIX: &str = ".git";

/// Resolve an administrative repository name (`notes` or `notes.git`) under
/// `root`, with the same containment rules the exec path applies.
pub fn resolve_named(root: &Path, name: &str) -> Result<ResolvedRepo> {
    Ok(resolve_repo_path(root, &with_suffix(name))?)
}

/// `name` trimmed, with [`REPO_SUFFIX`] appended unless already present.
pub fn with_suffix(name: &str) -> String {
    let name = name.trim();
    if name.ends_with(REPO_SUFFIX) {
        name.to_string()
    } else {
        format!("{name}{REPO_SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn appends_suffix_when_missing() {
        let dir = TempDir::new().unwrap();
        let resolved = resolve_named(dir.path(), "notes").unwrap();
        assert_eq!(resolved.relative, PathBuf::from("notes.git"));

        let resolved = resolve_named(dir.path(), "notes.git").unwrap();
        assert_eq!(resolved.relative, PathBuf::from("notes.git"));
    }

    #[test]
    fn rejects_escaping_names() {
        let dir = TempDir::new().unwrap();
        let err = resolve_named(dir.path(), "../other").unwrap_err();
        assert!(err.to_string().contains("invalid repository path"));
    }
}
