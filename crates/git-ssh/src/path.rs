//! Confinement of client supplied repository paths to the repository root.
//!
//! Validation runs in two stages. The lexical stage rejects absolute paths and
//! parent-directory segments without touching the filesystem. The resolved
//! stage canonicalizes root and candidate (following symlinks along the
//! existing part of the candidate) and requires the candidate to stay under
//! the root.

use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::errors::GitSshError;

/// A repository path that passed both validation stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepo {
    /// Cleaned path relative to the repository root.
    pub relative: PathBuf,
    /// Canonical location on disk. May not exist yet.
    pub absolute: PathBuf,
}

/// Lexically clean `raw`, rejecting anything that is absolute, climbs with
/// `..` or names the root itself.
pub fn clean_relative(raw: &str) -> Result<PathBuf, GitSshError> {
    let mut cleaned = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(segment) => cleaned.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(GitSshError::Forbidden(raw.to_string()));
            }
        }
    }

    if cleaned.as_os_str().is_empty() {
        return Err(GitSshError::Forbidden(raw.to_string()));
    }
    Ok(cleaned)
}

/// Validate `raw` against `root` and return where the repository lives.
pub fn resolve_repo_path(root: &Path, raw: &str) -> Result<ResolvedRepo, GitSshError> {
    let relative = clean_relative(raw)?;

    let root_abs = std::fs::canonicalize(root).map_err(|err| {
        GitSshError::Internal(format!(
            "failed to resolve repository root {}: {err}",
            root.display()
        ))
    })?;
    let absolute = canonicalize_existing_prefix(&root_abs.join(&relative)).map_err(|err| {
        GitSshError::Internal(format!("failed to resolve repository path {raw}: {err}"))
    })?;

    if absolute == root_abs || !absolute.starts_with(&root_abs) {
        return Err(GitSshError::Forbidden(raw.to_string()));
    }

    Ok(ResolvedRepo { relative, absolute })
}

/// Canonicalize the longest existing ancestor of `path` and re-append the
/// components that do not exist yet.
fn canonicalize_existing_prefix(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path;
    let mut missing: Vec<OsString> = Vec::new();

    loop {
        match std::fs::canonicalize(existing) {
            Ok(mut resolved) => {
                for segment in missing.iter().rev() {
                    resolved.push(segment);
                }
                return Ok(resolved);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Err(err),
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn clean_accepts_plain_and_nested_names() {
        assert_eq!(clean_relative("demo.git").unwrap(), PathBuf::from("demo.git"));
        assert_eq!(
            clean_relative("./team//demo.git/").unwrap(),
            PathBuf::from("team/demo.git")
        );
    }

    #[test]
    fn clean_rejects_traversal_and_absolute_paths() {
        for raw in [
            "../../etc",
            "..",
            "team/../../secret.git",
            "team/../demo.git",
            "/etc/passwd",
            "/",
            "",
            ".",
            "./",
        ] {
            let err = clean_relative(raw).unwrap_err();
            assert!(matches!(err, GitSshError::Forbidden(_)), "{raw}");
        }
    }

    #[test]
    fn lexical_rejection_happens_even_when_root_is_missing() {
        let missing_root = Path::new("/definitely/not/a/real/root");
        for raw in ["../../etc", "/etc", "a/../../b"] {
            let err = resolve_repo_path(missing_root, raw).unwrap_err();
            assert!(matches!(err, GitSshError::Forbidden(_)), "{raw}");
        }
    }

    #[test]
    fn resolves_missing_repository_under_root() {
        let root = TempDir::new().unwrap();
        let resolved = resolve_repo_path(root.path(), "new.git").unwrap();

        let canonical_root = std::fs::canonicalize(root.path()).unwrap();
        assert_eq!(resolved.relative, PathBuf::from("new.git"));
        assert_eq!(resolved.absolute, canonical_root.join("new.git"));
    }

    #[test]
    fn resolves_existing_nested_repository() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("team/demo.git")).unwrap();

        let resolved = resolve_repo_path(root.path(), "team/demo.git").unwrap();
        assert!(resolved.absolute.is_dir());
        assert!(resolved.absolute.ends_with("team/demo.git"));
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_escaping_the_root() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("escape")).unwrap();

        let err = resolve_repo_path(root.path(), "escape/stolen.git").unwrap_err();
        assert!(matches!(err, GitSshError::Forbidden(_)));
    }
}
