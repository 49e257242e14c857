use std::path::Path;

use anyhow::{Context, Result};

use super::REPO_SUFFIX;

/// Names of the repositories directly under `root`, sorted.
///
/// Only directories ending in `.git` count. A missing root is created and
/// reported as empty.
pub fn list_repositories(root: &Path) -> Result<Vec<String>> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("failed to create repos directory {}", root.display()))?;

    let entries = std::fs::read_dir(root)
        .with_context(|| format!("failed to read repos directory {}", root.display()))?;

    let mut repos = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && name.ends_with(REPO_SUFFIX)
        {
            repos.push(name.to_string());
        }
    }

    repos.sort();
    Ok(repos)
}
