//! Persistent SSH host identity.

use std::fs::OpenOptions;
use std::path::Path;

use anyhow::{Context, Result};
use russh_keys::key::KeyPair;
use tracing::info;

/// Load the host key at `path`, generating and persisting an Ed25519 key on
/// first launch.
///
/// The key file is written owner-read/write only. An existing file that does
/// not parse is an error; it is never overwritten.
pub fn load_or_generate(path: &Path) -> Result<KeyPair> {
    let key = if path.exists() {
        let key = russh_keys::load_secret_key(path, None)
            .with_context(|| format!("failed to load host key from {}", path.display()))?;
        info!(path = %path.display(), "loaded SSH host key");
        key
    } else {
        let key = generate(path)?;
        info!(path = %path.display(), "generated new SSH host key");
        key
    };

    let public = key
        .clone_public_key()
        .context("failed to derive host public key")?;
    info!(fingerprint = %public.fingerprint(), "host key fingerprint");
    Ok(key)
}

fn generate(path: &Path) -> Result<KeyPair> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let key = KeyPair::generate_ed25519();

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let file = options
        .open(path)
        .with_context(|| format!("failed to create host key file {}", path.display()))?;

    russh_keys::encode_pkcs8_pem(&key, file)
        .with_context(|| format!("failed to write host key to {}", path.display()))?;
    Ok(key)
}
