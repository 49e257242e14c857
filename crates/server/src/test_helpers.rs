//! Fake git toolchain for tests.
//!
//! Writes small shell scripts standing in for `git`, `git-upload-pack` and
//! `git-receive-pack` so the store and the serving path can be exercised
//! without a git installation. Every invocation is appended to `calls.log`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use git_ssh::GitBinaries;

use crate::config::Config;
use crate::repository::RepositoryStorage;

const FAKE_GIT: &str = r#"#!/bin/sh
log="$(dirname "$0")/calls.log"
if [ "$1" = "init" ]; then
    for last; do :; done
    echo "init $last" >> "$log"
    mkdir -p "$last" || exit 1
    echo "ref: refs/heads/master" > "$last/HEAD"
    exit 0
fi
if [ "$1" = "-C" ] && [ "$3" = "symbolic-ref" ]; then
    echo "symbolic-ref $2 $5" >> "$log"
    [ -n "$FAKE_GIT_NO_SYMREF" ] && { echo "fatal: cannot lock HEAD" >&2; exit 1; }
    echo "ref: $5" > "$2/HEAD"
    exit 0
fi
echo "git $*" >> "$log"
if [ "$1" = "-C" ]; then
    dir="$2/.git"
    case "$3 $4" in
        "init -b")
            mkdir -p "$dir" && echo "ref: refs/heads/$5" > "$dir/HEAD"
            exit 0 ;;
        "remote add")
            [ -f "$dir/$5" ] && { echo "error: remote $5 already exists." >&2; exit 3; }
            echo "$6" > "$dir/$5"
            exit 0 ;;
        "remote set-url")
            echo "$6" > "$dir/$5"
            exit 0 ;;
        "config core.sshCommand")
            echo "$5" > "$dir/sshCommand"
            exit 0 ;;
    esac
fi
if [ "$1" = "clone" ] && [ "$2" = "--config" ]; then
    mkdir -p "$5/.git" || exit 1
    echo "$3" > "$5/.git/config"
    echo "$4" > "$5/.git/origin"
    exit 0
fi
echo "fake git: unsupported arguments: $*" >&2
exit 2
"#;

const FAILING_GIT: &str = r#"#!/bin/sh
echo "fatal: cannot init" >&2
exit 128
"#;

// Echoes the client's bytes back after a banner naming the repository.
const FAKE_UPLOAD_PACK: &str = r#"#!/bin/sh
echo "upload-pack $1" >> "$(dirname "$0")/calls.log"
echo "upload-pack $(basename "$1")"
cat
"#;

// Stores the pushed bytes inside the repository.
const FAKE_RECEIVE_PACK: &str = r#"#!/bin/sh
echo "receive-pack $1" >> "$(dirname "$0")/calls.log"
cat > "$1/pushed"
echo "receive-pack $(basename "$1")"
"#;

/// A fake toolchain and repository root laid out inside a scratch directory.
pub struct FakeGit {
    base: PathBuf,
    binaries: GitBinaries,
}

impl FakeGit {
    /// Install a working toolchain under `base`.
    pub fn install(base: &Path) -> Result<Self> {
        Self::install_with(base, FAKE_GIT)
    }

    /// Install a toolchain whose `git init` always fails.
    pub fn install_failing(base: &Path) -> Result<Self> {
        Self::install_with(base, FAILING_GIT)
    }

    /// Install a toolchain whose `git init` succeeds but cannot set `HEAD`.
    pub fn install_without_symbolic_ref(base: &Path) -> Result<Self> {
        let script = FAKE_GIT.replacen(
            "#!/bin/sh\n",
            "#!/bin/sh\nFAKE_GIT_NO_SYMREF=1\n",
            1,
        );
        Self::install_with(base, &script)
    }

    fn install_with(base: &Path, git_script: &str) -> Result<Self> {
        let bin = base.join("bin");
        std::fs::create_dir_all(&bin)
            .with_context(|| format!("failed to create {}", bin.display()))?;
        std::fs::create_dir_all(base.join("repos"))?;

        let binaries = GitBinaries {
            git: write_script(&bin, "git", git_script)?,
            upload_pack: write_script(&bin, "git-upload-pack", FAKE_UPLOAD_PACK)?,
            receive_pack: write_script(&bin, "git-receive-pack", FAKE_RECEIVE_PACK)?,
        };

        Ok(Self {
            base: base.to_path_buf(),
            binaries,
        })
    }

    pub fn root(&self) -> PathBuf {
        self.base.join("repos")
    }

    pub fn binaries(&self) -> GitBinaries {
        self.binaries.clone()
    }

    pub fn storage(&self, default_branch: &str) -> RepositoryStorage {
        RepositoryStorage::new(self.root(), self.binaries.git.clone(), default_branch)
    }

    /// Configuration pointing every path into the scratch directory, listening
    /// on an ephemeral loopback port.
    pub fn config(&self) -> Config {
        let mut config = Config::with_state_dir(&self.base.join("state"));
        config.repos_dir = self.root();
        config.listen_host = "127.0.0.1".to_string();
        config.port = 0;
        config.git = self.binaries();
        config
    }

    /// Create an empty repository directory without going through `git init`.
    pub fn seed_repository(&self, name: &str) -> Result<PathBuf> {
        let path = self.root().join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Contents of `<repo>/HEAD`, trimmed.
    pub fn head(&self, repo: &Path) -> String {
        std::fs::read_to_string(repo.join("HEAD"))
            .map(|head| head.trim().to_string())
            .unwrap_or_default()
    }

    /// A value the fake `git` stored for the working copy at `dir`
    /// (`origin`, `sshCommand`, or the `config` passed to clone).
    pub fn workspace_setting(&self, dir: &Path, key: &str) -> String {
        std::fs::read_to_string(dir.join(".git").join(key))
            .map(|value| value.trim().to_string())
            .unwrap_or_default()
    }

    /// Everything the fake binaries recorded so far.
    pub fn calls(&self) -> String {
        std::fs::read_to_string(self.binaries.git.with_file_name("calls.log")).unwrap_or_default()
    }

    pub fn init_count(&self) -> usize {
        self.calls()
            .lines()
            .filter(|line| line.starts_with("init "))
            .count()
    }

    pub fn spawn_count(&self) -> usize {
        self.calls()
            .lines()
            .filter(|line| line.starts_with("upload-pack ") || line.starts_with("receive-pack "))
            .count()
    }
}

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

#[cfg(not(unix))]
fn write_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, body)?;
    Ok(path)
}
