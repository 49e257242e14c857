//! Parsing of the command line carried by an SSH `exec` request.
//!
//! Git clients send `git-upload-pack '<path>'` to fetch and
//! `git-receive-pack '<path>'` to push.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::GitSshError;

/// The two git services reachable over SSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GitService {
    /// Serves fetch and clone.
    UploadPack,
    /// Accepts pushes; the only service that may create a repository.
    ReceivePack,
}

impl GitService {
    pub const ALL: [GitService; 2] = [GitService::UploadPack, GitService::ReceivePack];

    /// The verb a client sends, which is also the default program name.
    pub fn verb(self) -> &'static str {
        match self {
            GitService::UploadPack => "git-upload-pack",
            GitService::ReceivePack => "git-receive-pack",
        }
    }

    pub fn from_verb(verb: &str) -> Option<Self> {
        GitService::ALL.into_iter().find(|service| service.verb() == verb)
    }

    pub fn is_write(self) -> bool {
        matches!(self, GitService::ReceivePack)
    }
}

impl fmt::Display for GitService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Programs used to serve each [`GitService`], plus the `git` binary used to
/// provision new repositories.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitBinaries {
    pub git: PathBuf,
    pub upload_pack: PathBuf,
    pub receive_pack: PathBuf,
}

impl GitBinaries {
    pub fn program(&self, service: GitService) -> &Path {
        match service {
            GitService::UploadPack => &self.upload_pack,
            GitService::ReceivePack => &self.receive_pack,
        }
    }
}

impl Default for GitBinaries {
    fn default() -> Self {
        Self {
            git: PathBuf::from("git"),
            upload_pack: PathBuf::from(GitService::UploadPack.verb()),
            receive_pack: PathBuf::from(GitService::ReceivePack.verb()),
        }
    }
}

/// A parsed exec command. The path is exactly what the client asked for and
/// has not been validated yet; see [`crate::path::resolve_repo_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCommand {
    pub service: GitService,
    pub repo_path: String,
}

impl GitCommand {
    pub fn parse(line: &str) -> Result<Self, GitSshError> {
        let mut tokens = line.split_whitespace();
        let (Some(verb), Some(raw_path)) = (tokens.next(), tokens.next()) else {
            return Err(GitSshError::BadRequest(format!(
                "invalid git command: {line}"
            )));
        };

        let service = GitService::from_verb(verb)
            .ok_or_else(|| GitSshError::BadRequest(format!("unsupported command: {verb}")))?;

        let repo_path = raw_path.trim_matches(|c| c == '\'' || c == '"').to_string();

        Ok(GitCommand { service, repo_path })
    }
}

impl FromStr for GitCommand {
    type Err = GitSshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GitCommand::parse(s)
    }
}

/// Decode the command bytes of an exec request.
///
/// The SSH layer has already stripped the string length prefix. An empty or
/// non UTF-8 command never reaches the parser.
pub fn decode_exec_data(data: &[u8]) -> Result<&str, GitSshError> {
    if data.is_empty() {
        return Err(GitSshError::BadRequest("invalid SSH payload".to_string()));
    }
    std::str::from_utf8(data).map_err(|_| {
        GitSshError::BadRequest("invalid SSH payload: command is not valid UTF-8".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_upload_pack_single_quoted() {
        let cmd = GitCommand::parse("git-upload-pack 'my-repo.git'").unwrap();
        assert_eq!(cmd.service, GitService::UploadPack);
        assert_eq!(cmd.repo_path, "my-repo.git");
    }

    #[test]
    fn parse_receive_pack_double_quoted() {
        let cmd = GitCommand::parse("git-receive-pack \"my-repo.git\"").unwrap();
        assert_eq!(cmd.service, GitService::ReceivePack);
        assert_eq!(cmd.repo_path, "my-repo.git");
    }

    #[test]
    fn parse_unquoted_and_nested_paths() {
        let cmd: GitCommand = "git-upload-pack my-repo.git".parse().unwrap();
        assert_eq!(cmd.repo_path, "my-repo.git");

        let cmd = GitCommand::parse("git-upload-pack   'team/tools/app.git'  ").unwrap();
        assert_eq!(cmd.repo_path, "team/tools/app.git");
    }

    #[test]
    fn parse_keeps_traversal_for_the_validator() {
        let cmd = GitCommand::parse("git-upload-pack '../../etc'").unwrap();
        assert_eq!(cmd.repo_path, "../../etc");
    }

    #[test]
    fn parse_rejects_unknown_verb() {
        let err = GitCommand::parse("git-invalid my-repo.git").unwrap_err();
        assert!(matches!(err, GitSshError::BadRequest(_)));
        assert_eq!(err.to_string(), "unsupported command: git-invalid");

        assert!(GitCommand::parse("ls -la").is_err());
        assert!(GitCommand::parse("git upload-pack repo.git").is_err());
    }

    #[test]
    fn parse_rejects_missing_path() {
        assert!(GitCommand::parse("git-upload-pack").is_err());
        assert!(GitCommand::parse("").is_err());
        assert!(GitCommand::parse("   ").is_err());
    }

    #[test]
    fn every_service_round_trips_through_its_verb() {
        for service in GitService::ALL {
            assert_eq!(GitService::from_verb(service.verb()), Some(service));
        }
        assert!(GitService::ReceivePack.is_write());
        assert!(!GitService::UploadPack.is_write());
    }

    #[test]
    fn default_binaries_match_verbs() {
        let binaries = GitBinaries::default();
        assert_eq!(
            binaries.program(GitService::UploadPack),
            Path::new("git-upload-pack")
        );
        assert_eq!(
            binaries.program(GitService::ReceivePack),
            Path::new("git-receive-pack")
        );
        assert_eq!(binaries.git, PathBuf::from("git"));
    }

    #[test]
    fn decode_rejects_empty_and_invalid_utf8() {
        assert!(decode_exec_data(b"").is_err());
        assert!(decode_exec_data(&[0xff, 0xfe, 0x00]).is_err());
        assert_eq!(
            decode_exec_data(b"git-upload-pack 'a.git'").unwrap(),
            "git-upload-pack 'a.git'"
        );
    }
}
