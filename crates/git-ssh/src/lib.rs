//! Git over SSH exec requests, independent of the SSH library in use.
//!
//! A session layer hands this crate the command string of an `exec` request
//! plus the channel's byte streams. The crate parses the command, confines the
//! repository path to the configured root, provisions bare repositories on
//! first push and runs the matching git service with the streams attached.

pub mod command;
pub mod errors;
pub mod path;
pub mod process;
pub mod repo;
pub mod serve;

pub use command::{GitBinaries, GitCommand, GitService, decode_exec_data};
pub use errors::GitSshError;
pub use path::{ResolvedRepo, resolve_repo_path};
pub use repo::RepositoryProvider;
pub use serve::{EXIT_FAILURE, EXIT_SUCCESS, report_failure, serve_command};
