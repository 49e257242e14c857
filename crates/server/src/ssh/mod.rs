pub mod host_key;
pub mod server;
pub mod session;

use std::sync::Arc;

use git_ssh::GitBinaries;
use tokio_util::task::TaskTracker;

use crate::repository::RepositoryStorage;

pub use server::SshServer;
pub use session::SessionHandler;

/// Everything a connection needs to serve commands, shared by all of them.
#[derive(Clone)]
pub struct ServeContext {
    pub storage: Arc<RepositoryStorage>,
    pub binaries: Arc<GitBinaries>,
    /// Tracks connection and channel tasks so shutdown can wait for them.
    pub tracker: TaskTracker,
}

impl ServeContext {
    pub fn new(storage: RepositoryStorage, binaries: GitBinaries) -> Self {
        Self {
            storage: Arc::new(storage),
            binaries: Arc::new(binaries),
            tracker: TaskTracker::new(),
        }
    }
}
