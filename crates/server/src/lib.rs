//! gitden server library
//!
//! SSH front end for git over a directory of bare repositories, with the
//! configuration, daemon and maintenance operations the CLI drives, plus the
//! client-side helpers that link working copies to the server.

pub mod app;
pub mod config;
#[cfg(unix)]
pub mod daemon;
pub mod logs;
pub mod metrics_exporter;
pub mod repository;
pub mod ssh;
pub mod supervisor;
pub mod workspace;

pub mod test_helpers;

pub use app::serve;
