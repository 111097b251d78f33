//! Engine crate – task orchestration, archive jobs and file search for
//! the shelf file manager.
//!
//! Everything long-running goes through [`tasks::TaskRegistry`]: jobs are
//! created there, report progress there, and settle there. Hosts (the
//! `shelfctl` CLI and daemon) only talk to [`AppContext`] and
//! [`CommandRegistry`].

pub mod archive;
pub mod commands;
pub mod context;
pub mod error;
pub mod platform;
pub mod probes;
pub mod scenario;
pub mod search;
pub mod settings;
pub mod tasks;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use commands::CommandRegistry;
pub use context::AppContext;
pub use error::{TaskError, TaskResult};
pub use settings::EngineSettings;
pub use types::{CommandResult, ErrorCode, ErrorInfo, Status};
