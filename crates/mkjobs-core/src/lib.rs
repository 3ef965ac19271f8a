//! # mkjobs-core
//!
//! Core types for the mkjobs process launcher.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Workers, process launch and waiting live in `mkjobs-runtime`.
//!
//! ## Modules
//!
//! - `id` - Job identifier type
//! - `result` - Exit result of a finished job
//! - `stack` - Intrusive lock-free LIFO stack used for job hand-off
//! - `cmdline` - Argument quoting and command-line splitting
//! - `envblock` - Contiguous environment block construction
//! - `topology` - Processor groups and worker placement cursors
//! - `error` - Error types
//! - `kprint` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod result;
pub mod stack;
pub mod cmdline;
pub mod envblock;
pub mod topology;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::JobId;
pub use result::ExitResult;
pub use stack::{AtomicStack, StackLink, StackNode};
pub use cmdline::{quote_args, split_command_line, CommandLine, QuoteDialect};
pub use envblock::EnvBlock;
pub use topology::{Placement, PlacementCursor, ProcessorGroup, Topology};
pub use error::{ConfigError, EngineError, JobError, LaunchError, Result};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};

/// Limits and reserved values
pub mod constants {
    /// Absolute maximum number of worker threads
    pub const MAX_WORKERS: usize = 256;

    /// Largest processor group; bigger topology partitions are split
    pub const MAX_GROUP_SIZE: usize = 64;

    /// Exit code reported when a process could not be started
    pub const EXIT_LAUNCH_FAILED: i32 = 127;

    /// Exit code reported when waiting for a job failed
    pub const EXIT_WAIT_FAILED: i32 = -1;

    /// Exit status offset for signal deaths (shell convention)
    pub const SIGNAL_EXIT_BASE: i32 = 128;
}
