//! # mkjobs-runtime
//!
//! Platform runtime for the mkjobs process launcher.
//!
//! This crate provides:
//! - Worker threads with private lock-free job stacks (`worker`, `pool`)
//! - The completion channel all workers report through (`completion`)
//! - Executable resolution and process launch (`launcher`)
//! - Native process handles and external jobs (`handle`)
//! - Processor topology detection and affinity (`affinity`)
//! - Worker wake signals and the completion waitable (`parking`, `notify`)
//! - The submission API (`engine`)

pub mod config;
pub mod parking;
pub mod notify;
pub mod affinity;
pub mod handle;
pub mod launcher;
pub mod job;
pub mod completion;
pub mod worker;
pub mod pool;
pub mod engine;

// Re-exports
pub use config::PoolConfig;
pub use engine::{JobEngine, PoolStats};
pub use handle::{ExternalJob, NativeWaitable, ProcessHandle};
pub use job::JobRequest;
pub use affinity::detect_topology;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
    } else {
        compile_error!("Unsupported platform");
    }
}
