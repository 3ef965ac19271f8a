//! # mkjobs - parallel process launcher for build tools
//!
//! A build engine decides *what* to run; mkjobs runs it. Each job is handed
//! by pointer to a worker thread through a lock-free stack. The worker
//! resolves the executable, starts the process on its processor group,
//! waits for it and pushes the result to a single completion stack that
//! the engine drains.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mkjobs::{lifecycle, OwnerRef};
//!
//! fn main() -> mkjobs::Result<()> {
//!     lifecycle::init(4)?;
//!     let args = vec!["cc".to_string(), "-c".to_string(), "main.c".to_string()];
//!     lifecycle::submit_process(&args, None, "/bin/sh", OwnerRef(1))?;
//!     while let Some((_, result, owner)) = lifecycle::try_wait(true)? {
//!         println!("target {} finished: {}", owner.0, result);
//!     }
//!     lifecycle::shutdown()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Build engine                            │
//! │        submit_*(), cancel(), try_wait(), waitable           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ Box<JobDescriptor>
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkerPool                             │
//! │      claim idle worker / grow to cap / least loaded         │
//! └─────────────────────────────────────────────────────────────┘
//!          │                   │                   │
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Worker   │      │  Worker   │      │  Worker   │
//!    │ launch +  │      │ launch +  │      │ launch +  │
//!    │   wait    │      │   wait    │      │   wait    │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │     CompletionChannel: stack + pending + waitable fd    │
//!    └─────────────────────────────────────────────────────────┘
//! ```

pub mod lifecycle;

pub use lifecycle::OwnerRef;

pub use mkjobs_core::{
    constants, kdebug, kerror, kinfo, kprint, ktrace, kwarn, quote_args, split_command_line,
    CommandLine, ConfigError, EngineError, EnvBlock, ExitResult, JobError, JobId, LaunchError,
    QuoteDialect, Result, Topology,
};

pub use mkjobs_runtime::{
    detect_topology, ExternalJob, JobEngine, JobRequest, NativeWaitable, PoolConfig, PoolStats,
    ProcessHandle,
};
