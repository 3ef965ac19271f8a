//! Exit result of a finished job

use crate::constants::{EXIT_LAUNCH_FAILED, EXIT_WAIT_FAILED, SIGNAL_EXIT_BASE};
use core::fmt;

/// Outcome of a job as observed by `try_wait`
///
/// Every job produces exactly one of these, including jobs that could not be
/// started or whose wait failed. Those carry reserved exit codes
/// (`EXIT_LAUNCH_FAILED`, `EXIT_WAIT_FAILED`) so callers have a single
/// failure channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitResult {
    pub exit_code: i32,
    pub signal: Option<i32>,
    pub core_dumped: bool,
}

impl ExitResult {
    /// Normal process exit
    pub const fn exited(code: i32) -> Self {
        Self { exit_code: code, signal: None, core_dumped: false }
    }

    /// Death by signal; exit code follows the shell's 128+N convention
    pub const fn signaled(signal: i32, core_dumped: bool) -> Self {
        Self {
            exit_code: SIGNAL_EXIT_BASE + signal,
            signal: Some(signal),
            core_dumped,
        }
    }

    /// Cancelled before the process was ever started
    pub const fn cancelled(signal: i32) -> Self {
        Self::signaled(signal, false)
    }

    /// The OS refused to create the process
    pub const fn launch_failed() -> Self {
        Self::exited(EXIT_LAUNCH_FAILED)
    }

    /// Waiting for the process failed
    pub const fn wait_failed() -> Self {
        Self::exited(EXIT_WAIT_FAILED)
    }

    #[inline]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0 && self.signal.is_none()
    }
}

impl fmt::Display for ExitResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signal {
            Some(sig) if self.core_dumped => write!(f, "killed by signal {} (core dumped)", sig),
            Some(sig) => write!(f, "killed by signal {}", sig),
            None => write!(f, "exit code {}", self.exit_code),
        }
    }
}
