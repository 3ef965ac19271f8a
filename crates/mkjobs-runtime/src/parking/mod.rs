//! Worker wake signals
//!
//! Each worker owns one signal. It holds a single wake token: `notify`
//! sets it, `wait` consumes it, so a notify that lands before the worker
//! goes to sleep is never lost. Repeated notifies collapse into one token.

use std::time::Duration;

/// Per-worker sleep/wake primitive
pub trait WakeSignal: Send + Sync {
    /// Sleep until the token is set or the timeout expires
    ///
    /// Returns `true` if a token was consumed. Callers re-check for work
    /// either way.
    fn wait(&self, timeout: Option<Duration>) -> bool;

    /// Set the token and wake the waiter, if any
    fn notify(&self);
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexSignal as PlatformWakeSignal;
    } else {
        mod fallback;
        pub use fallback::CondvarSignal as PlatformWakeSignal;
    }
}
