//! Pool configuration
//!
//! Defaults, environment overrides and a builder, validated before the
//! engine is created.
//!
//! # Environment Variables
//!
//! - `MKJOBS_JOB_SLOTS` - parallel job slots (`-j`), 0 means unlimited
//! - `MAKELEVEL` - nesting depth of the current build
//! - `MKJOBS_MAX_WORKERS` - absolute worker ceiling
//! - `MKJOBS_CHILD_NICE` - niceness applied to launched children
//! - `MKJOBS_PIN_WORKERS` - pin each worker thread to its ideal CPU
//! - `MKJOBS_EXE_SUFFIX` - executable suffix tried before the bare name
//! - `MKJOBS_WORKER_STACK_KB` - worker thread stack size

use mkjobs_core::constants::MAX_WORKERS;
use mkjobs_core::env::{env_get, env_get_bool, env_get_opt, env_get_str};
use mkjobs_core::{kinfo, ConfigError};

/// Default values
pub mod defaults {
    pub const JOB_SLOTS: usize = 1;
    pub const MAX_WORKERS: usize = mkjobs_core::constants::MAX_WORKERS;
    pub const WORKER_STACK_SIZE: usize = 256 * 1024;
    pub const MIN_WORKER_STACK_SIZE: usize = 64 * 1024;
    pub const PIN_WORKERS: bool = false;
    pub const EXE_SUFFIX: &str = "";
}

/// Configuration for the worker pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Parallel job slots; 0 means unlimited
    pub job_slots: usize,

    /// Nesting depth of this build, used to offset worker placement
    pub nesting_depth: usize,

    /// Hard ceiling on worker threads
    pub max_workers: usize,

    /// Niceness for launched children
    pub child_nice: Option<i32>,

    /// Pin worker threads to a single CPU instead of their whole group
    pub pin_workers: bool,

    /// Suffix tried before the bare executable name
    pub exe_suffix: String,

    /// Worker thread stack size in bytes
    pub worker_stack_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            job_slots: defaults::JOB_SLOTS,
            nesting_depth: 0,
            max_workers: defaults::MAX_WORKERS,
            child_nice: None,
            pin_workers: defaults::PIN_WORKERS,
            exe_suffix: defaults::EXE_SUFFIX.to_string(),
            worker_stack_size: defaults::WORKER_STACK_SIZE,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden from the environment
    pub fn from_env() -> Self {
        Self {
            job_slots: env_get("MKJOBS_JOB_SLOTS", defaults::JOB_SLOTS),
            nesting_depth: env_get("MAKELEVEL", 0),
            max_workers: env_get("MKJOBS_MAX_WORKERS", defaults::MAX_WORKERS).min(MAX_WORKERS),
            child_nice: env_get_opt("MKJOBS_CHILD_NICE"),
            pin_workers: env_get_bool("MKJOBS_PIN_WORKERS", defaults::PIN_WORKERS),
            exe_suffix: env_get_str("MKJOBS_EXE_SUFFIX", defaults::EXE_SUFFIX),
            worker_stack_size: kib_to_bytes(env_get(
                "MKJOBS_WORKER_STACK_KB",
                defaults::WORKER_STACK_SIZE / 1024,
            )),
        }
    }

    pub fn job_slots(mut self, n: usize) -> Self {
        self.job_slots = n;
        self
    }

    pub fn nesting_depth(mut self, depth: usize) -> Self {
        self.nesting_depth = depth;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n.min(MAX_WORKERS);
        self
    }

    pub fn child_nice(mut self, nice: Option<i32>) -> Self {
        self.child_nice = nice;
        self
    }

    pub fn pin_workers(mut self, enable: bool) -> Self {
        self.pin_workers = enable;
        self
    }

    pub fn exe_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.exe_suffix = suffix.into();
        self
    }

    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = bytes;
        self
    }

    /// Number of workers the pool may grow to
    ///
    /// Unlimited slots fall back to `max_workers`; never less than one.
    pub fn worker_cap(&self) -> usize {
        let wanted = if self.job_slots == 0 { self.max_workers } else { self.job_slots };
        wanted.min(self.max_workers).max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue("max_workers must be at least 1"));
        }
        if self.max_workers > MAX_WORKERS {
            return Err(ConfigError::InvalidValue("max_workers exceeds MAX_WORKERS"));
        }
        if self.worker_stack_size < defaults::MIN_WORKER_STACK_SIZE {
            return Err(ConfigError::InvalidValue("worker_stack_size must be at least 64 KiB"));
        }
        if let Some(nice) = self.child_nice {
            if !(-20..=19).contains(&nice) {
                return Err(ConfigError::InvalidValue("child_nice must be in -20..=19"));
            }
        }
        if self.exe_suffix.contains(['/', '\0']) {
            return Err(ConfigError::InvalidValue("exe_suffix must not contain '/' or NUL"));
        }
        Ok(())
    }

    /// Log the effective configuration
    pub fn log(&self) {
        kinfo!(
            "pool config: slots={} cap={} depth={} nice={:?} pin={} suffix={:?} stack={}KiB",
            self.job_slots,
            self.worker_cap(),
            self.nesting_depth,
            self.child_nice,
            self.pin_workers,
            self.exe_suffix,
            self.worker_stack_size / 1024
        );
    }
}

/// Oversized values saturate and are left for the spawn to reject
fn kib_to_bytes(kib: usize) -> usize {
    kib.saturating_mul(1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PoolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_cap(), 1);
    }

    #[test]
    fn test_worker_cap() {
        assert_eq!(PoolConfig::new().job_slots(8).worker_cap(), 8);
        assert_eq!(PoolConfig::new().job_slots(0).worker_cap(), MAX_WORKERS);
        assert_eq!(PoolConfig::new().job_slots(0).max_workers(4).worker_cap(), 4);
        assert_eq!(PoolConfig::new().job_slots(1000).worker_cap(), MAX_WORKERS);
    }

    #[test]
    fn test_builder_clamps_max_workers() {
        let config = PoolConfig::new().max_workers(10_000);
        assert_eq!(config.max_workers, MAX_WORKERS);
    }

    #[test]
    fn test_validate_rejects() {
        assert!(PoolConfig::new().max_workers(0).validate().is_err());
        assert!(PoolConfig::new().worker_stack_size(4096).validate().is_err());
        assert!(PoolConfig::new().child_nice(Some(40)).validate().is_err());
        assert!(PoolConfig::new().exe_suffix("a/b").validate().is_err());
        assert!(PoolConfig::new().child_nice(Some(10)).validate().is_ok());
    }

    #[test]
    fn test_stack_kib_saturates() {
        assert_eq!(kib_to_bytes(256), 256 * 1024);
        assert_eq!(kib_to_bytes(usize::MAX), usize::MAX);
        assert_eq!(kib_to_bytes(usize::MAX / 1024 + 1), usize::MAX);
    }

    #[test]
    fn test_from_env_oversized_stack() {
        std::env::set_var("MKJOBS_WORKER_STACK_KB", usize::MAX.to_string());
        let config = PoolConfig::from_env();
        std::env::remove_var("MKJOBS_WORKER_STACK_KB");
        assert_eq!(config.worker_stack_size, usize::MAX);
    }
}
