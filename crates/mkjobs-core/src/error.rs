//! Error types for the mkjobs launcher
//!
//! Per-job failures never surface here: they are folded into the job's
//! `ExitResult`. These types cover setup (engine, configuration), request
//! validation and the launcher's internal plumbing.

use core::fmt;

/// Result of setup and lifecycle operations
pub type Result<T, E = EngineError> = core::result::Result<T, E>;

/// Setup and lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Lifecycle already initialized
    AlreadyInitialized,

    /// Lifecycle not initialized
    NotInitialized,

    /// Invalid configuration
    Config(ConfigError),

    /// The completion signal could not be created (errno)
    Notify(i32),

    /// A worker thread could not be spawned
    WorkerSpawn(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::AlreadyInitialized => write!(f, "job engine already initialized"),
            EngineError::NotInitialized => write!(f, "job engine not initialized"),
            EngineError::Config(e) => write!(f, "{}", e),
            EngineError::Notify(errno) => {
                write!(f, "cannot create completion signal: errno {}", errno)
            }
            EngineError::WorkerSpawn(msg) => write!(f, "cannot spawn worker thread: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        EngineError::Config(e)
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A job request that cannot be accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Job kind exists in the request vocabulary but has no executor
    UnsupportedKind(&'static str),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::UnsupportedKind(kind) => write!(f, "unsupported job kind: {}", kind),
        }
    }
}

impl std::error::Error for JobError {}

/// Why a process could not be launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// Empty argument vector or an argument with an embedded NUL
    InvalidArgument(&'static str),

    /// Neither the command nor the configured shell could be located
    ShellNotFound(String),

    /// The OS refused to create the process
    Spawn { errno: i32, command: String },
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            LaunchError::ShellNotFound(shell) => write!(f, "shell not found: {}", shell),
            LaunchError::Spawn { errno, command } => {
                write!(f, "cannot launch `{}`: errno {}", command, errno)
            }
        }
    }
}

impl std::error::Error for LaunchError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = EngineError::Config(ConfigError::InvalidValue("max_workers must be > 0"));
        assert_eq!(e.to_string(), "Invalid config: max_workers must be > 0");

        let e = LaunchError::Spawn { errno: 13, command: "./x".into() };
        assert_eq!(e.to_string(), "cannot launch `./x`: errno 13");

        assert_eq!(
            JobError::UnsupportedKind("builtin").to_string(),
            "unsupported job kind: builtin"
        );
    }

    #[test]
    fn test_error_conversion() {
        let e: EngineError = ConfigError::InvalidValue("x").into();
        assert!(matches!(e, EngineError::Config(ConfigError::InvalidValue("x"))));
    }
}
