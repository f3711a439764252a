use crate::process::ExitKind;
use thiserror::Error;

/// Main error type for the core process pool
#[derive(Debug, Error)]
pub enum CorePoolError {
    // Process-related errors
    #[error("Command line is empty")]
    EmptyCommand,

    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("{name} exits too fast (exit code: {exit})")]
    ExitsTooFast { name: String, exit: ExitKind },

    #[error("Failed to wait for process: {0}")]
    WaitError(String),

    #[error("Restart callback of {name} panicked: {message}")]
    CallbackPanicked { name: String, message: String },

    #[error("Supervisor has been shut down")]
    SupervisorClosed,

    #[error("Signal error: {0}")]
    SignalError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Log-related errors
    #[error("Log error: {0}")]
    LogError(String),

    #[error("Failed to open log file: {0}")]
    LogFileError(String),

    #[error("Log rotation failed: {0}")]
    LogRotationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for core pool operations
pub type Result<T> = std::result::Result<T, CorePoolError>;
