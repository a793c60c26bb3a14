//! Unified error handling for the daemon.

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] syncer_core::ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] syncer_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    BadInput(#[from] serde_json::Error),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for the daemon.
pub type Result<T> = std::result::Result<T, AppError>;
