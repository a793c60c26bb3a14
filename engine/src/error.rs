//! Error types for the syncer engine.

use std::fmt;

use crate::{IndexName, ObjectKey};
use thiserror::Error;

/// Errors surfaced synchronously by the store and the queue.
///
/// These are programmer or configuration errors and are never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Index errors
    #[error("index function '{index}' failed for key '{key}': {reason}")]
    IndexFunc {
        index: IndexName,
        key: ObjectKey,
        reason: String,
    },

    #[error("index not found: {0}")]
    IndexNotFound(IndexName),

    #[error("indexer already registered: {0}")]
    AlreadyRegistered(IndexName),

    // Queue errors
    #[error("queue is shutting down")]
    QueueShutdown,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure returned by a sync handler.
///
/// Handler failures are retried by the queue-backed syncer and recorded in the
/// ledger; they never stop the syncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl fmt::Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<Error> for HandlerError {
    fn from(err: Error) -> Self {
        Self::new(err)
    }
}
