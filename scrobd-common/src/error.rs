//! Common error types for scrobd

use thiserror::Error;

/// Common result type for scrobd operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the scrobd workspace
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Event payload carries no usable media identity; the event is dropped
    #[error("Missing media identity: {0}")]
    MissingIdentity(String),

    /// Stored import undo log cannot be parsed; undo is aborted whole
    #[error("Undo log corrupt for import {0}")]
    UndoLogCorrupt(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
