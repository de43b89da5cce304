//! Common error types for the empire services

use thiserror::Error;

/// Common result type for empire operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across empire engines and services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation conflicts with the current state of a resource
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A table an engine depends on is missing
    #[error("Schema verification failed: table '{table}' is missing. Run `empire-admin deploy-schema`.")]
    SchemaVerification { table: String },

    /// Encryption or decryption failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map a UNIQUE constraint violation to [`Error::Conflict`], anything else to [`Error::Database`]
    pub fn from_unique_violation(err: sqlx::Error, message: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Error::Conflict(message.into())
            }
            _ => Error::Database(err),
        }
    }
}
