//! Error types for the unsubscribe engine.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Errors raised while turning a raw message into unsubscribe metadata.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Message could not be parsed as RFC 5322")]
    Unparseable,

    #[error("Message is empty")]
    Empty,
}

/// Transport-level failures of a single unsubscribe request.
///
/// These never propagate out of an executor. They are carried as data in a
/// transport result and end up in the outcome record's `error` text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("Connection to {url} failed: {reason}")]
    Connect { url: String, reason: String },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Failed to read response body from {url}: {reason}")]
    Body { url: String, reason: String },

    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
