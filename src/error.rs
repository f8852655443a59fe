//! Error types for Prism.
//!
//! Defines the main error enum used throughout the crate. Errors are data:
//! they are returned and reported, never used for control flow.

use thiserror::Error;

/// Main error type for Prism operations.
#[derive(Error, Debug)]
pub enum PrismError {
    /// Connection errors (host unreachable, auth failed, malformed config).
    /// Fatal to the attempted connect; an existing connection is unaffected.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Catalog introspection errors, scoped to a single node expansion.
    #[error("Introspection error: {0}")]
    Introspection(String),

    /// Statement execution errors (syntax errors, missing relations, etc.).
    /// Halts the remaining statements of the same request.
    #[error("Query error: {0}")]
    Execution(String),

    /// The export destination has an extension no writer recognizes.
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    /// I/O failure while writing an export file. A partial file may remain.
    #[error("Write error: {0}")]
    Write(String),

    /// Configuration errors (invalid config file, missing required fields).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (unexpected states, bugs).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PrismError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates an introspection error with the given message.
    pub fn introspection(msg: impl Into<String>) -> Self {
        Self::Introspection(msg.into())
    }

    /// Creates an execution error with the given message.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Creates an unsupported-format error for the given extension.
    pub fn unsupported_format(ext: impl Into<String>) -> Self {
        Self::UnsupportedFormat(ext.into())
    }

    /// Creates a write error with the given message.
    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Introspection(_) => "Introspection Error",
            Self::Execution(_) => "Query Error",
            Self::UnsupportedFormat(_) => "Unsupported Format",
            Self::Write(_) => "Write Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

impl From<std::io::Error> for PrismError {
    fn from(e: std::io::Error) -> Self {
        Self::Write(e.to_string())
    }
}

/// Result type alias using PrismError.
pub type Result<T> = std::result::Result<T, PrismError>;
