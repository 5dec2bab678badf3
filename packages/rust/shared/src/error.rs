//! Error types for newscrawl.
//!
//! Library crates use [`NewsCrawlError`] and the per-item error kinds via
//! `thiserror`. The CLI wraps these with `color-eyre` for rich diagnostics.
//!
//! Per-item failures ([`FetchError`], [`ParseError`], benign [`StoreError`]s)
//! are isolated by the pipeline and only ever show up as summary counts.
//! [`NewsCrawlError::Config`] and a lost store connection are the two classes
//! that end a run early.

use std::path::PathBuf;

use crate::types::RunSummary;

/// Transport-level failure for a single URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The request did not complete within the per-item timeout.
    #[error("request timed out")]
    Timeout,

    /// Connection refused, reset, or DNS failure.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered with a non-2xx status.
    #[error("HTTP status {0}")]
    HttpStatus(u16),

    /// The response body could not be read.
    #[error("body read failed: {0}")]
    Body(String),

    /// Any other request failure reported by the HTTP client.
    #[error("request failed: {0}")]
    Request(String),

    /// The URL could not be parsed or is not http(s).
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// A parser plugin could not extract an article from a document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot parse {url}: {message}")]
pub struct ParseError {
    /// Document URL.
    pub url: String,
    /// What did not match the expected structure.
    pub message: String,
}

impl ParseError {
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
        }
    }
}

/// Persistence failure kinds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store is unreachable; no further writes are possible.
    #[error("store connection lost: {0}")]
    ConnectionLost(String),

    /// A uniqueness index rejected the write (raced duplicate).
    #[error("unique constraint violated on {field}")]
    ConstraintViolation { field: String },

    /// The record is missing required fields.
    #[error("malformed record: {0}")]
    Malformed(String),
}

impl StoreError {
    /// Only a lost connection ends a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

/// Top-level error type for all newscrawl operations.
#[derive(Debug, thiserror::Error)]
pub enum NewsCrawlError {
    /// Configuration loading or validation error (fatal before a run starts).
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error outside the per-item fetch path (e.g. discovery).
    #[error("transport error: {0}")]
    Transport(#[from] FetchError),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A run was aborted by a fatal store error; carries the partial summary.
    #[error("run for '{}' aborted after {} persisted: {source}", .summary.source, .summary.persisted)]
    Aborted {
        summary: Box<RunSummary>,
        source: StoreError,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NewsCrawlError>;

impl NewsCrawlError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The partial summary of an aborted run, if this is one.
    pub fn partial_summary(&self) -> Option<&RunSummary> {
        match self {
            Self::Aborted { summary, .. } => Some(summary),
            _ => None,
        }
    }
}
