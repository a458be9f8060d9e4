//! Typed errors for the extraction pipeline.
//!
//! `Validation`, `Fetch` and `Spawn` are returned synchronously from
//! [`Extractor::extract`](crate::Extractor::extract), before any stream exists.
//! `Engine`, `Cleanup` and `EngineAndCleanup` only ever arrive through the
//! completion signal of a [`StreamResult`](crate::StreamResult).

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while running an extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The request names no usable source
    #[error("{0}")]
    Validation(String),

    /// The source could not be fetched
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The engine process could not be started
    #[error("failed to start extraction engine: {0}")]
    Spawn(#[source] io::Error),

    /// The engine failed while streaming
    #[error("extraction engine failed: {0}")]
    Engine(#[from] EngineError),

    /// Releasing the request's resources failed
    #[error("cleanup failed: {0}")]
    Cleanup(#[from] CleanupError),

    /// Both the engine and the cleanup failed; the engine error is primary
    #[error("extraction engine failed: {engine}; cleanup also failed: {cleanup}")]
    EngineAndCleanup {
        engine: EngineError,
        cleanup: CleanupError,
    },

    /// `acquire` was called on a request that was already acquired
    #[error("extraction request source was already acquired")]
    AlreadyAcquired,

    /// The extraction was cancelled before the engine started
    #[error("extraction cancelled")]
    Cancelled,
}

/// Errors produced by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered outside the 2xx range. The body is never included.
    #[error("Status: {status_line}. Headers: {headers}")]
    Status { status_line: String, headers: String },

    /// The request could not be sent or the connection failed
    #[error("HTTP error: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A local path does not exist
    #[error("no such file: {path}")]
    NotFound { path: String },

    /// A local path exists but could not be opened
    #[error("failed to open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The source string is not something this transport can resolve
    #[error("invalid source: {source_str}")]
    InvalidSource { source_str: String },

    /// No response head arrived in time
    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),
}

impl FetchError {
    /// Creates a network error from any error type
    pub fn network<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Network(Box::new(error))
    }
}

/// Failures of the engine process after it was started.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine exited unsuccessfully
    #[error("{status}{}", detail_suffix(.detail))]
    Exit {
        status: ExitStatus,
        /// Last line the engine wrote to stderr, if any
        detail: Option<String>,
    },

    /// Copying the source into the engine's stdin failed
    #[error("feeding source to engine: {0}")]
    Feed(#[source] io::Error),

    /// Copying the engine's stdout into the result stream failed
    #[error("reading engine output: {0}")]
    Output(#[source] io::Error),

    /// Waiting on the engine process failed
    #[error("waiting for engine: {0}")]
    Wait(#[source] io::Error),

    /// The engine ran longer than the configured limit and was killed
    #[error("engine timed out after {0:?}")]
    TimedOut(Duration),

    /// The extraction was cancelled and the engine was killed
    #[error("cancelled")]
    Cancelled,

    /// The supervising task went away without publishing an outcome
    #[error("extraction task ended without reporting an outcome")]
    Abandoned,
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
}

/// A cleanup hook failed.
#[derive(Debug, Error)]
#[error("{hook}: {source}")]
pub struct CleanupError {
    /// Identifier of the hook that failed
    pub hook: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl CleanupError {
    pub fn new<E>(hook: impl Into<String>, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            hook: hook.into(),
            source: error.into(),
        }
    }
}

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Result type alias for transport operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;
