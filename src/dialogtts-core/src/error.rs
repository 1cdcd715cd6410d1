//! Error types for the dialogue synthesis system.

use std::path::PathBuf;

use thiserror::Error;

use crate::voice::{BackendKind, Gender};

#[derive(Error, Debug)]
pub enum DialogueError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No eligible voice for speaker '{speaker}' ({gender})")]
    Selection { speaker: String, gender: Gender },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DialogueError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a single call into a speech backend.
///
/// Every variant names the backend so a skipped line can be traced back to
/// the service that rejected it.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("[{backend}] backend unavailable: {message}")]
    Unavailable { backend: BackendKind, message: String },

    #[error("[{backend}] request failed{}: {message}", status_suffix(.status))]
    Request {
        backend: BackendKind,
        message: String,
        status: Option<u16>,
    },

    #[error("[{backend}] request timed out")]
    Timeout { backend: BackendKind },

    #[error("[{backend}] invalid voice parameters: {message}")]
    InvalidVoice { backend: BackendKind, message: String },

    #[error("[{backend}] unusable response: {message}")]
    Response { backend: BackendKind, message: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}

impl BackendError {
    /// Classify a transport error from reqwest.
    pub fn from_reqwest(backend: BackendKind, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout { backend }
        } else {
            Self::Request {
                backend,
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Unavailable { backend, .. }
            | Self::Request { backend, .. }
            | Self::Timeout { backend }
            | Self::InvalidVoice { backend, .. }
            | Self::Response { backend, .. } => *backend,
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Request { status, .. } => {
                status.is_some_and(|code| code >= 500 || code == 429)
            }
            _ => false,
        }
    }
}
