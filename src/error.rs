// src/error.rs
//! Error taxonomy shared by the pipeline stages.

use thiserror::Error;

/// Failure of a single vendor HTTP call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("{platform} API error: HTTP {status}")]
    Status { platform: String, status: u16 },

    #[error("{platform} transport error: {message}")]
    Transport { platform: String, message: String },

    #[error("{platform} returned malformed JSON: {message}")]
    Parse { platform: String, message: String },
}

impl FetchError {
    pub fn status(platform: impl Into<String>, status: u16) -> Self {
        Self::Status {
            platform: platform.into(),
            status,
        }
    }

    pub fn transport(platform: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            platform: platform.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(platform: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            platform: platform.into(),
            message: message.to_string(),
        }
    }

    /// HTTP status carried by the error, if the server answered at all.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Top-level pipeline errors. Never surfaced to the UI as-is: the orchestrator
/// converts them into an empty result plus a stored error record.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Non-2xx or transport failure on any HTTP call.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed JSON from a vendor or the LLM.
    #[error("parse error: {0}")]
    Parse(String),

    /// Missing or invalid configuration (e.g. API key).
    #[error("config error: {0}")]
    Config(String),

    /// Client-side polling exhausted.
    #[error("timed out after {polls} polls")]
    Timeout { polls: u32 },

    #[error("store error: {0}")]
    Store(String),

    /// The orchestrator task is gone.
    #[error("orchestrator channel closed")]
    Closed,
}

impl From<FetchError> for PipelineError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Parse { .. } => PipelineError::Parse(e.to_string()),
            other => PipelineError::Network(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        PipelineError::Store(format!("{e:#}"))
    }
}
