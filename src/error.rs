// SYNOID Repurpose - Error Taxonomy
// Copyright (c) 2026 Xing_The_Creator | SYNOID

use std::time::Duration;

use crate::agent::pipeline::RunStage;

/// Failure of a call to an external model service (judgment, embedding, vision, transcription).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("rate limited by provider (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    InvalidResponse(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Rate limits, timeouts, transport hiccups and 5xx answers are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ServiceError::RateLimited { .. } | ServiceError::Timeout | ServiceError::Transport(_) => true,
            ServiceError::Http { status, .. } => *status >= 500,
            ServiceError::InvalidResponse(_) | ServiceError::Unavailable(_) => false,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout
        } else if e.is_decode() {
            ServiceError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            ServiceError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            ServiceError::Transport(e.to_string())
        }
    }
}

/// Safeguard trip: a rewrite carried content that the retrieved context does not support.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct GroundingViolation {
    pub reason: String,
}

impl GroundingViolation {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed scene or transcript input. Fatal before any alignment output.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid chunking, retrieval or runtime parameters. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    #[error("grounding violation: {0}")]
    Grounding(#[from] GroundingViolation),

    #[error("run cancelled during {0:?}")]
    Cancelled(RunStage),

    #[error("illegal stage transition {from:?} -> {to:?}")]
    Stage { from: RunStage, to: RunStage },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
