use serde::{Deserialize, Serialize};

/// Machine-readable problem description (RFC 7807 shape) attached to
/// client-facing idempotency failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
}

impl ProblemDetails {
    pub fn key_validation(detail: impl Into<String>) -> Self {
        Self {
            problem_type: "urn:idempotency:key-validation".to_string(),
            title: "Idempotency key is required".to_string(),
            status: 400,
            detail: detail.into(),
        }
    }

    pub fn fingerprint_mismatch(detail: impl Into<String>) -> Self {
        Self {
            problem_type: "urn:idempotency:fingerprint-mismatch".to_string(),
            title: "Idempotency key reused with a different request".to_string(),
            status: 400,
            detail: detail.into(),
        }
    }
}

/// Errors surfaced by the idempotency engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The idempotency key header is required but absent or empty.
    /// Recovered at the boundary into a 4xx response; the handler never runs.
    #[error("{detail}")]
    KeyValidation {
        detail: String,
        problem: Option<ProblemDetails>,
    },

    /// The key was reused with a different request fingerprint.
    #[error("{}", .0.detail)]
    FingerprintMismatch(ProblemDetails),

    /// The per-key lock (or the in-flight record it guards) could not be
    /// acquired within the configured timeout.
    #[error("failed to acquire idempotency lock: {0}")]
    LockAcquisition(String),

    /// Capture/replay encoding failed. Best-effort paths only: never blocks
    /// the real response from reaching the caller.
    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Opaque cache or lock backend failure.
    #[error("cache backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// HTTP status for errors that are recovered into client responses.
    pub fn client_status(&self) -> Option<u16> {
        match self {
            EngineError::KeyValidation { problem, .. } => {
                Some(problem.as_ref().map(|p| p.status).unwrap_or(400))
            }
            EngineError::FingerprintMismatch(problem) => Some(problem.status),
            _ => None,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.client_status().is_some()
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
