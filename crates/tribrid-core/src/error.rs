//! Typed error taxonomy shared by every core component.
//!
//! The app crate converts these into `anyhow::Error` or HTTP status codes
//! at its boundaries; core logic always returns `CoreError` so callers can
//! match on kind (e.g. to decide whether a leg failure is recoverable).

use thiserror::Error;

/// The five error kinds named by the error-handling design.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Validation failure, unknown corpus, embedding dimension mismatch.
    /// Surfaced to callers as HTTP 4xx; never recovered from silently.
    #[error("config error: {0}")]
    Config(String),

    /// An optional backend/extension is missing (BM25 extension, model
    /// cache, unsupported offset mapping). Optional legs are skipped;
    /// required ones turn this into a failed request.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// 429/5xx from an upstream chat provider. Retryable with backoff.
    #[error("transient remote error: {0}")]
    TransientRemote(String),

    /// Cancelled or timed out mid-stream. Never retried.
    #[error("cancelled or timed out: {0}")]
    Cancelled(String),

    /// An invariant was violated (token offset out of bounds, degenerate
    /// token ids). Always surfaced verbatim, never masked.
    #[error("fatal invariant violation: {0}")]
    Fatal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }
}
