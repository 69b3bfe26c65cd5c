//! Typed errors for the external model boundaries and for turn failures.
//!
//! Storage traits keep returning `anyhow::Result`; the types here exist
//! where callers branch on the kind of failure.

use crate::booking::BookingError;

/// Failure talking to the chat or embedding provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider is disabled: {0}")]
    Disabled(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("request timed out")]
    Timeout,
}

/// Why a retrieval call failed.
///
/// Translation and query-expansion failures never surface here; they
/// fall back to the raw query inside the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] ProviderError),
    #[error("vector store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// A failure that ends the current dialogue turn.
///
/// The orchestrator turns every variant into an apology reply; none of
/// them reach the guest verbatim.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("chat provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("model answered with plain text {attempts} time(s) instead of calling a tool")]
    PlainText { attempts: u32 },
    #[error("tool loop exceeded {0} rounds without a respond call")]
    RoundsExhausted(u32),
    #[error("booking state error: {0}")]
    Booking(#[from] BookingError),
    #[error("storage error: {0}")]
    Storage(anyhow::Error),
}
