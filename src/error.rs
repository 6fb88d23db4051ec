//! Error types for fetching and caching
//!
//! Fetch errors are classified by where they happen:
//! - Before I/O: empty batch, duplicate plot ids, malformed params
//! - Transport: network failures, non-success statuses, bad JSON
//! - Runtime: a fan-out task panicked or was cancelled

use thiserror::Error;

/// Errors raised while resolving a batch of descriptors
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("No data received")]
    NoData,

    #[error("Duplicate plot id in request list: {0}")]
    DuplicatePlotId(String),

    #[error("Invalid query params for {plot_id}: {reason}")]
    InvalidParams { plot_id: String, reason: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Fetch task failed: {0}")]
    TaskFailed(String),
}

impl FetchError {
    /// Returns true if a later refetch may succeed without any change on our side
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::TaskFailed(_) => true,
            FetchError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Errors raised by the response cache
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to serialize payload for size estimation: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Entry of {size} bytes exceeds the cache budget of {budget} bytes")]
    Oversized { size: u64, budget: u64 },
}
