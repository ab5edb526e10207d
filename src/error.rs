//! Operation-level error taxonomy
//!
//! Every scrape, ingest and rehost operation reports failures as a
//! [`ScrapeError`]. Lower layers keep their own error enums (browser, fetch,
//! store, storage) and convert into this one at the operation boundary.

use crate::browser::BrowserError;
use crate::db::StoreError;
use crate::http_client::FetchError;
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("content not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("operation aborted")]
    Aborted,

    #[error("network error: {0}")]
    Network(String),

    /// The expected content marker never appeared. Usually an upstream layout change.
    #[error("content marker `{marker}` never appeared at {url}")]
    Structural { marker: String, url: String },

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("browser error: {0}")]
    Browser(BrowserError),

    /// A worker task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for ScrapeError {
    fn from(e: tokio::task::JoinError) -> Self {
        ScrapeError::Internal(e.to_string())
    }
}

impl ScrapeError {
    /// Timeouts, aborts and connection failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScrapeError::Timeout(_) | ScrapeError::Aborted | ScrapeError::Network(_)
        )
    }
}

impl From<BrowserError> for ScrapeError {
    fn from(e: BrowserError) -> Self {
        match e {
            BrowserError::Timeout(what) => ScrapeError::Timeout(what),
            BrowserError::NavigationError(msg) => ScrapeError::Network(msg),
            other => ScrapeError::Browser(other),
        }
    }
}

impl From<FetchError> for ScrapeError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::Timeout { .. } => ScrapeError::Timeout(e.to_string()),
            FetchError::Network { .. } | FetchError::Status { .. } => {
                ScrapeError::Network(e.to_string())
            }
        }
    }
}
