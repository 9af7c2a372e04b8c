//! The error taxonomy from spec.md §7.
//!
//! Every fallible operation in the crawl engine returns one of these
//! variants so callers can apply the propagation policy explicitly
//! (retry locally, return work to the frontier, or treat the run as
//! fatal) instead of matching on ambient `anyhow` chains.

use thiserror::Error;

/// Tagged result of any operation in the crawl pipeline.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// HTTP 401. Fatal for the run; the caller exits with code 2.
    #[error("authentication expired")]
    AuthExpired,

    /// HTTP 429 or 5xx. Retried by the rate controller up to
    /// `max_retries`, then demoted to `PermanentFailure` for the batch.
    #[error("throttled (retry_after={retry_after_secs:?})")]
    Throttled { retry_after_secs: Option<u64> },

    /// Network or timeout error. Retried with exponential backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// 4xx other than 401/429, or retries exhausted. The affected PIDs
    /// are returned to the frontier; the iteration continues.
    #[error("permanent failure: {0}")]
    PermanentFailure(String),

    /// A response body failed to parse. The affected record is
    /// skipped; its PIDs are treated as a permanent failure.
    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    /// A store invariant (§3) was found violated. Fatal; the caller
    /// exits with code 3.
    #[error("store integrity violation: {0}")]
    StoreIntegrity(String),

    /// Cooperative unwind requested by the control plane (pause/stop).
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CrawlError {
    /// Whether this error should demote a batch's PIDs back to the
    /// frontier and let the iteration proceed (§7 propagation policy),
    /// as opposed to aborting the whole run.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CrawlError::AuthExpired | CrawlError::StoreIntegrity(_)
        )
    }

    /// Process exit code per spec.md §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            CrawlError::AuthExpired => 2,
            CrawlError::StoreIntegrity(_) => 3,
            CrawlError::Cancelled => 0,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, CrawlError>;
