//! Error taxonomy for the fetch → extract pipeline
//!
//! Network-class errors are retried inside the fetcher before they surface
//! here; everything else is reported once as a failed result entry for the
//! (product, site) pair. None of these abort a batch.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("network failure for {url} after {attempts} attempt(s): {cause}")]
    NetworkFailure {
        url: String,
        attempts: u32,
        cause: String,
    },

    #[error("blocked by origin (403) for {url} after {attempts} attempt(s)")]
    BlockedByOrigin { url: String, attempts: u32 },

    #[error("rate limited (429) for {url} after {attempts} attempt(s)")]
    RateLimited { url: String, attempts: u32 },

    #[error("no price found on {site} page after {tried} strategies")]
    NoPriceFound { site: String, tried: usize },

    #[error("unsupported site: {0}")]
    UnsupportedSite(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("scrape cancelled")]
    Cancelled,

    #[error("scrape task aborted: {0}")]
    TaskAborted(String),
}

impl ScrapeError {
    /// Network-class failures the fetcher retries locally
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkFailure { .. } | Self::BlockedByOrigin { .. } | Self::RateLimited { .. }
        )
    }

    /// Stable label used in result entries and logs
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NetworkFailure { .. } => "network_failure",
            Self::BlockedByOrigin { .. } => "blocked_by_origin",
            Self::RateLimited { .. } => "rate_limited",
            Self::NoPriceFound { .. } => "no_price_found",
            Self::UnsupportedSite(_) => "unsupported_site",
            Self::Configuration(_) => "configuration_error",
            Self::Cancelled => "cancelled",
            Self::TaskAborted(_) => "task_aborted",
        }
    }
}

pub type ScrapeResult<T> = Result<T, ScrapeError>;
