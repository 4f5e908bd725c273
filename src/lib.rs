//! Price Tracker - price extraction and scrape orchestration for UK catering supply sites
//!
//! Fetches product pages with browser-like headers and retries, extracts
//! prices through per-site strategy cascades, and fans products out across
//! sites under a shared concurrency limit.

// Module declarations
pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod test_utils;

pub use application::{ScrapeManager, ScrapeManagerBuilder};
pub use domain::{
    ExtractionResult, HealthReport, HealthStatus, PriceCandidate, PriceKind, Product, ProductId,
    SiteResults, SiteScrapeResult,
};
pub use infrastructure::{AppConfig, FetchResult, Fetcher, ScrapeError, ScrapeResult};
