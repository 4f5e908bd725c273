//! Infrastructure layer: configuration, logging, HTTP fetching and HTML parsing

pub mod config;
pub mod http_client;
pub mod logging;
pub mod parsing;
pub mod parsing_error;

pub use config::{AppConfig, LoggingConfig, ScrapingConfig, SiteProfileConfig};
pub use http_client::{
    FailureClass, FetchResult, Fetcher, ReqwestTransport, RetryPolicy, Transport, TransportError,
    TransportErrorKind, TransportResponse,
};
pub use parsing::{ExtractorRegistry, PageDocument, SiteExtractor};
pub use parsing_error::{ScrapeError, ScrapeResult};
