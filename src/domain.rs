//! Domain module - Core price tracking entities
//!
//! Pure data types shared by the fetcher, the extraction pipeline and the
//! scrape manager. Nothing in here performs I/O.
//!
//! Modern Rust module organization (Rust 2018+ style):
//! - Each module is its own file in the domain/ directory
//! - Public exports are defined here for convenience

pub mod price;
pub mod product;
pub mod scrape;
pub mod site;

pub use price::{
    CURRENCY_GBP, ExtractionResult, PriceCandidate, PriceChange, PriceDirection, PriceKind,
    calculate_price_change, format_price, lowest_candidate,
};
pub use product::{Product, ProductId};
pub use scrape::{
    GroupedResults, HealthReport, HealthStatus, InvalidTransition, ScrapeStage, ScrapeTask,
    SiteReachability, SiteResults, SiteScrapeResult, TaskState, group_results_by_status,
};
pub use site::{SelectorSet, SiteKind, SiteProfile, detect_site};
