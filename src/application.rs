//! Application layer module
//!
//! Orchestrates fetching and extraction across sites and products.

pub mod scrape_manager;

pub use scrape_manager::{ScrapeManager, ScrapeManagerBuilder};
