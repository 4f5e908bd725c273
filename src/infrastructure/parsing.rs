//! HTML price extraction
//!
//! Pages are parsed once into a [`PageDocument`] and handed to the site's
//! [`SiteExtractor`], which runs an ordered cascade of [`PriceStrategy`]s and
//! extracts title and availability alongside.

pub mod config;
pub mod page;
pub mod price_parser;
pub mod site_extractors;
pub mod special_offer;
pub mod strategy;

pub use config::default_selectors;
pub use page::{CompiledSelector, PageDocument, compile_selectors};
pub use price_parser::{ParseOptions, find_amounts, parse_price};
pub use site_extractors::{
    AmazonUkExtractor, AtozCateringExtractor, ExtractorRegistry, GenericExtractor,
    JjFoodserviceExtractor, SiteExtractor, extractor_for,
};
pub use special_offer::{SpecialOfferDetector, find_special_offer_prices};
pub use strategy::{
    PriceStrategy, RegexTextStrategy, SelectorStrategy, SpecialOfferStrategy, run_cascade,
};
