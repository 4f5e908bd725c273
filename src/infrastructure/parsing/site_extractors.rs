//! Per-site extraction profiles
//!
//! Every supported site gets its own `SiteExtractor` built from its profile's
//! selectors (configured lists override the built-in ones). Sites without a
//! dedicated profile are served by `GenericExtractor`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use scraper::Selector;
use tracing::{debug, info};

use crate::domain::{
    ExtractionResult, PriceCandidate, PriceKind, SelectorSet, SiteKind, SiteProfile,
};

use super::config::{ADD_TO_BASKET_SELECTOR, UNAVAILABLE_PHRASES, default_selectors};
use super::page::{CompiledSelector, PageDocument, compile_selectors, element_text};
use super::price_parser::ParseOptions;
use super::special_offer::SpecialOfferDetector;
use super::strategy::{
    PriceStrategy, RegexTextStrategy, SelectorStrategy, SpecialOfferStrategy, run_cascade,
};

static ADD_TO_BASKET: Lazy<Selector> =
    Lazy::new(|| Selector::parse(ADD_TO_BASKET_SELECTOR).expect("valid add-to-basket selector"));

/// Extra wording the AtoZ storefront uses instead of "out of stock"
const ATOZ_UNAVAILABLE_PHRASES: &[&str] = &["contact us for availability"];

/// Extraction capability shared by all site profiles
pub trait SiteExtractor: Send + Sync + fmt::Debug {
    fn site_name(&self) -> &str;

    /// Number of price strategies in this profile's cascade
    fn strategy_count(&self) -> usize;

    fn extract_price(&self, page: &PageDocument) -> Option<PriceCandidate>;

    fn extract_title(&self, page: &PageDocument) -> Option<String>;

    fn extract_availability(&self, page: &PageDocument) -> bool;

    fn extract(&self, page: &PageDocument) -> ExtractionResult {
        let mut result = ExtractionResult::empty(self.site_name());
        if let Some(candidate) = self.extract_price(page) {
            info!(
                "Extracted {} price £{} via '{}'",
                self.site_name(),
                candidate.value,
                candidate.source_label
            );
            result.price = Some(candidate.value);
            result.price_source = Some(candidate.source_label);
        }
        result.title = self.extract_title(page);
        result.availability = self.extract_availability(page);
        result
    }

    /// Parse `body` and extract in one synchronous step
    fn extract_html(&self, body: &str) -> ExtractionResult {
        self.extract(&PageDocument::parse(body))
    }
}

/// Selectors and strategies every profile carries
#[derive(Debug)]
struct ProfileParts {
    site_name: String,
    strategies: Vec<Box<dyn PriceStrategy>>,
    title: Vec<CompiledSelector>,
    availability: Vec<CompiledSelector>,
}

impl ProfileParts {
    fn new(
        site_name: &str,
        selectors: &SelectorSet,
        strategies: Vec<Box<dyn PriceStrategy>>,
    ) -> Self {
        Self {
            site_name: site_name.to_string(),
            strategies,
            title: compile_selectors(&selectors.title),
            availability: compile_selectors(&selectors.availability),
        }
    }

    fn price(&self, page: &PageDocument) -> Option<PriceCandidate> {
        let found = run_cascade(&self.strategies, page);
        if found.is_none() {
            debug!(
                "No price on {} page after {} strategies",
                self.site_name,
                self.strategies.len()
            );
        }
        found
    }

    /// First matching title element with non-empty text, whitespace-collapsed
    fn title(&self, page: &PageDocument) -> Option<String> {
        self.title.iter().find_map(|compiled| {
            page.html()
                .select(&compiled.selector)
                .map(element_text)
                .find(|text| !text.is_empty())
        })
    }

    /// Phrase check scoped to the first matching availability element
    fn availability_from_selectors(&self, page: &PageDocument) -> bool {
        page.first_match(&self.availability)
            .is_none_or(|(element, _)| !mentions_unavailable(&element_text(element), &[]))
    }
}

fn mentions_unavailable(text: &str, extra: &[&str]) -> bool {
    let lower = text.to_lowercase();
    UNAVAILABLE_PHRASES
        .iter()
        .chain(extra)
        .any(|phrase| lower.contains(phrase))
}

fn price_selectors(
    label: &str,
    raw: &[String],
    options: ParseOptions,
    kind: PriceKind,
) -> Box<dyn PriceStrategy> {
    Box::new(SelectorStrategy::new(label, compile_selectors(raw), options, kind))
}

/// Wholesaler rendering `Collection:£X … Delivery:£Y` side by side
#[derive(Debug)]
pub struct JjFoodserviceExtractor {
    parts: ProfileParts,
}

impl JjFoodserviceExtractor {
    pub fn new(site_name: &str, selectors: &SelectorSet) -> Self {
        let strategies = vec![
            Box::new(RegexTextStrategy::delivery()) as Box<dyn PriceStrategy>,
            price_selectors(
                "jj-price-selectors",
                &selectors.price,
                ParseOptions::prefer_delivery(),
                PriceKind::Regular,
            ),
        ];
        Self {
            parts: ProfileParts::new(site_name, selectors, strategies),
        }
    }
}

impl SiteExtractor for JjFoodserviceExtractor {
    fn site_name(&self) -> &str {
        &self.parts.site_name
    }

    fn strategy_count(&self) -> usize {
        self.parts.strategies.len()
    }

    fn extract_price(&self, page: &PageDocument) -> Option<PriceCandidate> {
        self.parts.price(page)
    }

    fn extract_title(&self, page: &PageDocument) -> Option<String> {
        self.parts.title(page)
    }

    fn extract_availability(&self, page: &PageDocument) -> bool {
        !mentions_unavailable(page.visible_text(), &[])
    }
}

/// Wholesaler whose "offer" price is the collection price
#[derive(Debug)]
pub struct AtozCateringExtractor {
    parts: ProfileParts,
}

impl AtozCateringExtractor {
    pub fn new(site_name: &str, selectors: &SelectorSet) -> Self {
        let strategies = vec![
            Box::new(RegexTextStrategy::delivery()) as Box<dyn PriceStrategy>,
            price_selectors(
                "atoz-delivery-selectors",
                &selectors.delivery_price,
                ParseOptions::prefer_delivery(),
                PriceKind::DeliveryPrice,
            ),
            price_selectors(
                "atoz-offer-selectors",
                &selectors.special_offer,
                ParseOptions::default(),
                PriceKind::CollectionPrice,
            ),
            price_selectors(
                "atoz-price-selectors",
                &selectors.price,
                ParseOptions::default(),
                PriceKind::Regular,
            ),
        ];
        Self {
            parts: ProfileParts::new(site_name, selectors, strategies),
        }
    }
}

impl SiteExtractor for AtozCateringExtractor {
    fn site_name(&self) -> &str {
        &self.parts.site_name
    }

    fn strategy_count(&self) -> usize {
        self.parts.strategies.len()
    }

    fn extract_price(&self, page: &PageDocument) -> Option<PriceCandidate> {
        self.parts.price(page)
    }

    fn extract_title(&self, page: &PageDocument) -> Option<String> {
        self.parts.title(page)
    }

    /// Unavailable on explicit wording, or when there is no basket button
    /// and an out-of-stock marker is present.
    fn extract_availability(&self, page: &PageDocument) -> bool {
        if mentions_unavailable(page.visible_text(), ATOZ_UNAVAILABLE_PHRASES) {
            return false;
        }
        let can_add_to_basket = page.html().select(&ADD_TO_BASKET).next().is_some();
        can_add_to_basket || !page.any_match(&self.parts.availability)
    }
}

/// Marketplace with deal and strike-through pricing
#[derive(Debug)]
pub struct AmazonUkExtractor {
    parts: ProfileParts,
}

impl AmazonUkExtractor {
    pub fn new(site_name: &str, selectors: &SelectorSet) -> Self {
        let detector = SpecialOfferDetector::new(compile_selectors(&selectors.special_offer));
        let strategies = vec![
            Box::new(SpecialOfferStrategy::new(detector)) as Box<dyn PriceStrategy>,
            price_selectors(
                "amazon-price-selectors",
                &selectors.price,
                ParseOptions::default(),
                PriceKind::Regular,
            ),
        ];
        Self {
            parts: ProfileParts::new(site_name, selectors, strategies),
        }
    }
}

impl SiteExtractor for AmazonUkExtractor {
    fn site_name(&self) -> &str {
        &self.parts.site_name
    }

    fn strategy_count(&self) -> usize {
        self.parts.strategies.len()
    }

    fn extract_price(&self, page: &PageDocument) -> Option<PriceCandidate> {
        self.parts.price(page)
    }

    fn extract_title(&self, page: &PageDocument) -> Option<String> {
        self.parts.title(page)
    }

    fn extract_availability(&self, page: &PageDocument) -> bool {
        self.parts.availability_from_selectors(page)
    }
}

/// Fallback for sites without a dedicated profile
#[derive(Debug)]
pub struct GenericExtractor {
    parts: ProfileParts,
}

impl GenericExtractor {
    pub fn new(site_name: &str, selectors: &SelectorSet) -> Self {
        let strategies = vec![price_selectors(
            "generic-price-selectors",
            &selectors.price,
            ParseOptions::default(),
            PriceKind::Regular,
        )];
        Self {
            parts: ProfileParts::new(site_name, selectors, strategies),
        }
    }
}

impl SiteExtractor for GenericExtractor {
    fn site_name(&self) -> &str {
        &self.parts.site_name
    }

    fn strategy_count(&self) -> usize {
        self.parts.strategies.len()
    }

    fn extract_price(&self, page: &PageDocument) -> Option<PriceCandidate> {
        self.parts.price(page)
    }

    fn extract_title(&self, page: &PageDocument) -> Option<String> {
        self.parts.title(page)
    }

    fn extract_availability(&self, page: &PageDocument) -> bool {
        self.parts.availability_from_selectors(page)
    }
}

/// Build the extractor for a profile, merging its selectors over the built-in ones
pub fn extractor_for(profile: &SiteProfile) -> Arc<dyn SiteExtractor> {
    let kind = profile.kind();
    let selectors = profile.selectors.or_defaults(&default_selectors(kind));
    let name = profile.name.as_str();
    match kind {
        SiteKind::JjFoodservice => Arc::new(JjFoodserviceExtractor::new(name, &selectors)),
        SiteKind::AtozCatering => Arc::new(AtozCateringExtractor::new(name, &selectors)),
        SiteKind::AmazonUk => Arc::new(AmazonUkExtractor::new(name, &selectors)),
        SiteKind::Generic => Arc::new(GenericExtractor::new(name, &selectors)),
    }
}

/// Site name → extractor table, built once at startup
#[derive(Debug, Default, Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn SiteExtractor>>,
}

impl ExtractorRegistry {
    pub fn from_profiles<'a>(profiles: impl IntoIterator<Item = &'a SiteProfile>) -> Self {
        let extractors = profiles
            .into_iter()
            .map(|profile| (profile.name.clone(), extractor_for(profile)))
            .collect();
        Self { extractors }
    }

    pub fn get(&self, site_name: &str) -> Option<Arc<dyn SiteExtractor>> {
        self.extractors.get(site_name).cloned()
    }

    /// Registered extractor, or a generic one using built-in selectors
    pub fn get_or_generic(&self, site_name: &str) -> Arc<dyn SiteExtractor> {
        self.get(site_name).unwrap_or_else(|| {
            Arc::new(GenericExtractor::new(
                site_name,
                &default_selectors(SiteKind::Generic),
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn profile(name: &str) -> SiteProfile {
        SiteProfile {
            name: name.to_string(),
            base_url: String::new(),
            enabled: true,
            selectors: SelectorSet::default(),
        }
    }

    #[test]
    fn jj_prefers_delivery_over_collection_in_selectors() {
        let extractor = extractor_for(&profile("jjfoodservice"));
        let result = extractor.extract_html(
            r#"<h1>Back Bacon</h1><span class="price">Collection: £10.49</span>"#,
        );
        assert_eq!(result.price, None);
        assert_eq!(result.title.as_deref(), Some("Back Bacon"));
    }

    #[test]
    fn atoz_falls_back_to_offer_price_then_generic() {
        let extractor = extractor_for(&profile("atoz_catering"));
        let offer = extractor.extract_html(
            r#"<span class="price-offer">£8.75</span><span class="price">£9.50</span>"#,
        );
        assert_eq!(offer.price, Some(Decimal::new(875, 2)));
        assert_eq!(offer.price_source.as_deref(), Some(".price-offer"));

        let generic = extractor.extract_html(r#"<span class="selling-price">£9.50</span>"#);
        assert_eq!(generic.price, Some(Decimal::new(950, 2)));
    }

    #[test]
    fn atoz_availability_rules() {
        let extractor = extractor_for(&profile("atoz_catering"));
        let page = PageDocument::parse(r#"<div class="out-of-stock"></div><p>£9.50</p>"#);
        assert!(!extractor.extract_availability(&page));

        let page = PageDocument::parse(
            r#"<div class="out-of-stock"></div><button class="add-to-basket">Add To Basket</button>"#,
        );
        assert!(extractor.extract_availability(&page));

        let page = PageDocument::parse("<p>Please contact us for availability</p>");
        assert!(!extractor.extract_availability(&page));
    }

    #[test]
    fn amazon_availability_is_scoped_to_the_availability_block() {
        let extractor = extractor_for(&profile("amazon_uk"));
        let in_stock = PageDocument::parse(
            r#"<div id="availability"><span>In stock</span></div><p>Other sellers: currently unavailable</p>"#,
        );
        assert!(extractor.extract_availability(&in_stock));

        let gone = PageDocument::parse(
            r#"<div id="availability"><span>Currently unavailable.</span></div>"#,
        );
        assert!(!extractor.extract_availability(&gone));
    }

    #[test]
    fn unknown_site_uses_generic_extractor() {
        let registry = ExtractorRegistry::from_profiles(&[profile("jjfoodservice")]);
        assert_eq!(registry.len(), 1);
        let generic = registry.get_or_generic("tesco");
        assert_eq!(generic.site_name(), "tesco");
        assert_eq!(generic.strategy_count(), 1);
        let result = generic.extract_html(
            r#"<del>£20.00</del><span itemprop="price">£15.00</span><div class="stock">Sold out</div>"#,
        );
        assert_eq!(result.price, Some(Decimal::new(1500, 2)));
        assert!(!result.availability);
    }
}
