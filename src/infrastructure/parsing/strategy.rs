//! Price strategies and the ordered cascade that runs them
//!
//! A site profile is an ordered list of strategies; the first one to produce a
//! candidate wins and the rest are skipped.

use std::fmt;

use regex::Regex;
use tracing::debug;

use crate::domain::{PriceCandidate, PriceKind};

use super::page::{CompiledSelector, PageDocument, element_text};
use super::price_parser::{DELIVERY_RE, ParseOptions, captured_amount, parse_price};
use super::special_offer::SpecialOfferDetector;

/// One way of locating a price on a page
pub trait PriceStrategy: Send + Sync + fmt::Debug {
    fn label(&self) -> &str;

    fn extract(&self, page: &PageDocument) -> Option<PriceCandidate>;
}

/// Scan the page's visible text with a regex whose first group is the amount
#[derive(Debug, Clone)]
pub struct RegexTextStrategy {
    label: String,
    pattern: Regex,
    kind: PriceKind,
}

impl RegexTextStrategy {
    pub fn new(label: impl Into<String>, pattern: Regex, kind: PriceKind) -> Self {
        Self {
            label: label.into(),
            pattern,
            kind,
        }
    }

    /// `Delivery: £NN.NN` anywhere in the page text
    pub fn delivery() -> Self {
        Self::new("delivery-text", DELIVERY_RE.clone(), PriceKind::DeliveryPrice)
    }
}

impl PriceStrategy for RegexTextStrategy {
    fn label(&self) -> &str {
        &self.label
    }

    fn extract(&self, page: &PageDocument) -> Option<PriceCandidate> {
        let text = page.visible_text();
        self.pattern
            .captures_iter(text)
            .find_map(|caps| captured_amount(text, &caps, 1))
            .map(|value| PriceCandidate::new(value, self.label.clone(), self.kind))
    }
}

/// First parseable element per selector, selectors tried in order
#[derive(Debug, Clone)]
pub struct SelectorStrategy {
    label: String,
    selectors: Vec<CompiledSelector>,
    options: ParseOptions,
    kind: PriceKind,
}

impl SelectorStrategy {
    pub fn new(
        label: impl Into<String>,
        selectors: Vec<CompiledSelector>,
        options: ParseOptions,
        kind: PriceKind,
    ) -> Self {
        Self {
            label: label.into(),
            selectors,
            options,
            kind,
        }
    }
}

impl PriceStrategy for SelectorStrategy {
    fn label(&self) -> &str {
        &self.label
    }

    fn extract(&self, page: &PageDocument) -> Option<PriceCandidate> {
        self.selectors.iter().find_map(|compiled| {
            page.html()
                .select(&compiled.selector)
                .find_map(|element| parse_price(&element_text(element), &self.options))
                .map(|value| PriceCandidate::new(value, compiled.raw.clone(), self.kind))
        })
    }
}

/// Lowest candidate reported by the special-offer detector
#[derive(Debug, Clone)]
pub struct SpecialOfferStrategy {
    detector: SpecialOfferDetector,
}

impl SpecialOfferStrategy {
    pub const fn new(detector: SpecialOfferDetector) -> Self {
        Self { detector }
    }
}

impl PriceStrategy for SpecialOfferStrategy {
    fn label(&self) -> &str {
        "special-offer"
    }

    fn extract(&self, page: &PageDocument) -> Option<PriceCandidate> {
        self.detector.best(page)
    }
}

/// Run strategies in order, stopping at the first candidate
pub fn run_cascade(
    strategies: &[Box<dyn PriceStrategy>],
    page: &PageDocument,
) -> Option<PriceCandidate> {
    for strategy in strategies {
        if let Some(candidate) = strategy.extract(page) {
            debug!(
                "Strategy '{}' found £{} via '{}'",
                strategy.label(),
                candidate.value,
                candidate.source_label
            );
            return Some(candidate);
        }
        debug!("Strategy '{}' found no price", strategy.label());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::parsing::page::compile_selectors;
    use rust_decimal::Decimal;

    fn selectors(raw: &[&str]) -> Vec<CompiledSelector> {
        compile_selectors(&raw.iter().map(|s| (*s).to_string()).collect::<Vec<_>>())
    }

    #[test]
    fn cascade_stops_at_first_success() {
        let page = PageDocument::parse(
            r#"<p>Collection:£10.49 Delivery:£11.79</p><span class="price">£9.99</span>"#,
        );
        let strategies: Vec<Box<dyn PriceStrategy>> = vec![
            Box::new(RegexTextStrategy::delivery()),
            Box::new(SelectorStrategy::new(
                "price-selectors",
                selectors(&[".price"]),
                ParseOptions::default(),
                PriceKind::Regular,
            )),
        ];
        let found = run_cascade(&strategies, &page).unwrap();
        assert_eq!(found.value, Decimal::new(1179, 2));
        assert_eq!(found.kind, PriceKind::DeliveryPrice);
        assert_eq!(found.source_label, "delivery-text");
    }

    #[test]
    fn selector_strategy_moves_past_unparseable_elements() {
        let page = PageDocument::parse(
            r#"<span class="price">Call for price</span><span class="product-price">£5.25</span>"#,
        );
        let strategy = SelectorStrategy::new(
            "price-selectors",
            selectors(&[".price", ".product-price"]),
            ParseOptions::default(),
            PriceKind::Regular,
        );
        let found = strategy.extract(&page).unwrap();
        assert_eq!(found.value, Decimal::new(525, 2));
        assert_eq!(found.source_label, ".product-price");
    }

    #[test]
    fn empty_cascade_finds_nothing() {
        let page = PageDocument::parse("<p>£12.00</p>");
        assert!(run_cascade(&[], &page).is_none());
    }
}
