//! Special-offer price detection
//!
//! Each node matched by a site's offer selectors is inspected together with up
//! to three ancestors. Struck-through amounts become `WasPrice`, the amounts
//! left over next to them become `NowPrice`, "was £X ... now £Y" phrasing
//! yields both, and offer/sale/discount wording marks the node's own price
//! as `OfferPrice`. Callers reduce the set with [`lowest_candidate`].

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Node, Selector};

use crate::domain::{PriceCandidate, PriceKind, SiteKind, lowest_candidate};

use super::config::{MAX_PRICE_TEXT_LEN, STRIKETHROUGH_SELECTOR, default_selectors};
use super::page::{
    CompiledSelector, PageDocument, collapse_whitespace, compile_selectors, element_text,
};
use super::price_parser::{ParseOptions, find_amounts, parse_price, was_now_amounts};

/// Ancestor levels inspected above a matched node
const CONTEXT_DEPTH: usize = 3;

static STRIKETHROUGH: Lazy<Selector> =
    Lazy::new(|| Selector::parse(STRIKETHROUGH_SELECTOR).expect("valid strikethrough selector"));

static OFFER_WORDING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:special\s+offer|offer|sale|discount|deal|save|reduced|clearance|promo)\b|\d{1,2}\s*%\s*off",
    )
    .expect("valid offer wording regex")
});

/// Class/id fragments that label an offer container
const OFFER_ATTRIBUTE_HINTS: &[&str] = &[
    "offer", "sale", "discount", "deal", "save", "reduced", "clearance", "promo",
];

#[derive(Debug, Clone)]
pub struct SpecialOfferDetector {
    selectors: Vec<CompiledSelector>,
}

impl SpecialOfferDetector {
    pub const fn new(selectors: Vec<CompiledSelector>) -> Self {
        Self { selectors }
    }

    /// Detector for `kind`, with configured selectors replacing the built-in list
    pub fn for_site(kind: SiteKind, overrides: &[String]) -> Self {
        if overrides.is_empty() {
            Self::new(compile_selectors(&default_selectors(kind).special_offer))
        } else {
            Self::new(compile_selectors(overrides))
        }
    }

    /// Every special-offer candidate on the page, deduplicated by (value, kind)
    pub fn find(&self, page: &PageDocument) -> Vec<PriceCandidate> {
        let mut found = Vec::new();
        for compiled in &self.selectors {
            for node in page.html().select(&compiled.selector) {
                inspect_node(node, &compiled.raw, &mut found);
            }
        }
        found
    }

    /// Lowest special-offer candidate, if any
    pub fn best(&self, page: &PageDocument) -> Option<PriceCandidate> {
        lowest_candidate(&self.find(page)).cloned()
    }
}

/// Special-offer candidates for a page using a site's built-in selectors
pub fn find_special_offer_prices(page: &PageDocument, site_name: &str) -> Vec<PriceCandidate> {
    SpecialOfferDetector::for_site(SiteKind::from_site_name(site_name), &[]).find(page)
}

fn inspect_node(node: ElementRef<'_>, label: &str, found: &mut Vec<PriceCandidate>) {
    let context: Vec<ElementRef<'_>> = std::iter::once(node)
        .chain(node.ancestors().filter_map(ElementRef::wrap).take(CONTEXT_DEPTH))
        .collect();

    let node_struck = STRIKETHROUGH.matches(&node);
    let struck: Vec<ElementRef<'_>> = node_struck
        .then_some(node)
        .into_iter()
        .chain(node.select(&STRIKETHROUGH).filter(|el| el.id() != node.id()))
        .collect();

    if !struck.is_empty() {
        for element in &struck {
            for value in fragment_amounts(&element_text(*element)) {
                push_candidate(found, PriceCandidate::new(value, label, PriceKind::WasPrice));
            }
        }

        // Nearest context level whose non-struck text carries an amount
        for level in context.iter().filter(|el| !STRIKETHROUGH.matches(el)) {
            let remainder = unstruck_text(*level);
            if remainder.chars().count() > MAX_PRICE_TEXT_LEN {
                break;
            }
            let amounts = find_amounts(&remainder);
            if !amounts.is_empty() {
                for value in amounts {
                    push_candidate(found, PriceCandidate::new(value, label, PriceKind::NowPrice));
                }
                break;
            }
        }
    }

    for level in &context {
        let text = element_text(*level);
        if text.chars().count() > MAX_PRICE_TEXT_LEN {
            break;
        }
        if let Some((was, now)) = was_now_amounts(&text) {
            push_candidate(found, PriceCandidate::new(was, label, PriceKind::WasPrice));
            push_candidate(found, PriceCandidate::new(now, label, PriceKind::NowPrice));
            break;
        }
    }

    if !node_struck && has_offer_wording(node, &context) {
        let own = element_text(node);
        if let Some(value) = parse_price(&own, &ParseOptions::special_offers()) {
            push_candidate(found, PriceCandidate::new(value, label, PriceKind::OfferPrice));
        }
    }
}

fn fragment_amounts(text: &str) -> Vec<rust_decimal::Decimal> {
    if text.chars().count() > MAX_PRICE_TEXT_LEN {
        return Vec::new();
    }
    find_amounts(text)
}

/// Text of `element` with every struck-through descendant removed
fn unstruck_text(element: ElementRef<'_>) -> String {
    let struck: HashSet<_> = element
        .select(&STRIKETHROUGH)
        .map(|el| el.id())
        .filter(|id| *id != element.id())
        .collect();

    let mut raw = String::new();
    for descendant in element.descendants() {
        let Node::Text(text) = descendant.value() else {
            continue;
        };
        let inside_struck = descendant
            .ancestors()
            .take_while(|ancestor| ancestor.id() != element.id())
            .any(|ancestor| struck.contains(&ancestor.id()));
        if !inside_struck {
            raw.push_str(text);
            raw.push(' ');
        }
    }
    collapse_whitespace(&raw)
}

fn has_offer_wording(node: ElementRef<'_>, context: &[ElementRef<'_>]) -> bool {
    let own_text = element_text(node);
    if own_text.chars().count() <= MAX_PRICE_TEXT_LEN && OFFER_WORDING_RE.is_match(&own_text) {
        return true;
    }

    context.iter().any(|level| {
        let el = level.value();
        el.classes()
            .chain(el.id())
            .map(str::to_ascii_lowercase)
            .any(|token| OFFER_ATTRIBUTE_HINTS.iter().any(|hint| token.contains(hint)))
    })
}

fn push_candidate(found: &mut Vec<PriceCandidate>, candidate: PriceCandidate) {
    let duplicate = found
        .iter()
        .any(|c| c.value == candidate.value && c.kind == candidate.kind);
    if !duplicate {
        found.push(candidate);
    }
}
