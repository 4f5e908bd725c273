//! Price values, candidates and per-page extraction results

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Every site this engine tracks prices in pounds sterling.
pub const CURRENCY_GBP: &str = "GBP";

/// How a candidate price was labelled on the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceKind {
    Regular,
    DeliveryPrice,
    CollectionPrice,
    WasPrice,
    NowPrice,
    OfferPrice,
}

/// A numeric price found at one page location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceCandidate {
    pub value: Decimal,
    /// Selector or pattern name that produced the value
    pub source_label: String,
    pub kind: PriceKind,
}

impl PriceCandidate {
    pub fn new(value: Decimal, source_label: impl Into<String>, kind: PriceKind) -> Self {
        Self {
            value,
            source_label: source_label.into(),
            kind,
        }
    }
}

/// Minimum-value candidate; the earliest one wins a tie.
pub fn lowest_candidate(candidates: &[PriceCandidate]) -> Option<&PriceCandidate> {
    candidates
        .iter()
        .reduce(|best, next| if next.value < best.value { next } else { best })
}

/// Outcome of running one site's extraction profile over one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub price: Option<Decimal>,
    pub currency: String,
    pub title: Option<String>,
    pub availability: bool,
    pub source_site: String,
    /// Label of the strategy/selector that produced `price`
    pub price_source: Option<String>,
}

impl ExtractionResult {
    /// Empty result: no price, no title, assumed available.
    pub fn empty(source_site: impl Into<String>) -> Self {
        Self {
            price: None,
            currency: CURRENCY_GBP.to_string(),
            title: None,
            availability: true,
            source_site: source_site.into(),
            price_source: None,
        }
    }

    pub const fn has_price(&self) -> bool {
        self.price.is_some()
    }
}

/// Format a price with the symbol of its currency
pub fn format_price(value: Decimal, currency: &str) -> String {
    let rounded = value.round_dp(2);
    match currency {
        "GBP" => format!("£{rounded:.2}"),
        "USD" => format!("${rounded:.2}"),
        "EUR" => format!("€{rounded:.2}"),
        other => format!("{rounded:.2} {other}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Up,
    Down,
    Stable,
}

/// Difference between two observed prices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceChange {
    pub change: Decimal,
    pub percentage: Decimal,
    pub direction: PriceDirection,
}

/// Changes within ±0.1% are reported as stable.
pub fn calculate_price_change(old_price: Decimal, new_price: Decimal) -> PriceChange {
    if old_price.is_zero() {
        return PriceChange {
            change: Decimal::ZERO,
            percentage: Decimal::ZERO,
            direction: PriceDirection::Stable,
        };
    }

    let change = new_price - old_price;
    let percentage = (change / old_price * Decimal::ONE_HUNDRED).round_dp(2);
    let threshold = Decimal::new(1, 1);

    let direction = if percentage > threshold {
        PriceDirection::Up
    } else if percentage < -threshold {
        PriceDirection::Down
    } else {
        PriceDirection::Stable
    };

    PriceChange {
        change,
        percentage,
        direction,
    }
}
