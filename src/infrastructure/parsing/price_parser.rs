//! Turn short text fragments into validated GBP amounts
//!
//! Catering wholesalers render a delivery and a collection price next to each
//! other, so the parser can be told to insist on the delivery one. Anything
//! outside £2.00 to £100.00 is treated as noise (weights, pack sizes, SKUs).

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use std::str::FromStr;

use super::config::MAX_PRICE_TEXT_LEN;

static AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"£\s?(\d{1,3}(?:\.\d{2})?)").expect("valid amount regex")
});

pub static DELIVERY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)delivery\s*:?\s*£\s?(\d{1,3}(?:\.\d{2})?)")
        .expect("valid delivery regex")
});

static WAS_NOW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?is)was\s*:?\s*£\s?(\d{1,3}(?:\.\d{2})?)",
        r".*?now\s*:?\s*£\s?(\d{1,3}(?:\.\d{2})?)"
    ))
    .expect("valid was/now regex")
});

pub fn min_price() -> Decimal {
    Decimal::new(200, 2)
}

pub fn max_price() -> Decimal {
    Decimal::ONE_HUNDRED
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Reject collection-only fragments and pick the delivery-labelled amount
    pub prefer_delivery_price: bool,
    /// Resolve was/now phrasing and multi-amount fragments to the lower price
    pub detect_special_offers: bool,
    /// Longest fragment (in characters) the parser will look at
    pub max_len: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            prefer_delivery_price: false,
            detect_special_offers: false,
            max_len: MAX_PRICE_TEXT_LEN,
        }
    }
}

impl ParseOptions {
    pub fn prefer_delivery() -> Self {
        Self {
            prefer_delivery_price: true,
            ..Self::default()
        }
    }

    pub fn special_offers() -> Self {
        Self {
            detect_special_offers: true,
            ..Self::default()
        }
    }
}

/// Parse a price from a text fragment
pub fn parse_price(text: &str, opts: &ParseOptions) -> Option<Decimal> {
    let text = text.trim();
    if text.is_empty() || text.chars().count() > opts.max_len {
        return None;
    }

    if opts.prefer_delivery_price {
        let lower = text.to_lowercase();
        let has_delivery = lower.contains("delivery");
        if lower.contains("collection") && !has_delivery {
            return None;
        }
        if has_delivery {
            if let Some(value) = delivery_amount(text) {
                return Some(value);
            }
        }
    }

    if opts.detect_special_offers {
        if let Some((_, now)) = was_now_amounts(text) {
            return Some(now);
        }
        let amounts = find_amounts(text);
        if amounts.len() > 1 {
            return amounts.into_iter().min();
        }
    }

    first_amount(text)
}

/// Every in-range amount in the fragment, in document order
pub fn find_amounts(text: &str) -> Vec<Decimal> {
    AMOUNT_RE
        .captures_iter(text)
        .filter_map(|caps| captured_amount(text, &caps, 1))
        .collect()
}

/// First in-range amount labelled `Delivery:` anywhere in `text`.
///
/// No length guard: this is meant to run over whole-page text.
pub fn delivery_amount(text: &str) -> Option<Decimal> {
    DELIVERY_RE
        .captures_iter(text)
        .find_map(|caps| captured_amount(text, &caps, 1))
}

/// `(was, now)` pair from "was £X ... now £Y" phrasing, both in range
pub fn was_now_amounts(text: &str) -> Option<(Decimal, Decimal)> {
    WAS_NOW_RE.captures_iter(text).find_map(|caps| {
        let was = captured_amount(text, &caps, 1)?;
        let now = captured_amount(text, &caps, 2)?;
        Some((was, now))
    })
}

fn first_amount(text: &str) -> Option<Decimal> {
    AMOUNT_RE
        .captures_iter(text)
        .find_map(|caps| captured_amount(text, &caps, 1))
}

/// Amount in capture group `group`, rejected when more digits follow it.
///
/// The amount patterns carry no trailing boundary, so `£11.79Per case` keeps
/// its pence while `£12.345` and `£1000` are discarded here.
pub fn captured_amount(text: &str, caps: &Captures<'_>, group: usize) -> Option<Decimal> {
    let found = caps.get(group)?;
    let followed_by_digit = text[found.end()..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit());
    if followed_by_digit {
        return None;
    }
    parse_amount(found.as_str())
}

/// A bare captured amount, accepted only inside the plausible price range
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let mut value = Decimal::from_str(raw).ok()?;
    if value < min_price() || value > max_price() {
        return None;
    }
    value.rescale(2);
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[rstest]
    #[case("£11.79", Some("11.79"))]
    #[case("Price: £ 4.50 each", Some("4.50"))]
    #[case("£7", Some("7.00"))]
    #[case("£1.99", None)]
    #[case("£100.00", Some("100.00"))]
    #[case("£100.01", None)]
    #[case("£1234.00", None)]
    #[case("12.99", None)]
    #[case("", None)]
    #[case("£0.50 deposit then £12.00", Some("12.00"))]
    #[case("£12.99ea", Some("12.99"))]
    #[case("£12.345", None)]
    #[case("£1000", None)]
    #[case("£11.79Per case", Some("11.79"))]
    fn plain_fragments(#[case] text: &str, #[case] expected: Option<&str>) {
        assert_eq!(parse_price(text, &ParseOptions::default()), expected.map(dec));
    }

    #[test]
    fn rejects_long_fragments() {
        let long = format!("{} £12.00", "x".repeat(100));
        assert_eq!(parse_price(&long, &ParseOptions::default()), None);
    }

    #[test]
    fn collection_only_rejected_when_preferring_delivery() {
        let opts = ParseOptions::prefer_delivery();
        assert_eq!(parse_price("Collection:£10.00", &opts), None);
        assert_eq!(parse_price("Delivery:£11.79", &opts), Some(dec("11.79")));
        assert_eq!(
            parse_price("Collection: £10.00", &ParseOptions::default()),
            Some(dec("10.00"))
        );
    }

    #[test]
    fn both_wordings_pick_the_delivery_amount() {
        let opts = ParseOptions::prefer_delivery();
        assert_eq!(
            parse_price("Collection: £10.00 Delivery: £12.50", &opts),
            Some(dec("12.50"))
        );
    }

    #[test]
    fn special_offer_mode_takes_now_price() {
        let opts = ParseOptions::special_offers();
        assert_eq!(parse_price("Was £20.00, now £15.99", &opts), Some(dec("15.99")));
        assert_eq!(parse_price("£20.00 £15.99", &opts), Some(dec("15.99")));
        assert_eq!(parse_price("Was £20.00Now £15.99Only", &opts), Some(dec("15.99")));
        assert_eq!(
            parse_price("£20.00 £15.99", &ParseOptions::default()),
            Some(dec("20.00"))
        );
    }

    #[test]
    fn delivery_amount_scans_concatenated_text() {
        let text = "Collection:£10.49 per case Delivery:£11.79 per case";
        assert_eq!(delivery_amount(text), Some(dec("11.79")));
        assert_eq!(delivery_amount("Delivery:£250.00"), None);
        assert_eq!(
            delivery_amount("Collection:£10.49Delivery:£11.79Per case"),
            Some(dec("11.79"))
        );
    }

    #[test]
    fn find_amounts_keeps_order_and_drops_out_of_range() {
        assert_eq!(
            find_amounts("£20.00 then £0.99 then £15.99"),
            vec![dec("20.00"), dec("15.99")]
        );
    }

    proptest! {
        #[test]
        fn in_range_amounts_round_trip(pence in 200u32..=10_000) {
            let text = format!("£{}.{:02}", pence / 100, pence % 100);
            let expected = Decimal::new(i64::from(pence), 2);
            prop_assert_eq!(parse_price(&text, &ParseOptions::default()), Some(expected));
        }

        #[test]
        fn out_of_range_amounts_are_rejected(pence in prop_oneof![0u32..200, 10_001u32..99_999]) {
            let text = format!("£{}.{:02}", pence / 100, pence % 100);
            prop_assert_eq!(parse_price(&text, &ParseOptions::default()), None);
        }
    }
}
