//! Built-in CSS selector lists for each supported site
//!
//! Configured selectors in a site profile replace these list by list; any
//! list left empty in configuration falls back to the one here.

use crate::domain::{SelectorSet, SiteKind};

/// Upper bound on the length of a text fragment handed to the price parser
pub const MAX_PRICE_TEXT_LEN: usize = 100;

/// Phrases that mark a product as unavailable when found in page text
pub const UNAVAILABLE_PHRASES: &[&str] = &[
    "out of stock",
    "unavailable",
    "not available",
    "sold out",
    "temporarily unavailable",
];

/// Elements that render a price as struck through
pub const STRIKETHROUGH_SELECTOR: &str = "del, s, strike, [style*=\"line-through\"], \
     .a-price-strike, .was-price, .strikethrough, [data-a-strike]";

/// Add-to-basket affordances; their absence hints that a product cannot be ordered
pub const ADD_TO_BASKET_SELECTOR: &str = "button[name=\"add-to-cart\"], .add-to-cart, \
     .add-to-basket, #add-to-cart-button, form.cart button[type=\"submit\"]";

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

/// Default selector set for a site
pub fn default_selectors(kind: SiteKind) -> SelectorSet {
    match kind {
        SiteKind::JjFoodservice => SelectorSet {
            price: owned(&[
                ".delivery-price",
                ".price-delivery",
                ".price",
                ".product-price",
                "[data-testid=\"price\"]",
                ".current-price",
            ]),
            delivery_price: owned(&[".delivery-price", ".price-delivery"]),
            special_offer: owned(&[
                ".special-offer",
                ".offer-price",
                ".member-discount",
                "del",
                "s",
                ".was-price",
            ]),
            title: owned(&[
                "h1",
                ".product-title",
                ".product-name",
                "[data-testid=\"product-title\"]",
                "title",
            ]),
            availability: owned(&[".stock-status", ".availability"]),
        },
        SiteKind::AtozCatering => SelectorSet {
            price: owned(&[".price", ".product-price", ".price-value", ".selling-price"]),
            delivery_price: owned(&[".delivery-price", ".price-delivery"]),
            // "Offer" on this site is the collection price, not a promotion
            special_offer: owned(&[".price-offer", ".offer-price"]),
            title: owned(&[
                "h1",
                ".product-title",
                ".product-name",
                "a[href*=\"/products/product/\"]",
                "title",
            ]),
            availability: owned(&[".out-of-stock", ".unavailable", ".sold-out"]),
        },
        SiteKind::AmazonUk => SelectorSet {
            price: owned(&[
                ".a-price .a-offscreen",
                "#priceblock_ourprice",
                "#priceblock_dealprice",
                ".a-price-current .a-offscreen",
                "#corePrice_feature_div .a-offscreen",
                ".a-price-whole",
            ]),
            delivery_price: Vec::new(),
            special_offer: owned(&[
                "#priceblock_dealprice",
                ".priceBlockStrikePriceString",
                ".a-price.a-text-price",
                ".a-price-strike",
                ".deal-price",
                ".sale-price",
                "del",
                "s",
                "strike",
            ]),
            title: owned(&["#productTitle", "h1.a-size-large", "h1", "title"]),
            availability: owned(&["#availability span", "#availability"]),
        },
        SiteKind::Generic => SelectorSet {
            price: owned(&[
                ".price",
                ".product-price",
                ".current-price",
                ".sale-price",
                "[itemprop=\"price\"]",
            ]),
            delivery_price: Vec::new(),
            special_offer: Vec::new(),
            title: owned(&["h1", ".product-title", ".product-name", "title"]),
            availability: owned(&[".availability", ".stock-status", ".stock"]),
        },
    }
}
