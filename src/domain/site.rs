//! Site profiles: how to find price, title and availability on one site

use serde::{Deserialize, Serialize};

/// Named CSS selector lists for one site.
///
/// An empty list means "use the built-in list for this site".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSet {
    pub price: Vec<String>,
    pub delivery_price: Vec<String>,
    pub special_offer: Vec<String>,
    pub title: Vec<String>,
    pub availability: Vec<String>,
}

impl SelectorSet {
    /// Lists set in `self` win, empty ones fall back to `defaults`.
    pub fn or_defaults(&self, defaults: &Self) -> Self {
        fn pick(own: &[String], fallback: &[String]) -> Vec<String> {
            if own.is_empty() {
                fallback.to_vec()
            } else {
                own.to_vec()
            }
        }

        Self {
            price: pick(&self.price, &defaults.price),
            delivery_price: pick(&self.delivery_price, &defaults.delivery_price),
            special_offer: pick(&self.special_offer, &defaults.special_offer),
            title: pick(&self.title, &defaults.title),
            availability: pick(&self.availability, &defaults.availability),
        }
    }
}

/// Immutable per-process description of one site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub name: String,
    pub base_url: String,
    pub enabled: bool,
    pub selectors: SelectorSet,
}

impl SiteProfile {
    pub fn kind(&self) -> SiteKind {
        SiteKind::from_site_name(&self.name)
    }
}

/// Sites with a dedicated extraction profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteKind {
    /// Catering wholesaler rendering delivery and collection prices side by side
    JjFoodservice,
    /// Catering wholesaler with a delivery price and an "offer" (collection) price
    AtozCatering,
    /// General marketplace with deal and strike-through pricing
    AmazonUk,
    Generic,
}

impl SiteKind {
    pub fn from_site_name(name: &str) -> Self {
        match name {
            "jjfoodservice" => Self::JjFoodservice,
            "atoz_catering" => Self::AtozCatering,
            "amazon_uk" => Self::AmazonUk,
            _ => Self::Generic,
        }
    }

    pub const fn site_name(self) -> Option<&'static str> {
        match self {
            Self::JjFoodservice => Some("jjfoodservice"),
            Self::AtozCatering => Some("atoz_catering"),
            Self::AmazonUk => Some("amazon_uk"),
            Self::Generic => None,
        }
    }
}

const SITE_DOMAINS: &[(&str, &str)] = &[
    ("jjfoodservice.com", "jjfoodservice"),
    ("atoz-catering.co.uk", "atoz_catering"),
    ("amazon.co.uk", "amazon_uk"),
];

/// Guess the site name from a product URL
pub fn detect_site(url: &str) -> Option<&'static str> {
    let host = url::Url::parse(url).ok()?.host_str()?.to_ascii_lowercase();
    SITE_DOMAINS
        .iter()
        .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{domain}")))
        .map(|(_, site)| *site)
}
