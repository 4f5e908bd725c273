use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub type ProductId = i64;

/// A tracked product and the page URL to scrape on each site.
///
/// `urls` keeps insertion order; site tasks are dispatched in that order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub urls: IndexMap<String, String>,
}

impl Product {
    pub fn new(id: ProductId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            urls: IndexMap::new(),
        }
    }

    /// Builder-style helper for attaching a site URL
    pub fn with_url(mut self, site_name: impl Into<String>, url: impl Into<String>) -> Self {
        self.urls.insert(site_name.into(), url.into());
        self
    }
}
