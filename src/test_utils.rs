//! Test utilities for the price tracker
//!
//! An in-memory [`Transport`] with scripted responses and call counters, a
//! configuration preset with politeness delays switched off, and sample
//! product pages for each supported site.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::{
    Transport, TransportError, TransportErrorKind, TransportResponse,
};

pub type ScriptedResponse = Result<TransportResponse, TransportError>;

#[derive(Debug)]
enum Route {
    Fixed(ScriptedResponse),
    /// Served in order; the final response repeats once the rest are used
    Sequence(VecDeque<ScriptedResponse>),
}

/// Transport that answers from a per-URL script
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, Route>>,
    latency: Duration,
    calls: AtomicUsize,
    calls_by_url: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(status: u16) -> ScriptedResponse {
        Ok(TransportResponse {
            status,
            body: String::new(),
        })
    }

    pub fn ok(body: impl Into<String>) -> ScriptedResponse {
        Ok(TransportResponse {
            status: 200,
            body: body.into(),
        })
    }

    pub fn timeout() -> ScriptedResponse {
        Err(TransportError::new(TransportErrorKind::Timeout, "operation timed out"))
    }

    #[must_use]
    pub fn with_body(self, url: &str, body: impl Into<String>) -> Self {
        self.route(url, Route::Fixed(Self::ok(body)))
    }

    #[must_use]
    pub fn with_status(self, url: &str, status: u16) -> Self {
        self.route(url, Route::Fixed(Self::status(status)))
    }

    #[must_use]
    pub fn with_response(self, url: &str, response: ScriptedResponse) -> Self {
        self.route(url, Route::Fixed(response))
    }

    #[must_use]
    pub fn with_sequence(self, url: &str, responses: Vec<ScriptedResponse>) -> Self {
        self.route(url, Route::Sequence(responses.into()))
    }

    /// Every call sleeps this long (on the tokio clock) before answering
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn route(self, url: &str, route: Route) -> Self {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), route);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls_by_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of calls observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn respond(&self, url: &str) -> ScriptedResponse {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        match routes.get_mut(url) {
            Some(Route::Fixed(response)) => response.clone(),
            Some(Route::Sequence(queue)) => {
                if queue.len() > 1 {
                    queue.pop_front().unwrap_or_else(|| Self::status(500))
                } else {
                    queue.front().cloned().unwrap_or_else(|| Self::status(500))
                }
            }
            None => Err(TransportError::new(
                TransportErrorKind::Connect,
                format!("no scripted route for {url}"),
            )),
        }
    }
}

/// Decrements the in-flight counter even if the call is dropped mid-await
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get(
        &self,
        url: &str,
        _headers: HeaderMap,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_by_url
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.respond(url)
    }
}

/// Default configuration with no politeness delay and the given concurrency
pub fn test_config(max_concurrent_requests: usize) -> AppConfig {
    let mut config = AppConfig::default();
    config.scraping.delay_between_requests = 0.0;
    config.scraping.max_concurrent_requests = max_concurrent_requests;
    config
}

/// Sample product pages, trimmed from real storefront markup
pub mod pages {
    /// Delivery and collection prices concatenated in one block
    pub const JJ_FOODSERVICE: &str = r#"<html><head><title>Smoked Back Bacon | JJ Foodservice</title></head>
<body>
  <h1 class="product-title">  Smoked Back
      Bacon 2kg </h1>
  <div class="product-price"><span class="price">£9.99</span></div>
  <div class="price-block">Collection:£10.49 per case Delivery:£11.79 per case</div>
  <div class="stock-status">In stock</div>
</body></html>"#;

    pub const ATOZ_CATERING: &str = r#"<html><head><title>Rapeseed Oil 20L - A to Z Catering</title></head>
<body>
  <h1>Rapeseed Oil 20L</h1>
  <h3>Delivery: £24.50</h3>
  <span class="price-offer">£22.95</span>
  <button class="add-to-basket">Add To Basket</button>
</body></html>"#;

    pub const AMAZON_DEAL: &str = r#"<html><head><title>Amazon.co.uk: Kitchen Roll</title></head>
<body>
  <span id="productTitle">  Kitchen Roll, Pack of 24  </span>
  <div id="corePrice_feature_div">
    <span class="a-price a-text-price" data-a-strike="true"><span class="a-offscreen">£29.99</span></span>
    <span class="a-price"><span class="a-offscreen">£24.99</span></span>
  </div>
  <div id="availability"><span>In stock</span></div>
</body></html>"#;

    pub const AMAZON_LIST_PRICE: &str = r#"<html><body>
  <span id="productTitle">Paper Cups</span>
  <span class="a-price"><span class="a-offscreen">£12.49</span></span>
  <div id="availability"><span>Currently unavailable.</span></div>
</body></html>"#;

    pub const NO_PRICE: &str = "<html><body><h1>Discontinued line</h1></body></html>";
}
