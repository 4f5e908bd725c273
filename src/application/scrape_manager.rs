//! Scrape manager
//!
//! Fans one product out to its configured sites, bounded by a process-wide
//! semaphore, and keeps a registry of in-flight products so that a second
//! request for the same product joins the running scrape instead of starting
//! another one.
//!
//! Every product scrape runs as its own tokio task. Callers only hold a
//! shared handle to its outcome, so dropping a caller never stalls the work;
//! stopping it early goes through [`ScrapeManager::cancel_product_scraping`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use indexmap::IndexMap;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{
    HealthReport, Product, ProductId, ScrapeStage, ScrapeTask, SiteReachability, SiteResults,
    SiteScrapeResult, TaskState,
};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::{Fetcher, ReqwestTransport, RetryPolicy, Transport};
use crate::infrastructure::parsing::{ExtractorRegistry, SiteExtractor};
use crate::infrastructure::parsing_error::{ScrapeError, ScrapeResult};

type SharedOutcome = Shared<BoxFuture<'static, ScrapeResult<SiteResults>>>;
type TaskBoard = Arc<RwLock<Vec<ScrapeTask>>>;

/// Registry entry for one in-flight product
struct ActiveScrape {
    /// Distinguishes this run from a later one for the same product
    generation: Uuid,
    cancel: CancellationToken,
    outcome: SharedOutcome,
    tasks: TaskBoard,
}

struct ManagerInner {
    config: AppConfig,
    fetcher: Fetcher,
    extractors: ExtractorRegistry,
    semaphore: Arc<Semaphore>,
    request_delay: Duration,
    active: Mutex<HashMap<ProductId, ActiveScrape>>,
}

/// One site scheduled for a product
struct SitePlan {
    site: String,
    url: String,
    extractor: Arc<dyn SiteExtractor>,
    /// Position on the task board
    slot: usize,
}

/// Builder for [`ScrapeManager`]
pub struct ScrapeManagerBuilder {
    config: AppConfig,
    transport: Option<Arc<dyn Transport>>,
    retry_policy: RetryPolicy,
}

impl ScrapeManagerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            transport: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replace the reqwest transport, e.g. with a scripted one in tests
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn build(self) -> Result<ScrapeManager> {
        self.config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.config.scraping.request_timeout())?),
        };
        let fetcher = Fetcher::with_transport(transport, &self.config.scraping)
            .with_retry_policy(self.retry_policy);
        let extractors = ExtractorRegistry::from_profiles(&self.config.site_profiles());
        let permits = self.config.scraping.max_concurrent_requests.max(1);

        info!(
            "Scrape manager ready: {} site profiles, {} concurrent requests, {} attempts per fetch",
            extractors.len(),
            permits,
            fetcher.retry_attempts()
        );

        Ok(ScrapeManager {
            inner: Arc::new(ManagerInner {
                request_delay: self.config.scraping.request_delay(),
                semaphore: Arc::new(Semaphore::new(permits)),
                fetcher,
                extractors,
                config: self.config,
                active: Mutex::new(HashMap::new()),
            }),
        })
    }
}

/// Orchestrates fetching and extraction for products across sites
#[derive(Clone)]
pub struct ScrapeManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ScrapeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrapeManager")
            .field("sites", &self.inner.extractors.len())
            .field("available_permits", &self.inner.semaphore.available_permits())
            .finish_non_exhaustive()
    }
}

impl ScrapeManager {
    /// Manager talking to the real sites over reqwest
    pub fn new(config: AppConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: AppConfig) -> ScrapeManagerBuilder {
        ScrapeManagerBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Scrape every configured site of `product`.
    ///
    /// If the product is already being scraped, waits for that run and
    /// returns its results. Per-site failures are entries in the map; the
    /// only errors are [`ScrapeError::Cancelled`] and
    /// [`ScrapeError::TaskAborted`].
    pub async fn scrape_product(&self, product: &Product) -> ScrapeResult<SiteResults> {
        self.start_or_join(product).await.await
    }

    /// Scrape products one after another at dispatch level.
    ///
    /// Each product is started before the politeness delay and the next
    /// product, so their site tasks interleave under the shared semaphore.
    /// Cancelled or aborted products are left out of the result.
    pub async fn scrape_all_products(
        &self,
        products: &[Product],
    ) -> IndexMap<ProductId, SiteResults> {
        info!("Starting batch scrape of {} products", products.len());

        let mut pending = Vec::with_capacity(products.len());
        for (index, product) in products.iter().enumerate() {
            if index > 0 && !self.inner.request_delay.is_zero() {
                tokio::time::sleep(self.inner.request_delay).await;
            }
            pending.push((product.id, self.start_or_join(product).await));
        }

        let mut results = IndexMap::with_capacity(pending.len());
        for (product_id, outcome) in pending {
            match outcome.await {
                Ok(sites) => {
                    results.insert(product_id, sites);
                }
                Err(ScrapeError::Cancelled) => {
                    warn!("Product {} was cancelled during the batch", product_id);
                }
                Err(e) => {
                    error!("Product {} failed in the batch: {}", product_id, e);
                }
            }
        }

        info!(
            "Batch scrape finished: {}/{} products completed",
            results.len(),
            products.len()
        );
        results
    }

    /// Cancel the in-flight scrape of `product_id`. Returns false if none was running.
    pub async fn cancel_product_scraping(&self, product_id: ProductId) -> bool {
        let removed = self.inner.active.lock().await.remove(&product_id);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                info!("Cancelled scraping for product {}", product_id);
                true
            }
            None => {
                debug!("No active scrape to cancel for product {}", product_id);
                false
            }
        }
    }

    /// Ids of products with a scrape in flight, ascending
    pub async fn active_scraping_tasks(&self) -> Vec<ProductId> {
        let mut ids: Vec<ProductId> = self.inner.active.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Snapshot of the per-site tasks of an in-flight scrape
    pub async fn task_states(&self, product_id: ProductId) -> Option<Vec<ScrapeTask>> {
        let board = {
            let active = self.inner.active.lock().await;
            active.get(&product_id).map(|entry| Arc::clone(&entry.tasks))
        }?;
        let tasks = board.read().await.clone();
        Some(tasks)
    }

    /// Probe each enabled site's base URL once, outside the price pipeline
    pub async fn health_check(&self) -> HealthReport {
        let sites = self.inner.config.enabled_sites();
        let mut checks: IndexMap<String, SiteReachability> = sites
            .iter()
            .map(|site| {
                (
                    site.name.clone(),
                    SiteReachability::Error("check did not complete".to_string()),
                )
            })
            .collect();

        let mut probes = JoinSet::new();
        for site in sites {
            let inner = Arc::clone(&self.inner);
            probes.spawn(async move {
                let reachability = inner.probe_site(&site.base_url).await;
                (site.name, reachability)
            });
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((site, reachability)) => {
                    debug!("Health of {}: {}", site, reachability);
                    checks.insert(site, reachability);
                }
                Err(e) => warn!("Health probe task failed: {}", e),
            }
        }

        let active = self.inner.active.lock().await.len();
        let report = HealthReport::new(checks, active);
        info!(
            "Health check: {:?} ({} sites, {} active scrapes)",
            report.status, report.enabled_sites, report.active_tasks
        );
        report
    }

    /// Join the running scrape for `product`, or start one.
    ///
    /// Lookup and insert happen under one lock, so concurrent callers for the
    /// same product always end up on the same run.
    async fn start_or_join(&self, product: &Product) -> SharedOutcome {
        let mut active = self.inner.active.lock().await;
        if let Some(entry) = active.get(&product.id) {
            debug!("Joining in-flight scrape for product {}", product.id);
            return entry.outcome.clone();
        }

        let generation = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let tasks: TaskBoard = Arc::new(RwLock::new(Vec::new()));

        let handle = tokio::spawn({
            let inner = Arc::clone(&self.inner);
            let product = product.clone();
            let cancel = cancel.clone();
            let tasks = Arc::clone(&tasks);
            async move {
                let outcome = Arc::clone(&inner).run_product(&product, &cancel, &tasks).await;
                inner.finish(product.id, generation).await;
                outcome
            }
        });

        let outcome = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(ScrapeError::TaskAborted(e.to_string())))
        }
        .boxed()
        .shared();

        active.insert(
            product.id,
            ActiveScrape {
                generation,
                cancel,
                outcome: outcome.clone(),
                tasks,
            },
        );
        outcome
    }
}

impl ManagerInner {
    /// Extractor for `site`, or why the site cannot be scraped
    fn resolve_site(&self, site: &str, url: &str) -> ScrapeResult<Arc<dyn SiteExtractor>> {
        let Some(profile) = self.config.sites.get(site) else {
            return Err(ScrapeError::UnsupportedSite(site.to_string()));
        };
        if !profile.enabled {
            return Err(ScrapeError::Configuration(format!("site {site} is disabled")));
        }
        if url.trim().is_empty() {
            return Err(ScrapeError::Configuration(format!("no URL configured for {site}")));
        }
        Ok(self.extractors.get_or_generic(site))
    }

    async fn run_product(
        self: Arc<Self>,
        product: &Product,
        cancel: &CancellationToken,
        board: &TaskBoard,
    ) -> ScrapeResult<SiteResults> {
        info!("Scraping product {} across {} sites", product.id, product.urls.len());

        // Placeholders fix the URL order; a site task that dies keeps its placeholder
        let mut results = SiteResults::with_capacity(product.urls.len());
        let mut plans = Vec::new();
        {
            let mut tasks = board.write().await;
            for (site, url) in &product.urls {
                match self.resolve_site(site, url) {
                    Ok(extractor) => {
                        results.insert(
                            site.clone(),
                            SiteScrapeResult::failed(
                                url,
                                "task_aborted",
                                "site task ended without a result",
                            ),
                        );
                        plans.push(SitePlan {
                            site: site.clone(),
                            url: url.clone(),
                            extractor,
                            slot: tasks.len(),
                        });
                        tasks.push(ScrapeTask::new(product.id, site.clone(), url.clone()));
                    }
                    Err(e) => {
                        warn!("Skipping {} for product {}: {}", site, product.id, e);
                        let failed = SiteScrapeResult::failed(url, e.kind(), e.to_string());
                        results.insert(site.clone(), failed);
                    }
                }
            }
        }

        let mut join_set = JoinSet::new();
        for (index, plan) in plans.into_iter().enumerate() {
            if index > 0 && !self.request_delay.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(self.request_delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Self::abandon(product.id, join_set, board).await;
            }

            let inner = Arc::clone(&self);
            let cancel = cancel.clone();
            let board = Arc::clone(board);
            join_set.spawn(async move {
                let entry = inner.scrape_site(&plan, &cancel, &board).await;
                (plan.site, entry)
            });
        }

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                joined = join_set.join_next() => Some(joined),
            };
            let Some(joined) = next else {
                return Self::abandon(product.id, join_set, board).await;
            };
            match joined {
                Some(Ok((site, entry))) => {
                    results.insert(site, entry);
                }
                Some(Err(e)) => error!("Site task for product {} aborted: {}", product.id, e),
                None => break,
            }
        }

        let succeeded = results.values().filter(|entry| entry.success).count();
        info!(
            "Product {} done: {}/{} sites returned a price",
            product.id,
            succeeded,
            results.len()
        );
        Ok(results)
    }

    /// Fetch and extract one site under a semaphore permit
    async fn scrape_site(
        &self,
        plan: &SitePlan,
        cancel: &CancellationToken,
        board: &TaskBoard,
    ) -> SiteScrapeResult {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                advance(board, plan.slot, TaskState::Cancelled).await;
                return failure(&plan.url, &ScrapeError::Cancelled);
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit,
        };
        let Ok(_permit) = permit else {
            let err = ScrapeError::TaskAborted("concurrency limiter closed".to_string());
            advance(board, plan.slot, TaskState::Failed(err.to_string())).await;
            return failure(&plan.url, &err);
        };

        advance(board, plan.slot, TaskState::Running(ScrapeStage::Fetching)).await;
        let body = match self.fetcher.fetch(&plan.url, cancel).await.into_body(&plan.url) {
            Ok(body) => body,
            Err(ScrapeError::Cancelled) => {
                advance(board, plan.slot, TaskState::Cancelled).await;
                return failure(&plan.url, &ScrapeError::Cancelled);
            }
            Err(e) => {
                warn!("Fetching {} for {} failed: {}", plan.url, plan.site, e);
                advance(board, plan.slot, TaskState::Failed(e.to_string())).await;
                return failure(&plan.url, &e);
            }
        };

        advance(board, plan.slot, TaskState::Running(ScrapeStage::Parsing)).await;
        let extracted = plan.extractor.extract_html(&body);

        if extracted.has_price() {
            let entry = SiteScrapeResult::succeeded(&plan.url, &extracted);
            advance(board, plan.slot, TaskState::Completed(extracted)).await;
            entry
        } else {
            let err = ScrapeError::NoPriceFound {
                site: plan.site.clone(),
                tried: plan.extractor.strategy_count(),
            };
            warn!("{} ({})", err, plan.url);
            advance(board, plan.slot, TaskState::Failed(err.to_string())).await;
            failure(&plan.url, &err)
        }
    }

    async fn probe_site(&self, base_url: &str) -> SiteReachability {
        if url::Url::parse(base_url).is_err() {
            return SiteReachability::Error(format!("invalid base URL {base_url:?}"));
        }
        let Ok(_permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return SiteReachability::Error("concurrency limiter closed".to_string());
        };
        match self.fetcher.probe(base_url).await {
            Ok(200) => SiteReachability::Accessible,
            Ok(status) => {
                debug!("{} answered HTTP {}", base_url, status);
                SiteReachability::Inaccessible
            }
            Err(e) => SiteReachability::Error(e.to_string()),
        }
    }

    /// Stop every site task of a cancelled product
    async fn abandon(
        product_id: ProductId,
        mut join_set: JoinSet<(String, SiteScrapeResult)>,
        board: &TaskBoard,
    ) -> ScrapeResult<SiteResults> {
        join_set.shutdown().await;
        for task in board.write().await.iter_mut() {
            if !task.state.is_terminal() {
                let _ = task.advance(TaskState::Cancelled);
            }
        }
        info!("Scrape of product {} torn down after cancellation", product_id);
        Err(ScrapeError::Cancelled)
    }

    /// Drop the registry entry, unless a newer run has replaced it
    async fn finish(&self, product_id: ProductId, generation: Uuid) {
        let mut active = self.active.lock().await;
        if active
            .get(&product_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            active.remove(&product_id);
        }
    }
}

fn failure(url: &str, err: &ScrapeError) -> SiteScrapeResult {
    SiteScrapeResult::failed(url, err.kind(), err.to_string())
}

async fn advance(board: &TaskBoard, slot: usize, next: TaskState) {
    if let Some(task) = board.write().await.get_mut(slot) {
        if let Err(e) = task.advance(next) {
            warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ScriptedTransport, pages, test_config};

    fn manager(transport: ScriptedTransport) -> ScrapeManager {
        ScrapeManager::builder(test_config(2))
            .transport(Arc::new(transport))
            .retry_policy(RetryPolicy::immediate())
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_configured_sites_only() {
        let mut config = test_config(2);
        config.sites.get_mut("amazon_uk").unwrap().enabled = false;
        let manager = ScrapeManager::builder(config)
            .transport(Arc::new(ScriptedTransport::new()))
            .build()
            .unwrap();
        let inner = &manager.inner;

        let resolved = inner
            .resolve_site("jjfoodservice", "https://www.jjfoodservice.com/p")
            .unwrap();
        assert_eq!(resolved.site_name(), "jjfoodservice");
        assert_eq!(
            inner.resolve_site("tesco", "https://www.tesco.com/p").unwrap_err(),
            ScrapeError::UnsupportedSite("tesco".into())
        );
        assert!(matches!(
            inner.resolve_site("amazon_uk", "https://www.amazon.co.uk/dp/B0").unwrap_err(),
            ScrapeError::Configuration(_)
        ));
        assert!(matches!(
            inner.resolve_site("atoz_catering", "  ").unwrap_err(),
            ScrapeError::Configuration(_)
        ));
    }

    #[tokio::test]
    async fn registry_is_empty_after_completion() {
        let url = "https://www.jjfoodservice.com/product/BAC002";
        let manager = manager(ScriptedTransport::new().with_body(url, pages::JJ_FOODSERVICE));
        let product = Product::new(1, "Bacon").with_url("jjfoodservice", url);

        let results = manager.scrape_product(&product).await.unwrap();
        assert!(results["jjfoodservice"].success);
        assert!(manager.active_scraping_tasks().await.is_empty());
        assert!(manager.task_states(1).await.is_none());
        assert!(!manager.cancel_product_scraping(1).await);
    }

    #[tokio::test]
    async fn product_without_urls_yields_empty_results() {
        let manager = manager(ScriptedTransport::new());
        let results = manager.scrape_product(&Product::new(5, "Empty")).await.unwrap();
        assert!(results.is_empty());
    }
}
