//! Scrape manager behaviour against a scripted transport
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rust_decimal::Decimal;

use price_tracker_lib::domain::{
    HealthStatus, ScrapeStage, SiteReachability, TaskState, group_results_by_status,
};
use price_tracker_lib::infrastructure::RetryPolicy;
use price_tracker_lib::test_utils::{ScriptedTransport, pages, test_config};
use price_tracker_lib::{AppConfig, Product, ScrapeError, ScrapeManager};

const JJ_URL: &str = "https://www.jjfoodservice.com/product/London-Enfield/BAC002/";
const ATOZ_URL: &str = "https://www.atoz-catering.co.uk/products/product/rapeseed-oil-20l";
const AMAZON_URL: &str = "https://www.amazon.co.uk/dp/B07KITCHEN";

fn manager_with(config: AppConfig, transport: &Arc<ScriptedTransport>) -> ScrapeManager {
    ScrapeManager::builder(config)
        .transport(transport.clone())
        .retry_policy(RetryPolicy::immediate())
        .build()
        .expect("valid test configuration")
}

fn jj_product(id: i64) -> Product {
    Product::new(id, format!("Product {id}"))
        .with_url("jjfoodservice", format!("https://www.jjfoodservice.com/product/{id}"))
}

#[tokio::test(start_paused = true)]
async fn never_exceeds_the_concurrency_limit() {
    let mut transport = ScriptedTransport::new().with_latency(Duration::from_secs(1));
    for id in 1..=6 {
        transport = transport.with_body(
            &format!("https://www.jjfoodservice.com/product/{id}"),
            pages::JJ_FOODSERVICE,
        );
    }
    let transport = Arc::new(transport);
    let manager = manager_with(test_config(2), &transport);

    let products: Vec<Product> = (1..=6).map(jj_product).collect();
    let results = join_all(products.iter().map(|p| manager.scrape_product(p))).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(transport.calls(), 6);
    assert!(transport.max_in_flight() <= 2, "saw {} in flight", transport.max_in_flight());
    assert_eq!(transport.max_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_for_one_product_share_a_run() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_latency(Duration::from_secs(2))
            .with_body(JJ_URL, pages::JJ_FOODSERVICE),
    );
    let manager = manager_with(test_config(4), &transport);
    let product = Product::new(3, "Bacon").with_url("jjfoodservice", JJ_URL);

    let (first, second) = tokio::join!(
        manager.scrape_product(&product),
        manager.scrape_product(&product)
    );

    assert_eq!(transport.calls_to(JJ_URL), 1);
    let first = first.unwrap();
    assert_eq!(first, second.unwrap());
    assert_eq!(first["jjfoodservice"].price, Some(Decimal::new(1179, 2)));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_network_activity() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_latency(Duration::from_secs(30))
            .with_body(JJ_URL, pages::JJ_FOODSERVICE),
    );
    let manager = manager_with(test_config(2), &transport);
    let product = Product::new(9, "Bacon").with_url("jjfoodservice", JJ_URL);

    let handle = tokio::spawn({
        let manager = manager.clone();
        let product = product.clone();
        async move { manager.scrape_product(&product).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(manager.active_scraping_tasks().await, vec![9]);
    let states = manager.task_states(9).await.unwrap();
    assert_eq!(states[0].state, TaskState::Running(ScrapeStage::Fetching));

    assert!(manager.cancel_product_scraping(9).await);
    assert!(manager.active_scraping_tasks().await.is_empty());
    assert_eq!(handle.await.unwrap(), Err(ScrapeError::Cancelled));

    let calls = transport.calls();
    assert_eq!(calls, 1);
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.calls(), calls);
    assert_eq!(transport.in_flight(), 0);
    assert!(!manager.cancel_product_scraping(9).await);
}

#[tokio::test(start_paused = true)]
async fn queued_sites_wait_for_a_permit() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_latency(Duration::from_secs(10))
            .with_body(JJ_URL, pages::JJ_FOODSERVICE)
            .with_body(ATOZ_URL, pages::ATOZ_CATERING),
    );
    let manager = manager_with(test_config(1), &transport);
    let product = Product::new(4, "Oil")
        .with_url("jjfoodservice", JJ_URL)
        .with_url("atoz_catering", ATOZ_URL);

    let handle = tokio::spawn({
        let manager = manager.clone();
        async move { manager.scrape_product(&product).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    let states: Vec<TaskState> = manager
        .task_states(4)
        .await
        .unwrap()
        .into_iter()
        .map(|task| task.state)
        .collect();
    assert!(states.contains(&TaskState::Running(ScrapeStage::Fetching)));
    assert!(states.contains(&TaskState::Pending));

    let results = handle.await.unwrap().unwrap();
    assert!(results.values().all(|entry| entry.success));
    assert_eq!(transport.max_in_flight(), 1);
}

#[tokio::test]
async fn site_failures_are_isolated_and_ordered() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_body(JJ_URL, pages::JJ_FOODSERVICE)
            .with_status(ATOZ_URL, 500)
            .with_body(AMAZON_URL, pages::NO_PRICE),
    );
    let manager = manager_with(test_config(3), &transport);
    let product = Product::new(1, "Mixed")
        .with_url("tesco", "https://www.tesco.com/groceries/product/1")
        .with_url("jjfoodservice", JJ_URL)
        .with_url("atoz_catering", ATOZ_URL)
        .with_url("amazon_uk", AMAZON_URL);

    let results = manager.scrape_product(&product).await.unwrap();

    let sites: Vec<&str> = results.keys().map(String::as_str).collect();
    assert_eq!(sites, vec!["tesco", "jjfoodservice", "atoz_catering", "amazon_uk"]);

    assert_eq!(results["tesco"].error_kind.as_deref(), Some("unsupported_site"));

    let jj = &results["jjfoodservice"];
    assert!(jj.success);
    assert_eq!(jj.price, Some(Decimal::new(1179, 2)));
    assert_eq!(jj.currency, "GBP");
    assert_eq!(jj.title.as_deref(), Some("Smoked Back Bacon 2kg"));

    let atoz = &results["atoz_catering"];
    assert!(!atoz.success);
    assert_eq!(atoz.error_kind.as_deref(), Some("network_failure"));
    assert_eq!(transport.calls_to(ATOZ_URL), 3);

    let amazon = &results["amazon_uk"];
    assert!(!amazon.success);
    assert_eq!(amazon.error_kind.as_deref(), Some("no_price_found"));
    assert_eq!(amazon.url, AMAZON_URL);
}

#[tokio::test]
async fn disabled_sites_are_not_fetched() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_body(JJ_URL, pages::JJ_FOODSERVICE)
            .with_status(AMAZON_URL, 403),
    );
    let mut config = test_config(2);
    config.sites.get_mut("jjfoodservice").unwrap().enabled = false;
    let manager = manager_with(config, &transport);
    let product = Product::new(2, "Bacon")
        .with_url("jjfoodservice", JJ_URL)
        .with_url("amazon_uk", AMAZON_URL);

    let results = manager.scrape_product(&product).await.unwrap();

    assert_eq!(results["jjfoodservice"].error_kind.as_deref(), Some("configuration_error"));
    assert_eq!(transport.calls_to(JJ_URL), 0);

    let grouped = group_results_by_status(&results);
    assert!(grouped.successful.is_empty());
    assert_eq!(grouped.blocked.len(), 1);
    assert_eq!(grouped.blocked[0].0, "amazon_uk");
    assert_eq!(grouped.failed.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn batch_scrape_keeps_product_order_and_spacing() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_body("https://www.jjfoodservice.com/product/1", pages::JJ_FOODSERVICE)
            .with_body("https://www.jjfoodservice.com/product/2", pages::JJ_FOODSERVICE)
            .with_status("https://www.jjfoodservice.com/product/3", 404),
    );
    let mut config = test_config(2);
    config.scraping.delay_between_requests = 2.0;
    let manager = manager_with(config, &transport);
    let products: Vec<Product> = (1..=3).map(jj_product).collect();

    let started = tokio::time::Instant::now();
    let results = manager.scrape_all_products(&products).await;

    assert!(started.elapsed() >= Duration::from_secs(4));
    assert_eq!(results.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(results[&1_i64]["jjfoodservice"].success);
    assert!(!results[&3_i64]["jjfoodservice"].success);
    assert!(manager.active_scraping_tasks().await.is_empty());
}

#[tokio::test]
async fn health_check_reports_each_enabled_site() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_status("https://www.jjfoodservice.com", 200)
            .with_status("https://www.atoz-catering.co.uk", 503),
    );
    let manager = manager_with(test_config(2), &transport);

    let report = manager.health_check().await;

    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.enabled_sites, 3);
    assert_eq!(report.active_tasks, 0);
    assert_eq!(report.site_checks["jjfoodservice"], SiteReachability::Accessible);
    assert_eq!(report.site_checks["atoz_catering"], SiteReachability::Inaccessible);
    assert!(matches!(report.site_checks["amazon_uk"], SiteReachability::Error(_)));
    assert!(report.site_checks["amazon_uk"].to_string().starts_with("error:"));
}

#[tokio::test]
async fn health_check_all_accessible_is_healthy() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .with_status("https://www.jjfoodservice.com", 200)
            .with_status("https://www.atoz-catering.co.uk", 200)
            .with_status("https://www.amazon.co.uk", 200),
    );
    let mut config = test_config(1);
    config.sites.get_mut("amazon_uk").unwrap().enabled = false;
    let manager = manager_with(config, &transport);

    let report = manager.health_check().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.enabled_sites, 2);
    assert!(!report.site_checks.contains_key("amazon_uk"));
    assert_eq!(transport.calls_to("https://www.amazon.co.uk"), 0);
}
