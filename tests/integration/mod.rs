// Integration tests for Uatu Monitor
// These tests drive the real loader, extractor, scheduler and store together

pub mod extraction_tests;
pub mod product_lifecycle_tests;
pub mod scheduler_tests;

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uatu_monitor::{
    config::{ExtractionSettings, SchedulerConfig, ScraperConfig},
    extractor::PriceExtractor,
    loader::HttpLoader,
    models::NotificationEvent,
    product_manager::ProductManager,
    store::ProductStore,
    ProductScheduler,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Scraper settings that fail fast against the local mock server
pub fn get_scraper_config() -> ScraperConfig {
    ScraperConfig {
        retry_attempts: 1,
        retry_delay_ms: 10,
        request_timeout: 5,
        user_agent: "UatuMonitor-Test/1.0".to_string(),
        ..ScraperConfig::default()
    }
}

pub fn get_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        default_interval_secs: 3600,
        min_interval_secs: 1,
        max_concurrent_checks: 2,
        check_timeout_secs: 10,
        failure_threshold: 2,
        startup_delay_secs: 1,
    }
}

pub fn create_test_manager() -> anyhow::Result<ProductManager> {
    let loader = HttpLoader::new(get_scraper_config())?;
    let extractor = PriceExtractor::from_settings(&ExtractionSettings::default())?;
    Ok(ProductManager::new(
        Arc::new(loader),
        Arc::new(extractor),
        get_scheduler_config().check_timeout(),
    ))
}

/// A scheduler wired to an in-memory store, with handles to steer it
pub struct TestHarness {
    pub scheduler: ProductScheduler,
    pub store: ProductStore,
    pub online: watch::Sender<bool>,
    pub events: mpsc::UnboundedReceiver<NotificationEvent>,
}

pub async fn create_test_harness() -> anyhow::Result<TestHarness> {
    create_test_harness_with_store(ProductStore::in_memory().await?).await
}

pub async fn create_test_harness_with_store(store: ProductStore) -> anyhow::Result<TestHarness> {
    let (online, online_rx) = watch::channel(true);
    let (events_tx, events) = mpsc::unbounded_channel();
    let scheduler = ProductScheduler::new(
        create_test_manager()?,
        get_scheduler_config(),
        online_rx,
        events_tx,
        Some(store.clone()),
    );

    Ok(TestHarness {
        scheduler,
        store,
        online,
        events,
    })
}

/// Minimal product page with schema.org price markup
pub fn product_page(name: &str, price: &str) -> String {
    format!(
        r#"<html lang="en"><head><title>{name} | Shop</title></head>
<body><h1>{name}</h1><span itemprop="price">{price}</span></body></html>"#
    )
}

/// Replace whatever the server answers on `route` with `body`
pub async fn serve_page(server: &MockServer, route: &str, body: String) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Helper to wait for async operations
pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout_seconds: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_seconds);

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    false
}
