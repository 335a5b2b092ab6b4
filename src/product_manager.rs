use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::extractor::PriceExtractor;
use crate::loader::DocumentLoader;
use crate::models::{NotificationEvent, PriceValue, ProductId, TrackingStatus};
use crate::state_machine::{outcome_label, CheckFailure, CheckOutcome};

/// What a single check did, for callers of `check_now` and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckReport {
    pub product_id: ProductId,
    pub outcome: String,
    pub success: bool,
    pub display_name: Option<String>,
    pub price: Option<PriceValue>,
    pub error: Option<String>,
    pub status: TrackingStatus,
    pub failure_count: u32,
    pub events: Vec<NotificationEvent>,
    pub checked_at: DateTime<Utc>,
    pub total_time_ms: u64,
}

/// Load then extract, bounded by the per-check timeout. Never errors:
/// every failure comes back as a [`CheckFailure`] value.
pub struct ProductManager {
    loader: Arc<dyn DocumentLoader>,
    extractor: Arc<PriceExtractor>,
    check_timeout: Duration,
}

impl ProductManager {
    pub fn new(loader: Arc<dyn DocumentLoader>, extractor: Arc<PriceExtractor>, check_timeout: Duration) -> Self {
        Self {
            loader,
            extractor,
            check_timeout,
        }
    }

    pub fn extractor(&self) -> &PriceExtractor {
        &self.extractor
    }

    pub async fn check_url(&self, url: &str) -> CheckOutcome {
        let start_time = Instant::now();

        let outcome = match tokio::time::timeout(self.check_timeout, self.load_and_extract(url)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(url = %url, timeout_secs = self.check_timeout.as_secs(), "Check timed out");
                Err(CheckFailure::Timeout)
            }
        };

        let label = outcome_label(&outcome);
        metrics::histogram!("uatu_check_duration_seconds").record(start_time.elapsed().as_secs_f64());
        metrics::counter!("uatu_checks_total", "outcome" => label).increment(1);

        match &outcome {
            Ok(snapshot) => tracing::debug!(
                url = %url,
                outcome = label,
                price = %snapshot.price,
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                "Check completed"
            ),
            Err(failure) => tracing::debug!(url = %url, outcome = label, "Check failed: {}", failure),
        }

        outcome
    }

    async fn load_and_extract(&self, url: &str) -> CheckOutcome {
        let page = self.loader.load(url, self.extractor.load_mode()).await?;
        let snapshot = self.extractor.extract(&page).await?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionSettings;
    use crate::loader::{LoadFailure, LoadMode, LoadedPage, MockDocumentLoader};
    use mockall::predicate::eq;

    fn manager(loader: MockDocumentLoader, timeout: Duration) -> ProductManager {
        let extractor = PriceExtractor::from_settings(&ExtractionSettings::default()).unwrap();
        ProductManager::new(Arc::new(loader), Arc::new(extractor), timeout)
    }

    #[tokio::test]
    async fn test_check_url_success() {
        let mut loader = MockDocumentLoader::new();
        loader
            .expect_load()
            .with(eq("https://shop.example.com/kettle"), eq(LoadMode::Static))
            .times(1)
            .returning(|url, _| Ok(LoadedPage::from_html(url, r#"<h1>Kettle</h1><span class="price">$19.99</span>"#)));

        let outcome = manager(loader, Duration::from_secs(5))
            .check_url("https://shop.example.com/kettle")
            .await;

        let snapshot = outcome.unwrap();
        assert_eq!(snapshot.display_name, "Kettle");
        assert!(snapshot.price.valid);
    }

    #[tokio::test]
    async fn test_load_failure_is_a_value() {
        let mut loader = MockDocumentLoader::new();
        loader
            .expect_load()
            .returning(|_, _| Err(LoadFailure::Status(404)));

        let outcome = manager(loader, Duration::from_secs(5))
            .check_url("https://shop.example.com/gone")
            .await;
        assert_eq!(outcome.unwrap_err(), CheckFailure::Load(LoadFailure::Status(404)));
    }

    #[tokio::test]
    async fn test_extraction_failure_maps_through() {
        let mut loader = MockDocumentLoader::new();
        loader
            .expect_load()
            .returning(|url, _| Ok(LoadedPage::from_html(url, "<p>nothing</p>").with_redirect("https://shop.example.com/")));

        let outcome = manager(loader, Duration::from_secs(5))
            .check_url("https://shop.example.com/kettle")
            .await;
        assert_eq!(
            outcome.unwrap_err(),
            CheckFailure::NotFoundAfterRedirect {
                final_url: "https://shop.example.com/".to_string()
            }
        );
    }

    struct HangingLoader;

    #[async_trait::async_trait]
    impl DocumentLoader for HangingLoader {
        async fn load(&self, _url: &str, _mode: LoadMode) -> Result<LoadedPage, LoadFailure> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_a_failure() {
        let extractor = PriceExtractor::from_settings(&ExtractionSettings::default()).unwrap();
        let manager = ProductManager::new(Arc::new(HangingLoader), Arc::new(extractor), Duration::from_secs(90));

        let outcome = manager.check_url("https://shop.example.com/slow").await;
        assert_eq!(outcome.unwrap_err(), CheckFailure::Timeout);
    }
}
