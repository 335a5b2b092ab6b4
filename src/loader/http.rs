use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use url::Url;

use super::{DocumentLoader, LoadFailure, LoadMode, LoadedPage};
use crate::config::ScraperConfig;
use crate::models::PageId;
use crate::utils::error::AppError;

/// Plain HTTP loader. Pages never carry a script context, so script
/// evaluated strategies are skipped for products loaded this way.
pub struct HttpLoader {
    client: Client,
    config: ScraperConfig,
}

impl HttpLoader {
    pub fn new(config: ScraperConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .redirect(Policy::limited(10))
            .build()?;
        Ok(Self { client, config })
    }

    async fn fetch_once(&self, url: &str) -> Result<(String, String), LoadFailure> {
        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(LoadFailure::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(classify)?;
        Ok((final_url, body))
    }
}

fn classify(err: reqwest::Error) -> LoadFailure {
    if err.is_timeout() {
        LoadFailure::Timeout
    } else {
        LoadFailure::Connection(err.to_string())
    }
}

fn is_redirect(requested: &str, final_url: &str) -> bool {
    match (Url::parse(requested), Url::parse(final_url)) {
        (Ok(a), Ok(b)) => a != b,
        _ => requested != final_url,
    }
}

#[async_trait]
impl DocumentLoader for HttpLoader {
    async fn load(&self, url: &str, mode: LoadMode) -> Result<LoadedPage, LoadFailure> {
        let factor = (self.config.retry_delay_ms / 2).max(1);
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .map(jitter)
            .take(self.config.retry_attempts as usize);

        // Only connection-level failures are worth retrying within one check
        let (final_url, html) = RetryIf::start(
            strategy,
            || self.fetch_once(url),
            |e: &LoadFailure| matches!(e, LoadFailure::Connection(_)),
        )
        .await?;

        if mode == LoadMode::Ready {
            tracing::debug!(url, "Ready mode requested over plain HTTP; no script context");
        }

        Ok(LoadedPage {
            page_id: PageId::new(),
            requested_url: url.to_string(),
            redirected: is_redirect(url, &final_url),
            final_url,
            html,
            mode,
            script: None,
        })
    }
}
