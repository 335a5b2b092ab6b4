use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{DocumentLoader, LoadFailure, LoadMode, LoadedPage, ScriptContext};
use crate::config::ScraperConfig;
use crate::models::PageId;
use crate::utils::error::AppError;

const READY_EXPRESSION: &str = r#"
(function() {
    if (document.readyState !== 'complete') { return false; }
    const links = Array.from(document.querySelectorAll('link[rel="stylesheet"]'));
    return links.every(function(link) { return link.sheet !== null; });
})()
"#;

const READY_POLL: Duration = Duration::from_millis(100);

pub struct BrowserPool {
    browsers: Vec<Arc<Browser>>,
    current_index: AtomicUsize,
}

impl BrowserPool {
    pub fn new(config: &ScraperConfig) -> Result<Self, AppError> {
        let mut browsers = Vec::new();

        for _ in 0..config.browser_instances.max(1) {
            let mut launch_options = LaunchOptions::default_builder()
                .headless(true)
                .sandbox(false) // Often needed in containerized environments
                .args(vec![
                    std::ffi::OsStr::new("--no-sandbox"),
                    std::ffi::OsStr::new("--disable-dev-shm-usage"),
                    std::ffi::OsStr::new("--disable-gpu"),
                    std::ffi::OsStr::new("--disable-extensions"),
                    std::ffi::OsStr::new("--disable-background-timer-throttling"),
                    std::ffi::OsStr::new("--disable-renderer-backgrounding"),
                ])
                .build()
                .map_err(|e| AppError::Internal(format!("Failed to create launch options: {}", e)))?;

            if let Some(chrome_path) = &config.chrome_path {
                launch_options.path = Some(std::path::PathBuf::from(chrome_path));
            }

            let browser = Browser::new(launch_options)
                .map_err(|e| AppError::Internal(format!("Failed to launch browser: {}", e)))?;

            browsers.push(Arc::new(browser));
        }

        Ok(Self {
            browsers,
            current_index: AtomicUsize::new(0),
        })
    }

    pub fn get_browser(&self) -> Arc<Browser> {
        let index = self.current_index.fetch_add(1, Ordering::Relaxed) % self.browsers.len();
        self.browsers[index].clone()
    }
}

/// Loader backed by headless Chrome. Ready-mode pages keep their tab open
/// as a [`ScriptContext`] until the page is dropped.
pub struct ChromeLoader {
    pool: BrowserPool,
    config: ScraperConfig,
}

impl ChromeLoader {
    pub fn new(config: ScraperConfig) -> Result<Self, AppError> {
        let pool = BrowserPool::new(&config)?;
        Ok(Self { pool, config })
    }

    fn navigate(browser: Arc<Browser>, url: &str, user_agent: &str, timeout: Duration) -> Result<Arc<Tab>, LoadFailure> {
        let tab = browser
            .new_tab()
            .map_err(|e| LoadFailure::Browser(format!("Failed to create tab: {}", e)))?;
        tab.set_default_timeout(timeout);

        tab.set_user_agent(user_agent, None, None)
            .map_err(|e| LoadFailure::Browser(format!("Failed to set user agent: {}", e)))?;

        let navigated = tab.navigate_to(url).and_then(|tab| tab.wait_until_navigated());
        if let Err(e) = navigated {
            let _ = tab.close(true);
            let message = e.to_string();
            return Err(if message.to_lowercase().contains("timed out") {
                LoadFailure::Timeout
            } else {
                LoadFailure::Connection(message)
            });
        }

        Ok(tab)
    }

    async fn wait_until_ready(script: &ChromeScript, timeout: Duration) -> Result<(), LoadFailure> {
        let deadline = Instant::now() + timeout;
        loop {
            if script.evaluate(READY_EXPRESSION).await?.as_deref() == Some("true") {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LoadFailure::Timeout);
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }
}

#[async_trait]
impl DocumentLoader for ChromeLoader {
    async fn load(&self, url: &str, mode: LoadMode) -> Result<LoadedPage, LoadFailure> {
        let browser = self.pool.get_browser();
        let timeout = self.config.request_timeout();
        let user_agent = self.config.user_agent.clone();
        let target = url.to_string();

        let tab = tokio::task::spawn_blocking(move || Self::navigate(browser, &target, &user_agent, timeout))
            .await
            .map_err(|e| LoadFailure::Browser(e.to_string()))??;

        let script = Arc::new(ChromeScript { tab: Arc::clone(&tab) });
        if mode == LoadMode::Ready {
            Self::wait_until_ready(&script, timeout).await?;
        }

        let content_tab = Arc::clone(&tab);
        let (final_url, html) = tokio::task::spawn_blocking(move || {
            let html = content_tab
                .get_content()
                .map_err(|e| LoadFailure::Browser(format!("Failed to get page content: {}", e)))?;
            Ok::<_, LoadFailure>((content_tab.get_url(), html))
        })
        .await
        .map_err(|e| LoadFailure::Browser(e.to_string()))??;

        let final_url = if final_url.is_empty() { url.to_string() } else { final_url };
        let redirected = url::Url::parse(url)
            .ok()
            .zip(url::Url::parse(&final_url).ok())
            .map(|(a, b)| a != b)
            .unwrap_or(false);

        Ok(LoadedPage {
            page_id: PageId::new(),
            requested_url: url.to_string(),
            final_url,
            redirected,
            html,
            mode,
            // Static pages drop the context here, closing the tab
            script: match mode {
                LoadMode::Ready => Some(script as Arc<dyn ScriptContext>),
                LoadMode::Static => None,
            },
        })
    }
}

pub struct ChromeScript {
    tab: Arc<Tab>,
}

#[async_trait]
impl ScriptContext for ChromeScript {
    async fn evaluate(&self, expression: &str) -> Result<Option<String>, LoadFailure> {
        let tab = Arc::clone(&self.tab);
        let expression = expression.to_string();

        let result = tokio::task::spawn_blocking(move || tab.evaluate(&expression, false))
            .await
            .map_err(|e| LoadFailure::Browser(e.to_string()))?
            .map_err(|e| LoadFailure::Browser(format!("Script evaluation failed: {}", e)))?;

        Ok(result.value.and_then(|value| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }))
    }
}

impl Drop for ChromeScript {
    fn drop(&mut self) {
        let _ = self.tab.close(true);
    }
}
