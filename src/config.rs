use config::{Config, ConfigError, Environment, File};
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scraper: ScraperConfig,
    pub scheduler: SchedulerConfig,
    pub extraction: ExtractionSettings,
    pub connectivity: ConnectivityConfig,
    pub storage: StorageConfig,
    pub notifications: NotificationsConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Use headless Chrome instead of plain HTTP for page loads.
    pub use_browser: bool,
    pub browser_instances: usize,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub request_timeout: u64,
    pub user_agent: String,
    pub chrome_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub default_interval_secs: u64,
    pub min_interval_secs: u64,
    pub max_concurrent_checks: usize,
    pub check_timeout_secs: u64,
    pub failure_threshold: u32,
    /// Delay before the first tick of products restored at startup.
    pub startup_delay_secs: u64,
}

/// One (selector, optional attribute) entry of a candidate chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSetting {
    pub selector: String,
    #[serde(default)]
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub price_attributes: Vec<CandidateSetting>,
    pub price_scripts: Vec<String>,
    pub price_text: Vec<String>,
    pub name: Vec<CandidateSetting>,
    pub currency_symbols: Vec<String>,
    pub default_currency: Option<String>,
    /// Regex used to recover a price from attribute values when a text
    /// node is empty. The first capture group is taken when present.
    pub attribute_price_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub enabled: bool,
    pub probe_urls: Vec<String>,
    pub interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub confirmations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: Option<String>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            use_browser: false,
            browser_instances: 2,
            retry_attempts: 2,
            retry_delay_ms: 500,
            request_timeout: 30,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) UatuMonitor/0.2".to_string(),
            chrome_path: None,
        }
    }
}

impl ScraperConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: 3600,
            min_interval_secs: 60,
            max_concurrent_checks: 4,
            check_timeout_secs: 90,
            failure_threshold: 3,
            startup_delay_secs: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

fn candidate(selector: &str, attribute: Option<&str>) -> CandidateSetting {
    CandidateSetting {
        selector: selector.to_string(),
        attribute: attribute.map(str::to_string),
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            price_attributes: vec![
                candidate("meta[itemprop='price']", Some("content")),
                candidate("meta[property='product:price:amount']", Some("content")),
                candidate("meta[property='og:price:amount']", Some("content")),
                candidate("[itemprop='price'][content]", Some("content")),
                candidate("[data-price]", Some("data-price")),
                candidate("[data-price-amount]", Some("data-price-amount")),
            ],
            price_scripts: Vec::new(),
            price_text: vec![
                "[itemprop='price']".to_string(),
                ".price-current".to_string(),
                ".product-price".to_string(),
                ".sale-price".to_string(),
                ".price".to_string(),
            ],
            name: vec![
                candidate("meta[property='og:title']", Some("content")),
                candidate("[itemprop='name']", None),
                candidate("h1", None),
                candidate("title", None),
            ],
            currency_symbols: Vec::new(),
            default_currency: None,
            attribute_price_pattern: r"(\d[\d.,]*\d|\d)".to_string(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_urls: vec![
                "https://www.google.com/generate_204".to_string(),
                "https://1.1.1.1".to_string(),
            ],
            interval_secs: 30,
            probe_timeout_secs: 5,
            confirmations: 2,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/uatu-monitor.db?mode=rwc".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, port: 9001 }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "UATU_"
            .add_source(Environment::with_prefix("UATU").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        if config.scraper.chrome_path.is_none() {
            config.scraper.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Scraper
        if self.scraper.request_timeout == 0 {
            return Err(ConfigError::Message("Scraper request_timeout must be greater than 0".into()));
        }
        if self.scraper.use_browser && self.scraper.browser_instances == 0 {
            return Err(ConfigError::Message("Scraper browser_instances must be greater than 0".into()));
        }

        // Scheduler
        if self.scheduler.max_concurrent_checks == 0 {
            return Err(ConfigError::Message("Scheduler max_concurrent_checks must be greater than 0".into()));
        }
        if self.scheduler.check_timeout_secs == 0 {
            return Err(ConfigError::Message("Scheduler check_timeout_secs must be greater than 0".into()));
        }
        if self.scheduler.failure_threshold == 0 {
            return Err(ConfigError::Message("Scheduler failure_threshold must be greater than 0".into()));
        }
        if self.scheduler.min_interval_secs == 0 {
            return Err(ConfigError::Message("Scheduler min_interval_secs must be greater than 0".into()));
        }
        if self.scheduler.default_interval_secs < self.scheduler.min_interval_secs {
            return Err(ConfigError::Message(
                "Scheduler default_interval_secs cannot be below min_interval_secs".into(),
            ));
        }

        // Extraction
        self.extraction.validate()?;

        // Connectivity
        if self.connectivity.enabled {
            if self.connectivity.confirmations == 0 {
                return Err(ConfigError::Message("Connectivity confirmations must be greater than 0".into()));
            }
            if self.connectivity.interval_secs == 0 || self.connectivity.probe_timeout_secs == 0 {
                return Err(ConfigError::Message("Connectivity intervals must be greater than 0".into()));
            }
            if self.connectivity.probe_urls.is_empty() {
                return Err(ConfigError::Message("Connectivity probe_urls cannot be empty".into()));
            }
            for probe in &self.connectivity.probe_urls {
                if Url::parse(probe).is_err() {
                    return Err(ConfigError::Message(format!("Invalid connectivity probe URL: {}", probe)));
                }
            }
        }

        // Notifications
        if let Some(webhook) = &self.notifications.webhook_url {
            if Url::parse(webhook).is_err() {
                return Err(ConfigError::Message("Invalid notification webhook URL".into()));
            }
        }

        // Metrics
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        Ok(())
    }
}

impl ExtractionSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.price_attributes.is_empty() && self.price_scripts.is_empty() && self.price_text.is_empty() {
            return Err(ConfigError::Message("Extraction needs at least one price candidate".into()));
        }

        let selectors = self
            .price_attributes
            .iter()
            .chain(self.name.iter())
            .map(|c| c.selector.as_str())
            .chain(self.price_text.iter().map(String::as_str));
        for selector in selectors {
            if Selector::parse(selector).is_err() {
                return Err(ConfigError::Message(format!("Invalid CSS selector: {}", selector)));
            }
        }

        if let Err(e) = Regex::new(&self.attribute_price_pattern) {
            return Err(ConfigError::Message(format!("Invalid attribute_price_pattern: {}", e)));
        }

        if self.currency_symbols.iter().any(|s| s.trim().is_empty()) {
            return Err(ConfigError::Message("Currency symbols cannot be blank".into()));
        }

        Ok(())
    }
}
