use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::models::ProductSnapshot;

/// Stable product identifier derived from the product URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn for_url(url: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, url.trim().as_bytes()).simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ProductId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ProductId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingStatus {
    Idle,
    Tracking,
    Updating,
    Error,
    Disabled,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Idle => "idle",
            TrackingStatus::Tracking => "tracking",
            TrackingStatus::Updating => "updating",
            TrackingStatus::Error => "error",
            TrackingStatus::Disabled => "disabled",
        }
    }
}

impl std::str::FromStr for TrackingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(TrackingStatus::Idle),
            "tracking" => Ok(TrackingStatus::Tracking),
            "updating" => Ok(TrackingStatus::Updating),
            "error" => Ok(TrackingStatus::Error),
            "disabled" => Ok(TrackingStatus::Disabled),
            other => Err(format!("unknown tracking status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub url: String,

    // Last successful observation
    pub snapshot: Option<ProductSnapshot>,

    // Status
    pub status: TrackingStatus,
    pub tracked: bool,
    pub failure_count: u32,
    pub last_error: Option<String>,

    // Schedule
    pub poll_interval_secs: u64,
    pub last_checked: Option<DateTime<Utc>>,

    // Metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewProduct {
    #[validate(url, custom(function = "validate_http_scheme"))]
    pub url: String,
    #[validate(range(min = 1))]
    pub poll_interval_secs: Option<u64>,
}

fn validate_http_scheme(url: &str) -> Result<(), ValidationError> {
    match url::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(()),
        _ => Err(ValidationError::new("http_scheme")),
    }
}

impl Product {
    pub fn new(new_product: NewProduct, default_interval_secs: u64) -> Self {
        let now = Utc::now();
        let url = new_product.url.trim().to_string();
        Self {
            id: ProductId::for_url(&url),
            url,
            snapshot: None,
            status: TrackingStatus::Idle,
            tracked: true,
            failure_count: 0,
            last_error: None,
            poll_interval_secs: new_product.poll_interval_secs.unwrap_or(default_interval_secs),
            last_checked: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Products that are neither untracked nor disabled get a timer.
    pub fn is_schedulable(&self) -> bool {
        self.tracked && self.status != TrackingStatus::Disabled
    }

    pub fn display_name(&self) -> &str {
        self.snapshot
            .as_ref()
            .map(|s| s.display_name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.url)
    }
}
