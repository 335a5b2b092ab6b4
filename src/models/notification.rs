use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ProductId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    PriceUp {
        #[serde(with = "rust_decimal::serde::str")]
        old: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        new: Decimal,
        currency: Option<String>,
    },
    PriceDown {
        #[serde(with = "rust_decimal::serde::str")]
        old: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        new: Decimal,
        currency: Option<String>,
    },
    NameChange {
        old: String,
        new: String,
    },
    /// Monitoring degraded: `failures` consecutive failed checks.
    Warning {
        failures: u32,
        last_known: Option<String>,
        reason: String,
    },
}

impl NotificationKind {
    pub fn label(&self) -> &'static str {
        match self {
            NotificationKind::PriceUp { .. } => "price_up",
            NotificationKind::PriceDown { .. } => "price_down",
            NotificationKind::NameChange { .. } => "name_change",
            NotificationKind::Warning { .. } => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub product_id: ProductId,
    pub product_name: String,
    pub url: String,
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn summary(&self) -> String {
        match &self.kind {
            NotificationKind::PriceDown { old, new, currency } => format!(
                "Price drop for {}: {} -> {}{}",
                self.product_name,
                old,
                new,
                currency.as_deref().map(|c| format!(" {}", c)).unwrap_or_default()
            ),
            NotificationKind::PriceUp { old, new, currency } => format!(
                "Price increase for {}: {} -> {}{}",
                self.product_name,
                old,
                new,
                currency.as_deref().map(|c| format!(" {}", c)).unwrap_or_default()
            ),
            NotificationKind::NameChange { old, new } => {
                format!("Product renamed: \"{}\" -> \"{}\"", old, new)
            }
            NotificationKind::Warning { failures, reason, .. } => format!(
                "Monitoring {} failed {} times in a row: {}",
                self.product_name, failures, reason
            ),
        }
    }
}
