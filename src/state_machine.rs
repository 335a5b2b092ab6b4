//! Pure product transitions: `(product, check outcome) -> (product, events)`.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::extractor::ExtractionFailure;
use crate::loader::LoadFailure;
use crate::models::{NotificationEvent, NotificationKind, Product, ProductSnapshot, TrackingStatus};

/// Why a check did not produce a snapshot. Every variant is recoverable and
/// only counts towards the failure threshold.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckFailure {
    #[error("page load failed: {0}")]
    Load(#[from] LoadFailure),

    #[error("no extraction strategy located a price")]
    Extraction,

    #[error("redirected to {final_url} and no product markup was found")]
    NotFoundAfterRedirect { final_url: String },

    #[error("check timed out")]
    Timeout,
}

impl From<ExtractionFailure> for CheckFailure {
    fn from(failure: ExtractionFailure) -> Self {
        match failure {
            ExtractionFailure::NotLocated => CheckFailure::Extraction,
            ExtractionFailure::NotFoundAfterRedirect { final_url } => CheckFailure::NotFoundAfterRedirect { final_url },
        }
    }
}

pub type CheckOutcome = Result<ProductSnapshot, CheckFailure>;

/// Outcome classification used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Load,
    Extraction,
    InvalidPrice,
    NotFoundAfterRedirect,
    Timeout,
}

impl FailureKind {
    pub fn of(outcome: &CheckOutcome) -> Option<FailureKind> {
        match outcome {
            Ok(snapshot) if snapshot.price.valid => None,
            Ok(_) => Some(FailureKind::InvalidPrice),
            Err(CheckFailure::Load(_)) => Some(FailureKind::Load),
            Err(CheckFailure::Extraction) => Some(FailureKind::Extraction),
            Err(CheckFailure::NotFoundAfterRedirect { .. }) => Some(FailureKind::NotFoundAfterRedirect),
            Err(CheckFailure::Timeout) => Some(FailureKind::Timeout),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Load => "load_failure",
            FailureKind::Extraction => "extraction_failure",
            FailureKind::InvalidPrice => "invalid_price",
            FailureKind::NotFoundAfterRedirect => "not_found_after_redirect",
            FailureKind::Timeout => "timeout",
        }
    }
}

/// Label for an outcome: `success` or the failure kind.
pub fn outcome_label(outcome: &CheckOutcome) -> &'static str {
    FailureKind::of(outcome).map(|kind| kind.as_str()).unwrap_or("success")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatePolicy {
    /// Consecutive failures after which the product goes to `Error`.
    pub failure_threshold: u32,
}

impl Default for StatePolicy {
    fn default() -> Self {
        Self { failure_threshold: 3 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub product: Product,
    pub events: Vec<NotificationEvent>,
}

/// The status a product rests in outside of a check. `Updating` never
/// survives a restart or an abandoned check, so it is resolved from history.
pub fn settled_status(product: &Product, policy: &StatePolicy) -> TrackingStatus {
    if !product.tracked {
        return TrackingStatus::Disabled;
    }
    match product.status {
        TrackingStatus::Updating if product.failure_count >= policy.failure_threshold => TrackingStatus::Error,
        TrackingStatus::Updating if product.snapshot.is_some() => TrackingStatus::Tracking,
        TrackingStatus::Updating => TrackingStatus::Idle,
        other => other,
    }
}

/// Apply one check outcome. Disabled products are returned untouched.
pub fn apply(product: &Product, outcome: &CheckOutcome, policy: &StatePolicy, now: DateTime<Utc>) -> Transition {
    if product.status == TrackingStatus::Disabled {
        return Transition {
            product: product.clone(),
            events: Vec::new(),
        };
    }

    match outcome {
        Ok(snapshot) if snapshot.price.valid => on_success(product, snapshot, now),
        Ok(snapshot) => on_failure(product, format!("{}", snapshot.price), policy, now),
        Err(failure) => on_failure(product, failure.to_string(), policy, now),
    }
}

fn on_success(product: &Product, snapshot: &ProductSnapshot, now: DateTime<Utc>) -> Transition {
    let mut next = product.clone();
    next.snapshot = Some(snapshot.detached());
    next.failure_count = 0;
    next.last_error = None;
    next.status = if product.tracked {
        TrackingStatus::Tracking
    } else {
        TrackingStatus::Idle
    };
    next.last_checked = Some(now);
    next.updated_at = now;

    // First successful extraction only seeds
    let Some(previous) = product.snapshot.as_ref() else {
        return Transition {
            product: next,
            events: Vec::new(),
        };
    };

    let mut events = Vec::new();
    let old = previous.price.decimal;
    let new = snapshot.price.decimal;
    let currency = snapshot
        .price
        .currency_code
        .clone()
        .or_else(|| previous.price.currency_code.clone());

    if new < old {
        events.push(event(&next, NotificationKind::PriceDown { old, new, currency }, now));
    } else if new > old {
        events.push(event(&next, NotificationKind::PriceUp { old, new, currency }, now));
    }

    if name_changed(&previous.display_name, &snapshot.display_name) {
        events.push(event(
            &next,
            NotificationKind::NameChange {
                old: previous.display_name.clone(),
                new: snapshot.display_name.clone(),
            },
            now,
        ));
    }

    Transition { product: next, events }
}

fn on_failure(product: &Product, reason: String, policy: &StatePolicy, now: DateTime<Utc>) -> Transition {
    let mut next = product.clone();
    next.failure_count = product.failure_count.saturating_add(1);
    next.last_error = Some(reason.clone());
    next.last_checked = Some(now);
    next.updated_at = now;

    let mut events = Vec::new();
    if next.failure_count >= policy.failure_threshold {
        next.status = TrackingStatus::Error;
        // Only the crossing warns; later failures stay quiet in `Error`
        if next.failure_count == policy.failure_threshold {
            let last_known = product.snapshot.as_ref().map(|s| s.price.to_string());
            events.push(event(
                &next,
                NotificationKind::Warning {
                    failures: next.failure_count,
                    last_known,
                    reason,
                },
                now,
            ));
        }
    } else {
        next.status = settled_status(product, policy);
    }

    Transition { product: next, events }
}

fn normalized_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Names compare after whitespace and case folding. A page that lost its
/// title is not a rename.
fn name_changed(old: &str, new: &str) -> bool {
    let (old, new) = (normalized_name(old), normalized_name(new));
    !old.is_empty() && !new.is_empty() && old != new
}

fn event(product: &Product, kind: NotificationKind, now: DateTime<Utc>) -> NotificationEvent {
    NotificationEvent {
        id: Uuid::new_v4(),
        product_id: product.id.clone(),
        product_name: product.display_name().to_string(),
        url: product.url.clone(),
        kind,
        timestamp: now,
    }
}
