use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use crate::config::SchedulerConfig;
use crate::models::{NewProduct, NotificationEvent, Product, ProductId, TrackingStatus};
use crate::product_manager::{CheckReport, ProductManager};
use crate::state_machine::{apply, outcome_label, settled_status, FailureKind, StatePolicy};
use crate::store::ProductStore;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Scheduled,
    Manual,
}

impl Trigger {
    fn as_str(&self) -> &'static str {
        match self {
            Trigger::Scheduled => "scheduled",
            Trigger::Manual => "manual",
        }
    }
}

struct Timer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Everything the scheduler holds for one product. `product` is only
/// mutated while `check_lock` is held or by explicit user actions, and a
/// cancelled `removed` token means the entry is gone for good.
struct ProductEntry {
    product: Mutex<Product>,
    check_lock: Mutex<()>,
    removed: CancellationToken,
    timer: std::sync::Mutex<Option<Timer>>,
}

impl ProductEntry {
    fn new(product: Product) -> Self {
        Self {
            product: Mutex::new(product),
            check_lock: Mutex::new(()),
            removed: CancellationToken::new(),
            timer: std::sync::Mutex::new(None),
        }
    }

    fn replace_timer(&self, timer: Option<Timer>) {
        let previous = match self.timer.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, timer),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), timer),
        };
        if let Some(previous) = previous {
            // An in-flight check finishes; the loop exits at its next wait
            previous.cancel.cancel();
        }
    }

    fn take_timer(&self) -> Option<Timer> {
        match self.timer.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

struct Inner {
    manager: ProductManager,
    policy: StatePolicy,
    limiter: Arc<Semaphore>,
    online: watch::Receiver<bool>,
    products: RwLock<HashMap<ProductId, Arc<ProductEntry>>>,
    events: mpsc::UnboundedSender<NotificationEvent>,
    store: Option<ProductStore>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
}

/// Owns the tracked products and runs one timer loop per schedulable
/// product. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ProductScheduler {
    inner: Arc<Inner>,
}

impl ProductScheduler {
    pub fn new(
        manager: ProductManager,
        config: SchedulerConfig,
        online: watch::Receiver<bool>,
        events: mpsc::UnboundedSender<NotificationEvent>,
        store: Option<ProductStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                manager,
                policy: StatePolicy {
                    failure_threshold: config.failure_threshold,
                },
                limiter: Arc::new(Semaphore::new(config.max_concurrent_checks.max(1))),
                online,
                products: RwLock::new(HashMap::new()),
                events,
                store,
                config,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn policy(&self) -> StatePolicy {
        self.inner.policy
    }

    /// Reinstate persisted products. `Updating` is settled, intervals below
    /// the minimum are raised to it, disabled products are kept but not
    /// scheduled, and the rest get their first tick after the startup delay.
    pub async fn restore(&self, products: Vec<Product>) -> usize {
        let delay = Duration::from_secs(self.inner.config.startup_delay_secs);
        let mut restored = 0;

        for mut product in products {
            product.status = settled_status(&product, &self.inner.policy);
            if product.poll_interval_secs < self.inner.config.min_interval_secs {
                tracing::warn!(
                    product_id = %product.id,
                    stored_secs = product.poll_interval_secs,
                    min_secs = self.inner.config.min_interval_secs,
                    "Restored poll interval below minimum; clamping"
                );
                product.poll_interval_secs = self.inner.config.min_interval_secs;
            }

            let entry = {
                let mut map = self.inner.products.write().await;
                if map.contains_key(&product.id) {
                    tracing::warn!(product_id = %product.id, "Skipping duplicate product during restore");
                    continue;
                }
                let entry = Arc::new(ProductEntry::new(product.clone()));
                map.insert(product.id.clone(), Arc::clone(&entry));
                entry
            };

            if product.is_schedulable() {
                self.spawn_timer(&entry, delay);
            }
            restored += 1;
        }

        self.update_tracked_gauge().await;
        tracing::info!("Restored {} products", restored);
        restored
    }

    /// Validate, seed with one synchronous check, then start polling. The
    /// product is refused when the seed check does not yield a valid price.
    pub async fn add_product(&self, new_product: NewProduct) -> Result<Product, AppError> {
        new_product.validate()?;

        let config = &self.inner.config;
        let interval = new_product.poll_interval_secs.unwrap_or(config.default_interval_secs);
        if interval < config.min_interval_secs {
            return Err(AppError::Validation(format!(
                "poll interval {}s is below the minimum of {}s",
                interval, config.min_interval_secs
            )));
        }

        let product = Product::new(new_product, config.default_interval_secs);
        if self.inner.products.read().await.contains_key(&product.id) {
            return Err(AppError::Duplicate { url: product.url });
        }

        tracing::info!(product_id = %product.id, url = %product.url, "Seeding new product");
        let outcome = {
            let _permit = self.acquire_permit().await?;
            self.inner.manager.check_url(&product.url).await
        };

        if let Some(kind) = FailureKind::of(&outcome) {
            let reason = match &outcome {
                Ok(snapshot) => snapshot.price.to_string(),
                Err(failure) => failure.to_string(),
            };
            tracing::warn!(url = %product.url, kind = kind.as_str(), "Seed check failed: {}", reason);
            return Err(AppError::SeedFailed { url: product.url, reason });
        }

        let seeded = apply(&product, &outcome, &self.inner.policy, Utc::now()).product;

        let entry = {
            let mut map = self.inner.products.write().await;
            if map.contains_key(&seeded.id) {
                return Err(AppError::Duplicate { url: seeded.url });
            }
            let entry = Arc::new(ProductEntry::new(seeded.clone()));
            map.insert(seeded.id.clone(), Arc::clone(&entry));
            entry
        };

        self.persist(&seeded).await;
        if let (Some(store), Some(snapshot)) = (&self.inner.store, &seeded.snapshot) {
            if let Err(e) = store.record_price(&seeded.id, &snapshot.price, snapshot.captured_at).await {
                tracing::error!(product_id = %seeded.id, "Failed to record price history: {}", e);
            }
        }

        self.spawn_timer(&entry, seeded.poll_interval());
        self.update_tracked_gauge().await;

        tracing::info!(
            product_id = %seeded.id,
            name = seeded.display_name(),
            interval_secs = seeded.poll_interval_secs,
            "Tracking new product"
        );
        Ok(seeded)
    }

    /// Stop tracking and forget the product. A check already in flight runs
    /// to completion but its result is discarded.
    pub async fn remove_product(&self, id: &ProductId) -> Result<Product, AppError> {
        let entry = self.entry(id).await?;

        entry.removed.cancel();
        if let Some(timer) = entry.take_timer() {
            timer.cancel.cancel();
        }

        // Waits out a check that is applying its result right now
        let product = entry.product.lock().await.clone();
        self.inner.products.write().await.remove(id);

        if let Some(store) = &self.inner.store {
            store.delete(id).await?;
        }
        self.update_tracked_gauge().await;

        tracing::info!(product_id = %id, "Removed product");
        Ok(product)
    }

    /// `false` disables the product and stops its timer; `true` re-enables
    /// it and restarts polling.
    pub async fn set_tracked(&self, id: &ProductId, tracked: bool) -> Result<Product, AppError> {
        let entry = self.entry(id).await?;

        let updated = {
            let mut product = entry.product.lock().await;
            if product.tracked == tracked {
                return Ok(product.clone());
            }

            product.tracked = tracked;
            product.status = if !tracked {
                TrackingStatus::Disabled
            } else if product.snapshot.is_some() {
                TrackingStatus::Tracking
            } else {
                TrackingStatus::Idle
            };
            product.updated_at = Utc::now();
            self.persist(&product).await;
            product.clone()
        };

        if tracked {
            self.spawn_timer(&entry, updated.poll_interval());
            tracing::info!(product_id = %id, "Product tracking enabled");
        } else {
            entry.replace_timer(None);
            tracing::info!(product_id = %id, "Product tracking disabled");
        }

        self.update_tracked_gauge().await;
        Ok(updated)
    }

    /// Change the poll interval; the timer restarts from now.
    pub async fn set_interval(&self, id: &ProductId, interval_secs: u64) -> Result<Product, AppError> {
        if interval_secs < self.inner.config.min_interval_secs {
            return Err(AppError::Validation(format!(
                "poll interval {}s is below the minimum of {}s",
                interval_secs, self.inner.config.min_interval_secs
            )));
        }

        let entry = self.entry(id).await?;
        let updated = {
            let mut product = entry.product.lock().await;
            product.poll_interval_secs = interval_secs;
            product.updated_at = Utc::now();
            self.persist(&product).await;
            product.clone()
        };

        if updated.is_schedulable() {
            self.spawn_timer(&entry, updated.poll_interval());
        }
        tracing::info!(product_id = %id, interval_secs, "Poll interval updated");
        Ok(updated)
    }

    /// Run a check immediately, outside the timer. The regular schedule is
    /// left as it is. Checking a disabled product is a contract violation.
    pub async fn check_now(&self, id: &ProductId) -> Result<CheckReport, AppError> {
        let entry = self.entry(id).await?;
        self.run_check(id, &entry, Trigger::Manual).await
    }

    pub async fn products(&self) -> Vec<Product> {
        let entries: Vec<Arc<ProductEntry>> = self.inner.products.read().await.values().cloned().collect();

        let mut products = Vec::with_capacity(entries.len());
        for entry in entries {
            products.push(entry.product.lock().await.clone());
        }
        products.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        products
    }

    pub async fn product(&self, id: &ProductId) -> Option<Product> {
        let entry = self.inner.products.read().await.get(id).cloned()?;
        let product = entry.product.lock().await.clone();
        Some(product)
    }

    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Stop every timer, abandoning in-flight checks, and return the final
    /// product set for persistence.
    pub async fn shutdown(&self) -> Vec<Product> {
        self.inner.shutdown.cancel();

        let entries: Vec<Arc<ProductEntry>> = self.inner.products.read().await.values().cloned().collect();
        for entry in &entries {
            if let Some(timer) = entry.take_timer() {
                timer.handle.abort();
                let _ = timer.handle.await;
            }
        }

        let mut products = self.products().await;
        for product in &mut products {
            product.status = settled_status(product, &self.inner.policy);
        }
        tracing::info!("Product scheduler shutdown");
        products
    }

    async fn entry(&self, id: &ProductId) -> Result<Arc<ProductEntry>, AppError> {
        self.inner
            .products
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound {
                resource: format!("product {}", id),
            })
    }

    async fn acquire_permit(&self) -> Result<tokio::sync::OwnedSemaphorePermit, AppError> {
        Arc::clone(&self.inner.limiter)
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("check limiter closed".to_string()))
    }

    fn spawn_timer(&self, entry: &Arc<ProductEntry>, first_delay: Duration) {
        if self.inner.shutdown.is_cancelled() || entry.removed.is_cancelled() {
            return;
        }

        let cancel = self.inner.shutdown.child_token();
        let scheduler = self.clone();
        let task_entry = Arc::clone(entry);
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            scheduler.tick_loop(task_entry, task_cancel, first_delay).await;
        });
        entry.replace_timer(Some(Timer { cancel, handle }));
    }

    async fn tick_loop(&self, entry: Arc<ProductEntry>, cancel: CancellationToken, first_delay: Duration) {
        let id = entry.product.lock().await.id.clone();
        let mut delay = first_delay;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = entry.removed.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if !*self.inner.online.borrow() {
                tracing::debug!(product_id = %id, "Offline; skipping scheduled check");
            } else {
                match self.run_check(&id, &entry, Trigger::Scheduled).await {
                    Ok(report) => tracing::debug!(
                        product_id = %id,
                        outcome = %report.outcome,
                        events = report.events.len(),
                        "Scheduled check finished"
                    ),
                    Err(e) => {
                        tracing::debug!(product_id = %id, "Scheduled check abandoned: {}", e);
                        break;
                    }
                }
            }

            // Next tick counts from completion, so checks never overlap
            delay = entry.product.lock().await.poll_interval();
        }
    }

    async fn run_check(&self, id: &ProductId, entry: &ProductEntry, trigger: Trigger) -> Result<CheckReport, AppError> {
        let _serial = entry.check_lock.lock().await;

        let url = {
            let product = entry.product.lock().await;
            Self::ensure_checkable(id, entry, &product)?;
            product.url.clone()
        };

        let permit = self.acquire_permit().await?;

        {
            let mut product = entry.product.lock().await;
            Self::ensure_checkable(id, entry, &product)?;
            product.status = TrackingStatus::Updating;
        }

        tracing::debug!(product_id = %id, trigger = trigger.as_str(), "Checking product");
        let start_time = Instant::now();
        let outcome = self.inner.manager.check_url(&url).await;
        drop(permit);

        let mut product = entry.product.lock().await;
        if entry.removed.is_cancelled() {
            tracing::debug!(product_id = %id, "Discarding result for removed product");
            return Err(AppError::NotFound {
                resource: format!("product {}", id),
            });
        }
        if product.status == TrackingStatus::Disabled {
            tracing::debug!(product_id = %id, "Discarding result for product disabled mid-check");
            return Err(AppError::ContractViolation(format!("product {} was disabled during the check", id)));
        }

        let now = Utc::now();
        let transition = apply(&product, &outcome, &self.inner.policy, now);
        *product = transition.product;

        for event in &transition.events {
            if self.inner.events.send(event.clone()).is_err() {
                tracing::warn!(product_id = %id, "Notification channel closed; dropping event");
            }
        }

        // Persist while still holding the product so a concurrent removal
        // cannot be resurrected by a late upsert
        self.persist(&product).await;
        if let (Some(store), Ok(snapshot)) = (&self.inner.store, &outcome) {
            if snapshot.price.valid {
                if let Err(e) = store.record_price(id, &snapshot.price, snapshot.captured_at).await {
                    tracing::error!(product_id = %id, "Failed to record price history: {}", e);
                }
            }
        }

        if let Some(kind) = FailureKind::of(&outcome) {
            tracing::warn!(
                product_id = %id,
                kind = kind.as_str(),
                failures = product.failure_count,
                status = product.status.as_str(),
                "Check failed"
            );
        }

        Ok(CheckReport {
            product_id: id.clone(),
            outcome: outcome_label(&outcome).to_string(),
            success: FailureKind::of(&outcome).is_none(),
            display_name: product.snapshot.as_ref().map(|s| s.display_name.clone()),
            price: outcome.as_ref().ok().map(|snapshot| snapshot.price.clone()),
            error: FailureKind::of(&outcome).and(product.last_error.clone()),
            status: product.status,
            failure_count: product.failure_count,
            events: transition.events,
            checked_at: now,
            total_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }

    fn ensure_checkable(id: &ProductId, entry: &ProductEntry, product: &Product) -> Result<(), AppError> {
        if entry.removed.is_cancelled() {
            return Err(AppError::NotFound {
                resource: format!("product {}", id),
            });
        }
        if product.status == TrackingStatus::Disabled || !product.tracked {
            return Err(AppError::ContractViolation(format!("product {} is disabled", id)));
        }
        Ok(())
    }

    async fn persist(&self, product: &Product) {
        if let Some(store) = &self.inner.store {
            if let Err(e) = store.upsert(product).await {
                tracing::error!(product_id = %product.id, "Failed to persist product: {}", e);
            }
        }
    }

    async fn update_tracked_gauge(&self) {
        let entries: Vec<Arc<ProductEntry>> = self.inner.products.read().await.values().cloned().collect();
        let mut tracked = 0usize;
        for entry in entries {
            if entry.product.lock().await.is_schedulable() {
                tracked += 1;
            }
        }
        metrics::gauge!("uatu_products_tracked").set(tracked as f64);
    }
}
