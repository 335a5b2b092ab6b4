//! Online/offline signal with debouncing. The scheduler reads the flag
//! through a `watch` receiver; other components can register callbacks.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectivityConfig;
use crate::utils::error::AppError;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// One reachability sample; `true` means online.
    async fn probe(&self) -> bool;
}

/// HEAD requests against a list of well-known URLs. Any answer below 500
/// within the timeout counts as online.
pub struct HttpProbe {
    client: Client,
    urls: Vec<String>,
}

impl HttpProbe {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, urls })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn probe(&self) -> bool {
        for url in &self.urls {
            match self.client.head(url).send().await {
                Ok(response) if response.status().as_u16() < 500 => return true,
                Ok(response) => {
                    tracing::trace!(url = %url, status = %response.status(), "Probe answered with server error");
                }
                Err(e) => {
                    tracing::trace!(url = %url, "Probe failed: {}", e);
                }
            }
        }
        false
    }
}

/// Flips only after `confirmations` consecutive readings disagree with the
/// current state.
#[derive(Debug, Clone)]
pub struct Debouncer {
    current: bool,
    confirmations: u32,
    streak: u32,
}

impl Debouncer {
    pub fn new(initial: bool, confirmations: u32) -> Self {
        Self {
            current: initial,
            confirmations: confirmations.max(1),
            streak: 0,
        }
    }

    pub fn current(&self) -> bool {
        self.current
    }

    /// Returns the new state when this reading completes a flip.
    pub fn observe(&mut self, reading: bool) -> Option<bool> {
        if reading == self.current {
            self.streak = 0;
            return None;
        }

        self.streak += 1;
        if self.streak >= self.confirmations {
            self.current = reading;
            self.streak = 0;
            Some(reading)
        } else {
            None
        }
    }
}

type FlipCallback = Arc<dyn Fn(bool) + Send + Sync>;

pub struct ConnectivityMonitor {
    probe: Arc<dyn ReachabilityProbe>,
    interval: Duration,
    debouncer: Mutex<Debouncer>,
    sender: watch::Sender<bool>,
    callbacks: Mutex<Vec<FlipCallback>>,
}

impl ConnectivityMonitor {
    /// Starts out online; the first flip needs `confirmations` failed probes.
    pub fn new(probe: Arc<dyn ReachabilityProbe>, interval: Duration, confirmations: u32) -> Self {
        let (sender, _) = watch::channel(true);
        metrics::gauge!("uatu_online").set(1.0);
        Self {
            probe,
            interval,
            debouncer: Mutex::new(Debouncer::new(true, confirmations)),
            sender,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn from_config(config: &ConnectivityConfig) -> Result<Self, AppError> {
        let probe = HttpProbe::new(config.probe_urls.clone(), Duration::from_secs(config.probe_timeout_secs))?;
        Ok(Self::new(
            Arc::new(probe),
            Duration::from_secs(config.interval_secs),
            config.confirmations,
        ))
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Called once per flip with the new state.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        if let Ok(mut callbacks) = self.callbacks.lock() {
            callbacks.push(Arc::new(callback));
        }
    }

    /// Take one probe sample. Returns the new state if it flipped.
    pub async fn tick(&self) -> Option<bool> {
        let reading = self.probe.probe().await;

        let flipped = match self.debouncer.lock() {
            Ok(mut debouncer) => debouncer.observe(reading),
            Err(poisoned) => poisoned.into_inner().observe(reading),
        }?;

        if flipped {
            tracing::info!("Network connectivity restored");
        } else {
            tracing::warn!("Network connectivity lost; pausing checks");
        }
        metrics::gauge!("uatu_online").set(if flipped { 1.0 } else { 0.0 });

        self.sender.send_replace(flipped);
        // Run outside the lock so a callback may register another
        let callbacks: Vec<FlipCallback> = match self.callbacks.lock() {
            Ok(callbacks) => callbacks.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for callback in &callbacks {
            callback(flipped);
        }
        Some(flipped)
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of an interval completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.tick().await;
                    }
                }
            }
            tracing::debug!("Connectivity monitor stopped");
        })
    }
}
