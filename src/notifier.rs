use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::{NotificationEvent, NotificationKind};
use crate::utils::error::AppError;

/// Receives change events. Delivery is at-least-once; sinks must tolerate
/// seeing the same event id twice.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, event: &NotificationEvent) -> Result<(), AppError>;
}

/// Writes each event to the tracing log.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<(), AppError> {
        match event.kind {
            NotificationKind::Warning { .. } => {
                tracing::warn!(product_id = %event.product_id, kind = event.kind.label(), "{}", event.summary())
            }
            _ => tracing::info!(product_id = %event.product_id, kind = event.kind.label(), "{}", event.summary()),
        }
        Ok(())
    }
}

/// Posts the event as JSON, with a readable `content` line for chat
/// webhooks.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    fn create_payload(&self, event: &NotificationEvent) -> serde_json::Value {
        json!({
            "username": "Uatu Monitor",
            "content": event.summary(),
            "event": event,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<(), AppError> {
        let response = self
            .client
            .post(&self.url)
            .json(&self.create_payload(event))
            .send()
            .await?;

        response.error_for_status()?;
        Ok(())
    }
}

/// Forwards events into another channel.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<NotificationEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<NotificationEvent>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn notify(&self, event: &NotificationEvent) -> Result<(), AppError> {
        self.sender
            .send(event.clone())
            .map_err(|_| AppError::Internal("notification channel closed".to_string()))
    }
}

#[derive(Default)]
pub struct NotificationDispatcher {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    /// Deliver to every sink concurrently. Returns how many accepted it; a
    /// failing sink is logged and does not affect the others.
    pub async fn dispatch(&self, event: &NotificationEvent) -> usize {
        metrics::counter!("uatu_notifications_total", "kind" => event.kind.label()).increment(1);

        let results = join_all(self.sinks.iter().map(|sink| sink.notify(event))).await;

        let mut delivered = 0;
        for (sink, result) in self.sinks.iter().zip(results) {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => tracing::error!(
                    sink = sink.name(),
                    event_id = %event.id,
                    "Failed to deliver notification: {}",
                    e
                ),
            }
        }
        delivered
    }

    /// Drain `events` in order until the channel closes or `cancel` fires.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<NotificationEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.dispatch(&event).await;
                    }
                    None => break,
                },
            }
        }

        // Flush whatever was already queued
        while let Ok(event) = events.try_recv() {
            self.dispatch(&event).await;
        }
        tracing::debug!("Notification dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProductId;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn notify(&self, _event: &NotificationEvent) -> Result<(), AppError> {
            Err(AppError::Internal("smtp down".to_string()))
        }
    }

    fn price_drop() -> NotificationEvent {
        NotificationEvent {
            id: Uuid::new_v4(),
            product_id: ProductId::from("kettle"),
            product_name: "Kettle".to_string(),
            url: "https://shop.example.com/kettle".to_string(),
            kind: NotificationKind::PriceDown {
                old: Decimal::from_str("19.99").unwrap(),
                new: Decimal::from_str("14.99").unwrap(),
                currency: Some("USD".to_string()),
            },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = NotificationDispatcher::new()
            .with_sink(Arc::new(FailingSink))
            .with_sink(Arc::new(ChannelSink::new(tx)))
            .with_sink(Arc::new(LogSink));

        let event = price_drop();
        assert_eq!(dispatcher.dispatch(&event).await, 2);
        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_run_preserves_order_and_stops_on_close() {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let dispatcher = NotificationDispatcher::new().with_sink(Arc::new(ChannelSink::new(out_tx)));

        let (tx, rx) = mpsc::unbounded_channel();
        let first = price_drop();
        let second = price_drop();
        tx.send(first.clone()).unwrap();
        tx.send(second.clone()).unwrap();
        drop(tx);

        dispatcher.run(rx, CancellationToken::new()).await;

        assert_eq!(out_rx.recv().await.unwrap().id, first.id);
        assert_eq!(out_rx.recv().await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_webhook_posts_summary_and_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(json!({
                "content": "Price drop for Kettle: 19.99 -> 14.99 USD",
                "event": { "type": "price_down", "old": "19.99", "new": "14.99" }
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sink = WebhookSink::new(format!("{}/hook", server.uri()));
        sink.notify(&price_drop()).await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let sink = WebhookSink::new(server.uri());
        assert!(matches!(sink.notify(&price_drop()).await, Err(AppError::Http(_))));
    }
}
