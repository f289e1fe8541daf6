//! Push notifications for recovery outcomes
//!
//! Delivery is best effort: every payload goes out on its own background
//! task, and a failed delivery is logged and dropped. Short-lived callers
//! [`Notifier::drain`] the outstanding deliveries before exiting.

use crate::{
    Error, Result,
    state::{EventRecord, EventType},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol::{Task, Timer};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on waiting for outstanding deliveries at exit
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Payload delivered to a notification sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Short headline
    pub title: String,
    /// Detail
    pub message: String,
    /// When the underlying event happened
    pub timestamp: DateTime<Utc>,
    /// Identifies the engine instance
    pub source: String,
}

impl NotificationPayload {
    fn from_event(event: &EventRecord, source: &str) -> Self {
        let title = match event.event_type {
            EventType::RecoverySuccess => format!("Recovered: {}", event.unit_id),
            EventType::RecoveryFailed => format!("Recovery failed: {}", event.unit_id),
            other => format!("{}: {}", other, event.unit_id),
        };
        Self {
            title,
            message: event.message.clone(),
            timestamp: event.timestamp,
            source: source.to_string(),
        }
    }
}

/// Destination for notification payloads
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one payload
    async fn deliver(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Sink posting payloads as JSON to a webhook URL
#[derive(Debug, Clone)]
pub struct WebhookSink {
    url: String,
    timeout: Duration,
}

impl WebhookSink {
    /// Create a sink for `url`
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, payload: &NotificationPayload) -> Result<()> {
        let url = self.url.clone();
        let timeout = self.timeout;
        let body = serde_json::to_vec(payload)?;

        smol::unblock(move || {
            let client = reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| Error::Notification(e.to_string()))?;
            let response = client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .map_err(|e| Error::Notification(e.to_string()))?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(Error::Notification(format!(
                    "webhook returned {}",
                    response.status()
                )))
            }
        })
        .await
    }
}

/// Publishes recovery outcomes to an optional sink
pub struct Notifier {
    sink: Option<Arc<dyn NotificationSink>>,
    source: String,
    pending: Mutex<Vec<Task<()>>>,
}

impl Notifier {
    /// Notifier that drops everything
    pub fn disabled() -> Self {
        Self {
            sink: None,
            source: "fleet".to_string(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Notifier delivering to `sink`, tagging payloads with `source`
    pub fn new(sink: Arc<dyn NotificationSink>, source: impl Into<String>) -> Self {
        Self {
            sink: Some(sink),
            source: source.into(),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Whether a sink is configured
    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Push `event` if it is a recovery outcome
    ///
    /// Returns immediately; delivery happens on a background task.
    pub fn notify(&self, event: &EventRecord) {
        if !matches!(
            event.event_type,
            EventType::RecoverySuccess | EventType::RecoveryFailed
        ) {
            return;
        }
        let Some(sink) = self.sink.clone() else {
            return;
        };

        let payload = NotificationPayload::from_event(event, &self.source);
        let task = smol::spawn(async move {
            match sink.deliver(&payload).await {
                Ok(()) => debug!("Delivered notification: {}", payload.title),
                Err(e) => warn!("Failed to deliver notification '{}': {}", payload.title, e),
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|task| !task.is_finished());
        pending.push(task);
    }

    /// Wait up to `timeout` for outstanding deliveries
    ///
    /// Returns `false` if some were still running at the deadline; those are
    /// cancelled.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let tasks = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *pending)
        };
        if tasks.is_empty() {
            return true;
        }

        let count = tasks.len();
        debug!("Waiting for {} notification deliveries", count);
        let settled = smol::future::or(
            async {
                futures::future::join_all(tasks).await;
                true
            },
            async {
                Timer::after(timeout).await;
                false
            },
        )
        .await;

        if !settled {
            warn!(
                "Gave up on {} notification deliveries after {:?}",
                count, timeout
            );
        }
        settled
    }
}
