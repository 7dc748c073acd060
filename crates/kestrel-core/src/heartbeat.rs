//! Heartbeat injector — pushes background events into the agent's message
//! stream.
//!
//! Cron results, startup notices, and alerts become synthetic inbound
//! messages on the `system` channel whose `chat_id` encodes the origin
//! (`"telegram:123"`). The agent loop then processes them like any other
//! turn and routes the reply back to the origin channel. This is the only
//! sanctioned path for background tasks to speak into a session.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::bus::types::InboundMessage;

/// How many recent injections the in-memory log retains.
const EVENT_LOG_CAP: usize = 100;

/// Publisher signature — typically `bus.publish_inbound` behind a closure.
pub type PublishFn = Arc<
    dyn Fn(InboundMessage) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

#[derive(Clone, Debug)]
struct LogEntry {
    event_type: String,
    preview: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

/// Injects system events into the inbound stream.
pub struct HeartbeatInjector {
    publisher: Mutex<Option<PublishFn>>,
    /// Events captured before a publisher was attached.
    pending: Mutex<VecDeque<InboundMessage>>,
    log: Mutex<Vec<LogEntry>>,
}

impl HeartbeatInjector {
    pub fn new(publisher: Option<PublishFn>) -> Self {
        HeartbeatInjector {
            publisher: Mutex::new(publisher),
            pending: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Attach the publisher after construction (the bus usually exists first).
    pub async fn set_publisher(&self, publisher: PublishFn) {
        *self.publisher.lock().await = Some(publisher);
    }

    /// Inject an event targeted at `origin_channel:origin_chat`.
    ///
    /// Published immediately when a publisher is attached; queued otherwise.
    pub async fn inject_event(
        &self,
        event_type: &str,
        body: &str,
        origin_channel: &str,
        origin_chat: &str,
    ) {
        let mut msg = InboundMessage::new(
            "system",
            event_type,
            format!("{origin_channel}:{origin_chat}"),
            body,
        );
        msg.metadata
            .insert("event_type".to_string(), event_type.to_string());

        {
            let mut log = self.log.lock().await;
            log.push(LogEntry {
                event_type: event_type.to_string(),
                preview: body.chars().take(100).collect(),
                timestamp: chrono::Utc::now(),
            });
            if log.len() > EVENT_LOG_CAP {
                let excess = log.len() - EVENT_LOG_CAP;
                log.drain(..excess);
            }
        }

        let publisher = self.publisher.lock().await.clone();
        match publisher {
            Some(publish) => {
                if let Err(e) = publish(msg.clone()).await {
                    error!(event_type = event_type, error = %e, "heartbeat publish failed");
                    self.pending.lock().await.push_back(msg);
                } else {
                    info!(event_type = event_type, "heartbeat injected");
                }
            }
            None => {
                debug!(event_type = event_type, "no publisher yet, queueing heartbeat");
                self.pending.lock().await.push_back(msg);
            }
        }
    }

    /// Inject a cron job completion into the job's origin session.
    pub async fn inject_cron_result(
        &self,
        job_name: &str,
        result: Option<&str>,
        origin_channel: &str,
        origin_chat: &str,
    ) {
        let mut body = format!("[System] Scheduled job '{job_name}' completed.");
        if let Some(result) = result {
            body.push_str(&format!("\nResult: {result}"));
        }
        self.inject_event("cron_result", &body, origin_channel, origin_chat)
            .await;
    }

    /// Inject a startup notification.
    pub async fn inject_startup(&self, origin_channel: &str, origin_chat: &str) {
        self.inject_event(
            "startup",
            "[System] Kestrel is online and ready.",
            origin_channel,
            origin_chat,
        )
        .await;
    }

    /// Inject an alert (errors, expiring credentials, monitoring hits).
    pub async fn inject_alert(
        &self,
        alert_type: &str,
        message: &str,
        origin_channel: &str,
        origin_chat: &str,
    ) {
        self.inject_event(
            "alert",
            &format!("[System Alert] {alert_type}: {message}"),
            origin_channel,
            origin_chat,
        )
        .await;
    }

    /// Publish everything queued before the publisher was attached.
    /// Returns the number of events flushed.
    pub async fn flush_pending(&self) -> usize {
        let publisher = self.publisher.lock().await.clone();
        let Some(publish) = publisher else {
            return 0;
        };

        let mut count = 0;
        loop {
            let msg = { self.pending.lock().await.pop_front() };
            let Some(msg) = msg else { break };
            if let Err(e) = publish(msg.clone()).await {
                error!(error = %e, "heartbeat flush failed");
                self.pending.lock().await.push_front(msg);
                break;
            }
            count += 1;
        }

        if count > 0 {
            info!(count = count, "flushed pending heartbeat events");
        }
        count
    }

    /// Number of events waiting for a publisher.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Recent injections as `(event_type, preview, timestamp)` tuples.
    pub async fn recent_events(
        &self,
        limit: usize,
    ) -> Vec<(String, String, chrono::DateTime<chrono::Utc>)> {
        let log = self.log.lock().await;
        log.iter()
            .rev()
            .take(limit)
            .map(|e| (e.event_type.clone(), e.preview.clone(), e.timestamp))
            .collect()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
