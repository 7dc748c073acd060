//! Async message bus — the spine connecting channels, the agent loop, and
//! system-event observers.
//!
//! Three independent FIFO queues: inbound (channels → agent), outbound
//! (agent → channels), and system events (runtime → observers). The agent
//! consumes inbound directly; outbound and events are fanned out by
//! dedicated dispatcher tasks so a slow or failing subscriber never stalls
//! the emitter.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::types::{InboundMessage, OutboundMessage, SystemEvent};

/// Poll interval for dispatcher loops, so `stop()` is observed promptly.
const DISPATCH_POLL: Duration = Duration::from_secs(1);

/// Callback receiving outbound messages for one channel.
pub type OutboundCallback = Arc<
    dyn Fn(OutboundMessage) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Callback receiving every system event.
pub type EventCallback = Arc<
    dyn Fn(SystemEvent) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync,
>;

/// The message bus shared by all runtime components.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: tokio::sync::Mutex<mpsc::Receiver<OutboundMessage>>,
    event_tx: mpsc::Sender<SystemEvent>,
    event_rx: tokio::sync::Mutex<mpsc::Receiver<SystemEvent>>,

    outbound_subscribers: RwLock<HashMap<String, Vec<OutboundCallback>>>,
    event_subscribers: RwLock<Vec<EventCallback>>,

    /// Monotonic sequence counter per run id.
    seq_by_run: Mutex<HashMap<String, u64>>,
    running: AtomicBool,
}

impl MessageBus {
    /// Create a bus whose queues hold up to `buffer_size` pending items each.
    pub fn new(buffer_size: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(buffer_size);
        let (event_tx, event_rx) = mpsc::channel(buffer_size);

        MessageBus {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            event_tx,
            event_rx: tokio::sync::Mutex::new(event_rx),
            outbound_subscribers: RwLock::new(HashMap::new()),
            event_subscribers: RwLock::new(Vec::new()),
            seq_by_run: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        }
    }

    // ────────────── Inbound ──────────────

    /// Publish a message from a channel to the agent.
    pub async fn publish_inbound(
        &self,
        msg: InboundMessage,
    ) -> Result<(), mpsc::error::SendError<InboundMessage>> {
        self.inbound_tx.send(msg).await
    }

    /// Consume the next inbound message. Blocks until one is available;
    /// returns `None` once all senders are dropped.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await
    }

    /// A clone of the inbound sender, for channels and injectors.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }

    // ────────────── Outbound ──────────────

    /// Publish a response from the agent toward channels.
    pub async fn publish_outbound(
        &self,
        msg: OutboundMessage,
    ) -> Result<(), mpsc::error::SendError<OutboundMessage>> {
        self.outbound_tx.send(msg).await
    }

    /// Consume the next outbound message directly (tests, single-channel
    /// setups without a dispatcher).
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        let mut rx = self.outbound_rx.lock().await;
        rx.recv().await
    }

    /// Subscribe to outbound messages for one channel name.
    pub fn subscribe_outbound(&self, channel: &str, callback: OutboundCallback) {
        let mut subs = self.outbound_subscribers.write().unwrap();
        subs.entry(channel.to_string()).or_default().push(callback);
        debug!(channel = channel, "outbound subscriber registered");
    }

    /// Dispatch outbound messages to per-channel subscribers.
    ///
    /// Run as a background task; exits when `stop()` is called. One failing
    /// subscriber never prevents delivery to the others.
    pub async fn dispatch_outbound(&self) {
        info!("outbound dispatcher started");
        while self.running.load(Ordering::SeqCst) {
            let msg = {
                let mut rx = self.outbound_rx.lock().await;
                match tokio::time::timeout(DISPATCH_POLL, rx.recv()).await {
                    Ok(Some(msg)) => msg,
                    Ok(None) => break,
                    Err(_) => continue,
                }
            };

            let callbacks: Vec<OutboundCallback> = {
                let subs = self.outbound_subscribers.read().unwrap();
                subs.get(&msg.channel).cloned().unwrap_or_default()
            };

            for cb in callbacks {
                if let Err(e) = cb(msg.clone()).await {
                    error!(channel = %msg.channel, error = %e, "outbound delivery failed");
                }
            }
        }
        info!("outbound dispatcher stopped");
    }

    // ────────────── System events ──────────────

    /// Next monotonic sequence number for `run_id`. Strictly increasing
    /// across all event streams of that run.
    pub fn next_seq(&self, run_id: &str) -> u64 {
        let mut seqs = self.seq_by_run.lock().unwrap();
        let counter = seqs.entry(run_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Emit a system event. Never blocks the emitter: on queue overflow the
    /// event is dropped with a warning.
    pub fn emit_system_event(&self, event: SystemEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!(error = %e, "system event queue full, dropping event");
        }
    }

    /// Subscribe to all system events.
    pub fn subscribe_system_events(&self, callback: EventCallback) {
        self.event_subscribers.write().unwrap().push(callback);
    }

    /// Dispatch system events to every subscriber. Run as a background task.
    pub async fn dispatch_system_events(&self) {
        info!("system event dispatcher started");
        while self.running.load(Ordering::SeqCst) {
            let event = {
                let mut rx = self.event_rx.lock().await;
                match tokio::time::timeout(DISPATCH_POLL, rx.recv()).await {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(_) => continue,
                }
            };

            let callbacks: Vec<EventCallback> =
                { self.event_subscribers.read().unwrap().clone() };

            for cb in callbacks {
                if let Err(e) = cb(event.clone()).await {
                    error!(run_id = %event.run_id, error = %e, "event subscriber failed");
                }
            }
        }
        info!("system event dispatcher stopped");
    }

    // ────────────── Lifecycle ──────────────

    /// Signal dispatcher loops to drain and exit.
    pub fn stop(&self) {
        info!("stopping message bus");
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::types::EventStream;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_inbound_round_trip() {
        let bus = MessageBus::new(8);
        bus.publish_inbound(InboundMessage::new("telegram", "u1", "c1", "hello"))
            .await
            .unwrap();
        let msg = bus.consume_inbound().await.unwrap();
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.content, "hello");
    }

    #[tokio::test]
    async fn test_inbound_preserves_order() {
        let bus = MessageBus::new(8);
        for i in 1..=3 {
            bus.publish_inbound(InboundMessage::new("cli", "u", "c", format!("m{i}")))
                .await
                .unwrap();
        }
        assert_eq!(bus.consume_inbound().await.unwrap().content, "m1");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "m2");
        assert_eq!(bus.consume_inbound().await.unwrap().content, "m3");
    }

    #[tokio::test]
    async fn test_outbound_round_trip() {
        let bus = MessageBus::new(8);
        bus.publish_outbound(OutboundMessage::new("discord", "c9", "reply"))
            .await
            .unwrap();
        let msg = bus.consume_outbound().await.unwrap();
        assert_eq!(msg.chat_id, "c9");
    }

    #[test]
    fn test_seq_monotonic_across_streams() {
        let bus = MessageBus::new(8);
        // Interleave streams: seq must still be gapless and increasing.
        let seqs: Vec<u64> = (0..6).map(|_| bus.next_seq("run-1")).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5, 6]);
        // Independent runs have independent counters.
        assert_eq!(bus.next_seq("run-2"), 1);
    }

    #[tokio::test]
    async fn test_event_fanout_survives_failing_subscriber() {
        let bus = Arc::new(MessageBus::new(8));
        let delivered = Arc::new(AtomicUsize::new(0));

        let bad: EventCallback =
            Arc::new(|_ev| Box::pin(async { Err(anyhow::anyhow!("subscriber broken")) }));
        let counter = delivered.clone();
        let good: EventCallback = Arc::new(move |_ev| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        bus.subscribe_system_events(bad);
        bus.subscribe_system_events(good);

        let dispatcher = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.dispatch_system_events().await })
        };

        let seq = bus.next_seq("run-x");
        bus.emit_system_event(SystemEvent::lifecycle("run-x", seq, "start"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        bus.stop();
        let _ = dispatcher.await;
    }

    #[tokio::test]
    async fn test_outbound_dispatch_per_channel() {
        let bus = Arc::new(MessageBus::new(8));
        let telegram_hits = Arc::new(AtomicUsize::new(0));
        let discord_hits = Arc::new(AtomicUsize::new(0));

        let t = telegram_hits.clone();
        bus.subscribe_outbound(
            "telegram",
            Arc::new(move |_msg| {
                let t = t.clone();
                Box::pin(async move {
                    t.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );
        let d = discord_hits.clone();
        bus.subscribe_outbound(
            "discord",
            Arc::new(move |_msg| {
                let d = d.clone();
                Box::pin(async move {
                    d.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        let dispatcher = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.dispatch_outbound().await })
        };

        bus.publish_outbound(OutboundMessage::new("telegram", "c1", "a"))
            .await
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("telegram", "c1", "b"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(telegram_hits.load(Ordering::SeqCst), 2);
        assert_eq!(discord_hits.load(Ordering::SeqCst), 0);

        bus.stop();
        let _ = dispatcher.await;
    }

    #[tokio::test]
    async fn test_emit_never_blocks_on_overflow() {
        let bus = MessageBus::new(2);
        // No dispatcher running; third emit overflows and is dropped.
        for i in 0..5 {
            bus.emit_system_event(SystemEvent::lifecycle("r", i, "tick"));
        }
        // Emitter survived; queue holds the first two.
        let ev = {
            let mut rx = bus.event_rx.lock().await;
            rx.try_recv().unwrap()
        };
        assert_eq!(ev.stream, EventStream::Lifecycle);
    }

    #[tokio::test]
    async fn test_stop_exits_dispatchers() {
        let bus = Arc::new(MessageBus::new(8));
        let handle = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.dispatch_system_events().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.stop();
        // Dispatcher observes the flag within one poll interval.
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
        assert!(!bus.is_running());
    }
}
