//! Knowledge Bus: pub/sub between agents, decoupled from direct calls.
//!
//! Subscriptions are either an exact topic string or a regex pattern
//! matched against every published topic. Each topic keeps a bounded ring
//! buffer of recent events (for late subscribers to catch up on
//! `recent()`), swept for TTL expiry once a minute. A separate bounded
//! queue carries direct agent-to-agent messages that never fan out.
//!
//! Publishing never blocks on a slow subscriber: delivery is via unbounded
//! `tokio::sync::mpsc` channels per subscription, and a subscriber that
//! panics inside its own consumer loop cannot wedge the publisher.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const DEFAULT_RING_CAPACITY: usize = 100;
const DEFAULT_TTL: Duration = Duration::from_secs(300);
const DIRECT_QUEUE_CAPACITY: usize = 1000;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// One message published on the bus.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BusEvent {
    pub topic: String,
    pub payload: Value,
    #[serde(skip)]
    pub published_at: Instant,
}

impl BusEvent {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            published_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.published_at.elapsed() > ttl
    }
}

struct RingBuffer {
    events: VecDeque<BusEvent>,
    capacity: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, event: BusEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    fn sweep(&mut self, ttl: Duration) {
        self.events.retain(|e| !e.is_expired(ttl));
    }
}

enum Matcher {
    Exact(String),
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, topic: &str) -> bool {
        match self {
            Matcher::Exact(expected) => expected == topic,
            Matcher::Pattern(re) => re.is_match(topic),
        }
    }
}

struct Subscription {
    id: u64,
    matcher: Matcher,
    sender: mpsc::UnboundedSender<BusEvent>,
}

/// Stats surfaced by `get_bus_stats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BusStats {
    pub topic_count: usize,
    pub subscription_count: usize,
    pub buffered_event_count: usize,
    pub direct_queue_depth: usize,
}

/// The Knowledge Bus. Cheaply cloneable — clone the `Arc` internals via
/// `KnowledgeBus::handle()`, don't wrap it in another `Arc` yourself.
pub struct KnowledgeBus {
    topics: DashMap<String, RingBuffer>,
    subscriptions: DashMap<String, Vec<Subscription>>,
    ring_capacity: usize,
    ttl: Duration,
    next_subscription_id: AtomicU64,
    direct_queue: mpsc::Sender<(String, BusEvent)>,
    direct_queue_rx: parking_lot::Mutex<Option<mpsc::Receiver<(String, BusEvent)>>>,
}

impl KnowledgeBus {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_RING_CAPACITY, DEFAULT_TTL)
    }

    pub fn with_capacity(ring_capacity: usize, ttl: Duration) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(DIRECT_QUEUE_CAPACITY);
        Arc::new(Self {
            topics: DashMap::new(),
            subscriptions: DashMap::new(),
            ring_capacity,
            ttl,
            next_subscription_id: AtomicU64::new(1),
            direct_queue: tx,
            direct_queue_rx: parking_lot::Mutex::new(Some(rx)),
        })
    }

    /// Publishes an event to `topic`. Non-blocking: subscriber delivery
    /// uses unbounded channels, and a send failure (dropped receiver) is
    /// logged, not propagated — publishing never fails because a reader
    /// went away.
    pub fn publish(&self, topic: &str, payload: Value) {
        let event = BusEvent::new(topic, payload);

        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| RingBuffer::new(self.ring_capacity))
            .push(event.clone());

        let mut delivered = 0usize;
        for entry in self.subscriptions.iter() {
            for sub in entry.value() {
                if sub.matcher.matches(topic) {
                    if sub.sender.send(event.clone()).is_err() {
                        debug!(topic, subscription = sub.id, "subscriber channel closed");
                    } else {
                        delivered += 1;
                    }
                }
            }
        }
        if delivered == 0 {
            debug!(topic, "published with no subscribers");
        }
    }

    /// Publishes a handler failure. Callers catch their own handler panics
    /// and re-publish here rather than letting the bus crash.
    pub fn publish_error(&self, topic: &str, error: impl std::fmt::Display) {
        self.publish(
            "subscription:error",
            serde_json::json!({ "topic": topic, "error": error.to_string() }),
        );
    }

    /// Subscribes to an exact topic string, returning a receiver for
    /// matching events as they're published.
    pub fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<BusEvent> {
        self.add_subscription(Matcher::Exact(topic.to_string()))
    }

    /// Subscribes via a regex pattern matched against every published
    /// topic (a "wildcard" subscription in bus terms).
    pub fn subscribe_pattern(&self, pattern: &str) -> crate::error::Result<mpsc::UnboundedReceiver<BusEvent>> {
        let re = Regex::new(pattern).map_err(|e| crate::error::AgentError::InvalidPattern(e.to_string()))?;
        Ok(self.add_subscription(Matcher::Pattern(re)))
    }

    fn add_subscription(&self, matcher: Matcher) -> mpsc::UnboundedReceiver<BusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let key = match &matcher {
            Matcher::Exact(t) => t.clone(),
            Matcher::Pattern(re) => re.as_str().to_string(),
        };
        self.subscriptions.entry(key).or_default().push(Subscription {
            id,
            matcher,
            sender: tx,
        });
        rx
    }

    /// Replays the buffered (non-expired) events for a topic, oldest first.
    pub fn recent(&self, topic: &str) -> Vec<BusEvent> {
        self.topics
            .get(topic)
            .map(|buf| buf.events.iter().filter(|e| !e.is_expired(self.ttl)).cloned().collect())
            .unwrap_or_default()
    }

    /// Sends a direct, non-fan-out message to a specific agent. Bounded at
    /// `DIRECT_QUEUE_CAPACITY`; a full queue is backpressure, not data loss —
    /// the caller should retry after logging.
    pub async fn send_direct(&self, agent_id: &str, payload: Value) -> bool {
        let event = BusEvent::new(format!("direct:{agent_id}"), payload);
        match self.direct_queue.try_send((agent_id.to_string(), event)) {
            Ok(()) => true,
            Err(_) => {
                warn!(agent_id, "direct message queue full, dropping send");
                false
            }
        }
    }

    /// Takes ownership of the direct-message receiver. Only one consumer
    /// may drain it; subsequent calls return `None`.
    pub fn take_direct_receiver(&self) -> Option<mpsc::Receiver<(String, BusEvent)>> {
        self.direct_queue_rx.lock().take()
    }

    /// Drops all buffered events and subscriptions for a topic.
    pub fn clear_topic(&self, topic: &str) {
        self.topics.remove(topic);
        self.subscriptions.remove(topic);
    }

    /// Runs the TTL sweep once. Call periodically (the conductor spawns a
    /// task ticking this every `SWEEP_INTERVAL`).
    pub fn sweep(&self) {
        for mut entry in self.topics.iter_mut() {
            entry.sweep(self.ttl);
        }
    }

    pub fn sweep_interval() -> Duration {
        SWEEP_INTERVAL
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            topic_count: self.topics.len(),
            subscription_count: self.subscriptions.iter().map(|e| e.value().len()).sum(),
            buffered_event_count: self.topics.iter().map(|e| e.value().events.len()).sum(),
            direct_queue_depth: DIRECT_QUEUE_CAPACITY - self.direct_queue.capacity(),
        }
    }
}

/// Spawns the background TTL sweep task. Returns a handle the caller may
/// abort on shutdown.
pub fn spawn_sweeper(bus: Arc<KnowledgeBus>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(KnowledgeBus::sweep_interval());
        loop {
            interval.tick().await;
            bus.sweep();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exact_subscription_receives_matching_topic_only() {
        let bus = KnowledgeBus::new();
        let mut rx = bus.subscribe("parse:complete");
        bus.publish("parse:failed", serde_json::json!({}));
        bus.publish("parse:complete", serde_json::json!({"files": 3}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "parse:complete");
    }

    #[tokio::test]
    async fn pattern_subscription_matches_wildcard_topics() {
        let bus = KnowledgeBus::new();
        let mut rx = bus.subscribe_pattern("^parse:.*").unwrap();
        bus.publish("parse:complete", serde_json::json!({}));
        bus.publish("index:complete", serde_json::json!({}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "parse:complete");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ring_buffer_evicts_oldest_beyond_capacity() {
        let bus = KnowledgeBus::with_capacity(2, Duration::from_secs(300));
        bus.publish("t", serde_json::json!(1));
        bus.publish("t", serde_json::json!(2));
        bus.publish("t", serde_json::json!(3));

        let recent = bus.recent("t");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].payload, serde_json::json!(2));
        assert_eq!(recent[1].payload, serde_json::json!(3));
    }

    #[test]
    fn sweep_drops_expired_events() {
        let bus = KnowledgeBus::with_capacity(10, Duration::from_millis(1));
        bus.publish("t", serde_json::json!(1));
        std::thread::sleep(Duration::from_millis(5));
        bus.sweep();
        assert!(bus.recent("t").is_empty());
    }

    #[tokio::test]
    async fn direct_message_is_queued_for_its_recipient() {
        let bus = KnowledgeBus::new();
        assert!(bus.send_direct("semantic-agent-1", serde_json::json!({"kind": "embed"})).await);
        let mut rx = bus.take_direct_receiver().unwrap();
        let (agent_id, event) = rx.recv().await.unwrap();
        assert_eq!(agent_id, "semantic-agent-1");
        assert_eq!(event.topic, "direct:semantic-agent-1");
    }

    #[test]
    fn clear_topic_removes_buffer_and_subscriptions() {
        let bus = KnowledgeBus::new();
        let _rx = bus.subscribe("t");
        bus.publish("t", serde_json::json!(1));
        bus.clear_topic("t");
        assert!(bus.recent("t").is_empty());
        let stats = bus.stats();
        assert_eq!(stats.subscription_count, 0);
    }
}
