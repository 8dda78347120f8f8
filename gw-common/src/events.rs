//! In-memory pub/sub for operational telemetry, consumed by the console
//! WebSocket and by anything else that wants to watch the fleet live.
//!
//! Grounded in `examples/original_source/src/manager/redpepper/manager/eventlog.py`'s
//! `EventBus` (a `deque(maxlen=10)` replay buffer plus one bounded channel
//! per consumer), adapted to `tokio::sync::mpsc` bounded channels.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::warn;

const CONSUMER_CAPACITY: usize = 10;
const REPLAY_BUFFER_LEN: usize = 10;

/// An opaque event: `type` plus arbitrary fields, with `time` stamped by
/// the bus on publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub time: f64,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    pub fn new(kind: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            time: now_unix(),
            fields,
        }
    }
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub struct EventBus {
    inner: Mutex<Inner>,
}

struct Inner {
    recent: VecDeque<Event>,
    consumers: Vec<mpsc::Sender<Event>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                recent: VecDeque::with_capacity(REPLAY_BUFFER_LEN),
                consumers: Vec::new(),
            }),
        }
    }

    /// Register a new subscriber. It immediately receives the most recent
    /// (up to 10) events published before any future event, per the
    /// replay-buffer invariant.
    pub fn subscribe(&self) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CONSUMER_CAPACITY);
        let mut inner = self.inner.lock().unwrap();
        for event in inner.recent.iter() {
            if tx.try_send(event.clone()).is_err() {
                warn!("event bus replay buffer dropped an event: consumer queue full or closed");
            }
        }
        inner.consumers.push(tx);
        rx
    }

    /// Publish an event: type plus arbitrary fields. Never blocks — a full
    /// or closed consumer channel gets a dropped event and a warning, per
    /// the documented backpressure policy.
    pub fn post(&self, kind: impl Into<String>, fields: Map<String, Value>) {
        let event = Event::new(kind, fields);
        let mut inner = self.inner.lock().unwrap();
        if inner.recent.len() == REPLAY_BUFFER_LEN {
            inner.recent.pop_front();
        }
        inner.recent.push_back(event.clone());
        inner.consumers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(kind = %event.kind, "event bus consumer queue full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replay_buffer_delivers_recent_events_to_new_subscribers() {
        let bus = EventBus::new();
        for i in 0..3 {
            let mut fields = Map::new();
            fields.insert("agent".into(), Value::String(format!("a{i}")));
            bus.post("connected", fields);
        }
        let mut rx = bus.subscribe();
        for i in 0..3 {
            let event = rx.try_recv().expect("replayed event");
            assert_eq!(event.fields.get("agent").unwrap(), &format!("a{i}"));
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn replay_buffer_caps_at_ten() {
        let bus = EventBus::new();
        for i in 0..25 {
            let mut fields = Map::new();
            fields.insert("n".into(), Value::from(i));
            bus.post("command", fields);
        }
        let mut rx = bus.subscribe();
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.fields.get("n").unwrap().as_i64().unwrap());
        }
        assert_eq!(seen, (15..25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn publish_after_subscribe_is_delivered_live() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.post("auth_success", Map::new());
        let event = rx.recv().await.expect("live event");
        assert_eq!(event.kind, "auth_success");
    }
}
