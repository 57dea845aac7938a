use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use serde_json::Value;
use tako_core::{Event, Severity};

use crate::log::EventLog;

/// A bus subscriber. Invoked synchronously, in registration order, while
/// the bus's publish mutex is held.
///
/// Implementations must not block for long — suspension points belong in
/// the owning task (heartbeat, Type1, Type2), not inside `on_event`.
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;
    fn on_event(&self, event: &Event) -> anyhow::Result<()>;
}

/// Append-only-log-backed, in-memory fan-out event bus.
///
/// `publish` is synchronous from the caller's point of view: it sanitizes
/// the message, assigns the next id, appends one JSONL record, then invokes
/// every subscriber in registration order. A subscriber panic/error is
/// caught and re-published as a `eventbus.subscriber_error` warning — it
/// never prevents delivery to other subscribers or truncates the log.
pub struct EventBus {
    log: EventLog,
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Box<dyn Subscriber>>>,
    publish_lock: Mutex<()>,
}

impl EventBus {
    /// Build a bus over `log`, seeding the next id from the highest id
    /// already present so restarts never reuse an id.
    pub fn open(log: EventLog) -> anyhow::Result<Self> {
        let max_id = log.max_id()?.unwrap_or(0);
        Ok(Self {
            log,
            next_id: AtomicU64::new(max_id + 1),
            subscribers: Mutex::new(Vec::new()),
            publish_lock: Mutex::new(()),
        })
    }

    pub fn subscribe(&self, subscriber: Box<dyn Subscriber>) {
        self.subscribers.lock().expect("subscriber lock poisoned").push(subscriber);
    }

    pub fn log_path(&self) -> &std::path::Path {
        self.log.path()
    }

    /// Publish an event. Returns the fully-assigned `Event` (with its final
    /// id and sanitized message) after it has been durably logged and fanned
    /// out to all subscribers.
    pub fn publish(
        &self,
        kind: impl Into<String>,
        message: impl AsRef<str>,
        severity: Severity,
        source: impl Into<String>,
        metadata: BTreeMap<String, Value>,
    ) -> anyhow::Result<Event> {
        let _guard = self.publish_lock.lock().expect("publish lock poisoned");

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            ts: Utc::now(),
            kind: kind.into(),
            severity,
            source: source.into(),
            message: Event::sanitize_message(message.as_ref()),
            metadata,
        };

        self.log.append(&event)?;
        self.fan_out(&event);
        Ok(event)
    }

    fn fan_out(&self, event: &Event) {
        let subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        for sub in subscribers.iter() {
            if let Err(err) = sub.on_event(event) {
                tracing::warn!(subscriber = sub.name(), error = %err, "subscriber failed");
                self.publish_subscriber_error(sub.name(), &err.to_string());
            }
        }
    }

    /// A subscriber error is itself logged as a bus event, but must not
    /// re-enter `fan_out` recursively (it is appended to the log and
    /// delivered only to *other* subscribers registered before this point
    /// in the original fan-out; we simply append+fan-out again, which is
    /// safe since the failing subscriber already returned).
    fn publish_subscriber_error(&self, subscriber: &str, summary: &str) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut metadata = BTreeMap::new();
        metadata.insert("subscriber".to_string(), Value::String(subscriber.to_string()));
        let event = Event {
            id,
            ts: Utc::now(),
            kind: "eventbus.subscriber_error".to_string(),
            severity: Severity::Warn,
            source: "eventbus".to_string(),
            message: Event::sanitize_message(summary),
            metadata,
        };
        if let Err(err) = self.log.append(&event) {
            tracing::error!(error = %err, "failed to log subscriber error event");
        }
        let subscribers = self.subscribers.lock().expect("subscriber lock poisoned");
        for sub in subscribers.iter() {
            let _ = sub.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    struct CountingSubscriber {
        name: String,
        count: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Subscriber for CountingSubscriber {
        fn name(&self) -> &str {
            &self.name
        }
        fn on_event(&self, _event: &Event) -> anyhow::Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[test]
    fn publish_assigns_increasing_ids_and_writes_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::open(EventLog::new(dir.path().join("events.jsonl"))).unwrap();
        let e1 = bus.publish("a.b", "hi", Severity::Info, "test", BTreeMap::new()).unwrap();
        let e2 = bus.publish("a.c", "hi2", Severity::Info, "test", BTreeMap::new()).unwrap();
        assert_eq!(e2.id, e1.id + 1);
        let loaded = EventLog::new(dir.path().join("events.jsonl")).load().unwrap();
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn failing_subscriber_does_not_block_delivery_to_others() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::open(EventLog::new(dir.path().join("events.jsonl"))).unwrap();
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        bus.subscribe(Box::new(CountingSubscriber { name: "a".into(), count: count_a.clone(), fail: true }));
        bus.subscribe(Box::new(CountingSubscriber { name: "b".into(), count: count_b.clone(), fail: false }));

        bus.publish("x", "hi", Severity::Warn, "test", BTreeMap::new()).unwrap();

        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 2); // original event + subscriber_error replay

        let loaded = EventLog::new(dir.path().join("events.jsonl")).load().unwrap();
        assert!(loaded.iter().any(|e| e.kind == "eventbus.subscriber_error"));
    }

    #[test]
    fn reopening_continues_id_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let bus = EventBus::open(EventLog::new(&path)).unwrap();
            bus.publish("a", "hi", Severity::Info, "test", BTreeMap::new()).unwrap();
        }
        let bus2 = EventBus::open(EventLog::new(&path)).unwrap();
        let e = bus2.publish("b", "hi", Severity::Info, "test", BTreeMap::new()).unwrap();
        assert_eq!(e.id, 2);
    }
}
