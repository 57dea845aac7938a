use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tako_core::{Event, Severity};

/// One outstanding item surfaced by the open-loops computer: an explicit
/// task that hasn't reached a terminal event, or a recent warn/error signal
/// the operator hasn't yet acknowledged. Non-authoritative — recomputed on
/// every heartbeat tick from the recent event window, never the source of
/// truth for task state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenLoop {
    pub kind: String,
    pub title: String,
    pub age_seconds: f64,
    pub source_event_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OpenLoopsSummary {
    pub count: usize,
    pub oldest_age_s: f64,
    pub top: Vec<String>,
}

const MAX_TOP: usize = 5;

/// Derive outstanding loops from a window of recent events: any
/// `task.opened` without a later `task.done`/`task.dropped` for the same
/// `task_id` metadata key, any `warn`/`error`/`critical` event without a
/// later `*.resolved`/`*.acknowledged` event of the same `kind` prefix, and
/// (when `outcomes_blank` is set) today's blank `## Outcomes` section.
///
/// `now` is supplied by the caller (heartbeat tick) rather than read from
/// the clock here, keeping this function pure and easy to test.
pub fn compute_open_loops(recent_events: &[Event], now: chrono::DateTime<chrono::Utc>, outcomes_blank: bool) -> Vec<OpenLoop> {
    let mut open_tasks: std::collections::BTreeMap<String, &Event> = std::collections::BTreeMap::new();
    let mut closed_tasks: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    let mut loops = Vec::new();

    for event in recent_events {
        if let Some(task_id) = event.metadata.get("task_id").and_then(|v| v.as_str()) {
            match event.kind.as_str() {
                "task.opened" => {
                    open_tasks.insert(task_id.to_string(), event);
                }
                "task.done" | "task.dropped" => {
                    closed_tasks.insert(task_id.to_string());
                }
                _ => {}
            }
        }
    }

    for (task_id, event) in &open_tasks {
        if closed_tasks.contains(task_id) {
            continue;
        }
        loops.push(OpenLoop {
            kind: "task".to_string(),
            title: event.message.clone(),
            age_seconds: (now - event.ts).num_milliseconds().max(0) as f64 / 1000.0,
            source_event_id: event.id,
        });
    }

    let mut resolved_kinds: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
    for event in recent_events {
        if event.kind.ends_with(".resolved") || event.kind.ends_with(".acknowledged") {
            if let Some(prefix) = event.kind.rsplit_once('.').map(|(p, _)| p) {
                resolved_kinds.insert(prefix);
            }
        }
    }

    for event in recent_events {
        if !matches!(event.severity, Severity::Warn | Severity::Error | Severity::Critical) {
            continue;
        }
        let prefix = event.kind.rsplit_once('.').map(|(p, _)| p).unwrap_or(event.kind.as_str());
        if resolved_kinds.contains(prefix) {
            continue;
        }
        loops.push(OpenLoop {
            kind: "signal".to_string(),
            title: event.message.clone(),
            age_seconds: (now - event.ts).num_milliseconds().max(0) as f64 / 1000.0,
            source_event_id: event.id,
        });
    }

    if outcomes_blank {
        loops.push(OpenLoop {
            kind: "outcomes".to_string(),
            title: "today's Outcomes section is blank".to_string(),
            age_seconds: 0.0,
            source_event_id: 0,
        });
    }

    loops.sort_by(|a, b| b.age_seconds.partial_cmp(&a.age_seconds).unwrap_or(std::cmp::Ordering::Equal));
    loops
}

pub fn summarize_open_loops(loops: &[OpenLoop]) -> OpenLoopsSummary {
    let oldest_age_s = loops.iter().map(|l| l.age_seconds).fold(0.0_f64, f64::max);
    let top = loops.iter().take(MAX_TOP).map(|l| l.title.clone()).collect();
    OpenLoopsSummary { count: loops.len(), oldest_age_s, top }
}

/// A bounded ring of recently published events, fed by subscribing to the
/// bus, that the heartbeat tick reads from to recompute open loops without
/// re-reading the whole event log every tick.
pub struct RecentEventsSubscriber {
    buffer: Mutex<VecDeque<Event>>,
    cap: usize,
}

impl RecentEventsSubscriber {
    pub fn new(cap: usize) -> Self {
        Self { buffer: Mutex::new(VecDeque::with_capacity(cap)), cap }
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.buffer.lock().expect("recent-events lock poisoned").iter().cloned().collect()
    }
}

impl tako_bus::Subscriber for RecentEventsSubscriber {
    fn name(&self) -> &str {
        "open_loops.recent_events"
    }

    fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        let mut buffer = self.buffer.lock().expect("recent-events lock poisoned");
        buffer.push_back(event.clone());
        while buffer.len() > self.cap {
            buffer.pop_front();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use chrono::Utc;
    use serde_json::Value;

    fn event(id: u64, kind: &str, severity: Severity, message: &str, metadata: BTreeMap<String, Value>) -> Event {
        Event { id, ts: Utc::now(), kind: kind.to_string(), severity, source: "test".to_string(), message: message.to_string(), metadata }
    }

    #[test]
    fn open_task_without_done_event_is_a_loop() {
        let mut meta = BTreeMap::new();
        meta.insert("task_id".to_string(), Value::String("t1".to_string()));
        let events = vec![event(1, "task.opened", Severity::Info, "write docs", meta)];
        let loops = compute_open_loops(&events, Utc::now(), false);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].kind, "task");
    }

    #[test]
    fn done_task_is_not_a_loop() {
        let mut meta = BTreeMap::new();
        meta.insert("task_id".to_string(), Value::String("t1".to_string()));
        let events = vec![
            event(1, "task.opened", Severity::Info, "write docs", meta.clone()),
            event(2, "task.done", Severity::Info, "write docs", meta),
        ];
        let loops = compute_open_loops(&events, Utc::now(), false);
        assert!(loops.is_empty());
    }

    #[test]
    fn unresolved_warn_signal_is_a_loop_but_resolved_one_is_not() {
        let events = vec![
            event(1, "runtime.crash", Severity::Error, "crashed", BTreeMap::new()),
            event(2, "health.check.issue", Severity::Warn, "disk low", BTreeMap::new()),
            event(3, "health.check.issue.resolved", Severity::Info, "disk ok now", BTreeMap::new()),
        ];
        let loops = compute_open_loops(&events, Utc::now(), false);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].title, "crashed");
    }

    #[test]
    fn summary_reports_count_and_top_titles() {
        let events = vec![
            event(1, "runtime.crash", Severity::Error, "crashed once", BTreeMap::new()),
            event(2, "runtime.crash", Severity::Error, "crashed twice", BTreeMap::new()),
        ];
        let loops = compute_open_loops(&events, Utc::now(), false);
        let summary = summarize_open_loops(&loops);
        assert_eq!(summary.count, 2);
        assert_eq!(summary.top.len(), 2);
    }

    #[test]
    fn blank_outcomes_section_adds_an_outcomes_loop() {
        let loops = compute_open_loops(&[], Utc::now(), true);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].kind, "outcomes");
    }

    #[test]
    fn recent_events_subscriber_caps_to_capacity() {
        use tako_bus::Subscriber;

        let sub = RecentEventsSubscriber::new(2);
        for i in 0..5 {
            sub.on_event(&event(i, "x", Severity::Info, "m", BTreeMap::new())).unwrap();
        }
        let snapshot = sub.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, 3);
        assert_eq!(snapshot[1].id, 4);
    }
}
