//! Wires the Type1 triage queue and the Type2 reasoner onto the event bus.
//!
//! The bus subscriber side is synchronous and non-blocking (per §4.2/§5: a
//! full Type1 queue drops with a `type1.queue.dropped` warning rather than
//! blocking the publisher). Two long-lived tasks then drain their queues:
//! Type1 dedupes by event id, assesses escalation, and on escalation hands
//! a `Type2Task` to Type2's queue; Type2 consumes one task at a time (at
//! most one in flight), rolls the daily budget, and either reports
//! exhaustion or runs a bounded reflection and publishes the result.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tako_bus::{EventBus, Subscriber};
use tako_cognition::type1::SeenEventIds;
use tako_cognition::{assess_event, run_type2_thinking, RagRecall, Type2PromptContext, Type2Task};
use tako_core::{Event, Severity};
use tako_dose::DoseState;
use tako_inference::InferenceRuntime;
use tako_policy::Type2Budget;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::daily_log;
use crate::mission;
use crate::ragrep::MemoryFileRecall;
use crate::session::InferenceGate;
use crate::frontmatter::load_doc_excerpt;

/// Sized generously per §5: should not fill in practice.
const TYPE1_QUEUE_CAPACITY: usize = 512;
const TYPE2_QUEUE_CAPACITY: usize = 64;
const MEMORY_EXCERPT_CHARS: usize = 800;

/// Bus subscriber that hands non-self-sourced events to the Type1 worker.
/// `try_send` keeps `on_event` non-blocking; a full queue is reported as a
/// `type1.queue.dropped` event published from a detached task (publishing
/// synchronously here would deadlock on the bus's own publish lock).
struct Type1QueueSubscriber {
    sender: mpsc::Sender<Event>,
    bus: Arc<EventBus>,
}

impl Subscriber for Type1QueueSubscriber {
    fn name(&self) -> &str {
        "cognition.type1_queue"
    }

    fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        if event.source == "type1" || event.source == "type2" {
            return Ok(());
        }
        if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(event.clone()) {
            let bus = self.bus.clone();
            let event_id = event.id;
            tokio::spawn(async move {
                let mut metadata = BTreeMap::new();
                metadata.insert("event_id".to_string(), Value::Number(event_id.into()));
                let _ = bus.publish(
                    "type1.queue.dropped",
                    format!("type1 queue full, dropped event {event_id}"),
                    Severity::Warn,
                    "eventbus",
                    metadata,
                );
            });
        }
        Ok(())
    }
}

/// Everything the Type2 loop needs to assemble a prompt and record its
/// result, gathered once at bootstrap.
pub struct Type2Deps {
    pub bus: Arc<EventBus>,
    pub inference: Option<InferenceRuntime>,
    pub inference_gate: Arc<InferenceGate>,
    pub tmp_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub state_dir: PathBuf,
    pub daily_root: PathBuf,
    pub dose: Arc<Mutex<DoseState>>,
    pub rag: MemoryFileRecall,
    pub budget: Mutex<Type2Budget>,
}

/// Owns the Type1/Type2 queues and the two tasks draining them.
/// `start()`/`stop()` are idempotent, mirroring `HeartbeatRuntime`.
pub struct CognitionRuntime {
    type1_tx: mpsc::Sender<Event>,
    type1_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    type2_deps: Arc<Type2Deps>,
    bus: Arc<EventBus>,
    dose: Arc<Mutex<DoseState>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CognitionRuntime {
    pub fn new(bus: Arc<EventBus>, dose: Arc<Mutex<DoseState>>, deps: Type2Deps) -> Self {
        let (type1_tx, type1_rx) = mpsc::channel(TYPE1_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            type1_tx,
            type1_rx: Mutex::new(Some(type1_rx)),
            type2_deps: Arc::new(deps),
            bus,
            dose,
            shutdown_tx,
            shutdown_rx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// The subscriber to register with the event bus before `start()`.
    pub fn subscriber(&self) -> Box<dyn Subscriber> {
        Box::new(Type1QueueSubscriber { sender: self.type1_tx.clone(), bus: self.bus.clone() })
    }

    /// Idempotent: a second `start()` while already running is a no-op.
    pub fn start(&self) {
        let mut handles = self.handles.lock().expect("cognition handles lock poisoned");
        if !handles.is_empty() {
            return;
        }
        let Some(type1_rx) = self.type1_rx.lock().expect("type1 rx lock poisoned").take() else {
            return;
        };

        let (type2_tx, type2_rx) = mpsc::channel(TYPE2_QUEUE_CAPACITY);

        let type1_shutdown = self.shutdown_rx.clone();
        let bus1 = self.bus.clone();
        let dose1 = self.dose.clone();
        handles.push(tokio::spawn(run_type1_loop(type1_rx, bus1, dose1, type2_tx, type1_shutdown)));

        let type2_shutdown = self.shutdown_rx.clone();
        let deps = self.type2_deps.clone();
        handles.push(tokio::spawn(run_type2_loop(type2_rx, deps, type2_shutdown)));
    }

    /// Idempotent: stopping an already-stopped runtime is a no-op.
    pub async fn stop(&self) {
        let taken: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().expect("cognition handles lock poisoned"));
        if taken.is_empty() {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        for handle in taken {
            let _ = handle.await;
        }
    }

    /// Reset the day's Type2 budget to `limit`, used on a life-stage change
    /// (per `LifeStagePolicy::type2_budget_per_day`) and not only on
    /// calendar rollover.
    pub fn reset_type2_budget(&self, today: chrono::NaiveDate, limit: u32) {
        self.type2_deps.budget.lock().expect("type2 budget lock poisoned").reset(today, limit);
    }
}

async fn run_type1_loop(
    mut receiver: mpsc::Receiver<Event>,
    bus: Arc<EventBus>,
    dose: Arc<Mutex<DoseState>>,
    type2_tx: mpsc::Sender<Type2Task>,
    mut shutdown: watch::Receiver<bool>,
) {
    let seen = SeenEventIds::default();
    loop {
        tokio::select! {
            maybe_event = receiver.recv() => {
                let Some(event) = maybe_event else { break };
                if !seen.insert_if_new(event.id) {
                    continue;
                }
                let dose_snapshot = dose.lock().expect("dose lock poisoned").clone();
                let (escalate, depth, reason) = assess_event(&event, &dose_snapshot);
                if !escalate {
                    continue;
                }
                let mut metadata = BTreeMap::new();
                metadata.insert("event_id".to_string(), Value::Number(event.id.into()));
                metadata.insert("depth".to_string(), Value::String(depth.as_str().to_string()));
                metadata.insert("reason".to_string(), Value::String(reason.clone()));
                if let Err(err) = bus.publish(
                    "type1.escalation",
                    format!("escalating event {} ({reason})", event.id),
                    Severity::Info,
                    "type1",
                    metadata,
                ) {
                    tracing::warn!(error = %err, "type1: failed to publish escalation event");
                }
                if type2_tx.send(Type2Task { event, depth, reason }).await.is_err() {
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn run_type2_loop(mut receiver: mpsc::Receiver<Type2Task>, deps: Arc<Type2Deps>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            maybe_task = receiver.recv() => {
                let Some(task) = maybe_task else { break };
                process_type2_task(task, &deps).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn process_type2_task(task: Type2Task, deps: &Type2Deps) {
    let today = Utc::now().date_naive();
    let consumed = {
        let mut budget = deps.budget.lock().expect("type2 budget lock poisoned");
        budget.try_consume(today)
    };
    if !consumed {
        let mut metadata = BTreeMap::new();
        metadata.insert("event_id".to_string(), Value::Number(task.event.id.into()));
        let _ = deps.bus.publish(
            "type2.budget.exhausted",
            format!("daily Type2 budget exhausted, dropping event {}", task.event.id),
            Severity::Warn,
            "type2",
            metadata,
        );
        return;
    }

    let focus_summary = {
        let dose = deps.dose.lock().expect("dose lock poisoned");
        format!("label={} stability={:.2}", dose.label().as_str(), dose.stability())
    };
    let memory_frontmatter = load_doc_excerpt(&deps.workspace_root.join("MEMORY.md"), MEMORY_EXCERPT_CHARS);
    let rag_context = deps.rag.recall(&task.event.message);
    let mission_statement = mission::show(&deps.state_dir).unwrap_or_default();
    let mission_objectives: Vec<String> = if mission_statement.is_empty() { Vec::new() } else { vec![mission_statement] };

    let ctx = Type2PromptContext {
        memory_frontmatter: &memory_frontmatter,
        focus_summary: &focus_summary,
        rag_context: &rag_context,
        mission_objectives: &mission_objectives,
    };

    let outcome = run_type2_thinking(
        &task.event,
        task.depth,
        &task.reason,
        deps.inference.as_ref(),
        deps.inference_gate.is_open(),
        &deps.tmp_dir,
        &ctx,
    )
    .await;

    let mut metadata = BTreeMap::new();
    metadata.insert("event_id".to_string(), Value::Number(task.event.id.into()));
    metadata.insert("provider".to_string(), Value::String(outcome.provider.clone()));
    metadata.insert("depth".to_string(), Value::String(outcome.depth.as_str().to_string()));
    metadata.insert("reason".to_string(), Value::String(outcome.reason.clone()));
    if let Err(err) = deps.bus.publish("type2.result", outcome.recommendation.clone(), Severity::Info, "type2", metadata) {
        tracing::warn!(error = %err, "type2: failed to publish result event");
    }

    let note = format!("[type2:{}] {}", outcome.provider, outcome.recommendation);
    if let Err(err) = daily_log::append_daily_note(&deps.daily_root, Utc::now(), "Notes", &note) {
        tracing::warn!(error = %err, "type2: failed to append daily-log note");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tako_bus::EventLog;
    use tako_policy::Type2Budget;

    fn test_deps(dir: &std::path::Path, bus: Arc<EventBus>) -> Type2Deps {
        Type2Deps {
            bus,
            inference: None,
            inference_gate: Arc::new(InferenceGate::default()),
            tmp_dir: dir.join("tmp"),
            workspace_root: dir.to_path_buf(),
            state_dir: dir.join("state"),
            daily_root: dir.join("memory/dailies"),
            dose: Arc::new(Mutex::new(DoseState::default())),
            rag: MemoryFileRecall::new(dir),
            budget: Mutex::new(Type2Budget::new(Utc::now().date_naive(), 2)),
        }
    }

    #[tokio::test]
    async fn escalated_event_produces_one_type2_result() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::open(EventLog::new(dir.path().join("events.jsonl"))).unwrap());
        let dose = Arc::new(Mutex::new(DoseState::default()));
        let runtime = CognitionRuntime::new(bus.clone(), dose.clone(), test_deps(dir.path(), bus.clone()));
        bus.subscribe(runtime.subscriber());
        runtime.start();

        bus.publish(
            "runtime.crash.xmtp",
            "XMTP runtime crashed: boom",
            Severity::Error,
            "runtime",
            BTreeMap::new(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        runtime.stop().await;

        let events = EventLog::new(dir.path().join("events.jsonl")).load().unwrap();
        let escalations = events.iter().filter(|e| e.kind == "type1.escalation").count();
        let results = events.iter().filter(|e| e.kind == "type2.result").count();
        assert_eq!(escalations, 1);
        assert_eq!(results, 1);
        let result = events.iter().find(|e| e.kind == "type2.result").unwrap();
        assert_eq!(result.metadata.get("provider").and_then(|v| v.as_str()), Some("heuristic"));
    }

    #[tokio::test]
    async fn budget_exhaustion_stops_reasoning_for_the_day() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::open(EventLog::new(dir.path().join("events.jsonl"))).unwrap());
        let dose = Arc::new(Mutex::new(DoseState::default()));
        let runtime = CognitionRuntime::new(bus.clone(), dose.clone(), test_deps(dir.path(), bus.clone()));
        bus.subscribe(runtime.subscriber());
        runtime.start();

        for i in 0..3 {
            bus.publish(
                "runtime.crash.xmtp",
                format!("XMTP runtime crashed: boom {i}"),
                Severity::Error,
                "runtime",
                BTreeMap::new(),
            )
            .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(400)).await;
        runtime.stop().await;

        let events = EventLog::new(dir.path().join("events.jsonl")).load().unwrap();
        let results = events.iter().filter(|e| e.kind == "type2.result").count();
        let exhausted = events.iter().filter(|e| e.kind == "type2.budget.exhausted").count();
        assert_eq!(results, 2);
        assert_eq!(exhausted, 1);
    }

    #[tokio::test]
    async fn reset_type2_budget_restores_remaining_slots() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::open(EventLog::new(dir.path().join("events.jsonl"))).unwrap());
        let dose = Arc::new(Mutex::new(DoseState::default()));
        let runtime = CognitionRuntime::new(bus.clone(), dose.clone(), test_deps(dir.path(), bus.clone()));
        bus.subscribe(runtime.subscriber());
        runtime.start();

        for i in 0..2 {
            bus.publish(
                "runtime.crash.xmtp",
                format!("XMTP runtime crashed: boom {i}"),
                Severity::Error,
                "runtime",
                BTreeMap::new(),
            )
            .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        runtime.reset_type2_budget(Utc::now().date_naive(), 8);
        assert_eq!(runtime.type2_deps.budget.lock().unwrap().remaining(Utc::now().date_naive()), 8);

        runtime.stop().await;
    }

    #[tokio::test]
    async fn self_sourced_events_never_re_enter_type1() {
        let dir = tempfile::tempdir().unwrap();
        let bus = Arc::new(EventBus::open(EventLog::new(dir.path().join("events.jsonl"))).unwrap());
        let dose = Arc::new(Mutex::new(DoseState::default()));
        let runtime = CognitionRuntime::new(bus.clone(), dose.clone(), test_deps(dir.path(), bus.clone()));
        bus.subscribe(runtime.subscriber());
        runtime.start();

        bus.publish("type1.escalation", "synthetic", Severity::Critical, "type1", BTreeMap::new()).unwrap();
        bus.publish("type2.result", "synthetic", Severity::Critical, "type2", BTreeMap::new()).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        runtime.stop().await;

        let events = EventLog::new(dir.path().join("events.jsonl")).load().unwrap();
        assert_eq!(events.iter().filter(|e| e.kind == "type1.escalation").count(), 1);
        assert_eq!(events.iter().filter(|e| e.kind == "type2.result").count(), 1);
    }
}
