use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use tako_bus::EventBus;
use tako_cognition::{compute_open_loops, summarize_open_loops, RecentEventsSubscriber};
use tako_core::Severity;
use tako_dose::DoseState;
use tako_policy::LifeStagePolicy;
use tako_sensors::Sensor;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::daily_log;
use crate::git_safety::GitAutoCommit;

/// How many ticks elapse between DOSE snapshot persists.
const DOSE_PERSIST_EVERY_N_TICKS: u64 = 6;
/// How many recent events the open-loops computer looks at.
const RECENT_EVENTS_CAP: usize = 512;
/// Jitter applied to every cadence.
const JITTER_FRACTION: f64 = 0.2;
/// Heartbeat interval lower bound.
const MIN_TICK_INTERVAL: Duration = Duration::from_secs(1);

fn jittered(duration: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor = 1.0 + rng.gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    let jittered_secs = (duration.as_secs_f64() * factor).max(MIN_TICK_INTERVAL.as_secs_f64());
    Duration::from_secs_f64(jittered_secs)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExploreOutcome {
    pub topic_selected: String,
    pub new_world_count: usize,
}

struct SharedState {
    bus: Arc<EventBus>,
    recent_events: Arc<RecentEventsSubscriber>,
    dose: Arc<Mutex<DoseState>>,
    dose_snapshot_path: PathBuf,
    daily_root: PathBuf,
    open_loops_path: PathBuf,
    repo_root: PathBuf,
    git: Arc<dyn GitAutoCommit>,
    sensors: Mutex<Vec<Box<dyn Sensor>>>,
    sensor_last_polled: Mutex<BTreeMap<String, Instant>>,
    policy: Mutex<LifeStagePolicy>,
    tick_interval: Duration,
    explore_interval: Mutex<Duration>,
    last_dose_tick: Mutex<chrono::DateTime<Utc>>,
    last_explore_at: Mutex<Instant>,
    tick_count: AtomicU64,
    identity_request_noted: AtomicBool,
}

impl SharedState {
    async fn run_tick(&self) {
        // 1. Ensure today's daily log exists.
        let now_utc = Utc::now();
        if let Err(err) = daily_log::ensure_daily_log(&self.daily_root, now_utc) {
            tracing::warn!(error = %err, "heartbeat: failed to ensure daily log");
        }

        // 2. DOSE tick with dt = now - last_dose_ts, capped internally by DoseState::tick.
        let (label_before, label_after) = {
            let mut last = self.last_dose_tick.lock().expect("dose tick lock poisoned");
            let dt = (now_utc - *last).num_milliseconds().max(0) as f64 / 1000.0;
            let mut dose = self.dose.lock().expect("dose lock poisoned");
            let before = dose.label();
            dose.tick(now_utc, dt);
            let after = dose.label();
            *last = now_utc;
            (before, after)
        };

        // 3. Re-derive open-loops (including today's blank-Outcomes signal)
        // and persist the summary; on label change, publish dose.mode.changed.
        let recent = self.recent_events.snapshot();
        let outcomes_blank = daily_log::section_is_blank(&self.daily_root, now_utc, "Outcomes");
        let loops = compute_open_loops(&recent, now_utc, outcomes_blank);
        let summary = summarize_open_loops(&loops);
        if let Err(err) = std::fs::write(&self.open_loops_path, serde_json::to_string_pretty(&summary).unwrap_or_default()) {
            tracing::warn!(error = %err, "heartbeat: failed to persist open_loops.json");
        }
        if label_before != label_after {
            let mut metadata = BTreeMap::new();
            metadata.insert("from".to_string(), serde_json::Value::String(label_before.as_str().to_string()));
            metadata.insert("to".to_string(), serde_json::Value::String(label_after.as_str().to_string()));
            metadata.insert("open_loops".to_string(), serde_json::Value::Number(summary.count.into()));
            if let Err(err) =
                self.bus.publish("dose.mode.changed", format!("mode changed to {}", label_after.as_str()), Severity::Info, "heartbeat", metadata)
            {
                tracing::warn!(error = %err, "heartbeat: failed to publish dose.mode.changed");
            }
        }

        // 4. Git auto-commit attempt.
        let commit_result = self.git.auto_commit(&self.repo_root, "tako: auto-commit pending workspace changes").await;
        if !commit_result.ok {
            let lowered = commit_result.summary.to_lowercase();
            let is_identity_error = lowered.contains("identity");
            let already_noted = self.identity_request_noted.load(Ordering::SeqCst);
            if is_identity_error && !already_noted {
                self.identity_request_noted.store(true, Ordering::SeqCst);
                let _ = self.bus.publish(
                    "runtime.operator_request.git_identity",
                    "git commit author identity is not configured; auto-commit is paused until it is",
                    Severity::Warn,
                    "heartbeat",
                    BTreeMap::new(),
                );
            } else if !is_identity_error {
                let _ = self.bus.publish("runtime.git_autocommit.failed", commit_result.summary.clone(), Severity::Warn, "heartbeat", BTreeMap::new());
            }
        } else if commit_result.committed {
            self.identity_request_noted.store(false, Ordering::SeqCst);
            let mut metadata = BTreeMap::new();
            metadata.insert("commit".to_string(), serde_json::Value::String(commit_result.commit.clone()));
            let _ = self.bus.publish("runtime.git_autocommit.committed", commit_result.summary.clone(), Severity::Info, "heartbeat", metadata);
        }

        // 5. Exploration on the explore_interval timer (skipped when request_explore ran recently).
        let explore_interval = *self.explore_interval.lock().expect("explore interval lock poisoned");
        let should_explore = {
            let last_explore = self.last_explore_at.lock().expect("explore lock poisoned");
            last_explore.elapsed() >= explore_interval
        };
        if should_explore {
            let outcome = self.run_exploration(None).await;
            *self.last_explore_at.lock().expect("explore lock poisoned") = Instant::now();
            tracing::debug!(topic = %outcome.topic_selected, new_world_count = outcome.new_world_count, "heartbeat: scheduled exploration ran");
        }

        // 6. Persist DOSE snapshot every N ticks.
        let tick_no = self.tick_count.fetch_add(1, Ordering::SeqCst) + 1;
        if tick_no % DOSE_PERSIST_EVERY_N_TICKS == 0 {
            let dose = self.dose.lock().expect("dose lock poisoned");
            if let Err(err) = dose.save(&self.dose_snapshot_path) {
                tracing::warn!(error = %err, "heartbeat: failed to persist dose snapshot");
            }
        }
    }

    /// Poll every sensor whose own cadence has elapsed (or all, when
    /// `topic` requests an on-demand run) and publish their events.
    /// Returns the count of newly published sensor events.
    async fn run_exploration(&self, topic: Option<String>) -> ExploreOutcome {
        let mut sensors = self.sensors.lock().expect("sensors lock poisoned");
        let mut new_world_count = 0usize;
        let mut names_polled = Vec::new();

        for sensor in sensors.iter_mut() {
            let name = sensor.name().to_string();
            let due = topic.is_some() || {
                let mut last_polled = self.sensor_last_polled.lock().expect("sensor-poll lock poisoned");
                let interval = Duration::from_secs(u64::from(sensor.poll_interval_minutes()) * 60);
                match last_polled.get(&name) {
                    Some(last) if last.elapsed() < interval => false,
                    _ => {
                        last_polled.insert(name.clone(), Instant::now());
                        true
                    }
                }
            };
            if !due {
                continue;
            }

            match sensor.poll().await {
                Ok(events) => {
                    for event in events {
                        new_world_count += 1;
                        let _ = self.bus.publish(event.kind, event.message, event.severity, event.source, event.metadata);
                    }
                    names_polled.push(name);
                }
                Err(err) => {
                    let _ = self.bus.publish(
                        "runtime.polling.sensor_failed",
                        format!("{name}: {err}"),
                        Severity::Warn,
                        "heartbeat",
                        BTreeMap::new(),
                    );
                }
            }
        }

        let topic_selected = topic.unwrap_or_else(|| names_polled.first().cloned().unwrap_or_else(|| "none".to_string()));
        ExploreOutcome { topic_selected, new_world_count }
    }

    /// DOSE nudge for operator activity (`handle_input`) — does not
    /// publish a bus event itself; the conversation router publishes the
    /// `operator.message.turn` event that Type1/DOSE already react to.
    fn note_operator_activity(&self) {
        let mut dose = self.dose.lock().expect("dose lock poisoned");
        dose.o = (dose.o + 0.02).min(1.0);
        dose.clamp();
    }
}

/// A single scheduler owning the heartbeat tick, sensor polling, git
/// auto-commit, and exploration cadence. Runs as a `tokio::spawn`'d task
/// guarded by a `watch`-channel shutdown signal.
pub struct HeartbeatRuntime {
    shared: Arc<SharedState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct HeartbeatConfig {
    pub bus: Arc<EventBus>,
    pub recent_events: Arc<RecentEventsSubscriber>,
    pub dose: Arc<Mutex<DoseState>>,
    pub dose_snapshot_path: PathBuf,
    pub daily_root: PathBuf,
    pub open_loops_path: PathBuf,
    pub repo_root: PathBuf,
    pub git: Arc<dyn GitAutoCommit>,
    pub sensors: Vec<Box<dyn Sensor>>,
    pub policy: LifeStagePolicy,
    pub tick_interval: Duration,
}

impl HeartbeatRuntime {
    pub fn new(config: HeartbeatConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let explore_interval = Duration::from_secs(u64::from(config.policy.explore_interval_minutes) * 60);
        let shared = Arc::new(SharedState {
            bus: config.bus,
            recent_events: config.recent_events,
            dose: config.dose,
            dose_snapshot_path: config.dose_snapshot_path,
            daily_root: config.daily_root,
            open_loops_path: config.open_loops_path,
            repo_root: config.repo_root,
            git: config.git,
            sensors: Mutex::new(config.sensors),
            sensor_last_polled: Mutex::new(BTreeMap::new()),
            policy: Mutex::new(config.policy),
            tick_interval: config.tick_interval,
            explore_interval: Mutex::new(explore_interval),
            last_dose_tick: Mutex::new(Utc::now()),
            last_explore_at: Mutex::new(Instant::now()),
            tick_count: AtomicU64::new(0),
            identity_request_noted: AtomicBool::new(false),
        });
        Self { shared, shutdown_tx, shutdown_rx, handle: Mutex::new(None) }
    }

    /// Idempotent: a second `start()` while already running is a no-op.
    pub fn start(&self) {
        let mut handle = self.handle.lock().expect("heartbeat handle lock poisoned");
        if handle.is_some() {
            return;
        }
        let shared = self.shared.clone();
        let mut shutdown_rx = self.shutdown_rx.clone();
        *shutdown_rx.borrow_and_update();
        let tick_interval = shared.tick_interval;

        *handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(jittered(tick_interval)) => {
                        shared.run_tick().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    /// Idempotent: stopping an already-stopped runtime is a no-op.
    pub async fn stop(&self) {
        let taken = self.handle.lock().expect("heartbeat handle lock poisoned").take();
        let Some(join_handle) = taken else { return };
        let _ = self.shutdown_tx.send(true);
        let _ = join_handle.await;
    }

    /// Operator-driven on-demand exploration; bypasses the wall-clock
    /// timer entirely for this call.
    pub async fn request_explore(&self, topic: Option<String>) -> ExploreOutcome {
        let outcome = self.shared.run_exploration(topic).await;
        *self.shared.last_explore_at.lock().expect("explore lock poisoned") = Instant::now();
        outcome
    }

    /// Back-channel for the UI to nudge DOSE on operator activity.
    pub fn handle_input(&self, _text: &str) {
        self.shared.note_operator_activity();
    }

    /// Shared handle onto the DOSE state driven by this runtime's ticks —
    /// the `dose` command reads/writes through the same lock so router and
    /// heartbeat never see a torn view of the state.
    pub fn dose(&self) -> Arc<Mutex<DoseState>> {
        self.shared.dose.clone()
    }

    /// Swap the active policy and sensor set on a life-stage change:
    /// recomputes `explore_interval` from the new policy and resets each
    /// sensor's last-polled bookkeeping so the new set is polled on its own
    /// cadence rather than inheriting the old sensors' timers.
    pub fn reseed_for_policy(&self, policy: LifeStagePolicy, sensors: Vec<Box<dyn Sensor>>) {
        let new_explore_interval = Duration::from_secs(u64::from(policy.explore_interval_minutes) * 60);
        *self.shared.policy.lock().expect("policy lock poisoned") = policy;
        *self.shared.explore_interval.lock().expect("explore interval lock poisoned") = new_explore_interval;
        *self.shared.sensors.lock().expect("sensors lock poisoned") = sensors;
        self.shared.sensor_last_polled.lock().expect("sensor-poll lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tako_bus::EventLog;
    use tako_core::Event;

    struct StubGit;

    #[async_trait]
    impl GitAutoCommit for StubGit {
        async fn auto_commit(&self, _repo_root: &std::path::Path, _message: &str) -> crate::git_safety::GitAutoCommitResult {
            crate::git_safety::GitAutoCommitResult { ok: true, committed: false, summary: "no pending changes".into(), commit: String::new() }
        }
    }

    struct CountingSensor {
        polls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl Sensor for CountingSensor {
        fn name(&self) -> &str {
            "counting"
        }
        fn poll_interval_minutes(&self) -> u32 {
            0
        }
        async fn poll(&mut self) -> anyhow::Result<Vec<Event>> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    fn test_runtime(dir: &std::path::Path) -> HeartbeatRuntime {
        let bus = Arc::new(EventBus::open(EventLog::new(dir.join("events.jsonl"))).unwrap());
        let recent = Arc::new(RecentEventsSubscriber::new(RECENT_EVENTS_CAP));
        let policy = LifeStagePolicy::for_stage(tako_policy::Stage::Hatchling);
        HeartbeatRuntime::new(HeartbeatConfig {
            bus,
            recent_events: recent,
            dose: Arc::new(Mutex::new(DoseState::default())),
            dose_snapshot_path: dir.join("dose.json"),
            daily_root: dir.join("memory/dailies"),
            open_loops_path: dir.join("state/open_loops.json"),
            repo_root: dir.to_path_buf(),
            git: Arc::new(StubGit),
            sensors: vec![],
            policy,
            tick_interval: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_joins_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = test_runtime(dir.path());
        runtime.start();
        runtime.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        runtime.stop().await;
        runtime.stop().await;
    }

    #[tokio::test]
    async fn request_explore_polls_registered_sensors_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let polls = Arc::new(AtomicU64::new(0));
        let mut runtime = test_runtime(dir.path());
        Arc::get_mut(&mut runtime.shared).unwrap().sensors =
            Mutex::new(vec![Box::new(CountingSensor { polls: polls.clone() })]);

        let outcome = runtime.request_explore(Some("manual".to_string())).await;
        assert_eq!(outcome.topic_selected, "manual");
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reseed_for_policy_swaps_sensors_and_explore_interval() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = test_runtime(dir.path());
        let polls = Arc::new(AtomicU64::new(0));
        let new_policy = LifeStagePolicy::for_stage(tako_policy::Stage::Adult);
        runtime.reseed_for_policy(new_policy, vec![Box::new(CountingSensor { polls: polls.clone() })]);

        let explore_interval = *runtime.shared.explore_interval.lock().unwrap();
        assert_eq!(explore_interval, Duration::from_secs(45 * 60));
        assert_eq!(runtime.shared.sensors.lock().unwrap().len(), 1);

        let outcome = runtime.request_explore(Some("manual".to_string())).await;
        assert_eq!(outcome.topic_selected, "manual");
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handle_input_nudges_oxytocin_up() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = test_runtime(dir.path());
        let before = runtime.shared.dose.lock().unwrap().o;
        runtime.handle_input("hello");
        let after = runtime.shared.dose.lock().unwrap().o;
        assert!(after >= before);
    }
}
