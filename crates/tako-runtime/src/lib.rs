//! Assembles the per-component crates into one running agent.
//!
//! `TakoRuntime::bootstrap` is the single entry point: it materializes the
//! workspace doc set, acquires the instance lock, opens the event bus,
//! wires the DOSE/open-loops subscribers, discovers inference, builds the
//! active sensor set for the configured life stage, and starts the
//! heartbeat. `tako-cli` is the only thing above this crate.

pub mod cognition;
pub mod config;
pub mod daily_log;
pub mod extensions;
pub mod frontmatter;
pub mod git_safety;
pub mod heartbeat;
pub mod mission;
pub mod operator;
pub mod ragrep;
pub mod router;
pub mod session;
pub mod update;
pub mod workspace;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use tako_bus::EventBus;
use tako_bus::EventLog;
use tako_conversation::ConversationStore;
use tako_cognition::RecentEventsSubscriber;
use tako_core::{InstanceLock, RuntimePaths, Severity};
use tako_dose::{DoseState, DoseSubscriber};
use tako_inference::{discover_inference_runtime, InferenceRuntime, InferenceSettings};
use tako_policy::{LifeStagePolicy, Stage};
use tako_sensors::registry::{build_sensors_for_stage, WorldWatchConfig as SensorWorldWatchConfig};

use crate::cognition::{CognitionRuntime, Type2Deps};
use crate::config::AppConfig;
use crate::git_safety::{GitAutoCommit, ShellGitAutoCommit};
use crate::heartbeat::{HeartbeatConfig, HeartbeatRuntime};
use crate::ragrep::MemoryFileRecall;
use crate::router::{build_registry, CommandRegistry, RouteOutcome, RouterContext};
use crate::session::{boot_transition, InferenceGate, SessionState};

const RECENT_EVENTS_CAP: usize = 512;
const DEFAULT_TICK_INTERVAL_SECS: u64 = 20;

/// Everything needed to run one Tako instance against one workspace.
pub struct TakoRuntime {
    pub workspace_root: PathBuf,
    pub paths: RuntimePaths,
    pub bus: Arc<EventBus>,
    pub conversations: Arc<Mutex<ConversationStore>>,
    pub heartbeat: Arc<HeartbeatRuntime>,
    pub cognition: Arc<CognitionRuntime>,
    pub registry: CommandRegistry,
    pub inference: InferenceRuntime,
    pub stage: Arc<Mutex<Stage>>,
    pub inference_gate: Arc<InferenceGate>,
    session_state: Mutex<SessionState>,
    _instance_lock: InstanceLock,
}

impl TakoRuntime {
    /// Materialize the workspace, acquire the instance lock, and assemble
    /// every component crate into one running instance. Does not start the
    /// heartbeat — call `start()` once the caller is ready to go live.
    pub async fn bootstrap(workspace_root: &Path) -> Result<Self> {
        Self::bootstrap_with_interval(workspace_root, None).await
    }

    /// Same as `bootstrap`, but lets the caller override the heartbeat tick
    /// interval (the CLI's `--interval` dev flag) instead of using the
    /// fixed default.
    pub async fn bootstrap_with_interval(workspace_root: &Path, tick_interval_override: Option<std::time::Duration>) -> Result<Self> {
        std::fs::create_dir_all(workspace_root)?;
        workspace::materialize_workspace(workspace_root)?;

        let paths = RuntimePaths::for_workspace(workspace_root);
        paths.ensure_dirs()?;

        let instance_lock = InstanceLock::acquire(&paths.instance_lock())?;

        let config = AppConfig::load_from(workspace_root.join("tako.toml"))?;
        let stage = config.agent.stage();
        let policy = LifeStagePolicy::for_stage(stage);

        let bus = Arc::new(EventBus::open(EventLog::new(paths.events_log()))?);

        let dose_state = DoseState::load_or_default(&paths.dose_snapshot());
        let dose = Arc::new(Mutex::new(dose_state.clone()));
        if let Err(err) = bus.publish(
            "dose.started",
            format!("DOSE engine initialized, label={}", dose_state.label().as_str()),
            Severity::Info,
            "runtime",
            std::collections::BTreeMap::new(),
        ) {
            tracing::warn!(error = %err, "failed to publish dose.started");
        }
        bus.subscribe(Box::new(DoseSubscriber::new(dose_state, paths.dose_snapshot())));

        let inference_gate = Arc::new(InferenceGate::default());

        let recent_events = Arc::new(RecentEventsSubscriber::new(RECENT_EVENTS_CAP));
        bus.subscribe(Box::new(RecentEventsClone(recent_events.clone())));

        let inference_settings = InferenceSettings::load(&paths.inference_settings());
        let env: HashMap<String, String> = std::env::vars().collect();
        let home = dirs_home();
        let inference = discover_inference_runtime(&home, &inference_settings, &env);
        if let Err(err) = inference.persist(&paths.inference_snapshot()) {
            tracing::warn!(error = %err, "failed to persist inference runtime snapshot");
        }
        let mut reasoning_metadata = std::collections::BTreeMap::new();
        reasoning_metadata.insert(
            "selected_provider".to_string(),
            serde_json::Value::String(inference.selected_provider.clone().unwrap_or_default()),
        );
        if let Err(err) = bus.publish(
            "reasoning.engine.started",
            "inference runtime discovered and ready for dispatch",
            Severity::Info,
            "runtime",
            reasoning_metadata,
        ) {
            tracing::warn!(error = %err, "failed to publish reasoning.engine.started");
        }

        let world_watch = SensorWorldWatchConfig { feeds: config.world_watch.feeds.clone(), poll_minutes: config.world_watch.poll_minutes };
        let sensors = build_sensors_for_stage(&policy, &world_watch, workspace_root, &paths.state_dir, inference.ready());

        let git: Arc<dyn GitAutoCommit> = Arc::new(ShellGitAutoCommit);
        let heartbeat = Arc::new(HeartbeatRuntime::new(HeartbeatConfig {
            bus: bus.clone(),
            recent_events: recent_events.clone(),
            dose: dose.clone(),
            dose_snapshot_path: paths.dose_snapshot(),
            daily_root: workspace::daily_root(workspace_root),
            open_loops_path: paths.open_loops(),
            repo_root: workspace_root.to_path_buf(),
            git,
            sensors,
            policy: policy.clone(),
            tick_interval: tick_interval_override.unwrap_or(std::time::Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS)),
        }));

        // Cold start needs the health sensor's summary on the bus before the
        // onboarding prompt shows rather than waiting up to
        // `explore_interval_minutes` for the first scheduled tick.
        heartbeat.request_explore(None).await;

        let type2_budget = tako_policy::Type2Budget::new(Utc::now().date_naive(), policy.type2_budget_per_day);
        let cognition = Arc::new(CognitionRuntime::new(
            bus.clone(),
            dose.clone(),
            Type2Deps {
                bus: bus.clone(),
                inference: Some(inference.clone()),
                inference_gate: inference_gate.clone(),
                tmp_dir: paths.tmp_dir.clone(),
                workspace_root: workspace_root.to_path_buf(),
                state_dir: paths.state_dir.clone(),
                daily_root: workspace::daily_root(workspace_root),
                dose,
                rag: MemoryFileRecall::new(workspace_root),
                budget: Mutex::new(type2_budget),
            },
        ));
        bus.subscribe(cognition.subscriber());

        let conversations = Arc::new(Mutex::new(ConversationStore::new(paths.conversations_dir())));
        let registry = build_registry();

        let operator_imprint = operator::load_operator_imprint(&paths.root)?;
        let session_state = boot_transition(operator_imprint.is_some());

        Ok(Self {
            workspace_root: workspace_root.to_path_buf(),
            paths,
            bus,
            conversations,
            heartbeat,
            cognition,
            registry,
            inference,
            stage: Arc::new(Mutex::new(stage)),
            inference_gate,
            session_state: Mutex::new(session_state),
            _instance_lock: instance_lock,
        })
    }

    pub fn start(&self) {
        self.heartbeat.start();
        self.cognition.start();
    }

    pub async fn stop(&self) {
        self.heartbeat.stop().await;
        self.cognition.stop().await;
    }

    pub fn session_state(&self) -> SessionState {
        *self.session_state.lock().expect("session state lock poisoned")
    }

    pub fn set_session_state(&self, state: SessionState) {
        *self.session_state.lock().expect("session state lock poisoned") = state;
    }

    fn router_context(&self) -> RouterContext {
        RouterContext {
            workspace_root: self.workspace_root.clone(),
            state_dir: self.paths.state_dir.clone(),
            daily_root: workspace::daily_root(&self.workspace_root),
            bus: self.bus.clone(),
            heartbeat: self.heartbeat.clone(),
            cognition: self.cognition.clone(),
            conversations: self.conversations.clone(),
            session_state: self.session_state(),
            stage: self.stage.clone(),
            inference_ready: self.inference.ready(),
        }
    }

    /// Route one submitted turn of operator input: sanitizes,
    /// opens the inference gate on first non-empty interactive input, and
    /// dispatches to a command handler or hands back chat text for the
    /// caller (typically `tako-cli`) to forward to `stream_with_fallback`.
    pub async fn submit_turn(&self, text: &str) -> RouteOutcome {
        self.inference_gate.maybe_open(self.session_state(), text);
        self.heartbeat.handle_input(text);
        let ctx = self.router_context();
        router::route_turn(text, &self.registry, &ctx).await
    }
}

/// Adapter so the bus (which expects `Box<dyn Subscriber>`) can hand
/// events to an `Arc<RecentEventsSubscriber>` shared with the heartbeat.
struct RecentEventsClone(Arc<RecentEventsSubscriber>);

impl tako_bus::Subscriber for RecentEventsClone {
    fn name(&self) -> &str {
        "open_loops.recent_events"
    }
    fn on_event(&self, event: &tako_core::Event) -> anyhow::Result<()> {
        self.0.on_event(event)
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_creates_workspace_and_locks_instance() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = TakoRuntime::bootstrap(dir.path()).await.unwrap();
        assert!(workspace::looks_like_workspace(dir.path()));
        assert_eq!(runtime.session_state(), SessionState::OnboardingIdentity);
    }

    #[tokio::test]
    async fn second_bootstrap_on_same_workspace_fails_lock() {
        let dir = tempfile::tempdir().unwrap();
        let first = TakoRuntime::bootstrap(dir.path()).await.unwrap();
        let second = TakoRuntime::bootstrap(dir.path()).await;
        assert!(second.is_err());
        drop(first);
    }

    #[tokio::test]
    async fn submit_turn_opens_inference_gate_once() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = TakoRuntime::bootstrap(dir.path()).await.unwrap();
        runtime.set_session_state(SessionState::Running);
        assert!(!runtime.inference_gate.is_open());
        let _ = runtime.submit_turn("hello there").await;
        assert!(runtime.inference_gate.is_open());
    }

    #[tokio::test]
    async fn cold_start_publishes_engine_and_health_events() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = TakoRuntime::bootstrap(dir.path()).await.unwrap();
        let events = EventLog::new(runtime.paths.events_log()).load().unwrap();
        assert_eq!(events.iter().filter(|e| e.kind == "reasoning.engine.started").count(), 1);
        assert_eq!(events.iter().filter(|e| e.kind == "dose.started").count(), 1);
        assert!(events.iter().any(|e| e.kind.starts_with("health.check.")));
    }

    #[tokio::test]
    async fn stage_set_command_rewires_policy_budget_and_publishes_event() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = TakoRuntime::bootstrap(dir.path()).await.unwrap();
        runtime.set_session_state(SessionState::Running);

        let outcome = runtime.submit_turn("stage set child").await;
        match outcome {
            RouteOutcome::Command(cmd) => assert!(cmd.text.contains("explore_interval_minutes=120")),
            RouteOutcome::Chat(_) => panic!("expected stage set to be routed as a command"),
        }

        assert_eq!(*runtime.stage.lock().unwrap(), Stage::Child);
        let events = EventLog::new(runtime.paths.events_log()).load().unwrap();
        assert_eq!(events.iter().filter(|e| e.kind == "life.stage.changed").count(), 1);

        let reloaded = AppConfig::load_from(dir.path().join("tako.toml")).unwrap();
        assert_eq!(reloaded.agent.stage(), Stage::Child);
    }
}
