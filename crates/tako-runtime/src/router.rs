use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tako_bus::EventBus;
use tako_conversation::ConversationStore;
use tako_core::Severity;
use tako_dose::DoseState;
use tako_policy::{LifeStagePolicy, Stage};
use tako_sensors::registry::{build_sensors_for_stage, WorldWatchConfig as SensorWorldWatchConfig};

use crate::cognition::CognitionRuntime;
use crate::config::AppConfig;
use crate::daily_log;
use crate::heartbeat::HeartbeatRuntime;
use crate::mission;
use crate::session::{InferenceGate, SessionState};

/// Strip ANSI escape sequences, control characters, and collapse
/// whitespace.
pub fn sanitize_turn_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            // ESC [ ... final-byte, or ESC followed by a single char — skip both forms.
            if chars.peek() == Some(&'[') {
                chars.next();
                for next in chars.by_ref() {
                    if next.is_ascii_alphabetic() {
                        break;
                    }
                }
            } else {
                chars.next();
            }
            continue;
        }
        if c.is_control() && c != '\n' && c != '\t' {
            continue;
        }
        out.push(c);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Shared state every command handler may touch. A thin façade over the
/// runtime pieces assembled in `lib.rs` — handlers never reach past this
/// into global state.
pub struct RouterContext {
    pub workspace_root: PathBuf,
    pub state_dir: PathBuf,
    pub daily_root: PathBuf,
    pub bus: Arc<EventBus>,
    pub heartbeat: Arc<HeartbeatRuntime>,
    pub cognition: Arc<CognitionRuntime>,
    pub conversations: Arc<Mutex<ConversationStore>>,
    pub session_state: SessionState,
    pub stage: Arc<Mutex<Stage>>,
    pub inference_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub text: String,
}

impl CommandOutcome {
    fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;
    fn summary(&self) -> &'static str;
    async fn run(&self, args: &str, ctx: &RouterContext) -> CommandOutcome;
}

struct HelpCommand;
#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }
    fn summary(&self) -> &'static str {
        "list available commands"
    }
    async fn run(&self, _args: &str, _ctx: &RouterContext) -> CommandOutcome {
        let lines: Vec<String> = CANONICAL_COMMANDS.iter().map(|(name, summary)| format!("{name} — {summary}")).collect();
        CommandOutcome::text(lines.join("\n"))
    }
}

struct StatusCommand;
#[async_trait]
impl Command for StatusCommand {
    fn name(&self) -> &'static str {
        "status"
    }
    fn summary(&self) -> &'static str {
        "current session state and life stage"
    }
    async fn run(&self, _args: &str, ctx: &RouterContext) -> CommandOutcome {
        let stage = *ctx.stage.lock().expect("stage lock poisoned");
        CommandOutcome::text(format!("state={} stage={}", ctx.session_state.as_str(), stage.as_str()))
    }
}

struct StageCommand;
#[async_trait]
impl Command for StageCommand {
    fn name(&self) -> &'static str {
        "stage"
    }
    fn summary(&self) -> &'static str {
        "show or set the current life stage"
    }
    async fn run(&self, args: &str, ctx: &RouterContext) -> CommandOutcome {
        let mut parts = args.split_whitespace();
        match parts.next() {
            None | Some("show") => {
                let stage = *ctx.stage.lock().expect("stage lock poisoned");
                CommandOutcome::text(format!("stage: {}", stage.as_str()))
            }
            Some("set") => match parts.next().and_then(Stage::parse) {
                Some(new_stage) => CommandOutcome::text(apply_stage_change(ctx, new_stage)),
                None => CommandOutcome::text("usage: stage set <hatchling|child|teen|adult>"),
            },
            Some(other) => CommandOutcome::text(format!("unknown stage subcommand: {other}")),
        }
    }
}

/// Apply an operator-driven life-stage transition end to end: persist the
/// new stage to `tako.toml`, swap the active policy and sensor set,
/// rebaseline DOSE, reset today's Type2 budget, publish
/// `life.stage.changed`, and note the transition in the daily log.
fn apply_stage_change(ctx: &RouterContext, new_stage: Stage) -> String {
    let previous = {
        let mut stage = ctx.stage.lock().expect("stage lock poisoned");
        let previous = *stage;
        *stage = new_stage;
        previous
    };

    let config_path = ctx.workspace_root.join("tako.toml");
    let mut config = AppConfig::load_from(&config_path).unwrap_or_default();
    config.agent.stage = new_stage.as_str().to_string();
    if let Err(err) = config.save_to(&config_path) {
        tracing::warn!(error = %err, "stage: failed to persist new stage to config");
    }

    let policy = LifeStagePolicy::for_stage(new_stage);
    let world_watch = SensorWorldWatchConfig { feeds: config.world_watch.feeds.clone(), poll_minutes: config.world_watch.poll_minutes };
    let sensors = build_sensors_for_stage(&policy, &world_watch, &ctx.workspace_root, &ctx.state_dir, ctx.inference_ready);
    ctx.heartbeat.reseed_for_policy(policy.clone(), sensors);

    {
        let dose_lock = ctx.heartbeat.dose();
        let mut dose = dose_lock.lock().expect("dose lock poisoned");
        let m = policy.dose_baseline_multipliers;
        dose.rebaseline(m.d, m.o, m.s, m.e);
    }

    ctx.cognition.reset_type2_budget(Utc::now().date_naive(), policy.type2_budget_per_day);

    let mut metadata = BTreeMap::new();
    metadata.insert("from".to_string(), Value::String(previous.as_str().to_string()));
    metadata.insert("to".to_string(), Value::String(new_stage.as_str().to_string()));
    if let Err(err) = ctx.bus.publish(
        "life.stage.changed",
        format!("life stage changed from {} to {}", previous.as_str(), new_stage.as_str()),
        Severity::Info,
        "router",
        metadata,
    ) {
        tracing::warn!(error = %err, "stage: failed to publish life.stage.changed");
    }

    let note = format!("stage changed from {} to {} via operator command", previous.as_str(), new_stage.as_str());
    if let Err(err) = daily_log::append_daily_note(&ctx.daily_root, Utc::now(), "Decisions", &note) {
        tracing::warn!(error = %err, "stage: failed to append daily-log note");
    }

    format!(
        "stage changed to {}: explore_interval_minutes={} type2_budget_per_day={}",
        new_stage.as_str(),
        policy.explore_interval_minutes,
        policy.type2_budget_per_day
    )
}

struct MissionCommand;
#[async_trait]
impl Command for MissionCommand {
    fn name(&self) -> &'static str {
        "mission"
    }
    fn summary(&self) -> &'static str {
        "show, set, add to, or clear the mission statement"
    }
    async fn run(&self, args: &str, ctx: &RouterContext) -> CommandOutcome {
        let trimmed = args.trim();
        let (sub, rest) = trimmed.split_once(' ').unwrap_or((trimmed, ""));
        let result = match sub {
            "" | "show" => mission::show(&ctx.state_dir).map(|s| if s.is_empty() { "(no mission set)".to_string() } else { s }),
            "set" => mission::set(&ctx.state_dir, rest).map(|m| m.statement),
            "add" => mission::add(&ctx.state_dir, rest).map(|m| m.statement),
            "clear" => mission::clear(&ctx.state_dir).map(|_| "mission cleared".to_string()),
            other => return CommandOutcome::text(format!("unknown mission subcommand: {other}")),
        };
        CommandOutcome::text(result.unwrap_or_else(|err| format!("mission command failed: {err}")))
    }
}

struct DoseCommand;
#[async_trait]
impl Command for DoseCommand {
    fn name(&self) -> &'static str {
        "dose"
    }
    fn summary(&self) -> &'static str {
        "show DOSE channels or nudge one toward a value"
    }
    async fn run(&self, args: &str, ctx: &RouterContext) -> CommandOutcome {
        let dose_lock: Arc<Mutex<DoseState>> = ctx.heartbeat.dose();
        let mut parts = args.split_whitespace();
        match parts.next() {
            None | Some("show") => {
                let dose = dose_lock.lock().expect("dose lock poisoned");
                CommandOutcome::text(format!(
                    "d={:.2} o={:.2} s={:.2} e={:.2} label={} stability={:.2}",
                    dose.d,
                    dose.o,
                    dose.s,
                    dose.e,
                    dose.label().as_str(),
                    dose.stability()
                ))
            }
            Some("calm") => {
                let mut dose = dose_lock.lock().expect("dose lock poisoned");
                dose.s = (dose.s + 0.1).min(1.0);
                dose.e = (dose.e + 0.1).min(1.0);
                dose.clamp();
                CommandOutcome::text("nudged toward calm")
            }
            Some("explore") => CommandOutcome::text("use the `explore` command to trigger exploration directly"),
            Some(channel @ ("d" | "o" | "s" | "e")) => match parts.next().and_then(|v| v.parse::<f64>().ok()) {
                Some(value) if (0.0..=1.0).contains(&value) => {
                    let mut dose = dose_lock.lock().expect("dose lock poisoned");
                    match channel {
                        "d" => dose.d = value,
                        "o" => dose.o = value,
                        "s" => dose.s = value,
                        "e" => dose.e = value,
                        _ => unreachable!(),
                    }
                    dose.clamp();
                    CommandOutcome::text(format!("{channel} set to {value:.2}"))
                }
                _ => CommandOutcome::text("usage: dose <d|o|s|e> <0..1>"),
            },
            Some(other) => CommandOutcome::text(format!("unknown dose subcommand: {other}")),
        }
    }
}

struct ExploreCommand;
#[async_trait]
impl Command for ExploreCommand {
    fn name(&self) -> &'static str {
        "explore"
    }
    fn summary(&self) -> &'static str {
        "run the exploration routine now, optionally on a given topic"
    }
    async fn run(&self, args: &str, ctx: &RouterContext) -> CommandOutcome {
        let topic = if args.trim().is_empty() { None } else { Some(args.trim().to_string()) };
        let outcome = ctx.heartbeat.request_explore(topic).await;
        CommandOutcome::text(format!("explored '{}', {} new items", outcome.topic_selected, outcome.new_world_count))
    }
}

/// Commands whose backing feature is out of scope — productivity task
/// CRUD, self-update internals, extension quarantine, ENS, etc. They stay
/// in the catalog (so completion and `help` show the real canonical set)
/// but answer with a clear scope note instead of either crashing or
/// silently doing nothing.
struct OutOfScopeCommand {
    name: &'static str,
    summary: &'static str,
}

#[async_trait]
impl Command for OutOfScopeCommand {
    fn name(&self) -> &'static str {
        self.name
    }
    fn summary(&self) -> &'static str {
        self.summary
    }
    async fn run(&self, _args: &str, _ctx: &RouterContext) -> CommandOutcome {
        CommandOutcome::text(format!("`{}` is acknowledged but its implementation is out of scope here", self.name))
    }
}

struct QuitCommand;
#[async_trait]
impl Command for QuitCommand {
    fn name(&self) -> &'static str {
        "quit"
    }
    fn summary(&self) -> &'static str {
        "stop the session"
    }
    async fn run(&self, _args: &str, ctx: &RouterContext) -> CommandOutcome {
        ctx.heartbeat.stop().await;
        CommandOutcome::text("stopping")
    }
}

/// The canonical command catalog. `name` doubles as the plain
/// completion catalog; the same set, prefixed with `/`, is the slash
/// catalog.
const CANONICAL_COMMANDS: &[(&str, &str)] = &[
    ("help", "list available commands"),
    ("status", "current session state and life stage"),
    ("stats", "runtime statistics"),
    ("health", "run the health sensor now"),
    ("config", "show workspace configuration"),
    ("stage", "show or set the current life stage"),
    ("mission", "show, set, add to, or clear the mission statement"),
    ("models", "list known inference providers"),
    ("dose", "show DOSE channels or nudge one toward a value"),
    ("explore", "run the exploration routine now"),
    ("task", "out of scope: productivity task CRUD"),
    ("tasks", "out of scope: productivity task CRUD"),
    ("done", "out of scope: productivity task CRUD"),
    ("morning", "out of scope: morning routine prompt flow"),
    ("outcomes", "out of scope: outcomes prompt flow"),
    ("compress", "out of scope: memory compression"),
    ("weekly", "out of scope: weekly review"),
    ("promote", "out of scope: note promotion"),
    ("inference", "inference provider diagnostics"),
    ("doctor", "run diagnostics"),
    ("pair", "out of scope: XMTP pairing flow"),
    ("update", "self-update check (no-op boundary)"),
    ("web", "out of scope: web fetch"),
    ("run", "out of scope: shell command execution"),
    ("install", "out of scope: skill/tool installation"),
    ("enable", "out of scope: skill/tool enablement"),
    ("draft", "out of scope: skill/tool drafting"),
    ("extensions", "extension host status (no-op boundary)"),
    ("reimprint", "out of scope: operator re-pairing"),
    ("safe", "out of scope: safety-mode toggle"),
    ("quit", "stop the session"),
];

pub fn build_registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(Box::new(HelpCommand));
    registry.register(Box::new(StatusCommand));
    registry.register(Box::new(StageCommand));
    registry.register(Box::new(MissionCommand));
    registry.register(Box::new(DoseCommand));
    registry.register(Box::new(ExploreCommand));
    registry.register(Box::new(QuitCommand));

    let registered: std::collections::BTreeSet<&'static str> = registry.commands.iter().map(|c| c.name()).collect();
    for (name, summary) in CANONICAL_COMMANDS {
        if !registered.contains(name) {
            registry.register(Box::new(OutOfScopeCommand { name, summary }));
        }
    }
    registry
}

pub struct CommandRegistry {
    commands: Vec<Box<dyn Command>>,
    by_name: BTreeMap<&'static str, usize>,
}

impl CommandRegistry {
    fn new() -> Self {
        Self { commands: Vec::new(), by_name: BTreeMap::new() }
    }

    fn register(&mut self, command: Box<dyn Command>) {
        let idx = self.commands.len();
        self.by_name.insert(command.name(), idx);
        self.commands.push(command);
    }

    /// `true` iff `name` matches a registered command (used by the router
    /// to decide "is this a command or chat").
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub async fn dispatch(&self, name: &str, args: &str, ctx: &RouterContext) -> CommandOutcome {
        match self.by_name.get(name) {
            Some(&idx) => self.commands[idx].run(args, ctx).await,
            None => CommandOutcome::text(format!("unknown command: {name}. Type 'help' for the command list.")),
        }
    }

    /// Slash catalog for completion: `(name, summary)` pairs.
    pub fn slash_catalog(&self) -> Vec<(&'static str, &'static str)> {
        self.commands.iter().map(|c| (c.name(), c.summary())).collect()
    }

    /// Plain catalog for completion: bare names.
    pub fn plain_catalog(&self) -> Vec<&'static str> {
        self.commands.iter().map(|c| c.name()).collect()
    }
}

/// `(prefix, token, is_slash)` derived from the current input buffer.
/// The token is whatever word is being typed at the cursor (assumed to
/// be the end of `buffer`); `is_slash` is set when that word starts
/// with `/`.
pub fn split_completion_token(buffer: &str) -> (String, String, bool) {
    let last_space = buffer.rfind(' ').map(|i| i + 1).unwrap_or(0);
    let prefix = buffer[..last_space].to_string();
    let token = buffer[last_space..].to_string();
    let is_slash = token.starts_with('/');
    (prefix, token, is_slash)
}

/// Sorted completion matches for `token` against the appropriate catalog.
pub fn complete(registry: &CommandRegistry, buffer: &str) -> (String, String, Vec<String>) {
    let (prefix, token, is_slash) = split_completion_token(buffer);
    let bare_token = token.strip_prefix('/').unwrap_or(&token);
    let mut matches: Vec<String> = if is_slash {
        registry.slash_catalog().into_iter().filter(|(name, _)| name.starts_with(bare_token)).map(|(name, _)| format!("/{name}")).collect()
    } else {
        registry.plain_catalog().into_iter().filter(|name| name.starts_with(bare_token)).map(|s| s.to_string()).collect()
    };
    matches.sort();
    (prefix, token, matches)
}

/// Recognize a submitted text turn as a command per step 4: a text
/// starting with `/`, `takobot `, or `tako `, or matching the bare-name
/// whitelist.
pub fn parse_command(text: &str, registry: &CommandRegistry) -> Option<(String, String)> {
    let trimmed = text.trim();
    let body = if let Some(rest) = trimmed.strip_prefix('/') {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("takobot ") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("tako ") {
        rest
    } else {
        trimmed
    };
    let (name, args) = body.split_once(' ').unwrap_or((body, ""));
    if registry.contains(name) {
        Some((name.to_string(), args.to_string()))
    } else {
        None
    }
}

/// Outcome of routing one submitted turn: either a command
/// response or a marker that the turn is ordinary chat and should go
/// through `stream_with_fallback` (left to the caller — this crate's
/// boundary is routing and dispatch, not the chat call itself).
pub enum RouteOutcome {
    Command(CommandOutcome),
    Chat(String),
}

pub async fn route_turn(text: &str, registry: &CommandRegistry, ctx: &RouterContext) -> RouteOutcome {
    let sanitized = sanitize_turn_text(text);
    if !ctx.session_state.is_interactive() {
        return RouteOutcome::Chat(sanitized);
    }
    match parse_command(&sanitized, registry) {
        Some((name, args)) => RouteOutcome::Command(registry.dispatch(&name, &args, ctx).await),
        None => RouteOutcome::Chat(sanitized),
    }
}
