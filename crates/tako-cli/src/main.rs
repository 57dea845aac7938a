//! Terminal entry point. A thin boundary: parses
//! arguments, wires up logging, and drives `tako-runtime` — no widgets, no
//! business logic of its own.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use tako_core::RuntimePaths;
use tako_runtime::router::RouteOutcome;
use tako_runtime::TakoRuntime;

/// Default chat-inference timeout.
const CHAT_INFERENCE_TIMEOUT_S: u64 = 75;

#[derive(Debug, Parser)]
#[command(name = "takobot", version, about = "Your highly autonomous and incredibly curious octopus friend")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the interactive terminal session (default).
    App {
        #[arg(long)]
        interval: Option<f64>,
    },
    /// (dev) Send a one-off DM.
    Hi {
        #[arg(long)]
        to: String,
        #[arg(long)]
        message: Option<String>,
    },
    /// Start the headless daemon (heartbeat only, no interactive terminal).
    Run {
        #[arg(long)]
        interval: Option<f64>,
        #[arg(long)]
        once: bool,
    },
    /// Terminal-first onboarding, then the interactive session.
    Bootstrap {
        #[arg(long)]
        interval: Option<f64>,
        #[arg(long)]
        once: bool,
    },
    /// Check environment, config, and safety preconditions.
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let workspace_root = tako_core::find_workspace_root(&std::env::current_dir()?);
    let paths = RuntimePaths::for_workspace(&workspace_root);
    paths.ensure_dirs().ok();
    let _log_guards = init_tracing(&paths);

    let cli = Cli::parse();
    tracing::info!(workspace = %workspace_root.display(), "takobot starting");
    let code = match cli.command.unwrap_or(Commands::App { interval: None }) {
        Commands::App { interval } => run_interactive_session(&workspace_root, interval, false).await,
        Commands::Bootstrap { interval, once } => run_interactive_session(&workspace_root, interval, once).await,
        Commands::Run { interval, once } => run_headless(&workspace_root, interval, once).await,
        Commands::Hi { to, message } => cmd_hi(to, message),
        Commands::Doctor => cmd_doctor(&workspace_root).await,
    };

    std::process::exit(code);
}

/// Two rolling-never file writers split by tracing target: everything from
/// `tako_runtime::*` goes to `logs/runtime.log`, everything else (this
/// binary, other component crates) goes to `logs/app.log`.
fn init_tracing(paths: &RuntimePaths) -> (tracing_appender::non_blocking::WorkerGuard, tracing_appender::non_blocking::WorkerGuard) {
    let app_appender = tracing_appender::rolling::never(&paths.logs_dir, "app.log");
    let (app_writer, app_guard) = tracing_appender::non_blocking(app_appender);
    let runtime_appender = tracing_appender::rolling::never(&paths.logs_dir, "runtime.log");
    let (runtime_writer, runtime_guard) = tracing_appender::non_blocking(runtime_appender);

    let app_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(app_writer)
        .with_filter(tracing_subscriber::filter::filter_fn(|meta| !meta.target().starts_with("tako_runtime")));
    let runtime_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(runtime_writer)
        .with_filter(tracing_subscriber::filter::filter_fn(|meta| meta.target().starts_with("tako_runtime")));

    tracing_subscriber::registry().with(EnvFilter::from_default_env()).with(app_layer).with(runtime_layer).init();

    (app_guard, runtime_guard)
}

fn interval_duration(interval: Option<f64>) -> Option<Duration> {
    interval.map(|secs| Duration::from_secs_f64(secs.max(1.0)))
}

/// Boot the runtime, start the heartbeat, and read operator turns from
/// stdin line by line until EOF, `quit`, or Ctrl-C. Exit code 0 on a clean
/// quit, 1 if startup itself fails, 130 on SIGINT.
async fn run_interactive_session(workspace_root: &std::path::Path, interval: Option<f64>, once: bool) -> i32 {
    let runtime = match TakoRuntime::bootstrap_with_interval(workspace_root, interval_duration(interval)).await {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("startup blocked: {err}");
            return 1;
        }
    };
    runtime.start();

    println!("takobot is awake. Type 'help' for commands, 'quit' to stop.");
    let stdin = io::stdin();
    let mut line = String::new();
    let outcome = loop {
        line.clear();
        print!("> ");
        let _ = io::stdout().flush();
        let read = {
            let mut lock = stdin.lock();
            lock.read_line(&mut line)
        };
        match read {
            Ok(0) => break 0, // EOF
            Ok(_) => {}
            Err(err) => {
                eprintln!("input error: {err}");
                break 1;
            }
        }
        let text = line.trim_end();
        if text.is_empty() {
            continue;
        }
        match runtime.submit_turn(text).await {
            RouteOutcome::Command(outcome) => {
                let stopping = outcome.text == "stopping";
                println!("{}", outcome.text);
                if stopping {
                    break 0;
                }
            }
            RouteOutcome::Chat(prompt) => {
                println!("{}", reply_to_chat(&runtime, &prompt).await);
            }
        }
        if once {
            break 0;
        }
    };

    runtime.stop().await;
    outcome
}

/// Headless daemon mode: no stdin loop, just the heartbeat. Runs until Ctrl-C, or a single tick with `--once`.
async fn run_headless(workspace_root: &std::path::Path, interval: Option<f64>, once: bool) -> i32 {
    let runtime = match TakoRuntime::bootstrap_with_interval(workspace_root, interval_duration(interval)).await {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("startup blocked: {err}");
            return 1;
        }
    };
    runtime.start();

    if once {
        tokio::time::sleep(Duration::from_millis(100)).await;
        runtime.stop().await;
        return 0;
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            runtime.stop().await;
            130
        }
        Err(err) => {
            eprintln!("failed to listen for ctrl-c: {err}");
            runtime.stop().await;
            1
        }
    }
}

/// Forward ordinary chat text to the inference bridge with provider
/// fallback, matching `stream_with_fallback`'s non-streaming sibling
/// (`run_with_fallback`) — the terminal session here is line-buffered, not
/// a streaming widget (Non-goal: terminal UI widgets).
async fn reply_to_chat(runtime: &TakoRuntime, prompt: &str) -> String {
    if !runtime.inference.ready() {
        return "(no inference provider is ready; configure one with `inference` or set an API key)".to_string();
    }
    let tmp_dir = runtime.paths.tmp_dir.clone();
    match tako_inference::run_with_fallback(&runtime.inference, prompt, &tmp_dir, Duration::from_secs(CHAT_INFERENCE_TIMEOUT_S)).await {
        Ok((_provider, text)) => text,
        Err(err) => format!("(inference failed: {err})"),
    }
}

fn cmd_hi(to: String, message: Option<String>) -> i32 {
    let _ = message;
    eprintln!("`hi --to {to}` is acknowledged but XMTP/ENS delivery is out of scope here");
    1
}

async fn cmd_doctor(workspace_root: &std::path::Path) -> i32 {
    let paths = RuntimePaths::for_workspace(workspace_root);
    if let Err(err) = paths.ensure_dirs() {
        eprintln!("doctor: failed to prepare runtime directories: {err}");
        return 1;
    }

    let mut problems: Vec<String> = Vec::new();
    let mut lines = vec![
        "takobot doctor".to_string(),
        format!("- workspace: {}", workspace_root.display()),
        format!("- runtime: {} (ignored)", paths.root.display()),
        format!("- memory dailies: {}", tako_runtime::workspace::daily_root(workspace_root).display()),
    ];

    lines.push(format!("- keys: {}", if paths.keys_json.exists() { "present" } else { "missing" }));

    let (identity_ok, identity_detail) = tako_runtime::git_safety::git_identity_status(workspace_root).await;
    lines.push(format!("- git identity: {identity_detail}"));
    if !identity_ok {
        problems.push("git identity missing: configure `git config user.name`/`user.email`".to_string());
    }

    match tako_runtime::operator::load_operator_imprint(&paths.root) {
        Ok(Some(imprint)) => lines.push(format!("- operator: {} (paired {})", imprint.name, imprint.paired_at)),
        Ok(None) => lines.push("- operator: not imprinted".to_string()),
        Err(err) => problems.push(format!("failed to read operator imprint: {err}")),
    }

    let inference_settings = tako_inference::InferenceSettings::load(&paths.inference_settings());
    let env: std::collections::HashMap<String, String> = std::env::vars().collect();
    let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let inference_runtime = tako_inference::discover_inference_runtime(&home, &inference_settings, &env);
    lines.extend(tako_inference::format_runtime_lines(&inference_runtime).into_iter().map(|line| format!("- {line}")));
    if !inference_runtime.ready() {
        problems.push("no ready inference provider found".to_string());
    }

    println!("{}", lines.join("\n"));
    if !problems.is_empty() {
        eprintln!("\nProblems:");
        for problem in &problems {
            eprintln!("- {problem}");
        }
        return 1;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_duration_floors_at_one_second() {
        assert_eq!(interval_duration(Some(0.1)), Some(Duration::from_secs(1)));
        assert_eq!(interval_duration(None), None);
    }

    #[tokio::test]
    async fn doctor_reports_problem_exit_code_without_workspace_setup() {
        let dir = tempfile::tempdir().unwrap();
        let code = cmd_doctor(dir.path()).await;
        // No git repo and no ready inference provider in a bare tempdir is
        // expected to surface at least one problem.
        assert_eq!(code, 1);
    }
}
