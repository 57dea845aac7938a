use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tako_core::TakoError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

use crate::exec::build_argv;
use crate::runtime::InferenceRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEventKind {
    Provider,
    Task,
    Status,
    Delta,
}

impl StreamEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamEventKind::Provider => "provider",
            StreamEventKind::Task => "task",
            StreamEventKind::Status => "status",
            StreamEventKind::Delta => "delta",
        }
    }
}

/// `on_event(kind, payload)` sink, invoked for every chunk a streaming
/// provider call produces.
pub type StreamSink = Arc<dyn Fn(StreamEventKind, String) + Send + Sync>;

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(8);

/// Providers with native line-delimited JSON streams (`codex`, `gemini`)
/// are parsed and translated; `claude`/`pi`/`ollama` lack a documented
/// streaming form here and are executed synchronously, then replayed as
/// simulated `delta` chunks.
fn provider_has_native_stream(provider: &str) -> bool {
    matches!(provider, "codex" | "gemini")
}

async fn simulate_stream(text: &str, on_event: &StreamSink) {
    for chunk in text.as_bytes().chunks(48) {
        let piece = String::from_utf8_lossy(chunk).to_string();
        on_event(StreamEventKind::Delta, piece);
    }
}

fn parse_codex_line(line: &str, on_event: &StreamSink) {
    let Ok(value) = serde_json::from_str::<Value>(line) else { return };
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "item.completed" | "item.delta" => {
            if let Some(item) = value.get("item") {
                let item_type = item.get("type").and_then(Value::as_str).unwrap_or("");
                let text = item
                    .get("delta")
                    .or_else(|| item.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if item_type == "command_execution" || item_type == "web_search" {
                    on_event(StreamEventKind::Task, format!("{item_type}: {text}"));
                } else if !text.is_empty() {
                    on_event(StreamEventKind::Delta, text.to_string());
                }
            }
        }
        k if k.starts_with("turn.") => {
            on_event(StreamEventKind::Status, format!("debug: turn event {k}"));
        }
        _ => {}
    }
}

fn parse_gemini_line(line: &str, on_event: &StreamSink) {
    let Ok(value) = serde_json::from_str::<Value>(line) else { return };
    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    if kind == "message" {
        if let Some(delta) = value.get("delta").and_then(Value::as_str) {
            on_event(StreamEventKind::Delta, delta.to_string());
        } else if let Some(content) = value.get("content").and_then(Value::as_str) {
            on_event(StreamEventKind::Delta, content.to_string());
        }
    }
}

/// Stream one provider call, translating its native stream (or a simulated
/// replay) into `(kind, payload)` callbacks, with a watchdog that emits a
/// `status` heartbeat every `WATCHDOG_INTERVAL` while the call is silent.
pub async fn stream_provider(
    runtime: &InferenceRuntime,
    provider: &str,
    prompt: &str,
    tmp_dir: &std::path::Path,
    timeout_duration: Duration,
    on_event: StreamSink,
) -> Result<String, TakoError> {
    on_event(StreamEventKind::Provider, format!("attempting provider={provider}"));

    let status = runtime
        .providers
        .get(provider)
        .ok_or_else(|| TakoError::ProviderUnavailable(format!("unknown provider {provider}")))?;
    let cli = status
        .cli_path
        .clone()
        .ok_or_else(|| TakoError::ProviderUnavailable(format!("{provider} CLI not installed")))?;

    if !provider_has_native_stream(provider) {
        let started = Instant::now();
        let watchdog_sink = on_event.clone();
        let watchdog = tokio::spawn(async move {
            loop {
                tokio::time::sleep(WATCHDOG_INTERVAL).await;
                watchdog_sink(
                    StreamEventKind::Status,
                    format!("debug: waiting on provider={provider} elapsed={:?}", started.elapsed()),
                );
            }
        });
        let result = crate::exec::run(runtime, provider, prompt, tmp_dir, timeout_duration).await;
        watchdog.abort();
        let text = result?;
        simulate_stream(&text, &on_event).await;
        return Ok(text);
    }

    let cmd = if provider == "codex" {
        let mut argv = build_argv("codex", prompt, None, crate::exec::ClaudeCapability::Print);
        // codex's streaming form swaps the batch `--json`/`--color never`
        // pair already present in build_argv; no change needed since they
        // double as the streaming flags per provider command contracts.
        argv
    } else {
        vec!["--output-format".to_string(), "stream-json".to_string(), prompt.to_string()]
    };

    let mut command = Command::new(&cli);
    command
        .args(&cmd)
        .envs(runtime.env_overrides_for(provider))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| TakoError::ProviderExecutionError { provider: provider.to_string(), summary: format!("spawn failed: {e}") })?;

    let stdout = child.stdout.take().expect("stdout piped");
    let accumulated = Arc::new(Mutex::new(String::new()));
    let acc_for_pump = accumulated.clone();
    let sink_for_pump = on_event.clone();
    let provider_owned = provider.to_string();

    let pump = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            // Deltas parsed from this line are captured synchronously (the
            // sink closure isn't async) and folded into `accumulated` right
            // after, inline and in line order — never via a detached task,
            // which would race other lines' pushes against each other.
            let captured = Arc::new(std::sync::Mutex::new(Vec::new()));
            let sink = sink_for_pump.clone();
            let capturing_sink: StreamSink = Arc::new({
                let captured = captured.clone();
                move |kind, payload| {
                    if kind == StreamEventKind::Delta {
                        captured.lock().expect("stream capture lock poisoned").push(payload.clone());
                    }
                    sink(kind, payload);
                }
            });
            if provider_owned == "codex" {
                parse_codex_line(&line, &capturing_sink);
            } else {
                parse_gemini_line(&line, &capturing_sink);
            }
            let pieces = std::mem::take(&mut *captured.lock().expect("stream capture lock poisoned"));
            if !pieces.is_empty() {
                let mut acc = acc_for_pump.lock().await;
                for piece in pieces {
                    acc.push_str(&piece);
                }
            }
        }
    });

    let started = Instant::now();
    let watchdog_sink = on_event.clone();
    let provider_for_watchdog = provider.to_string();
    let watchdog = tokio::spawn(async move {
        loop {
            tokio::time::sleep(WATCHDOG_INTERVAL).await;
            watchdog_sink(
                StreamEventKind::Status,
                format!("debug: waiting on provider={provider_for_watchdog} elapsed={:?}", started.elapsed()),
            );
        }
    });

    let wait_result = timeout(timeout_duration, child.wait()).await;
    watchdog.abort();
    let _ = pump.await;

    match wait_result {
        Ok(Ok(exit)) if exit.success() => Ok(accumulated.lock().await.clone()),
        Ok(Ok(_)) => Err(TakoError::ProviderExecutionError {
            provider: provider.to_string(),
            summary: "streaming process exited non-zero".to_string(),
        }),
        Ok(Err(e)) => Err(TakoError::ProviderExecutionError {
            provider: provider.to_string(),
            summary: format!("process error: {e}"),
        }),
        Err(_) => {
            let _ = child.start_kill();
            Err(TakoError::SubprocessTimeout(timeout_duration))
        }
    }
}

/// `stream_with_fallback`: try the selected provider, then the rest of the
/// ready priority chain, streaming each attempt's events to `on_event`
/// until one succeeds.
pub async fn stream_with_fallback(
    runtime: &InferenceRuntime,
    prompt: &str,
    tmp_dir: &std::path::Path,
    timeout_duration: Duration,
    on_event: StreamSink,
) -> Result<(String, String), TakoError> {
    let mut order: Vec<String> = Vec::new();
    if let Some(selected) = &runtime.selected_provider {
        order.push(selected.clone());
    }
    for p in runtime.ready_providers_in_priority_order() {
        if !order.contains(&p.to_string()) {
            order.push(p.to_string());
        }
    }
    if order.is_empty() {
        return Err(TakoError::ProviderUnavailable("no ready inference provider found".to_string()));
    }

    let mut failures = Vec::new();
    for provider in &order {
        match stream_provider(runtime, provider, prompt, tmp_dir, timeout_duration, on_event.clone()).await {
            Ok(text) => return Ok((provider.clone(), text)),
            Err(e) => failures.push(format!("{provider}: {e}")),
        }
    }
    Err(TakoError::ProviderUnavailable(format!("all providers failed: {}", failures.join("; "))))
}
