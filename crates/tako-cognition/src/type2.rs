use std::time::Duration;

use tako_core::Event;
use tako_inference::InferenceRuntime;

use crate::Depth;

/// Inputs Type2's prompt assembly needs beyond the event itself: a bounded MEMORY.md frontmatter excerpt, a DOSE focus-label
/// summary, a `ragrep` recall result, and the current mission objectives.
/// Each is owned by `tako-runtime`; this crate only consumes borrowed
/// strings so it never depends on the workspace-doc layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Type2PromptContext<'a> {
    pub memory_frontmatter: &'a str,
    pub focus_summary: &'a str,
    pub rag_context: &'a str,
    pub mission_objectives: &'a [String],
}

/// Result of one Type2 reflection: always a single sanitized advisory
/// line, never a plan or an action.
#[derive(Debug, Clone)]
pub struct Type2Outcome {
    pub event_type: String,
    pub depth: Depth,
    pub reason: String,
    pub recommendation: String,
    /// `"heuristic"`, `"heuristic:gate-closed"`, or the provider name that
    /// produced the recommendation.
    pub provider: String,
}

/// Run one Type2 reflection to completion.
pub async fn run_type2_thinking(
    event: &Event,
    depth: Depth,
    reason: &str,
    inference_runtime: Option<&InferenceRuntime>,
    inference_gate_open: bool,
    tmp_dir: &std::path::Path,
    ctx: &Type2PromptContext<'_>,
) -> Type2Outcome {
    tokio::time::sleep(Duration::from_secs_f64(depth.thinking_sleep_seconds())).await;

    let mut recommendation = heuristic_recommendation(&event.kind, &event.message);
    let mut provider = "heuristic".to_string();

    match inference_runtime {
        Some(runtime) if runtime.ready() && inference_gate_open => {
            let prompt = build_type2_prompt(event, depth, reason, &recommendation, ctx);
            let timeout = Duration::from_secs_f64(depth.inference_timeout_seconds());
            match tako_inference::run_with_fallback(runtime, &prompt, tmp_dir, timeout).await {
                Ok((used_provider, text)) => {
                    let cleaned = summarize_text(&Event::sanitize_message(&text));
                    if !cleaned.is_empty() {
                        recommendation = cleaned;
                        provider = used_provider;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "type2: inference fallback chain failed, using heuristic");
                }
            }
        }
        Some(runtime) if runtime.ready() => {
            provider = "heuristic:gate-closed".to_string();
        }
        _ => {}
    }

    Type2Outcome {
        event_type: event.kind.clone(),
        depth,
        reason: reason.to_string(),
        recommendation,
        provider,
    }
}

fn build_type2_prompt(event: &Event, depth: Depth, reason: &str, fallback: &str, ctx: &Type2PromptContext<'_>) -> String {
    let metadata_json = serde_json::to_string(&event.metadata).unwrap_or_else(|_| "{}".to_string());
    let memory_block = non_empty_or(ctx.memory_frontmatter, "MEMORY.md unavailable.");
    let focus_line = non_empty_or(ctx.focus_summary, "unknown");
    let rag_block = non_empty_or(ctx.rag_context, "No semantic memory context.");

    format!(
        "You are Tako Type2 reasoning.\n\
         Given an operational event, produce exactly one concise safe recommendation line.\n\
         Priorities: safety, reversibility, operator control boundary, and immediate next action.\n\
         No markdown, no bullets, <= 180 characters.\n\
         Respect MEMORY.md frontmatter guidance on memory-vs-execution boundaries.\n\
         depth={depth}\n\
         reason={reason}\n\
         event.type={kind}\n\
         event.severity={severity}\n\
         event.source={source}\n\
         event.message={message}\n\
         event.metadata={metadata_json}\n\
         memory_frontmatter=\n{memory_block}\n\
         focus_state={focus_line}\n\
         memory_rag_context=\n{rag_block}\n\
         fallback={fallback}\n",
        depth = depth.as_str(),
        kind = event.kind,
        severity = event.severity.as_str(),
        source = event.source,
        message = event.message,
    )
}

fn non_empty_or<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() {
        default
    } else {
        value
    }
}

/// Recommendations are capped at 180 characters, matching the prompt's own
/// `<= 180 characters` instruction to the model.
const RECOMMENDATION_MAX_CHARS: usize = 180;

fn summarize_text(text: &str) -> String {
    let value = text.trim();
    if value.chars().count() <= RECOMMENDATION_MAX_CHARS {
        return value.to_string();
    }
    let truncated: String = value.chars().take(RECOMMENDATION_MAX_CHARS - 3).collect();
    format!("{truncated}...")
}

/// Event-type / message keyword table producing a safe recommendation
/// without any inference call.
fn heuristic_recommendation(event_type: &str, message: &str) -> String {
    let text = message.to_ascii_lowercase();
    let kind = event_type.to_ascii_lowercase();

    if text.contains("another tako instance") || text.contains("instance lock") {
        return "Another Tako instance may be active here. Stop the duplicate process before continuing.".to_string();
    }
    if text.contains("user.name") || text.contains("user.email") || text.contains("author identity unknown") {
        return "Git identity setup failed. Takobot auto-configures repo-local identity from the workspace name; if this persists, set `git config user.name`/`user.email` manually.".to_string();
    }
    if text.contains("runtime crashed") || kind.starts_with("runtime.crash") {
        return "Enable safe mode, inspect `doctor` output, then restart the affected runtime.".to_string();
    }
    if kind.starts_with("health.check.issue") {
        return "Resolve the reported health issue before proceeding with risky actions.".to_string();
    }
    "Review the event details, then choose a safe next action or pause in safe mode.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use chrono::Utc;
    use tako_core::Severity;

    fn event(kind: &str, message: &str) -> Event {
        Event {
            id: 1,
            ts: Utc::now(),
            kind: kind.to_string(),
            severity: Severity::Warn,
            source: "runtime".to_string(),
            message: message.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn heuristic_table_matches_duplicate_instance_case() {
        let rec = heuristic_recommendation("runtime.start", "Another Tako instance detected");
        assert!(rec.contains("duplicate process"));
    }

    #[test]
    fn heuristic_table_falls_back_to_generic_advice() {
        let rec = heuristic_recommendation("mystery.event", "something odd happened");
        assert_eq!(rec, "Review the event details, then choose a safe next action or pause in safe mode.");
    }

    #[test]
    fn summarize_text_caps_at_180_chars() {
        let long = "x".repeat(500);
        let summary = summarize_text(&long);
        assert!(summary.chars().count() <= 180);
        assert!(summary.ends_with("..."));
    }

    #[tokio::test]
    async fn no_inference_runtime_uses_heuristic_provider() {
        let event = event("health.check.issue.disk", "low disk space");
        let ctx = Type2PromptContext::default();
        let dir = tempfile::tempdir().unwrap();
        let outcome = run_type2_thinking(&event, Depth::Light, "startup health issue", None, true, dir.path(), &ctx).await;
        assert_eq!(outcome.provider, "heuristic");
        assert!(outcome.recommendation.contains("health issue"));
    }

    #[tokio::test]
    async fn ready_runtime_with_closed_gate_reports_gate_closed() {
        let event = event("runtime.crash.xmtp", "runtime crashed: boom");
        let ctx = Type2PromptContext::default();
        let dir = tempfile::tempdir().unwrap();
        let runtime = InferenceRuntime {
            updated_at: Utc::now(),
            selected_provider: Some("ollama".to_string()),
            providers: {
                let mut map = std::collections::BTreeMap::new();
                map.insert(
                    "ollama".to_string(),
                    tako_inference::ProviderStatus {
                        name: "ollama".to_string(),
                        cli_installed: true,
                        cli_path: Some("/usr/bin/ollama".into()),
                        auth_kind: tako_inference::AuthKind::None,
                        key_env_var: None,
                        key_source: None,
                        key_present: true,
                        ready: true,
                        note: "ok".to_string(),
                    },
                );
                map
            },
            secrets: Default::default(),
        };
        let outcome = run_type2_thinking(&event, Depth::Medium, "runtime crash", Some(&runtime), false, dir.path(), &ctx).await;
        assert_eq!(outcome.provider, "heuristic:gate-closed");
    }
}
