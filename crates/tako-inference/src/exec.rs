use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tako_core::TakoError;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio::time::timeout;

use crate::runtime::InferenceRuntime;

/// Which prompt flag `claude --help` advertised, detected once per process
/// and cached — see `claude_capability`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaudeCapability {
    Print,
    PromptFlag,
    Positional,
}

static CLAUDE_CAPABILITY: OnceCell<ClaudeCapability> = OnceCell::const_new();

/// Probe `claude --help` once per process and cache the result: prefer
/// `--print <prompt>`, else `-p <prompt>`, else a bare positional prompt.
/// A probe failure (binary missing, non-zero exit) is treated the same as
/// "no flags advertised" and falls back to the positional form.
async fn claude_capability(cli: &str) -> ClaudeCapability {
    *CLAUDE_CAPABILITY
        .get_or_init(|| async {
            let output = Command::new(cli).arg("--help").stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).output().await;
            let help_text = match output {
                Ok(out) => format!("{}\n{}", String::from_utf8_lossy(&out.stdout), String::from_utf8_lossy(&out.stderr)),
                Err(_) => String::new(),
            };
            if help_text.contains("--print") {
                ClaudeCapability::Print
            } else if help_text.contains("--prompt") || help_text.contains(" -p,") {
                ClaudeCapability::PromptFlag
            } else {
                ClaudeCapability::Positional
            }
        })
        .await
}

/// Build the argv for a provider's batch (non-streaming) invocation.
/// User-controlled text always flows as a single trailing argv element,
/// never concatenated into a shell string.
pub fn build_argv(provider: &str, prompt: &str, model: Option<&str>, claude_capability: ClaudeCapability) -> Vec<String> {
    match provider {
        "codex" => {
            let mut argv = vec![
                "exec".to_string(),
                "--skip-git-repo-check".to_string(),
                "--dangerously-bypass-approvals-and-sandbox".to_string(),
                "--json".to_string(),
                "--color".to_string(),
                "never".to_string(),
            ];
            argv.push(prompt.to_string());
            argv
        }
        "claude" => match claude_capability {
            ClaudeCapability::Print => vec!["--print".to_string(), prompt.to_string()],
            ClaudeCapability::PromptFlag => vec!["-p".to_string(), prompt.to_string()],
            ClaudeCapability::Positional => vec![prompt.to_string()],
        },
        "gemini" => vec!["--output-format".to_string(), "text".to_string(), prompt.to_string()],
        "pi" => vec![
            "--print".to_string(),
            "--mode".to_string(),
            "text".to_string(),
            "--no-session".to_string(),
            "--no-tools".to_string(),
            "--no-extensions".to_string(),
            "--no-skills".to_string(),
            prompt.to_string(),
        ],
        "ollama" => vec!["run".to_string(), model.unwrap_or("llama3").to_string(), prompt.to_string()],
        _ => vec![prompt.to_string()],
    }
}

fn child_env(runtime: &InferenceRuntime, provider: &str, tmp_dir: &std::path::Path) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    for (key, value) in runtime.env_overrides_for(provider) {
        env.insert(key, value);
    }
    env.insert("TMPDIR".to_string(), tmp_dir.display().to_string());
    env.insert("TMP".to_string(), tmp_dir.display().to_string());
    env.insert("TEMP".to_string(), tmp_dir.display().to_string());
    if provider == "pi" {
        if let Ok(path) = std::env::var("PATH") {
            env.insert(
                "PATH".to_string(),
                format!("{}:{}", tmp_dir.join("pi-cli").join("node").join("bin").display(), path),
            );
        }
    }
    env
}

/// Run one provider to completion, enforcing `timeout` by killing the
/// child process on expiry. Returns stdout, trimmed, or a single-line
/// summary of stderr on non-zero exit / timeout.
pub async fn run(
    runtime: &InferenceRuntime,
    provider: &str,
    prompt: &str,
    tmp_dir: &std::path::Path,
    timeout_duration: Duration,
) -> Result<String, TakoError> {
    let status = runtime
        .providers
        .get(provider)
        .ok_or_else(|| TakoError::ProviderUnavailable(format!("unknown provider {provider}")))?;

    let cli = status
        .cli_path
        .as_ref()
        .ok_or_else(|| TakoError::ProviderUnavailable(format!("{provider} CLI not installed")))?;

    let model = runtime
        .providers
        .get(provider)
        .and_then(|_| std::env::var("OLLAMA_MODEL").ok());
    let capability = if provider == "claude" { claude_capability(cli).await } else { ClaudeCapability::Print };
    let argv = build_argv(provider, prompt, model.as_deref(), capability);

    let mut command = Command::new(cli);
    command
        .args(&argv)
        .envs(child_env(runtime, provider, tmp_dir))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| TakoError::ProviderExecutionError { provider: provider.to_string(), summary: format!("spawn failed: {e}") })?;

    let wait = async {
        let output = child.wait_with_output().await;
        output
    };

    match timeout(timeout_duration, wait).await {
        Ok(Ok(output)) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        }
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(TakoError::ProviderExecutionError {
                provider: provider.to_string(),
                summary: summarize_error_text(&stderr),
            })
        }
        Ok(Err(e)) => Err(TakoError::ProviderExecutionError {
            provider: provider.to_string(),
            summary: format!("process error: {e}"),
        }),
        Err(_) => Err(TakoError::SubprocessTimeout(timeout_duration)),
    }
}

fn summarize_error_text(text: &str) -> String {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("(no stderr)");
    let mut summary = first_line.trim().to_string();
    if summary.len() > 200 {
        summary.truncate(200);
        summary.push('…');
    }
    summary
}

/// Try the selected provider, then every other ready provider in priority
/// order, returning `(provider, text)` on the first success. On total
/// failure returns a single error listing per-provider summaries.
pub async fn run_with_fallback(
    runtime: &InferenceRuntime,
    prompt: &str,
    tmp_dir: &std::path::Path,
    timeout_duration: Duration,
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
        match run(runtime, provider, prompt, tmp_dir, timeout_duration).await {
            Ok(text) => return Ok((provider.clone(), text)),
            Err(e) => failures.push(format!("{provider}: {e}")),
        }
    }

    Err(TakoError::ProviderUnavailable(format!(
        "all providers failed: {}",
        failures.join("; ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_never_shells_out_user_text() {
        let argv = build_argv("claude", "rm -rf / ; echo pwned", None, ClaudeCapability::Print);
        assert_eq!(argv.last().unwrap(), "rm -rf / ; echo pwned");
        assert_eq!(argv[0], "--print");
    }

    #[test]
    fn claude_argv_branches_on_detected_capability() {
        let prompt = "hello";
        assert_eq!(build_argv("claude", prompt, None, ClaudeCapability::Print), vec!["--print".to_string(), prompt.to_string()]);
        assert_eq!(build_argv("claude", prompt, None, ClaudeCapability::PromptFlag), vec!["-p".to_string(), prompt.to_string()]);
        assert_eq!(build_argv("claude", prompt, None, ClaudeCapability::Positional), vec![prompt.to_string()]);
    }

    #[test]
    fn codex_argv_matches_documented_flags() {
        let argv = build_argv("codex", "hi", None, ClaudeCapability::Print);
        assert!(argv.contains(&"--skip-git-repo-check".to_string()));
        assert!(argv.contains(&"--dangerously-bypass-approvals-and-sandbox".to_string()));
        assert_eq!(argv.last().unwrap(), "hi");
    }

    #[test]
    fn summarize_error_text_caps_length_and_takes_first_line() {
        let text = format!("{}\nmore stuff", "x".repeat(300));
        let summary = summarize_error_text(&text);
        assert!(summary.len() <= 201);
        assert!(!summary.contains("more stuff"));
    }

    #[tokio::test]
    async fn run_with_fallback_errors_cleanly_when_nothing_is_ready() {
        let runtime = InferenceRuntime {
            updated_at: chrono::Utc::now(),
            selected_provider: None,
            providers: Default::default(),
            secrets: Default::default(),
        };
        let dir = tempfile::tempdir().unwrap();
        let result = run_with_fallback(&runtime, "hi", dir.path(), Duration::from_secs(1)).await;
        assert!(result.is_err());
    }
}
