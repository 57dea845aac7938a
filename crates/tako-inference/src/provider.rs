use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Fixed provider priority used both for discovery and for the fallback
/// chain.
pub const PROVIDER_PRIORITY: [&str; 5] = ["pi", "ollama", "codex", "claude", "gemini"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    ApiKey,
    Oauth,
    LocalModel,
    OauthOrProfile,
    None,
}

impl AuthKind {
    pub fn for_provider(provider: &str) -> Self {
        match provider {
            "pi" => AuthKind::OauthOrProfile,
            "ollama" => AuthKind::LocalModel,
            "codex" => AuthKind::Oauth,
            "claude" => AuthKind::Oauth,
            "gemini" => AuthKind::ApiKey,
            _ => AuthKind::None,
        }
    }
}

/// Environment variables consulted for each provider's credential evidence,
/// in priority order.
pub fn candidate_env_vars(provider: &str) -> &'static [&'static str] {
    match provider {
        "pi" => &[
            "OPENAI_API_KEY",
            "ANTHROPIC_API_KEY",
            "GEMINI_API_KEY",
            "OPENROUTER_API_KEY",
            "XAI_API_KEY",
            "GROQ_API_KEY",
        ],
        "claude" => &["ANTHROPIC_API_KEY", "CLAUDE_API_KEY"],
        "gemini" => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        "codex" => &["OPENAI_API_KEY"],
        "ollama" => &["OLLAMA_MODEL"],
        _ => &[],
    }
}

/// Per-provider well-known credential files under the user's home, checked
/// after environment variables.
pub fn candidate_credential_files(provider: &str, home: &Path) -> Vec<PathBuf> {
    match provider {
        "claude" => vec![home.join(".claude").join(".credentials.json")],
        "codex" => vec![home.join(".codex").join("auth.json")],
        "gemini" => vec![home.join(".gemini").join("oauth_creds.json")],
        "pi" => vec![home.join(".pi").join("auth.json")],
        _ => vec![],
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub name: String,
    pub cli_path: Option<PathBuf>,
    pub cli_installed: bool,
    pub auth_kind: AuthKind,
    pub key_env_var: Option<String>,
    pub key_source: Option<String>,
    pub key_present: bool,
    pub ready: bool,
    pub note: String,
}

impl ProviderStatus {
    fn not_installed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cli_path: None,
            cli_installed: false,
            auth_kind: AuthKind::for_provider(name),
            key_env_var: None,
            key_source: None,
            key_present: false,
            ready: false,
            note: format!("{name} CLI not found on PATH"),
        }
    }
}

/// Locate an executable named `name` on `PATH`. A workspace-local node
/// runtime fallback is consulted separately for provider "pi" — see
/// `discover_pi`.
pub fn which(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn env_non_empty(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Discover one provider's status. `env` is injected for testability; in
/// production this is `std::env::vars().collect()`.
pub fn discover_provider(provider: &str, home: &Path, env: &HashMap<String, String>, ollama_model: &str) -> ProviderStatus {
    let cli_name = provider;
    let cli_path = if provider == "pi" { discover_pi_cli(home) } else { which(cli_name) };

    let Some(cli_path) = cli_path else {
        return ProviderStatus::not_installed(provider);
    };

    for var in candidate_env_vars(provider) {
        if let Some(value) = env_non_empty(env, var) {
            let ready = provider != "ollama" || !ollama_model.trim().is_empty();
            return ProviderStatus {
                name: provider.to_string(),
                cli_path: Some(cli_path),
                cli_installed: true,
                auth_kind: AuthKind::for_provider(provider),
                key_env_var: Some(var.to_string()),
                key_source: Some(format!("env:{var}")),
                key_present: true,
                ready,
                note: if ready {
                    "ready".to_string()
                } else {
                    "no ollama model configured".to_string()
                },
            };
        }
    }

    for file in candidate_credential_files(provider, home) {
        if file.is_file() {
            return ProviderStatus {
                name: provider.to_string(),
                cli_path: Some(cli_path),
                cli_installed: true,
                auth_kind: AuthKind::for_provider(provider),
                key_env_var: None,
                key_source: Some(format!("file:{}#credentials", file.display())),
                key_present: true,
                ready: true,
                note: "ready".to_string(),
            };
        }
    }

    if provider == "ollama" {
        let ready = !ollama_model.trim().is_empty();
        return ProviderStatus {
            name: provider.to_string(),
            cli_path: Some(cli_path),
            cli_installed: true,
            auth_kind: AuthKind::LocalModel,
            key_env_var: None,
            key_source: if ready { Some(format!("model:{ollama_model}")) } else { None },
            key_present: ready,
            ready,
            note: if ready { "ready".to_string() } else { "no ollama model configured".to_string() },
        };
    }

    ProviderStatus {
        name: provider.to_string(),
        cli_path: Some(cli_path),
        cli_installed: true,
        auth_kind: AuthKind::for_provider(provider),
        key_env_var: None,
        key_source: None,
        key_present: false,
        ready: false,
        note: "CLI present but no credentials found".to_string(),
    }
}

fn discover_pi_cli(home: &Path) -> Option<PathBuf> {
    which("pi").or_else(|| {
        let workspace_pi = home.join(".tako").join("tmp").join("pi-cli").join("pi");
        workspace_pi.is_file().then_some(workspace_pi)
    })
}
