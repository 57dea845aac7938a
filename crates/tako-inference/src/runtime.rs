use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::{discover_provider, ProviderStatus, PROVIDER_PRIORITY};
use crate::settings::InferenceSettings;

/// Snapshot of every provider's status plus the selected provider, matching
/// `state/inference.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRuntime {
    pub updated_at: DateTime<Utc>,
    pub selected_provider: Option<String>,
    pub providers: BTreeMap<String, ProviderStatus>,
    /// Per-provider secret value used to populate child-process
    /// environments. Never serialized.
    #[serde(skip)]
    pub secrets: HashMap<String, String>,
}

impl InferenceRuntime {
    pub fn ready(&self) -> bool {
        self.selected_provider
            .as_ref()
            .and_then(|p| self.providers.get(p))
            .map(|s| s.ready)
            .unwrap_or(false)
    }

    pub fn selected_status(&self) -> Option<&ProviderStatus> {
        self.selected_provider.as_ref().and_then(|p| self.providers.get(p))
    }

    /// Environment overrides for the selected provider's credential.
    pub fn selected_env_overrides(&self) -> HashMap<String, String> {
        self.selected_provider
            .as_ref()
            .map(|p| self.env_overrides_for(p))
            .unwrap_or_default()
    }

    pub fn env_overrides_for(&self, provider: &str) -> HashMap<String, String> {
        let mut overrides = HashMap::new();
        if let Some(status) = self.providers.get(provider) {
            if let (Some(var), Some(secret)) = (&status.key_env_var, self.secrets.get(provider)) {
                overrides.insert(var.clone(), secret.clone());
            }
        }
        overrides
    }

    pub fn ready_providers_in_priority_order(&self) -> Vec<&str> {
        PROVIDER_PRIORITY
            .iter()
            .copied()
            .filter(|p| self.providers.get(*p).map(|s| s.ready).unwrap_or(false))
            .collect()
    }

    pub fn persist(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Enumerate all providers in `PROVIDER_PRIORITY`, probing CLI + credential
/// evidence for each, and select one: `TAKO_INFERENCE_PROVIDER` env
/// override, else the persisted preferred
/// provider (if ready and not "auto"), else the first ready provider in
/// priority order.
pub fn discover_inference_runtime(home: &Path, settings: &InferenceSettings, env: &HashMap<String, String>) -> InferenceRuntime {
    let mut providers = BTreeMap::new();
    let mut secrets = HashMap::new();

    for provider in PROVIDER_PRIORITY {
        let status = discover_provider(provider, home, env, &settings.ollama_model);
        if let Some(value) = settings.api_keys.get(provider.to_uppercase().as_str()) {
            secrets.insert(provider.to_string(), value.clone());
        }
        if let Some(var) = &status.key_env_var {
            if let Some(value) = env.get(var) {
                secrets.insert(provider.to_string(), value.clone());
            } else if let Some(value) = settings.api_keys.get(var) {
                secrets.insert(provider.to_string(), value.clone());
            }
        }
        providers.insert(provider.to_string(), status);
    }

    let selected = select_provider(&providers, settings, env);

    InferenceRuntime { updated_at: Utc::now(), selected_provider: selected, providers, secrets }
}

fn select_provider(
    providers: &BTreeMap<String, ProviderStatus>,
    settings: &InferenceSettings,
    env: &HashMap<String, String>,
) -> Option<String> {
    if let Some(forced) = env.get("TAKO_INFERENCE_PROVIDER") {
        if providers.get(forced).map(|s| s.ready).unwrap_or(false) {
            return Some(forced.clone());
        }
    }

    if settings.preferred_provider != "auto" {
        if providers
            .get(&settings.preferred_provider)
            .map(|s| s.ready)
            .unwrap_or(false)
        {
            return Some(settings.preferred_provider.clone());
        }
    }

    PROVIDER_PRIORITY
        .iter()
        .find(|p| providers.get(**p).map(|s| s.ready).unwrap_or(false))
        .map(|p| p.to_string())
}

/// Human-readable status lines for `doctor`/`status`, in priority order.
pub fn format_runtime_lines(runtime: &InferenceRuntime) -> Vec<String> {
    PROVIDER_PRIORITY
        .iter()
        .filter_map(|p| runtime.providers.get(*p))
        .map(|status| {
            let marker = if status.ready { "✓" } else { "✗" };
            format!("{marker} {:<8} installed={} key_source={} note={}", status.name, status.cli_installed, status.key_source.clone().unwrap_or_else(|| "none".into()), status.note)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_when_ready() {
        let home = tempfile::tempdir().unwrap();
        let settings = InferenceSettings::default();
        let mut env = HashMap::new();
        env.insert("TAKO_INFERENCE_PROVIDER".to_string(), "ollama".to_string());
        env.insert("OLLAMA_MODEL".to_string(), "llama3".to_string());
        let mut settings = settings;
        settings.ollama_model = "llama3".to_string();
        let runtime = discover_inference_runtime(home.path(), &settings, &env);
        // ollama's cli may not exist on this machine: selection only happens
        // if ready, so this test only asserts no panic + a stable structure.
        assert_eq!(runtime.providers.len(), PROVIDER_PRIORITY.len());
        let _ = runtime.ready();
    }

    #[test]
    fn no_ready_provider_selects_none() {
        let home = tempfile::tempdir().unwrap();
        let settings = InferenceSettings::default();
        let env = HashMap::new();
        let runtime = discover_inference_runtime(home.path(), &settings, &env);
        if runtime.selected_provider.is_none() {
            assert!(!runtime.ready());
        }
    }
}
