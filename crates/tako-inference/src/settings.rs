use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// `state/inference-settings.json`: operator-set preferences and API
/// keys, persisted with user-only permissions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InferenceSettings {
    #[serde(default = "default_preferred")]
    pub preferred_provider: String,
    #[serde(default)]
    pub ollama_model: String,
    #[serde(default)]
    pub ollama_host: String,
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
}

fn default_preferred() -> String {
    "auto".to_string()
}

impl InferenceSettings {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_else(|| Self { preferred_provider: default_preferred(), ..Default::default() })
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, &json)?;
        restrict_to_owner(path)?;
        Ok(())
    }

    pub fn set_preferred_provider(&mut self, provider: &str, path: &Path) -> anyhow::Result<()> {
        self.preferred_provider = provider.to_string();
        self.save(path)
    }

    pub fn set_ollama_model(&mut self, model: &str, path: &Path) -> anyhow::Result<()> {
        self.ollama_model = model.to_string();
        self.save(path)
    }

    pub fn set_ollama_host(&mut self, host: &str, path: &Path) -> anyhow::Result<()> {
        self.ollama_host = host.to_string();
        self.save(path)
    }

    pub fn set_api_key(&mut self, env_var: &str, value: &str, path: &Path) -> anyhow::Result<()> {
        self.api_keys.insert(env_var.to_string(), value.to_string());
        self.save(path)
    }

    pub fn clear_api_key(&mut self, env_var: &str, path: &Path) -> anyhow::Result<()> {
        self.api_keys.remove(env_var);
        self.save(path)
    }

    /// Formatted, masked lines suitable for the `inference auth` / `doctor`
    /// command output — never the raw secret.
    pub fn format_auth_inventory(&self) -> Vec<String> {
        self.api_keys
            .iter()
            .map(|(env_var, value)| format!("{env_var}: {}", tako_core::mask_secret(value)))
            .collect()
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = InferenceSettings::load(&dir.path().join("missing.json"));
        assert_eq!(settings.preferred_provider, "auto");
    }

    #[test]
    fn set_api_key_round_trips_and_is_masked_in_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inference-settings.json");
        let mut settings = InferenceSettings::default();
        settings.preferred_provider = "auto".into();
        settings.set_api_key("ANTHROPIC_API_KEY", "sk-ant-REDACTED", &path).unwrap();

        let reloaded = InferenceSettings::load(&path);
        assert_eq!(reloaded.api_keys.get("ANTHROPIC_API_KEY").unwrap(), "sk-ant-REDACTED");

        let inventory = reloaded.format_auth_inventory();
        assert!(inventory.iter().all(|line| !line.contains("ABCDEFGHIJ")));
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_user_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inference-settings.json");
        InferenceSettings::default().save(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
