use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tako_policy::Stage;

/// `tako.toml` workspace configuration. Nests per-concern sub-structs,
/// each with `#[serde(default)]` plus a manual `Default` impl, so a
/// partial or hand-edited file still parses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub name: String,
    pub stage: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { name: "Tako".to_string(), stage: Stage::Hatchling.as_str().to_string() }
    }
}

impl AgentConfig {
    pub fn stage(&self) -> Stage {
        Stage::parse(&self.stage).unwrap_or(Stage::Hatchling)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldWatchConfig {
    pub feeds: Vec<String>,
    pub poll_minutes: u32,
}

impl Default for WorldWatchConfig {
    fn default() -> Self {
        Self { feeds: Vec::new(), poll_minutes: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub auto_check: bool,
    pub check_interval_hours: u32,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self { auto_check: true, check_interval_hours: 24 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub world_watch: WorldWatchConfig,
    pub update: UpdateConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }
        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}
