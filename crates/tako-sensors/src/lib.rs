//! Sensor framework: pluggable poll-based producers that emit
//! events onto the bus. Sensors are pure producers — they never subscribe.

pub mod health;
pub mod registry;
pub mod rss;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tako_core::Event;

/// A durable "seen" set persisted under `state/sensors/<name>.json`, used by
/// sensors (e.g. RSS) that must not re-emit the same item across restarts.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SeenSet {
    seen: BTreeSet<String>,
}

impl SeenSet {
    pub fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.seen.insert(key.into())
    }

    pub fn cap(&mut self, max: usize) {
        while self.seen.len() > max {
            if let Some(first) = self.seen.iter().next().cloned() {
                self.seen.remove(&first);
            } else {
                break;
            }
        }
    }
}

/// A pluggable poll-based event producer.
#[async_trait]
pub trait Sensor: Send + Sync {
    fn name(&self) -> &str;

    /// Polling cadence, in minutes.
    fn poll_interval_minutes(&self) -> u32;

    /// Produce zero or more events. Failures are caught by the caller (the
    /// heartbeat runtime) and surfaced as a `warn` event naming the sensor
    /// — a sensor implementation may simply return `Err`.
    async fn poll(&mut self) -> anyhow::Result<Vec<Event>>;
}

/// Directory used for sensor "seen" state, one file per sensor.
pub fn seen_set_path(state_dir: &Path, sensor_name: &str) -> PathBuf {
    state_dir.join("sensors").join(format!("{sensor_name}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_set_round_trips_and_caps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seen.json");
        let mut seen = SeenSet::default();
        for i in 0..10 {
            seen.insert(format!("item-{i}"));
        }
        seen.cap(5);
        assert_eq!(seen.seen.len(), 5);
        seen.save(&path).unwrap();
        let reloaded = SeenSet::load(&path);
        assert_eq!(reloaded.seen.len(), 5);
    }
}
