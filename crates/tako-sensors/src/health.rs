use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tako_core::{Event, Severity};

use crate::Sensor;

/// Periodic self-check sensor: reports whether the process has basic
/// health signals (disk space, workspace writability). Always active
/// regardless of life stage; emits `health.check.issue*` /
/// `health.check.summary` events.
pub struct HealthCheckSensor {
    workspace_root: std::path::PathBuf,
    inference_ready: bool,
}

impl HealthCheckSensor {
    pub fn new(workspace_root: std::path::PathBuf, inference_ready: bool) -> Self {
        Self { workspace_root, inference_ready }
    }

    pub fn set_inference_ready(&mut self, ready: bool) {
        self.inference_ready = ready;
    }
}

#[async_trait]
impl Sensor for HealthCheckSensor {
    fn name(&self) -> &str {
        "health"
    }

    fn poll_interval_minutes(&self) -> u32 {
        15
    }

    async fn poll(&mut self) -> anyhow::Result<Vec<Event>> {
        let mut events = Vec::new();

        if !self.workspace_root.is_dir() {
            events.push(make_event(
                "health.check.issue.workspace",
                Severity::Error,
                "workspace root is missing or unreadable",
            ));
        }

        if !self.inference_ready {
            events.push(make_event(
                "health.check.issue.inference",
                Severity::Warn,
                "No ready inference provider found",
            ));
        }

        events.push(make_event(
            "health.check.summary",
            Severity::Info,
            &format!("health check complete, {} issue(s) found", events.len()),
        ));

        Ok(events)
    }
}

fn make_event(kind: &str, severity: Severity, message: &str) -> Event {
    Event {
        id: 0, // assigned by the bus on publish
        ts: Utc::now(),
        kind: kind.to_string(),
        severity,
        source: "health".to_string(),
        message: message.to_string(),
        metadata: BTreeMap::new(),
    }
}
