use std::path::Path;

use tako_policy::LifeStagePolicy;

use crate::health::HealthCheckSensor;
use crate::rss::RssSensor;
use crate::Sensor;

/// World-watch feed configuration handed to the registry by the runtime
/// (backed by `tako.toml`); kept separate from `LifeStagePolicy` since the
/// feed list is operator configuration, not a stage property.
#[derive(Debug, Clone, Default)]
pub struct WorldWatchConfig {
    pub feeds: Vec<String>,
    pub poll_minutes: u32,
}

/// Build the active sensor set for the current life stage.
///
/// `health` is always active, regardless of stage. `rss` is active only
/// when the stage's `world_watch_enabled` is set, at a cadence scaled by
/// `world_watch_poll_multiplier` (floor 5 minutes).
pub fn build_sensors_for_stage(
    policy: &LifeStagePolicy,
    world_watch: &WorldWatchConfig,
    workspace_root: &Path,
    state_dir: &Path,
    inference_ready: bool,
) -> Vec<Box<dyn Sensor>> {
    let mut sensors: Vec<Box<dyn Sensor>> =
        vec![Box::new(HealthCheckSensor::new(workspace_root.to_path_buf(), inference_ready))];

    if policy.world_watch_enabled && !world_watch.feeds.is_empty() {
        let base = if world_watch.poll_minutes == 0 { 60 } else { world_watch.poll_minutes };
        let scaled = (base as f64 * policy.world_watch_poll_multiplier).round() as i64;
        let poll_minutes = scaled.max(5) as u32;
        sensors.push(Box::new(RssSensor::new(world_watch.feeds.clone(), poll_minutes, state_dir)));
    }

    sensors
}
