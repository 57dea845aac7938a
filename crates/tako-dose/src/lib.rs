//! DOSE affective-state engine.
//!
//! Four channels — Dopamine (drive/novelty), Oxytocin (bond/operator
//! orientation), Serotonin (stability), Endorphins (resilience/ease) — each
//! clamped to `[0, 1]`, pulled toward a per-channel baseline over time and
//! nudged by bounded impulses on bus events.
//!
//! The impulse table and stability threshold are pinned constants here;
//! see `DESIGN.md` for the rationale.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tako_core::{Event, Severity};

pub mod subscriber;
pub use subscriber::DoseSubscriber;

/// Per-channel half-life, in minutes, used by `tick`'s exponential pull
/// toward baseline. Drive decays fastest; bond is stickiest.
pub const HALF_LIFE_D_MIN: f64 = 45.0;
pub const HALF_LIFE_O_MIN: f64 = 240.0;
pub const HALF_LIFE_S_MIN: f64 = 360.0;
pub const HALF_LIFE_E_MIN: f64 = 90.0;

/// Upper bound on how far a single `tick` call may move any channel,
/// regardless of `dt` — prevents a long offline gap from producing an
/// unbounded catch-up jump.
pub const MAX_TICK_STEP: f64 = 0.25;

/// `(s + e) / 2.0 >= STABILITY_CALM_THRESHOLD` is the "calm" tolerance gate
/// Type1 consults for `health.check.issue.*`/`runtime.polling.*`/
/// `runtime.reconnect.*`.
pub const STABILITY_CALM_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Calm,
    Balanced,
    Stressed,
    Curious,
    Focused,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Calm => "calm",
            Label::Balanced => "balanced",
            Label::Stressed => "stressed",
            Label::Curious => "curious",
            Label::Focused => "focused",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseState {
    pub d: f64,
    pub o: f64,
    pub s: f64,
    pub e: f64,
    pub baseline_d: f64,
    pub baseline_o: f64,
    pub baseline_s: f64,
    pub baseline_e: f64,
    pub last_updated_ts: DateTime<Utc>,
}

impl Default for DoseState {
    fn default() -> Self {
        Self {
            d: 0.5,
            o: 0.5,
            s: 0.5,
            e: 0.5,
            baseline_d: 0.5,
            baseline_o: 0.5,
            baseline_s: 0.5,
            baseline_e: 0.5,
            last_updated_ts: Utc::now(),
        }
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

impl DoseState {
    pub fn clamp(&mut self) {
        self.d = clamp01(self.d);
        self.o = clamp01(self.o);
        self.s = clamp01(self.s);
        self.e = clamp01(self.e);
    }

    /// Serotonin and endorphins averaged together: the "steady and at
    /// ease" composite Type1 checks before tolerating a warn-severity event.
    pub fn stability(&self) -> f64 {
        (self.s + self.e) / 2.0
    }

    pub fn is_calm(&self) -> bool {
        self.stability() >= STABILITY_CALM_THRESHOLD
    }

    /// Pull each channel toward its baseline by a bounded rate proportional
    /// to `dt_seconds`, capped by `MAX_TICK_STEP` so long offline gaps
    /// cannot produce an unbounded jump.
    pub fn tick(&mut self, now: DateTime<Utc>, dt_seconds: f64) {
        let dt_minutes = dt_seconds.max(0.0) / 60.0;

        let pull = |x: f64, baseline: f64, half_life_min: f64| -> f64 {
            if half_life_min <= 0.0 {
                return baseline;
            }
            let rate = (dt_minutes / half_life_min).min(MAX_TICK_STEP);
            x + (baseline - x) * rate
        };

        self.d = pull(self.d, self.baseline_d, HALF_LIFE_D_MIN);
        self.o = pull(self.o, self.baseline_o, HALF_LIFE_O_MIN);
        self.s = pull(self.s, self.baseline_s, HALF_LIFE_S_MIN);
        self.e = pull(self.e, self.baseline_e, HALF_LIFE_E_MIN);
        self.clamp();
        self.last_updated_ts = now;
    }

    /// Apply a bounded impulse derived from the event's `(source, severity,
    /// type)` per the frozen table in `DESIGN.md`.
    pub fn apply_event(&mut self, event: &Event) {
        let kind = event.kind.as_str();
        let source = event.source.as_str();

        if kind.starts_with("health.check.issue") {
            match event.severity {
                Severity::Warn => self.e -= 0.12,
                Severity::Error | Severity::Critical => {
                    self.e -= 0.25;
                    self.s -= 0.10;
                }
                Severity::Info => {}
            }
        } else if kind.starts_with("type1.") {
            if event.severity == Severity::Info {
                self.d += 0.03;
            }
        } else if kind.starts_with("type2.") {
            if event.severity == Severity::Info {
                self.o += 0.05;
                self.d += 0.02;
            }
        } else if kind.starts_with("operator.message") || source == "operator" {
            self.o += 0.08;
        } else if source == "sensor" || kind.starts_with("sensor.") {
            self.d += 0.02;
        } else if kind.starts_with("runtime.crash") {
            self.s -= 0.15;
            self.e -= 0.10;
        } else {
            tracing::debug!(kind, source, "dose: no impulse rule for event, no-op");
        }

        self.clamp();
        self.last_updated_ts = event.ts;
    }

    /// Derive a coarse label from a threshold lattice around the quadrant
    /// position of each channel relative to 0.5, ties broken toward
    /// `Balanced`.
    pub fn label(&self) -> Label {
        let stability = self.stability();
        if stability < 0.35 {
            return Label::Stressed;
        }
        if self.d >= 0.65 && self.o < 0.55 {
            return Label::Curious;
        }
        if self.o >= 0.65 && stability >= 0.5 {
            return Label::Focused;
        }
        if stability >= STABILITY_CALM_THRESHOLD && self.d < 0.55 {
            return Label::Calm;
        }
        Label::Balanced
    }

    /// Apply per-channel multipliers when the life stage changes
    /// (`baseline_x *= multiplier`), then re-pull current values halfway
    /// toward the new baseline so a stage change is felt immediately
    /// without a discontinuous jump.
    pub fn rebaseline(&mut self, mult_d: f64, mult_o: f64, mult_s: f64, mult_e: f64) {
        self.baseline_d = clamp01(self.baseline_d * mult_d);
        self.baseline_o = clamp01(self.baseline_o * mult_o);
        self.baseline_s = clamp01(self.baseline_s * mult_s);
        self.baseline_e = clamp01(self.baseline_e * mult_e);
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn event(kind: &str, severity: Severity, source: &str) -> Event {
        Event {
            id: 1,
            ts: Utc::now(),
            kind: kind.to_string(),
            severity,
            source: source.to_string(),
            message: "m".into(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn channels_stay_within_unit_interval_under_any_sequence() {
        let mut dose = DoseState::default();
        let events = [
            event("health.check.issue.disk", Severity::Critical, "health"),
            event("runtime.crash.xmtp", Severity::Error, "runtime"),
            event("operator.message.turn", Severity::Info, "operator"),
            event("type2.result", Severity::Info, "type2"),
        ];
        for _ in 0..50 {
            for e in &events {
                dose.apply_event(e);
                dose.tick(Utc::now(), 3600.0 * 6.0);
                assert!((0.0..=1.0).contains(&dose.d));
                assert!((0.0..=1.0).contains(&dose.o));
                assert!((0.0..=1.0).contains(&dose.s));
                assert!((0.0..=1.0).contains(&dose.e));
            }
        }
    }

    #[test]
    fn long_offline_gap_is_capped_by_max_tick_step() {
        let mut dose = DoseState::default();
        dose.d = 0.0;
        dose.baseline_d = 1.0;
        dose.tick(Utc::now(), 3600.0 * 24.0 * 365.0);
        assert!(dose.d <= MAX_TICK_STEP + 1e-9);
    }

    #[test]
    fn tick_zero_is_a_no_op_modulo_timestamp() {
        let mut dose = DoseState::default();
        dose.d = 0.42;
        let before = (dose.d, dose.o, dose.s, dose.e);
        dose.tick(Utc::now(), 0.0);
        assert_eq!(before, (dose.d, dose.o, dose.s, dose.e));
    }

    #[test]
    fn persist_load_tick_zero_round_trips_byte_identical_modulo_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dose.json");
        let mut dose = DoseState::default();
        dose.apply_event(&event("operator.message.turn", Severity::Info, "operator"));
        dose.save(&path).unwrap();

        let mut loaded = DoseState::load(&path).unwrap();
        let ts = loaded.last_updated_ts;
        loaded.tick(ts, 0.0);
        loaded.save(&path).unwrap();

        let reloaded = DoseState::load(&path).unwrap();
        assert_eq!(reloaded.d, dose.d);
        assert_eq!(reloaded.o, dose.o);
        assert_eq!(reloaded.s, dose.s);
        assert_eq!(reloaded.e, dose.e);
    }

    #[test]
    fn calm_label_requires_stability_and_low_drive() {
        let mut dose = DoseState::default();
        dose.s = 0.9;
        dose.e = 0.9;
        dose.d = 0.2;
        dose.o = 0.3;
        assert_eq!(dose.label(), Label::Calm);
    }
}
