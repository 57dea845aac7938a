//! Life-stage policy machine.
//!
//! Each stage is an immutable policy object; the runtime swaps the active
//! policy atomically on an operator-driven stage change and recomputes
//! DOSE baselines as `base * multiplier`.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Hatchling,
    Child,
    Teen,
    Adult,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Hatchling => "hatchling",
            Stage::Child => "child",
            Stage::Teen => "teen",
            Stage::Adult => "adult",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "hatchling" => Some(Stage::Hatchling),
            "child" => Some(Stage::Child),
            "teen" => Some(Stage::Teen),
            "adult" => Some(Stage::Adult),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DoseBaselineMultipliers {
    pub d: f64,
    pub o: f64,
    pub s: f64,
    pub e: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifeStagePolicy {
    pub stage: Stage,
    pub title: String,
    pub tone: String,
    pub explore_interval_minutes: u32,
    pub type2_budget_per_day: u32,
    pub world_watch_enabled: bool,
    pub world_watch_poll_multiplier: f64,
    pub routines_active: BTreeSet<String>,
    pub dose_baseline_multipliers: DoseBaselineMultipliers,
}

impl LifeStagePolicy {
    /// Table of the four fixed per-stage policies. Immutable; the runtime
    /// only ever swaps which one is "current".
    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Hatchling => Self {
                stage,
                title: "Hatchling".into(),
                tone: "curious, tentative, asks a lot of questions".into(),
                explore_interval_minutes: 240,
                type2_budget_per_day: 4,
                world_watch_enabled: false,
                world_watch_poll_multiplier: 1.0,
                routines_active: BTreeSet::new(),
                dose_baseline_multipliers: DoseBaselineMultipliers { d: 1.1, o: 1.2, s: 0.9, e: 1.0 },
            },
            Stage::Child => Self {
                stage,
                title: "Child".into(),
                tone: "eager to learn, world-curious".into(),
                explore_interval_minutes: 120,
                type2_budget_per_day: 8,
                world_watch_enabled: true,
                world_watch_poll_multiplier: 1.5,
                routines_active: ["morning".to_string()].into_iter().collect(),
                dose_baseline_multipliers: DoseBaselineMultipliers { d: 1.2, o: 1.1, s: 1.0, e: 1.0 },
            },
            Stage::Teen => Self {
                stage,
                title: "Teen".into(),
                tone: "productivity-aware, a bit independent".into(),
                explore_interval_minutes: 60,
                type2_budget_per_day: 14,
                world_watch_enabled: true,
                world_watch_poll_multiplier: 1.0,
                routines_active: ["morning".to_string(), "outcomes".to_string()].into_iter().collect(),
                dose_baseline_multipliers: DoseBaselineMultipliers { d: 1.0, o: 1.0, s: 1.05, e: 1.0 },
            },
            Stage::Adult => Self {
                stage,
                title: "Adult".into(),
                tone: "steady, full scheduling, measured".into(),
                explore_interval_minutes: 45,
                type2_budget_per_day: 24,
                world_watch_enabled: true,
                world_watch_poll_multiplier: 0.75,
                routines_active: ["morning".to_string(), "outcomes".to_string(), "weekly".to_string()]
                    .into_iter()
                    .collect(),
                dose_baseline_multipliers: DoseBaselineMultipliers { d: 1.0, o: 1.0, s: 1.1, e: 1.05 },
            },
        }
    }
}

/// `(day_iso, used_count)`. Resets to zero whenever the day rolls over or
/// the life stage changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Type2Budget {
    pub day_iso: String,
    pub used_count: u32,
    pub limit: u32,
}

impl Type2Budget {
    pub fn new(today: NaiveDate, limit: u32) -> Self {
        Self { day_iso: today.format("%Y-%m-%d").to_string(), used_count: 0, limit }
    }

    fn roll_if_new_day(&mut self, today: NaiveDate) {
        let today_iso = today.format("%Y-%m-%d").to_string();
        if self.day_iso != today_iso {
            self.day_iso = today_iso;
            self.used_count = 0;
        }
    }

    pub fn reset(&mut self, today: NaiveDate, limit: u32) {
        self.day_iso = today.format("%Y-%m-%d").to_string();
        self.used_count = 0;
        self.limit = limit;
    }

    /// Roll the day if necessary, then try to consume one slot. Returns
    /// `true` if a slot was consumed, `false` if the budget is exhausted
    /// for today.
    pub fn try_consume(&mut self, today: NaiveDate) -> bool {
        self.roll_if_new_day(today);
        if self.used_count >= self.limit {
            return false;
        }
        self.used_count += 1;
        true
    }

    pub fn remaining(&self, today: NaiveDate) -> u32 {
        let mut copy = self.clone();
        copy.roll_if_new_day(today);
        copy.limit.saturating_sub(copy.used_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_consumes_until_limit_then_refuses() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let mut budget = Type2Budget::new(today, 2);
        assert!(budget.try_consume(today));
        assert!(budget.try_consume(today));
        assert!(!budget.try_consume(today));
        assert_eq!(budget.remaining(today), 0);
    }

    #[test]
    fn budget_resets_on_calendar_rollover() {
        let day1 = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2026, 7, 29).unwrap();
        let mut budget = Type2Budget::new(day1, 1);
        assert!(budget.try_consume(day1));
        assert!(!budget.try_consume(day1));
        assert!(budget.try_consume(day2));
    }

    #[test]
    fn rebaseline_applies_stage_multipliers() {
        let policy = LifeStagePolicy::for_stage(Stage::Child);
        assert_eq!(policy.dose_baseline_multipliers.d, 1.2);
        assert!(policy.world_watch_enabled);
    }

    #[test]
    fn stage_parse_round_trips() {
        for stage in [Stage::Hatchling, Stage::Child, Stage::Teen, Stage::Adult] {
            assert_eq!(Stage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(Stage::parse("nope"), None);
    }
}
