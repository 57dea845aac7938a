use std::collections::VecDeque;
use std::sync::Mutex;

use tako_core::{Event, Severity};
use tako_dose::DoseState;

use crate::Depth;

/// Bound on the self-loop-prevention/dedup ring; sizes the Type1 queue
/// "generously" and this mirrors that intent for the id-seen set.
const SEEN_ID_CAP: usize = 4096;

/// Evaluate one event against the fixed rule table, returning
/// `(escalate, depth, reason)`. Pure and synchronous — this is the "cheap
/// in-process triage" half of the dual-speed design.
pub fn assess_event(event: &Event, dose: &DoseState) -> (bool, Depth, String) {
    let source = event.source.to_ascii_lowercase();
    if source == "type1" || source == "type2" {
        return (false, Depth::Light, "already processed by cognition loop".to_string());
    }

    let message = event.message.to_ascii_lowercase();
    let kind = event.kind.to_ascii_lowercase();
    let stability = dose.stability();
    let calm = stability > tako_dose::STABILITY_CALM_THRESHOLD;
    let cautious = stability < 0.45;

    if matches!(event.severity, Severity::Critical | Severity::Error) {
        let depth = if event.severity == Severity::Critical { Depth::Deep } else { Depth::Medium };
        return (true, depth, format!("severity={}", event.severity.as_str()));
    }

    if message.contains("another tako instance") || message.contains("instance lock") {
        return (true, Depth::Deep, "duplicate-instance risk".to_string());
    }

    if kind.starts_with("health.check.issue") {
        if event.severity == Severity::Warn && calm {
            return (false, Depth::Light, "startup health issue (tolerated)".to_string());
        }
        let mut reason = "startup health issue".to_string();
        if event.severity == Severity::Warn && cautious {
            reason.push_str(" (cautious)");
        }
        return (true, Depth::Medium, reason);
    }

    if kind.starts_with("runtime.") && event.severity == Severity::Warn {
        if kind.starts_with("runtime.crash") || message.contains("crash") {
            return (true, Depth::Medium, "runtime crash".to_string());
        }
        if message.contains("unstable") {
            return (true, Depth::Medium, "runtime instability".to_string());
        }
        if kind.starts_with("runtime.polling")
            || message.contains("polling fallback")
            || message.contains("switching to polling")
        {
            if calm {
                return (false, Depth::Light, "runtime polling tolerated".to_string());
            }
            return (true, Depth::Medium, "runtime polling fallback".to_string());
        }
        if cautious
            && (kind.starts_with("runtime.reconnect") || message.contains("reconnecting") || message.contains("retrying"))
        {
            return (true, Depth::Light, "runtime reconnect churn (cautious)".to_string());
        }
    }

    if kind.starts_with("runtime.polling") && event.severity == Severity::Info && cautious {
        return (true, Depth::Light, "runtime polling (cautious)".to_string());
    }

    (false, Depth::Light, "type1 handled".to_string())
}

/// Dedup-by-id ring for the Type1 consumer: an event already seen (same
/// `id`) is dropped before `assess_event` runs, so a single Type1 event is
/// never Type2-escalated twice.
pub struct SeenEventIds {
    order: Mutex<VecDeque<u64>>,
}

impl Default for SeenEventIds {
    fn default() -> Self {
        Self { order: Mutex::new(VecDeque::with_capacity(SEEN_ID_CAP)) }
    }
}

impl SeenEventIds {
    /// Returns `true` if `id` had not been seen before (and records it).
    pub fn insert_if_new(&self, id: u64) -> bool {
        let mut order = self.order.lock().expect("seen-id lock poisoned");
        if order.contains(&id) {
            return false;
        }
        order.push_back(id);
        while order.len() > SEEN_ID_CAP {
            order.pop_front();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use chrono::Utc;

    fn event(kind: &str, severity: Severity, source: &str, message: &str) -> Event {
        Event {
            id: 1,
            ts: Utc::now(),
            kind: kind.to_string(),
            severity,
            source: source.to_string(),
            message: message.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn critical_severity_escalates_deep() {
        let (escalate, depth, _) = assess_event(&event("runtime.oops", Severity::Critical, "runtime", "boom"), &DoseState::default());
        assert!(escalate);
        assert_eq!(depth, Depth::Deep);
    }

    #[test]
    fn error_severity_escalates_medium() {
        let (escalate, depth, _) = assess_event(&event("runtime.oops", Severity::Error, "runtime", "boom"), &DoseState::default());
        assert!(escalate);
        assert_eq!(depth, Depth::Medium);
    }

    #[test]
    fn type1_and_type2_sources_never_self_escalate() {
        let (escalate, _, reason) = assess_event(&event("type1.escalation", Severity::Critical, "type1", "x"), &DoseState::default());
        assert!(!escalate);
        assert!(reason.contains("already processed"));
    }

    #[test]
    fn duplicate_instance_message_escalates_deep_regardless_of_severity() {
        let (escalate, depth, reason) =
            assess_event(&event("runtime.start", Severity::Info, "runtime", "Another Tako instance detected"), &DoseState::default());
        assert!(escalate);
        assert_eq!(depth, Depth::Deep);
        assert_eq!(reason, "duplicate-instance risk");
    }

    #[test]
    fn health_check_warn_tolerated_when_calm() {
        let mut dose = DoseState::default();
        dose.s = 0.9;
        dose.e = 0.9;
        let (escalate, _, reason) = assess_event(&event("health.check.issue.disk", Severity::Warn, "health", "low disk"), &dose);
        assert!(!escalate);
        assert!(reason.contains("tolerated"));
    }

    #[test]
    fn health_check_warn_escalates_when_not_calm() {
        let mut dose = DoseState::default();
        dose.s = 0.2;
        dose.e = 0.2;
        let (escalate, depth, _) = assess_event(&event("health.check.issue.disk", Severity::Warn, "health", "low disk"), &dose);
        assert!(escalate);
        assert_eq!(depth, Depth::Medium);
    }

    #[test]
    fn runtime_polling_warn_tolerated_when_calm_else_escalates() {
        let mut calm_dose = DoseState::default();
        calm_dose.s = 0.9;
        calm_dose.e = 0.9;
        let (escalate, _, _) =
            assess_event(&event("runtime.polling.fallback", Severity::Warn, "runtime", "switching to polling"), &calm_dose);
        assert!(!escalate);

        let mut stressed_dose = DoseState::default();
        stressed_dose.s = 0.2;
        stressed_dose.e = 0.2;
        let (escalate, depth, _) =
            assess_event(&event("runtime.polling.fallback", Severity::Warn, "runtime", "switching to polling"), &stressed_dose);
        assert!(escalate);
        assert_eq!(depth, Depth::Medium);
    }

    #[test]
    fn unremarkable_info_event_is_not_escalated() {
        let (escalate, _, reason) = assess_event(&event("sensor.poll", Severity::Info, "sensor", "ok"), &DoseState::default());
        assert!(!escalate);
        assert_eq!(reason, "type1 handled");
    }

    #[test]
    fn seen_ids_dedupe_and_cap() {
        let seen = SeenEventIds::default();
        assert!(seen.insert_if_new(1));
        assert!(!seen.insert_if_new(1));
        assert!(seen.insert_if_new(2));
    }
}
