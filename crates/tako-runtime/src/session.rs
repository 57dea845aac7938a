use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Boot → onboarding → pairing → running. Transitions are explicit;
/// nothing in this crate infers a state from side data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Booting,
    OnboardingIdentity,
    OnboardingRoutines,
    AskXmtpHandle,
    PairingOutbound,
    Paired,
    Running,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Booting => "BOOTING",
            SessionState::OnboardingIdentity => "ONBOARDING_IDENTITY",
            SessionState::OnboardingRoutines => "ONBOARDING_ROUTINES",
            SessionState::AskXmtpHandle => "ASK_XMTP_HANDLE",
            SessionState::PairingOutbound => "PAIRING_OUTBOUND",
            SessionState::Paired => "PAIRED",
            SessionState::Running => "RUNNING",
        }
    }

    /// States in which an interactive turn opens the inference gate.
    pub fn is_interactive(&self) -> bool {
        !matches!(self, SessionState::Booting)
    }
}

/// BOOTING → ONBOARDING_IDENTITY (no operator imprint found) or → PAIRED
/// (imprint found) — the only two legal exits from BOOTING.
pub fn boot_transition(operator_imprint_found: bool) -> SessionState {
    if operator_imprint_found {
        SessionState::Paired
    } else {
        SessionState::OnboardingIdentity
    }
}

/// Whether `collect_xmtp_handle` configures the runtime to collect an
/// XMTP handle during onboarding; if not, `ONBOARDING_ROUTINES` goes
/// straight to `RUNNING` (local-only choice).
pub fn after_onboarding_routines(collect_xmtp_handle: bool) -> SessionState {
    if collect_xmtp_handle {
        SessionState::AskXmtpHandle
    } else {
        SessionState::Running
    }
}

/// `PAIRED → RUNNING` after a background XMTP start attempt, regardless of
/// whether that attempt itself succeeded — XMTP is an external
/// transport boundary, not a gate on reaching `RUNNING`.
pub fn after_xmtp_start_attempt() -> SessionState {
    SessionState::Running
}

/// Latch that permits subprocess LLM calls. Opens
/// exactly once, on the first non-empty interactive turn submitted while
/// in an interactive state; closes again only on process exit (never
/// re-closed at runtime).
pub struct InferenceGate {
    open: AtomicBool,
    opened: Mutex<Option<(SessionState, DateTime<Utc>)>>,
}

impl Default for InferenceGate {
    fn default() -> Self {
        Self { open: AtomicBool::new(false), opened: Mutex::new(None) }
    }
}

impl InferenceGate {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Consider opening the gate for a submitted turn. No-op if the gate is
    /// already open, the turn text is empty after trimming, or `state` is
    /// not interactive (`BOOTING`). Returns `true` if this call opened it.
    pub fn maybe_open(&self, state: SessionState, turn_text: &str) -> bool {
        if self.open.load(Ordering::SeqCst) {
            return false;
        }
        if !state.is_interactive() || turn_text.trim().is_empty() {
            return false;
        }
        if self.open.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.opened.lock().expect("inference gate lock poisoned") = Some((state, Utc::now()));
        true
    }

    pub fn opened_state(&self) -> Option<SessionState> {
        self.opened.lock().expect("inference gate lock poisoned").map(|(s, _)| s)
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened.lock().expect("inference gate lock poisoned").map(|(_, t)| t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boot_transition_depends_on_operator_imprint() {
        assert_eq!(boot_transition(false), SessionState::OnboardingIdentity);
        assert_eq!(boot_transition(true), SessionState::Paired);
    }

    #[test]
    fn onboarding_routines_skips_xmtp_ask_when_not_collecting() {
        assert_eq!(after_onboarding_routines(false), SessionState::Running);
        assert_eq!(after_onboarding_routines(true), SessionState::AskXmtpHandle);
    }

    #[test]
    fn gate_opens_exactly_once_on_first_nonempty_interactive_turn() {
        let gate = InferenceGate::default();
        assert!(!gate.is_open());
        assert!(!gate.maybe_open(SessionState::Booting, "hello"));
        assert!(!gate.is_open());

        assert!(!gate.maybe_open(SessionState::OnboardingIdentity, "   "));
        assert!(!gate.is_open());

        assert!(gate.maybe_open(SessionState::OnboardingIdentity, "Tako"));
        assert!(gate.is_open());
        assert_eq!(gate.opened_state(), Some(SessionState::OnboardingIdentity));

        assert!(!gate.maybe_open(SessionState::Running, "hi again"));
        assert_eq!(gate.opened_state(), Some(SessionState::OnboardingIdentity));
    }
}
