use std::path::PathBuf;
use std::sync::Mutex;

use tako_bus::Subscriber;
use tako_core::Event;

use crate::DoseState;

/// Bus subscriber that folds every event into the shared `DoseState`,
/// persisting a snapshot whenever the derived label changes.
///
/// DOSE is mutated only from this subscriber and from the heartbeat's
/// `tick()` call; both serialize on the same mutex so the two paths never
/// interleave.
pub struct DoseSubscriber {
    state: Mutex<DoseState>,
    snapshot_path: PathBuf,
}

impl DoseSubscriber {
    pub fn new(state: DoseState, snapshot_path: PathBuf) -> Self {
        Self { state: Mutex::new(state), snapshot_path }
    }

    pub fn snapshot(&self) -> DoseState {
        self.state.lock().expect("dose mutex poisoned").clone()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut DoseState) -> R) -> R {
        let mut guard = self.state.lock().expect("dose mutex poisoned");
        f(&mut guard)
    }
}

impl Subscriber for DoseSubscriber {
    fn name(&self) -> &str {
        "dose"
    }

    fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        // Idempotency: the bus marks every event it folds so a direct
        // caller (e.g. the heartbeat task re-applying the same event after
        // a retry) doesn't double-apply. We key on the same flag name the
        // bus writes, `dose_applied`.
        if event.metadata_bool("dose_applied") {
            return Ok(());
        }

        let label_before = self.with_state(|s| {
            let before = s.label();
            s.apply_event(event);
            before
        });

        let label_after = self.with_state(|s| s.label());
        if label_before != label_after {
            let snapshot = self.snapshot();
            snapshot.save(&self.snapshot_path)?;
        }
        Ok(())
    }
}
