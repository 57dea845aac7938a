use async_trait::async_trait;

/// Narrow boundary for the self-update mechanism. Self-update internals
/// are out of scope; this trait exists only so the heartbeat and the
/// `update` command have somewhere to call without branching on whether
/// update support exists at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheckResult {
    pub checked: bool,
    pub update_available: bool,
    pub note: String,
}

#[async_trait]
pub trait UpdateChecker: Send + Sync {
    async fn check(&self) -> UpdateCheckResult;
}

/// Default no-op implementation: always reports "not checked", never
/// makes a network call.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUpdateChecker;

#[async_trait]
impl UpdateChecker for NoopUpdateChecker {
    async fn check(&self) -> UpdateCheckResult {
        UpdateCheckResult { checked: false, update_available: false, note: "self-update is out of scope".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_checker_never_reports_an_update() {
        let result = NoopUpdateChecker.check().await;
        assert!(!result.checked);
        assert!(!result.update_available);
    }
}
