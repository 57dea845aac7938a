use async_trait::async_trait;

/// Narrow boundary for skill/tool extensions. Extension quarantine/analysis
/// and install/enable/draft flows are out of scope; this trait exists
/// only so `extensions`/`install`/`enable`/`draft` commands have a real
/// call site rather than being special-cased out of the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionHostStatus {
    pub installed: Vec<String>,
    pub note: String,
}

#[async_trait]
pub trait ExtensionHost: Send + Sync {
    async fn status(&self) -> ExtensionHostStatus;
}

/// Default no-op implementation: no extensions are ever installed or
/// loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExtensionHost;

#[async_trait]
impl ExtensionHost for NoopExtensionHost {
    async fn status(&self) -> ExtensionHostStatus {
        ExtensionHostStatus { installed: Vec::new(), note: "extension hosting is out of scope".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_host_reports_no_extensions() {
        let status = NoopExtensionHost.status().await;
        assert!(status.installed.is_empty());
    }
}
