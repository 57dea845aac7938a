use std::path::{Path, PathBuf};

/// Best-effort workspace root discovery.
///
/// Prefers a `tako.toml` sentinel; falls back to the minimal doc set
/// (`AGENTS.md` + `SOUL.md` + `MEMORY.md` all present); falls back to
/// `start` itself so the process can still run "ad-hoc".
pub fn find_workspace_root(start: &Path) -> PathBuf {
    let probe = start
        .canonicalize()
        .unwrap_or_else(|_| start.to_path_buf());

    let mut candidate = Some(probe.as_path());
    while let Some(dir) = candidate {
        if dir.join("tako.toml").is_file() {
            return dir.to_path_buf();
        }
        if dir.join("AGENTS.md").is_file() && dir.join("SOUL.md").is_file() && dir.join("MEMORY.md").is_file() {
            return dir.to_path_buf();
        }
        candidate = dir.parent();
    }
    probe
}

/// Directories and files the runtime reads/writes under `<workspace>/.tako/`.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    pub root: PathBuf,
    pub keys_json: PathBuf,
    pub operator_json: PathBuf,
    pub locks_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub state_dir: PathBuf,
    pub xmtp_db_dir: PathBuf,
}

impl RuntimePaths {
    pub fn for_workspace(workspace_root: &Path) -> Self {
        let root = workspace_root.join(".tako");
        Self {
            keys_json: root.join("keys.json"),
            operator_json: root.join("operator.json"),
            locks_dir: root.join("locks"),
            logs_dir: root.join("logs"),
            tmp_dir: root.join("tmp"),
            state_dir: root.join("state"),
            xmtp_db_dir: root.join("xmtp-db"),
            root,
        }
    }

    pub fn events_log(&self) -> PathBuf {
        self.state_dir.join("events.jsonl")
    }

    pub fn dose_snapshot(&self) -> PathBuf {
        self.state_dir.join("dose.json")
    }

    pub fn inference_snapshot(&self) -> PathBuf {
        self.state_dir.join("inference.json")
    }

    pub fn inference_settings(&self) -> PathBuf {
        self.state_dir.join("inference-settings.json")
    }

    pub fn open_loops(&self) -> PathBuf {
        self.state_dir.join("open_loops.json")
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.state_dir.join("conversations")
    }

    pub fn instance_lock(&self) -> PathBuf {
        self.locks_dir.join("tako.lock")
    }

    pub fn app_log(&self) -> PathBuf {
        self.logs_dir.join("app.log")
    }

    pub fn runtime_log(&self) -> PathBuf {
        self.logs_dir.join("runtime.log")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.root,
            &self.locks_dir,
            &self.logs_dir,
            &self.tmp_dir,
            &self.state_dir,
            &self.xmtp_db_dir,
            &self.conversations_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_start_dir_when_no_sentinel_found() {
        let dir = tempfile::tempdir().unwrap();
        let root = find_workspace_root(dir.path());
        assert_eq!(root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn finds_tako_toml_sentinel_in_parent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tako.toml"), "").unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        let root = find_workspace_root(&nested);
        assert_eq!(root, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn finds_minimal_doc_set_without_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "").unwrap();
        std::fs::write(dir.path().join("SOUL.md"), "").unwrap();
        std::fs::write(dir.path().join("MEMORY.md"), "").unwrap();
        let root = find_workspace_root(dir.path());
        assert_eq!(root, dir.path().canonicalize().unwrap());
    }
}
