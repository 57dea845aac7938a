use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use tako_core::Event;

/// Append-only JSONL audit log: one JSON object per line, never
/// rewritten in place. `load()` tolerates a trailing partial line and
/// quarantines corrupt lines to a `.corrupt` sidecar rather than failing
/// the whole read.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event and fsync before returning, so a crash immediately
    /// after `publish()` cannot lose the record.
    pub fn append(&self, event: &Event) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(event)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    /// Load all well-formed events, in file order. Trailing partial lines
    /// (a process crashed mid-append) and malformed lines are skipped and
    /// quarantined, never fatal.
    pub fn load(&self) -> Result<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::OpenOptions::new().read(true).open(&self.path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut corrupt = 0usize;

        for (idx, line_result) in reader.lines().enumerate() {
            let line = match line_result {
                Ok(l) => l,
                Err(_) => break, // trailing partial line / truncated read
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(err) => {
                    corrupt += 1;
                    tracing::warn!(
                        line = idx + 1,
                        error = %err,
                        path = %self.path.display(),
                        "corrupt event log line — quarantined"
                    );
                    let corrupt_path = self.path.with_extension("jsonl.corrupt");
                    if let Ok(mut bad) = std::fs::OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&corrupt_path)
                    {
                        let _ = writeln!(bad, "{line}");
                    }
                }
            }
        }

        if corrupt > 0 {
            tracing::warn!(corrupt_lines = corrupt, path = %self.path.display(), "event log had corrupt lines");
        }
        Ok(events)
    }

    /// Highest id present in the log, used to seed the next id on startup
    /// so ids remain strictly increasing across restarts.
    pub fn max_id(&self) -> Result<Option<u64>> {
        Ok(self.load()?.into_iter().map(|e| e.id).max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tako_core::Severity;
    use std::collections::BTreeMap;

    fn event(id: u64) -> Event {
        Event {
            id,
            ts: chrono::Utc::now(),
            kind: "test.event".into(),
            severity: Severity::Info,
            source: "test".into(),
            message: "hello".into(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn append_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        log.append(&event(1)).unwrap();
        log.append(&event(2)).unwrap();
        let loaded = log.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(log.max_id().unwrap(), Some(2));
    }

    #[test]
    fn load_quarantines_corrupt_lines_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = EventLog::new(&path);
        log.append(&event(1)).unwrap();
        {
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "{{not valid json").unwrap();
        }
        log.append(&event(2)).unwrap();
        let loaded = log.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(path.with_extension("jsonl.corrupt").exists());
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("missing.jsonl"));
        assert!(log.load().unwrap().is_empty());
        assert_eq!(log.max_id().unwrap(), None);
    }
}
