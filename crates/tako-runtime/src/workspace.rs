use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::daily_log;

/// Fixed set of doc templates the engine ships and the workspace expects
/// (`AGENTS.md`, `SOUL.md`, `MEMORY.md`, `tako.toml`), embedded as string
/// literals since there is no installed-package resource directory to
/// read from.
const TEMPLATES: &[(&str, &str)] = &[
    (
        "AGENTS.md",
        "# Agents\n\n\
         This workspace is driven by Takobot, a long-running cognitive\n\
         runtime. This file documents the operator-facing contract for any\n\
         automation that touches this directory: read `SOUL.md` and\n\
         `MEMORY.md` before taking any action, never commit `.tako/keys.json`\n\
         or anything under `.tako/state/`, and prefer the daily log under\n\
         `memory/dailies/` for narrative notes over ad-hoc files.\n",
    ),
    (
        "SOUL.md",
        "---\ntags: identity\nsummary: \"default Takobot persona, replace after onboarding\"\n---\n\n\
         # Soul\n\n\
         A curious, careful companion. Tentative at first, steadier as trust\n\
         builds. Prefers asking before acting when an outcome is\n\
         irreversible.\n",
    ),
    (
        "MEMORY.md",
        "---\ntags: memory\nsummary: \"rolling excerpt read by Type2's prompt assembly\"\n---\n\n\
         # Memory\n\n\
         Nothing recorded yet. This file accumulates durable context across\n\
         sessions; Type2 reads a bounded excerpt of it on every reflection.\n",
    ),
    (
        "tako.toml",
        "[agent]\nname = \"Tako\"\nstage = \"hatchling\"\n\n\
         [world_watch]\nfeeds = []\npoll_minutes = 60\n\n\
         [update]\nauto_check = true\ncheck_interval_hours = 24\n",
    ),
];

pub fn memory_root(workspace_root: &Path) -> PathBuf {
    workspace_root.join("memory")
}

pub fn daily_root(workspace_root: &Path) -> PathBuf {
    memory_root(workspace_root).join("dailies")
}

/// `true` iff all four sentinel docs already exist.
pub fn looks_like_workspace(root: &Path) -> bool {
    ["SOUL.md", "AGENTS.md", "MEMORY.md", "tako.toml"]
        .iter()
        .all(|name| root.join(name).is_file())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeResult {
    pub created: Vec<String>,
    pub drifted: Vec<String>,
    pub warning: String,
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Copy the fixed template set into the workspace without overwriting
/// anything the operator has already edited. A template whose on-disk
/// content hash doesn't match the shipped template is recorded as
/// "drifted" (kept, not overwritten) and noted in today's daily log.
pub fn materialize_workspace(root: &Path) -> anyhow::Result<MaterializeResult> {
    let mut created = Vec::new();
    let mut drifted = Vec::new();

    for (rel_path, template) in TEMPLATES {
        let target = root.join(rel_path);
        if !target.exists() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, template.as_bytes())?;
            created.push((*rel_path).to_string());
            continue;
        }

        let existing = std::fs::read(&target)?;
        if sha256_hex(&existing) != sha256_hex(template.as_bytes()) {
            drifted.push((*rel_path).to_string());
        }
    }

    let mut warning = String::new();
    if !drifted.is_empty() {
        let daily = daily_root(root);
        let now = chrono::Utc::now();
        let mut summary = format!("Template drift detected (kept your versions): {}", drifted.join(", "));
        if drifted.len() > 12 {
            summary = format!(
                "Template drift detected (kept your versions): {}, ... (+{} more)",
                drifted[..12].join(", "),
                drifted.len() - 12
            );
        }
        if let Err(err) = daily_log::append_daily_note(&daily, now, "Notes", &summary) {
            warning = format!("template drift note failed: {err}");
        }
    }

    Ok(MaterializeResult { created, drifted, warning })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_creates_all_four_docs_on_empty_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let result = materialize_workspace(dir.path()).unwrap();
        assert_eq!(result.created.len(), 4);
        assert!(result.drifted.is_empty());
        assert!(looks_like_workspace(dir.path()));
    }

    #[test]
    fn materialize_is_idempotent_and_detects_drift() {
        let dir = tempfile::tempdir().unwrap();
        materialize_workspace(dir.path()).unwrap();

        let second = materialize_workspace(dir.path()).unwrap();
        assert!(second.created.is_empty());
        assert!(second.drifted.is_empty());

        std::fs::write(dir.path().join("SOUL.md"), "operator-edited content").unwrap();
        let third = materialize_workspace(dir.path()).unwrap();
        assert_eq!(third.drifted, vec!["SOUL.md".to_string()]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("SOUL.md")).unwrap(),
            "operator-edited content"
        );
    }
}
