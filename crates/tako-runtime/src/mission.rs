use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Single free-text mission statement persisted at `state/mission.json`.
/// Deliberately a plain statement store rather than a keyword-alignment
/// scorer — Type2's prompt assembly only ever needs the text, not an
/// alignment score.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Mission {
    pub statement: String,
}

pub fn mission_path(state_dir: &Path) -> PathBuf {
    state_dir.join("mission.json")
}

pub fn load_mission(state_dir: &Path) -> Result<Mission> {
    let path = mission_path(state_dir);
    match std::fs::read_to_string(&path) {
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Mission::default()),
        Err(err) => Err(err.into()),
    }
}

fn save_mission(state_dir: &Path, mission: &Mission) -> Result<()> {
    std::fs::create_dir_all(state_dir)?;
    let rendered = serde_json::to_string_pretty(mission)?;
    std::fs::write(mission_path(state_dir), rendered)?;
    Ok(())
}

/// `mission show` — the current statement, or an empty string if none has
/// been set.
pub fn show(state_dir: &Path) -> Result<String> {
    Ok(load_mission(state_dir)?.statement)
}

/// `mission set <text>` — replaces the statement outright.
pub fn set(state_dir: &Path, text: &str) -> Result<Mission> {
    let mission = Mission { statement: text.trim().to_string() };
    save_mission(state_dir, &mission)?;
    Ok(mission)
}

/// `mission add <text>` — appends to the existing statement, separated by
/// a period-space if the existing statement doesn't already end in
/// punctuation, matching how an operator would extend a sentence rather
/// than start a new paragraph.
pub fn add(state_dir: &Path, text: &str) -> Result<Mission> {
    let mut mission = load_mission(state_dir)?;
    let addition = text.trim();
    if addition.is_empty() {
        return Ok(mission);
    }
    if mission.statement.is_empty() {
        mission.statement = addition.to_string();
    } else {
        let needs_separator = !mission.statement.ends_with(['.', '!', '?']);
        if needs_separator {
            mission.statement.push('.');
        }
        mission.statement.push(' ');
        mission.statement.push_str(addition);
    }
    save_mission(state_dir, &mission)?;
    Ok(mission)
}

/// `mission clear` — back to an empty statement.
pub fn clear(state_dir: &Path) -> Result<()> {
    save_mission(state_dir, &Mission::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_on_unset_mission_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(show(dir.path()).unwrap(), "");
    }

    #[test]
    fn set_then_show_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        set(dir.path(), "Help the operator ship safely.").unwrap();
        assert_eq!(show(dir.path()).unwrap(), "Help the operator ship safely.");
    }

    #[test]
    fn add_appends_with_separator() {
        let dir = tempfile::tempdir().unwrap();
        set(dir.path(), "Help the operator ship safely").unwrap();
        add(dir.path(), "keep a daily log").unwrap();
        assert_eq!(show(dir.path()).unwrap(), "Help the operator ship safely. keep a daily log");
    }

    #[test]
    fn add_onto_empty_mission_just_sets_it() {
        let dir = tempfile::tempdir().unwrap();
        add(dir.path(), "first statement").unwrap();
        assert_eq!(show(dir.path()).unwrap(), "first statement");
    }

    #[test]
    fn clear_resets_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        set(dir.path(), "something").unwrap();
        clear(dir.path()).unwrap();
        assert_eq!(show(dir.path()).unwrap(), "");
    }
}
