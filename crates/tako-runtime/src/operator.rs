use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Narrow pairing imprint: just enough to answer "has this operator
/// paired before" for the boot-state transition. A richer profile
/// (location, focus, site URLs, NLU-derived fields) stays out of
/// scope — full profile extraction is a non-goal here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorImprint {
    pub name: String,
    pub paired_at: DateTime<Utc>,
}

pub fn operator_path(root: &Path) -> PathBuf {
    root.join("operator.json")
}

/// `None` if no operator has paired yet — drives `session::boot_transition`.
pub fn load_operator_imprint(root: &Path) -> Result<Option<OperatorImprint>> {
    let path = operator_path(root);
    match std::fs::read_to_string(&path) {
        Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Record a pairing imprint once onboarding identity collects a name.
/// Overwrites any prior imprint — re-pairing replaces, it doesn't merge.
pub fn save_operator_imprint(root: &Path, name: &str) -> Result<OperatorImprint> {
    std::fs::create_dir_all(root)?;
    let imprint = OperatorImprint { name: name.trim().to_string(), paired_at: Utc::now() };
    let rendered = serde_json::to_string_pretty(&imprint)?;
    std::fs::write(operator_path(root), rendered)?;
    Ok(imprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_imprint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_operator_imprint(dir.path()).unwrap(), None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let saved = save_operator_imprint(dir.path(), "Ada").unwrap();
        let loaded = load_operator_imprint(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.name, "Ada");
    }

    #[test]
    fn re_pairing_overwrites_prior_imprint() {
        let dir = tempfile::tempdir().unwrap();
        save_operator_imprint(dir.path(), "Ada").unwrap();
        save_operator_imprint(dir.path(), "Grace").unwrap();
        let loaded = load_operator_imprint(dir.path()).unwrap().unwrap();
        assert_eq!(loaded.name, "Grace");
    }
}
