//! Conversation store: a bounded per-session turn ring used for
//! prompt context assembly. Persistence is best-effort — a missing or
//! corrupt file degrades prompt quality but never blocks operation; a
//! load failure falls back to an empty history rather than erroring.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEFAULT_MAX_TURNS: usize = 40;
const DEFAULT_MAX_CHARS: usize = 12_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Operator,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct SessionHistory {
    turns: VecDeque<Turn>,
}

/// Mapping `session_key -> bounded ring of turns`, with a render method
/// capped by both turn count and character count.
pub struct ConversationStore {
    dir: PathBuf,
    max_turns: usize,
    max_chars: usize,
    sessions: HashMap<String, SessionHistory>,
}

impl ConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_turns: DEFAULT_MAX_TURNS,
            max_chars: DEFAULT_MAX_CHARS,
            sessions: HashMap::new(),
        }
    }

    pub fn with_limits(mut self, max_turns: usize, max_chars: usize) -> Self {
        self.max_turns = max_turns;
        self.max_chars = max_chars;
        self
    }

    fn session_path(&self, session_key: &str) -> PathBuf {
        let safe: String = session_key
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    fn load_session(&mut self, session_key: &str) -> &mut SessionHistory {
        if !self.sessions.contains_key(session_key) {
            let loaded = std::fs::read_to_string(self.session_path(session_key))
                .ok()
                .and_then(|text| serde_json::from_str::<SessionHistory>(&text).ok())
                .unwrap_or_default();
            self.sessions.insert(session_key.to_string(), loaded);
        }
        self.sessions.get_mut(session_key).expect("just inserted")
    }

    /// Append a turn, masking any secret-looking substring best-effort,
    /// then persist (best-effort — errors are swallowed, this store never
    /// blocks operation).
    pub fn append(&mut self, session_key: &str, role: Role, text: &str) {
        let masked = best_effort_mask(text);
        let max_turns = self.max_turns;
        let session = self.load_session(session_key);
        session.turns.push_back(Turn { role, text: masked, ts: Utc::now() });
        while session.turns.len() > max_turns {
            session.turns.pop_front();
        }
        let _ = self.persist(session_key);
    }

    fn persist(&self, session_key: &str) -> anyhow::Result<()> {
        let Some(session) = self.sessions.get(session_key) else { return Ok(()) };
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(self.session_path(session_key), json)?;
        Ok(())
    }

    /// Render a bounded transcript: capped by user-turn count *and*
    /// character count, hard-truncated from the oldest end.
    pub fn render_context(&mut self, session_key: &str, max_user_turns: usize) -> String {
        let max_chars = self.max_chars;
        let session = self.load_session(session_key);

        let mut user_turns_seen = 0usize;
        let mut kept: Vec<&Turn> = Vec::new();
        for turn in session.turns.iter().rev() {
            if turn.role == Role::Operator {
                if user_turns_seen >= max_user_turns {
                    break;
                }
                user_turns_seen += 1;
            }
            kept.push(turn);
        }
        kept.reverse();

        let mut rendered = kept
            .iter()
            .map(|t| format!("{}: {}", role_label(t.role), t.text))
            .collect::<Vec<_>>()
            .join("\n");

        if rendered.len() > max_chars {
            let start = rendered.len() - max_chars;
            // Truncate from the oldest end on a char boundary.
            let mut cut = start;
            while cut < rendered.len() && !rendered.is_char_boundary(cut) {
                cut += 1;
            }
            rendered = rendered[cut..].to_string();
        }
        rendered
    }

    pub fn turn_count(&mut self, session_key: &str) -> usize {
        self.load_session(session_key).turns.len()
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Operator => "operator",
        Role::Assistant => "tako",
    }
}

/// Best-effort masking of obvious secret shapes (`sk-...`, `Bearer ...`)
/// before a turn is persisted to disk. Not a substitute for
/// `tako_core::mask_secret` at the credential boundary — this is a
/// defense-in-depth pass over free text.
fn best_effort_mask(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_inclusive(' ') {
        let trimmed = word.trim_end();
        if trimmed.len() >= 16
            && (trimmed.starts_with("sk-") || trimmed.starts_with("Bearer ") || trimmed.starts_with("ghp_"))
        {
            out.push_str(&tako_core::mask_secret(trimmed));
            out.push_str(&word[trimmed.len()..]);
        } else {
            out.push_str(word);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_context_caps_by_user_turn_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConversationStore::new(dir.path());
        for i in 0..5 {
            store.append("s1", Role::Operator, &format!("turn {i}"));
            store.append("s1", Role::Assistant, &format!("reply {i}"));
        }
        let rendered = store.render_context("s1", 2);
        assert!(rendered.contains("turn 3"));
        assert!(rendered.contains("turn 4"));
        assert!(!rendered.contains("turn 0"));
    }

    #[test]
    fn render_context_caps_by_char_count_from_oldest_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConversationStore::new(dir.path()).with_limits(40, 30);
        store.append("s1", Role::Operator, "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        store.append("s1", Role::Assistant, "bbbbbbbbbbbbbbbbbbbb");
        let rendered = store.render_context("s1", 40);
        assert!(rendered.len() <= 30);
        assert!(rendered.ends_with('b'));
    }

    #[test]
    fn persistence_is_best_effort_and_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = ConversationStore::new(dir.path());
            store.append("s1", Role::Operator, "hello there");
        }
        let mut reloaded = ConversationStore::new(dir.path());
        assert_eq!(reloaded.turn_count("s1"), 1);
    }

    #[test]
    fn secrets_are_masked_before_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConversationStore::new(dir.path());
        store.append("s1", Role::Operator, "my key is sk-ant-REDACTED ok");
        let rendered = store.render_context("s1", 10);
        assert!(!rendered.contains("ABCDEFGHIJ"));
    }
}
