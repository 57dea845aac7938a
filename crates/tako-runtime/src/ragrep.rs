use std::path::{Path, PathBuf};

use tako_cognition::RagRecall;

use crate::frontmatter::load_doc_excerpt;

const MAX_RECALL_CHARS: usize = 1200;
const CONTEXT_LINES: usize = 2;

/// Default `RagRecall` implementation: a bounded keyword scan over
/// `MEMORY.md`, not an embedding index. A richer retrieval pipeline over
/// the full memory store is out of scope; this narrows to the one
/// document Type2's prompt assembly actually reads.
pub struct MemoryFileRecall {
    memory_path: PathBuf,
}

impl MemoryFileRecall {
    pub fn new(workspace_root: &Path) -> Self {
        Self { memory_path: workspace_root.join("MEMORY.md") }
    }
}

impl RagRecall for MemoryFileRecall {
    fn recall(&self, query: &str) -> String {
        scan_memory_excerpt(&self.memory_path, query)
    }
}

fn scan_memory_excerpt(memory_path: &Path, query: &str) -> String {
    let Ok(text) = std::fs::read_to_string(memory_path) else {
        return String::new();
    };

    let keywords: Vec<String> = query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() >= 4)
        .collect();
    if keywords.is_empty() {
        return String::new();
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut hit_lines = std::collections::BTreeSet::new();
    for (idx, line) in lines.iter().enumerate() {
        let lowered = line.to_lowercase();
        if keywords.iter().any(|k| lowered.contains(k.as_str())) {
            let start = idx.saturating_sub(CONTEXT_LINES);
            let end = (idx + CONTEXT_LINES).min(lines.len().saturating_sub(1));
            for i in start..=end {
                hit_lines.insert(i);
            }
        }
    }

    if hit_lines.is_empty() {
        return String::new();
    }

    let mut excerpt = String::new();
    let mut prev: Option<usize> = None;
    for idx in hit_lines {
        if let Some(p) = prev {
            if idx > p + 1 {
                excerpt.push_str("...\n");
            }
        }
        excerpt.push_str(lines[idx]);
        excerpt.push('\n');
        prev = Some(idx);
    }

    if excerpt.chars().count() > MAX_RECALL_CHARS {
        excerpt = excerpt.chars().take(MAX_RECALL_CHARS.saturating_sub(3)).collect::<String>() + "...";
    }
    excerpt
}

/// The plain excerpt-reader form (no query matching), used when Type2
/// just wants the head of `MEMORY.md` regardless of the triggering event
/// text — the frontmatter-aware counterpart to `MemoryFileRecall`.
pub fn memory_excerpt(workspace_root: &Path, max_chars: usize) -> String {
    load_doc_excerpt(&workspace_root.join("MEMORY.md"), max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recall_returns_empty_without_keyword_overlap() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("MEMORY.md"), "Nothing relevant here.\n").unwrap();
        let recall = MemoryFileRecall::new(dir.path());
        assert_eq!(recall.recall("xenomorphic"), "");
    }

    #[test]
    fn recall_surfaces_matching_lines_with_context() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("MEMORY.md"),
            "line one\nline two about rust borrow checker\nline three\nunrelated line\n",
        )
        .unwrap();
        let recall = MemoryFileRecall::new(dir.path());
        let excerpt = recall.recall("tell me about the borrow checker");
        assert!(excerpt.contains("borrow checker"));
        assert!(excerpt.contains("line one") || excerpt.contains("line three"));
    }

    #[test]
    fn recall_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let recall = MemoryFileRecall::new(dir.path());
        assert_eq!(recall.recall("anything"), "");
    }
}
