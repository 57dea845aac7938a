use std::path::Path;

/// The few fields Type2's prompt builder cares about out of a document's
/// YAML-ish frontmatter block (`---` delimited), reimplemented as a small
/// pull parser. Full YAML parsing is out of scope — this only ever needs
/// `tags:` and `summary:`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frontmatter {
    pub tags: Vec<String>,
    pub summary: String,
}

/// Parse a leading `---\n...\n---` block if present; `tags:` accepts either
/// `tags: a, b, c` or a `[a, b, c]` bracketed list, `summary:` is taken
/// verbatim (inline quotes stripped).
pub fn parse_frontmatter(text: &str) -> Frontmatter {
    let mut lines = text.lines();
    let Some(first) = lines.next() else { return Frontmatter::default() };
    if first.trim() != "---" {
        return Frontmatter::default();
    }

    let mut result = Frontmatter::default();
    for line in lines {
        let trimmed = line.trim();
        if trimmed == "---" {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("tags:") {
            result.tags = parse_tag_list(value.trim());
        } else if let Some(value) = trimmed.strip_prefix("summary:") {
            result.summary = strip_quotes(value.trim());
        }
    }
    result
}

fn parse_tag_list(value: &str) -> Vec<String> {
    let inner = value.trim_start_matches('[').trim_end_matches(']');
    inner
        .split(',')
        .map(|tag| strip_quotes(tag.trim()))
        .filter(|tag| !tag.is_empty())
        .collect()
}

fn strip_quotes(value: &str) -> String {
    value.trim_matches(|c| c == '"' || c == '\'').to_string()
}

/// Read a document, normalize it (collapse trailing whitespace per line,
/// trim overall), and truncate to `max_chars` from the end.
pub fn load_doc_excerpt(path: &Path, max_chars: usize) -> String {
    let Ok(text) = std::fs::read_to_string(path) else {
        return format!("{} is missing.", path.display());
    };
    truncate(&normalize_multiline(&text), max_chars)
}

fn normalize_multiline(text: &str) -> String {
    let joined = text.lines().map(|l| l.trim_end()).collect::<Vec<_>>().join("\n");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        "(empty)".to_string()
    } else {
        trimmed.to_string()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let limit = max_chars.max(200);
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit.saturating_sub(3)).collect();
    format!("{}...", truncated.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tags_and_summary_from_frontmatter_block() {
        let doc = "---\ntags: rust, agents\nsummary: \"bounded recall excerpt\"\n---\nbody text";
        let fm = parse_frontmatter(doc);
        assert_eq!(fm.tags, vec!["rust".to_string(), "agents".to_string()]);
        assert_eq!(fm.summary, "bounded recall excerpt");
    }

    #[test]
    fn missing_frontmatter_block_yields_default() {
        let fm = parse_frontmatter("just a plain document\nwith no frontmatter");
        assert_eq!(fm, Frontmatter::default());
    }

    #[test]
    fn load_doc_excerpt_reports_missing_file() {
        let excerpt = load_doc_excerpt(Path::new("/nonexistent/MEMORY.md"), 400);
        assert!(excerpt.ends_with("is missing."));
    }

    #[test]
    fn load_doc_excerpt_truncates_long_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MEMORY.md");
        std::fs::write(&path, "x".repeat(5000)).unwrap();
        let excerpt = load_doc_excerpt(&path, 300);
        assert!(excerpt.chars().count() <= 300);
        assert!(excerpt.ends_with("..."));
    }
}
