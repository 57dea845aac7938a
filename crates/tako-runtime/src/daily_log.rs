use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};

/// Templated per-day markdown journal under
/// `<workspace>/memory/dailies/YYYY-MM-DD.md`. The heartbeat tick ensures
/// today's log exists before doing anything else; Type2 and the
/// identity-error dedup path append timestamped notes under fixed
/// sections.
const TEMPLATE: &str = "# Daily Log — {date}\n\n\
## Outcomes\n\n\
## Intent\n\n\
## Notes\n\n\
## Decisions\n\n\
## Promote\n\n";

pub fn daily_log_path(daily_root: &Path, date: DateTime<Utc>) -> PathBuf {
    daily_root.join(format!("{}.md", date.format("%Y-%m-%d")))
}

/// Create today's log from the template if it doesn't exist yet. Returns
/// `true` if a new file was created.
pub fn ensure_daily_log(daily_root: &Path, date: DateTime<Utc>) -> anyhow::Result<bool> {
    std::fs::create_dir_all(daily_root)?;
    let path = daily_log_path(daily_root, date);
    if path.exists() {
        return Ok(false);
    }
    let content = TEMPLATE.replace("{date}", &date.format("%Y-%m-%d").to_string());
    std::fs::write(&path, content)?;
    Ok(true)
}

/// Append one timestamped bullet to a section of today's log (creating the
/// log first if needed). Unknown section names fall back to `## Notes`.
pub fn append_daily_note(daily_root: &Path, date: DateTime<Utc>, section: &str, note: &str) -> anyhow::Result<()> {
    ensure_daily_log(daily_root, date)?;
    let path = daily_log_path(daily_root, date);
    let existing = std::fs::read_to_string(&path)?;

    let heading = format!("## {section}");
    let target_heading = if existing.contains(&heading) { heading } else { "## Notes".to_string() };

    let timestamp = Local::now().format("%H:%M");
    let line = format!("- [{timestamp}] {}\n", note.trim());

    let mut out = String::with_capacity(existing.len() + line.len());
    let mut inserted = false;
    let mut lines = existing.lines().peekable();
    while let Some(current) = lines.next() {
        out.push_str(current);
        out.push('\n');
        if !inserted && current.trim() == target_heading {
            // Insert right after the heading, before any existing body lines.
            out.push_str(&line);
            inserted = true;
        }
    }
    if !inserted {
        out.push_str(&format!("\n{target_heading}\n{line}"));
    }

    std::fs::write(&path, out)?;
    Ok(())
}

/// Whether `section`'s body (the lines between its heading and the next
/// `## ` heading, or EOF) has no non-blank content. A missing log file
/// counts as blank.
pub fn section_is_blank(daily_root: &Path, date: DateTime<Utc>, section: &str) -> bool {
    let path = daily_log_path(daily_root, date);
    let Ok(content) = std::fs::read_to_string(&path) else { return true };
    let heading = format!("## {section}");
    let mut in_section = false;
    for line in content.lines() {
        if in_section {
            if line.starts_with("## ") {
                break;
            }
            if !line.trim().is_empty() {
                return false;
            }
        } else if line.trim() == heading {
            in_section = true;
        }
    }
    true
}
