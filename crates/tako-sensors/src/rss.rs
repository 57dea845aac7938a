use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tako_core::{Event, Severity};

use crate::{seen_set_path, SeenSet, Sensor};

const MAX_ITEMS_PER_FEED: usize = 5;
const SEEN_CAP: usize = 500;

/// World-watch sensor: polls a
/// fixed list of RSS/Atom feed URLs and emits one `world.watch.item` event
/// per new `<item>`/`<entry>`, deduped across restarts by link (falling
/// back to title when a feed omits `<link>`).
///
/// Parsing is a bounded regex extraction, not a full XML parser — this
/// sensor only ever needs `<title>`/`<link>` pairs, and the workspace
/// deliberately does not carry a dependency for full feed parsing (see
/// `DESIGN.md`'s dependency-drop notes on `scraper`).
pub struct RssSensor {
    feeds: Vec<String>,
    poll_minutes: u32,
    seen_path: PathBuf,
    seen: SeenSet,
    client: reqwest::Client,
}

impl RssSensor {
    pub fn new(feeds: Vec<String>, poll_minutes: u32, state_dir: &std::path::Path) -> Self {
        let seen_path = seen_set_path(state_dir, "rss");
        let seen = SeenSet::load(&seen_path);
        Self {
            feeds,
            poll_minutes,
            seen_path,
            seen,
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
        }
    }
}

fn item_re() -> Regex {
    Regex::new(r"(?is)<(item|entry)>(.*?)</(?:item|entry)>").expect("static regex")
}

fn title_re() -> Regex {
    Regex::new(r"(?is)<title[^>]*>(?:<!\[CDATA\[)?(.*?)(?:\]\]>)?</title>").expect("static regex")
}

fn link_re() -> Regex {
    Regex::new(r#"(?is)<link[^>]*(?:href="([^"]*)"[^>]*/?>|>(.*?)</link>)"#).expect("static regex")
}

fn extract_items(body: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for item in item_re().captures_iter(body) {
        let block = item.get(2).map(|m| m.as_str()).unwrap_or("");
        let title = title_re()
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| normalize(m.as_str()))
            .unwrap_or_default();
        let link = link_re()
            .captures(block)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| normalize(m.as_str()))
            .unwrap_or_default();
        if title.is_empty() && link.is_empty() {
            continue;
        }
        out.push((title, link));
        if out.len() >= MAX_ITEMS_PER_FEED {
            break;
        }
    }
    out
}

fn normalize(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Sensor for RssSensor {
    fn name(&self) -> &str {
        "rss"
    }

    fn poll_interval_minutes(&self) -> u32 {
        self.poll_minutes.max(5)
    }

    async fn poll(&mut self) -> anyhow::Result<Vec<Event>> {
        let mut events = Vec::new();

        for feed in &self.feeds {
            let body = match self.client.get(feed).send().await {
                Ok(resp) => match resp.text().await {
                    Ok(text) => text,
                    Err(err) => {
                        events.push(make_event(
                            "world.watch.feed_error",
                            Severity::Warn,
                            &format!("{feed}: body read failed: {err}"),
                        ));
                        continue;
                    }
                },
                Err(err) => {
                    events.push(make_event(
                        "world.watch.feed_error",
                        Severity::Warn,
                        &format!("{feed}: request failed: {err}"),
                    ));
                    continue;
                }
            };

            for (title, link) in extract_items(&body) {
                let key = if !link.is_empty() { link.clone() } else { title.clone() };
                if key.is_empty() || self.seen.contains(&key) {
                    continue;
                }
                self.seen.insert(key);

                let mut metadata = BTreeMap::new();
                metadata.insert("feed".to_string(), serde_json::Value::String(feed.clone()));
                if !link.is_empty() {
                    metadata.insert("link".to_string(), serde_json::Value::String(link.clone()));
                }
                events.push(Event {
                    id: 0,
                    ts: Utc::now(),
                    kind: "world.watch.item".to_string(),
                    severity: Severity::Info,
                    source: "sensor".to_string(),
                    message: if title.is_empty() { link } else { title },
                    metadata,
                });
            }
        }

        self.seen.cap(SEEN_CAP);
        let _ = self.seen.save(&self.seen_path);

        Ok(events)
    }
}

fn make_event(kind: &str, severity: Severity, message: &str) -> Event {
    Event {
        id: 0,
        ts: Utc::now(),
        kind: kind.to_string(),
        severity,
        source: "rss".to_string(),
        message: message.to_string(),
        metadata: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_title_and_link_from_rss_item() {
        let body = r#"
            <rss><channel>
            <item><title>Hello World</title><link>https://example.com/a</link></item>
            <item><title><![CDATA[CDATA Title]]></title><link>https://example.com/b</link></item>
            </channel></rss>
        "#;
        let items = extract_items(body);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], ("Hello World".to_string(), "https://example.com/a".to_string()));
        assert_eq!(items[1].0, "CDATA Title");
    }

    #[test]
    fn extracts_atom_entry_with_href_link() {
        let body = r#"<feed><entry><title>Atom Item</title><link href="https://example.com/c"/></entry></feed>"#;
        let items = extract_items(body);
        assert_eq!(items, vec![("Atom Item".to_string(), "https://example.com/c".to_string())]);
    }

    #[tokio::test]
    async fn seen_items_are_not_re_emitted_after_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut sensor = RssSensor::new(vec![], 30, dir.path());
        sensor.seen.insert("https://example.com/a".to_string());
        sensor.seen.save(&sensor.seen_path).unwrap();

        let reloaded = SeenSet::load(&sensor.seen_path);
        assert!(reloaded.contains("https://example.com/a"));
    }
}
