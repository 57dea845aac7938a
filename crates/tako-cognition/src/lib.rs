//! Type1/Type2 dual-speed reasoning and the open-loops computer.
//!
//! Type1 is a cheap synchronous triage pass over bus events; on escalation
//! it hands a `Type2Task` to Type2, a budgeted, optionally LLM-backed
//! reflection step that only ever produces a short advisory line.

pub mod open_loops;
pub mod type1;
pub mod type2;

pub use open_loops::{compute_open_loops, summarize_open_loops, OpenLoop, OpenLoopsSummary, RecentEventsSubscriber};
pub use type1::assess_event;
pub use type2::{run_type2_thinking, Type2Outcome, Type2PromptContext};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tako_core::Event;

/// How much Type2 attention an escalation deserves. Drives the thinking
/// sleep, the inference timeout, and the heuristic-table specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    Light,
    Medium,
    Deep,
}

impl Depth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Depth::Light => "light",
            Depth::Medium => "medium",
            Depth::Deep => "deep",
        }
    }

    /// Thinking-interval sleep, in seconds, to throttle CPU and keep the
    /// UI indicator visible.
    pub fn thinking_sleep_seconds(&self) -> f64 {
        match self {
            Depth::Light => 0.15,
            Depth::Medium => 0.4,
            Depth::Deep => 0.9,
        }
    }

    /// Inference call timeout, in seconds.
    pub fn inference_timeout_seconds(&self) -> f64 {
        match self {
            Depth::Light => 60.0,
            Depth::Medium => 85.0,
            Depth::Deep => 120.0,
        }
    }
}

/// One queued Type2 unit of work: the triggering event plus the depth and
/// reason Type1 assigned it.
#[derive(Debug, Clone)]
pub struct Type2Task {
    pub event: Event,
    pub depth: Depth,
    pub reason: String,
}

/// Boundary trait for the `ragrep` semantic-recall helper: a plain
/// string→string function over the workspace's opaque memory index.
/// Type2's prompt assembly calls through this trait only; the index
/// itself — and any default implementation over `MEMORY.md` — lives in
/// `tako-runtime`, which is free to depend back on this crate.
pub trait RagRecall: Send + Sync {
    fn recall(&self, query: &str) -> String;
}

impl<F: Fn(&str) -> String + Send + Sync> RagRecall for F {
    fn recall(&self, query: &str) -> String {
        self(query)
    }
}

pub(crate) fn metadata_of(kind: &str, extra: &[(&str, &str)]) -> BTreeMap<String, Value> {
    let mut map = BTreeMap::new();
    map.insert("event_type".to_string(), Value::String(kind.to_string()));
    for (key, value) in extra {
        map.insert((*key).to_string(), Value::String((*value).to_string()));
    }
    map
}
