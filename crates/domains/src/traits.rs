//! # Core Traits (Ports)
//!
//! Collaborators the core consumes at its boundary. The core never reads
//! the system clock or a random source directly, so every edit is
//! reproducible under test.

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use uuid::Uuid;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

/// Source of "now" for log entries and resolved markers.
#[cfg_attr(any(test, feature = "testing"), automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Source of fresh identity uuids.
#[cfg_attr(any(test, feature = "testing"), automock)]
pub trait IdGenerator: Send + Sync {
    fn next_uuid(&self) -> Uuid;
}

/// The rich-text codec. Editor states and structured documents are opaque
/// to the core beyond "present or absent"; creating empty ones and merging
/// two adjacent ones is delegated here.
#[cfg_attr(any(test, feature = "testing"), automock)]
pub trait RichTextCodec: Send + Sync {
    fn empty_editor_state(&self) -> Value;
    fn empty_structured_doc(&self) -> String;
    fn merge_editor_states(&self, first: &Value, second: &Value) -> Value;
    fn merge_structured_docs(&self, first: &str, second: &str) -> String;
}

/// Wall clock, truncated to the millisecond precision timestamps are stored in.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Codec used when no editor integration is wired in.
///
/// Editor states are plain strings and merge by concatenation. Structured
/// documents are JSON objects with a `content` array; merging appends the
/// second document's content to the first. Anything else is concatenated.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextCodec;

pub const EMPTY_STRUCTURED_DOC: &str = r#"{"type":"doc","content":[]}"#;

impl RichTextCodec for PlainTextCodec {
    fn empty_editor_state(&self) -> Value {
        Value::String(String::new())
    }

    fn empty_structured_doc(&self) -> String {
        EMPTY_STRUCTURED_DOC.to_string()
    }

    fn merge_editor_states(&self, first: &Value, second: &Value) -> Value {
        match (first, second) {
            (Value::String(a), Value::String(b)) => Value::String(format!("{a}{b}")),
            (Value::Null, other) => other.clone(),
            (kept, _) => kept.clone(),
        }
    }

    fn merge_structured_docs(&self, first: &str, second: &str) -> String {
        if first.is_empty() {
            return second.to_string();
        }
        if second.is_empty() {
            return first.to_string();
        }
        let parsed = (
            serde_json::from_str::<Value>(first),
            serde_json::from_str::<Value>(second),
        );
        if let (Ok(mut a), Ok(b)) = parsed {
            if let (Some(into), Some(from)) = (
                a.get_mut("content").and_then(Value::as_array_mut),
                b.get("content").and_then(Value::as_array),
            ) {
                into.extend(from.iter().cloned());
                return a.to_string();
            }
        }
        format!("{first}{second}")
    }
}
