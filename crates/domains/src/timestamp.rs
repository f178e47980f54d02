//! # Timestamps
//!
//! One representation per field kind, checked once at ingestion:
//!
//! - document-level timestamps are RFC 3339 strings on the wire and
//!   `DateTime<Utc>` in memory;
//! - positional log timestamps are epoch milliseconds;
//! - module `lastModified` is either the sentinel marker or an RFC 3339 string.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder written into a module's `lastModified` field by every
/// content-mutating edit. The persistence layer swaps it for a server time.
pub const CHANGED_MARKER: &str = "__binders:date-changed__";

/// Value of a module's last-modified field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModifiedMarker {
    /// The channel changed; the concrete time is not resolved yet.
    Changed,
    At(DateTime<Utc>),
}

impl ModifiedMarker {
    pub fn is_changed(&self) -> bool {
        matches!(self, ModifiedMarker::Changed)
    }

    pub fn at(&self) -> Option<DateTime<Utc>> {
        match self {
            ModifiedMarker::Changed => None,
            ModifiedMarker::At(at) => Some(*at),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::String(String::from(self.clone()))
    }
}

impl TryFrom<String> for ModifiedMarker {
    type Error = TimestampError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        if raw == CHANGED_MARKER {
            return Ok(ModifiedMarker::Changed);
        }
        parse_rfc3339(&raw).map(ModifiedMarker::At)
    }
}

impl From<ModifiedMarker> for String {
    fn from(marker: ModifiedMarker) -> Self {
        match marker {
            ModifiedMarker::Changed => CHANGED_MARKER.to_string(),
            ModifiedMarker::At(at) => format_rfc3339(&at),
        }
    }
}

/// A timestamp field could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unparseable timestamp '{0}'")]
pub struct TimestampError(pub String);

/// Canonical textual form: RFC 3339, millisecond precision, `Z` suffix.
pub fn format_rfc3339(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| TimestampError(raw.to_string()))
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>, TimestampError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| TimestampError(ms.to_string()))
}

/// Accepts any legacy encoding of a point in time: an RFC 3339 string or
/// an epoch-milliseconds number.
pub fn parse_legacy(value: &Value) -> Result<DateTime<Utc>, TimestampError> {
    match value {
        Value::String(raw) => parse_rfc3339(raw),
        Value::Number(n) => match n.as_i64() {
            Some(ms) => from_millis(ms),
            // Fractional milliseconds show up in old exports.
            None => n
                .as_f64()
                .filter(|f| f.is_finite())
                .ok_or_else(|| TimestampError(n.to_string()))
                .and_then(|f| from_millis(f.trunc() as i64)),
        },
        other => Err(TimestampError(other.to_string())),
    }
}

/// Serde adapter for `Option<DateTime<Utc>>` in the canonical RFC 3339 form.
pub mod rfc3339_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match at {
            Some(at) => s.serialize_str(&super::format_rfc3339(at)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|raw| super::parse_rfc3339(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn marker_round_trips_both_forms() {
        let changed: ModifiedMarker = serde_json::from_value(json!(CHANGED_MARKER)).unwrap();
        assert!(changed.is_changed());
        assert_eq!(serde_json::to_value(&changed).unwrap(), json!(CHANGED_MARKER));

        let at: ModifiedMarker = serde_json::from_value(json!("2021-03-04T05:06:07.089Z")).unwrap();
        assert_eq!(at.at().unwrap().timestamp_millis(), 1_614_834_367_089);
        assert_eq!(serde_json::to_value(&at).unwrap(), json!("2021-03-04T05:06:07.089Z"));
    }

    #[test]
    fn malformed_marker_is_rejected() {
        assert!(serde_json::from_value::<ModifiedMarker>(json!("yesterday")).is_err());
    }

    #[test]
    fn legacy_values_accept_strings_and_millis() {
        let from_string = parse_legacy(&json!("2020-01-01T00:00:00+02:00")).unwrap();
        let from_number = parse_legacy(&json!(1_577_829_600_000_i64)).unwrap();
        assert_eq!(from_string, from_number);
        assert!(parse_legacy(&json!(true)).is_err());
        assert!(parse_legacy(&json!("not a date")).is_err());
    }
}
