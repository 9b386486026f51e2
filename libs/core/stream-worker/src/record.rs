//! Canonical in-process record and the field-map normalizer.
//!
//! Producers write loose string->string field maps to the stream; this
//! module converts them into the fixed-shape `NoteRecord` the handler and
//! the business hook operate on. Normalization is total: any input map,
//! including an empty one or one carrying broken JSON, yields a record.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Event type assumed when neither the field map nor the payload carry one.
pub const DEFAULT_EVENT: &str = "notes.created";

/// A normalized stream record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    /// Logical event type, never empty
    pub event: String,
    /// Producer-supplied idempotency key
    pub note_id: Option<String>,
    /// Correlation id carried through retries
    pub trace_id: Option<String>,
    /// Number of failed attempts so far; 0 on first delivery
    pub retry_count: u32,
    /// Opaque JSON payload, preserved verbatim across retries
    pub payload: String,
}

/// Normalize a raw field map into a `NoteRecord`.
///
/// Tolerates the legacy `event` + `data` schema: when `payload` is absent
/// the `data` blob is used, and `note_id` / `trace_id` / `event` fall back
/// to the decoded blob (`note_id` also falls back to the blob's `id`).
/// Numeric ids are stringified. Blank fields count as absent.
pub fn normalize(fields: &HashMap<String, String>) -> NoteRecord {
    let retry_count = fields
        .get("retry_count")
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .unwrap_or(0);

    let raw_payload = non_empty(fields.get("payload")).or_else(|| non_empty(fields.get("data")));

    // Fallback lookups only work against a JSON object; anything else
    // (broken JSON, arrays, scalars) decodes to an empty map.
    let decoded: serde_json::Map<String, Value> = raw_payload
        .and_then(|blob| serde_json::from_str::<Value>(blob).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    let note_id = non_empty(fields.get("note_id"))
        .map(str::to_owned)
        .or_else(|| stringified(decoded.get("note_id")))
        .or_else(|| stringified(decoded.get("id")));

    let trace_id = non_empty(fields.get("trace_id"))
        .map(str::to_owned)
        .or_else(|| stringified(decoded.get("trace_id")));

    let event = non_empty(fields.get("event"))
        .map(str::to_owned)
        .or_else(|| stringified(decoded.get("event")))
        .unwrap_or_else(|| DEFAULT_EVENT.to_string());

    let payload = raw_payload.map(str::to_owned).unwrap_or_else(|| "{}".to_string());

    NoteRecord {
        event,
        note_id,
        trace_id,
        retry_count,
        payload,
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

fn stringified(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_new_schema() {
        let record = normalize(&fields(&[
            ("event", "notes.created"),
            ("note_id", "n1"),
            ("trace_id", "t1"),
            ("retry_count", "2"),
            ("payload", r#"{"title":"hi"}"#),
        ]));

        assert_eq!(record.event, "notes.created");
        assert_eq!(record.note_id.as_deref(), Some("n1"));
        assert_eq!(record.trace_id.as_deref(), Some("t1"));
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.payload, r#"{"title":"hi"}"#);
    }

    #[test]
    fn test_legacy_schema_falls_back_to_data_blob() {
        let record = normalize(&fields(&[
            ("event", "notes.created"),
            ("data", r#"{"id":"n1","title":"t"}"#),
        ]));

        assert_eq!(record.note_id.as_deref(), Some("n1"));
        assert_eq!(record.event, "notes.created");
        assert_eq!(record.payload, r#"{"id":"n1","title":"t"}"#);
        assert_eq!(record.retry_count, 0);
    }

    #[test]
    fn test_note_id_prefers_field_over_payload() {
        let record = normalize(&fields(&[
            ("note_id", "outer"),
            ("payload", r#"{"note_id":"inner","id":"fallback"}"#),
        ]));

        assert_eq!(record.note_id.as_deref(), Some("outer"));
    }

    #[test]
    fn test_numeric_note_id_is_stringified() {
        let record = normalize(&fields(&[("data", r#"{"note_id":42}"#)]));
        assert_eq!(record.note_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_empty_map() {
        let record = normalize(&HashMap::new());

        assert_eq!(record.event, DEFAULT_EVENT);
        assert_eq!(record.note_id, None);
        assert_eq!(record.trace_id, None);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.payload, "{}");
    }

    #[test]
    fn test_broken_json_payload_is_kept_verbatim() {
        let record = normalize(&fields(&[("note_id", "n9"), ("payload", "{not json")]));

        assert_eq!(record.note_id.as_deref(), Some("n9"));
        assert_eq!(record.payload, "{not json");
        assert_eq!(record.event, DEFAULT_EVENT);
    }

    #[test]
    fn test_non_object_json_payload_has_no_fallbacks() {
        let record = normalize(&fields(&[("payload", r#"[1,2,3]"#)]));

        assert_eq!(record.note_id, None);
        assert_eq!(record.payload, "[1,2,3]");
    }

    #[test]
    fn test_retry_count_garbage_defaults_to_zero() {
        for raw in ["", "  ", "abc", "-1", "1.5"] {
            let record = normalize(&fields(&[("retry_count", raw)]));
            assert_eq!(record.retry_count, 0, "retry_count {raw:?}");
        }
    }

    #[test]
    fn test_blank_fields_count_as_absent() {
        let record = normalize(&fields(&[
            ("event", ""),
            ("note_id", ""),
            ("payload", r#"{"event":"notes.updated","note_id":"p1"}"#),
        ]));

        assert_eq!(record.event, "notes.updated");
        assert_eq!(record.note_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let record = normalize(&fields(&[
            ("note_id", "n1"),
            ("shard", "7"),
            ("producer", "api-3"),
        ]));

        assert_eq!(record.note_id.as_deref(), Some("n1"));
        assert_eq!(record.event, DEFAULT_EVENT);
    }
}
