//! Typed response envelope decoding.
//!
//! The backend does not commit to one response envelope. List endpoints may
//! answer with a bare array, with `{ "data": [...] }`, or (for ground truth)
//! with `{ "data": { "ground_truths": [...] } }`. Anything else is an empty
//! list. Single-record endpoints may answer with the record itself or with
//! `{ "data": { ... } }`.
//!
//! All shape sniffing happens here, once, so callers only ever see typed
//! records:
//!
//! ```rust
//! use gt_console_core::envelope::{decode_list, ListEnvelope};
//! use serde_json::json;
//!
//! let body = json!({ "data": "not-an-array" });
//! assert!(matches!(ListEnvelope::detect(&body, None), ListEnvelope::Unrecognized));
//! let decoded = decode_list::<serde_json::Value>(&body, None);
//! assert!(decoded.items.is_empty());
//! ```

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Which of the known list shapes a response body matched.
#[derive(Debug, PartialEq)]
pub enum ListEnvelope<'a> {
    /// `[...]`
    Bare(&'a [Value]),
    /// `{ "data": [...] }`
    Data(&'a [Value]),
    /// `{ "data": { "<key>": [...] } }`
    Nested(&'a [Value]),
    /// Anything else. Treated as empty.
    Unrecognized,
}

impl<'a> ListEnvelope<'a> {
    /// Try the known shapes in order. `nested_key` enables the
    /// `data.<key>` shape used by ground-truth endpoints.
    pub fn detect(body: &'a Value, nested_key: Option<&str>) -> Self {
        if let Some(items) = body.as_array() {
            return ListEnvelope::Bare(items);
        }
        let data = match body.get("data") {
            Some(data) => data,
            None => return ListEnvelope::Unrecognized,
        };
        if let Some(items) = data.as_array() {
            return ListEnvelope::Data(items);
        }
        if let Some(key) = nested_key {
            if let Some(items) = data.get(key).and_then(Value::as_array) {
                return ListEnvelope::Nested(items);
            }
        }
        ListEnvelope::Unrecognized
    }

    pub fn items(&self) -> &'a [Value] {
        match self {
            ListEnvelope::Bare(items) | ListEnvelope::Data(items) | ListEnvelope::Nested(items) => {
                *items
            }
            ListEnvelope::Unrecognized => &[],
        }
    }
}

/// A decoded list plus the elements that did not fit the record type.
#[derive(Debug)]
pub struct DecodedList<T> {
    pub items: Vec<T>,
    /// One message per element that failed to decode, with its position.
    pub rejected: Vec<String>,
    /// `false` when the body matched none of the known shapes.
    pub recognized: bool,
}

/// Extract and decode a list response. Never fails: unknown envelopes
/// decode as empty, undecodable elements are reported in `rejected`.
pub fn decode_list<T: DeserializeOwned>(body: &Value, nested_key: Option<&str>) -> DecodedList<T> {
    let envelope = ListEnvelope::detect(body, nested_key);
    let recognized = !matches!(envelope, ListEnvelope::Unrecognized);
    let mut items = Vec::new();
    let mut rejected = Vec::new();

    for (i, raw) in envelope.items().iter().enumerate() {
        match serde_json::from_value::<T>(raw.clone()) {
            Ok(item) => items.push(item),
            Err(e) => rejected.push(format!("element {}: {}", i, e)),
        }
    }

    DecodedList {
        items,
        rejected,
        recognized,
    }
}

/// Unwrap a single-record response: `{ "data": { ... } }` yields the inner
/// object, anything else is returned as-is.
pub fn record_body(body: &Value) -> &Value {
    match body.get("data") {
        Some(inner) if inner.is_object() => inner,
        _ => body,
    }
}

/// Pull a human-readable error message out of a failed response body.
///
/// Looks at `data.message`, `message`, `error.message`, then `error`, and
/// finally a plain-string body.
pub fn error_message(body: &Value) -> Option<String> {
    let candidates = [
        body.pointer("/data/message"),
        body.get("message"),
        body.pointer("/error/message"),
        body.get("error"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .chain(body.as_str())
        .map(str::trim)
        .find(|m| !m.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Row {
        id: String,
    }

    #[test]
    fn test_bare_array() {
        let body = json!([{"id": "a"}, {"id": "b"}]);
        let decoded = decode_list::<Row>(&body, None);
        assert!(decoded.recognized);
        assert_eq!(decoded.items.len(), 2);
        assert_eq!(decoded.items[1].id, "b");
    }

    #[test]
    fn test_data_wrapped_array() {
        let body = json!({"data": [{"id": "a"}], "success": true});
        assert!(matches!(
            ListEnvelope::detect(&body, None),
            ListEnvelope::Data(_)
        ));
        assert_eq!(decode_list::<Row>(&body, None).items, vec![Row { id: "a".into() }]);
    }

    #[test]
    fn test_data_not_an_array_is_empty() {
        let body = json!({"data": "not-an-array"});
        let decoded = decode_list::<Row>(&body, None);
        assert!(!decoded.recognized);
        assert!(decoded.items.is_empty());
        assert!(decoded.rejected.is_empty());
    }

    #[test]
    fn test_nested_ground_truth_shape_needs_key() {
        let body = json!({"data": {"ground_truths": [{"id": "g1"}]}});
        assert!(decode_list::<Row>(&body, None).items.is_empty());
        let decoded = decode_list::<Row>(&body, Some("ground_truths"));
        assert_eq!(decoded.items.len(), 1);
    }

    #[test]
    fn test_bad_elements_are_rejected_not_fatal() {
        let body = json!([{"id": "a"}, {"nope": true}, {"id": "c"}]);
        let decoded = decode_list::<Row>(&body, None);
        assert_eq!(decoded.items.len(), 2);
        assert_eq!(decoded.rejected.len(), 1);
        assert!(decoded.rejected[0].starts_with("element 1"));
    }

    #[test]
    fn test_null_and_scalar_bodies_are_empty() {
        assert!(decode_list::<Row>(&Value::Null, None).items.is_empty());
        assert!(decode_list::<Row>(&json!(17), None).items.is_empty());
    }

    #[test]
    fn test_record_body_unwraps_data_object() {
        let wrapped = json!({"data": {"id": "x"}});
        assert_eq!(record_body(&wrapped), &json!({"id": "x"}));
        let bare = json!({"id": "y", "data": [1, 2]});
        assert_eq!(record_body(&bare), &bare);
    }

    #[test]
    fn test_error_message_prefers_structured_data_message() {
        let body = json!({"message": "outer", "data": {"message": "Row already exists"}});
        assert_eq!(error_message(&body).as_deref(), Some("Row already exists"));
        assert_eq!(
            error_message(&json!({"error": {"message": "bad class"}})).as_deref(),
            Some("bad class")
        );
        assert_eq!(error_message(&json!("plain text")).as_deref(), Some("plain text"));
        assert_eq!(error_message(&json!({"data": {"message": "  "}})), None);
    }
}
