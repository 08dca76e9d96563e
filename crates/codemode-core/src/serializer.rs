//! Detaching program results from their runtime.
//!
//! A value leaves the isolate only as JSON text: the in-context runner
//! stringifies the program's return value, and the host decodes it here. Values
//! that cannot be stringified (cycles, BigInt, functions) arrive as their
//! string rendering instead. [`serialize`] is the host-side counterpart for
//! Rust values.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::METRICS;
use crate::obs;

const EMPTY_FALLBACK: &str = "[unserializable value]";

/// A detached program result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SerializedValue {
    /// The program returned nothing.
    Undefined,
    /// A deep copy of a JSON-representable value.
    Json(Value),
    /// Textual rendering of a value that did not survive the JSON round trip.
    Text(String),
}

impl SerializedValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            SerializedValue::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, SerializedValue::Undefined)
    }

    /// Size of the value's serialized form, used for output limits.
    pub fn encoded_len(&self) -> usize {
        match self {
            SerializedValue::Undefined => 0,
            SerializedValue::Json(value) => value.to_string().len(),
            SerializedValue::Text(text) => text.len(),
        }
    }
}

/// Deep-copy `value` through JSON, falling back to its `Debug` rendering.
///
/// Never fails. Fallbacks are counted and logged.
pub fn serialize<T: Serialize + Debug + ?Sized>(value: &T) -> SerializedValue {
    let round_trip =
        serde_json::to_string(value).and_then(|text| serde_json::from_str::<Value>(&text));
    match round_trip {
        Ok(json) => SerializedValue::Json(json),
        Err(err) => fallback(format!("{value:?}"), &err),
    }
}

/// Wire format posted by the in-context runner.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WireValue {
    Undefined,
    Json {
        json: String,
    },
    Text {
        text: String,
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Decode the runner's settlement payload.
pub(crate) fn decode_settlement(raw: &str) -> Result<SerializedValue, serde_json::Error> {
    let value = match serde_json::from_str::<WireValue>(raw)? {
        WireValue::Undefined => SerializedValue::Undefined,
        WireValue::Json { json } => SerializedValue::Json(serde_json::from_str(&json)?),
        WireValue::Text { text, reason } => {
            let reason = reason.unwrap_or_else(|| "value is not JSON-representable".to_string());
            fallback(text, &reason)
        }
    };
    Ok(value)
}

fn fallback(text: String, reason: &dyn std::fmt::Display) -> SerializedValue {
    METRICS.inc_serialization_fallbacks();
    obs::emit_serialization_fallback(reason);
    if text.is_empty() {
        SerializedValue::Text(EMPTY_FALLBACK.to_string())
    } else {
        SerializedValue::Text(text)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_serialize_json_value_is_deep_equal() {
        let value = serde_json::json!({
            "summary": "ok",
            "data": [1, 2.5, null, { "nested": ["x", true] }]
        });
        assert_eq!(serialize(&value), SerializedValue::Json(value.clone()));
    }

    #[test]
    fn test_serialize_rust_struct() {
        #[derive(Debug, Serialize)]
        struct Row {
            id: u32,
            name: &'static str,
        }
        let out = serialize(&vec![Row { id: 1, name: "a" }]);
        assert_eq!(
            out.as_json().unwrap(),
            &serde_json::json!([{ "id": 1, "name": "a" }])
        );
    }

    #[test]
    fn test_serialize_falls_back_to_debug_text() {
        // JSON object keys must be strings.
        let mut map = HashMap::new();
        map.insert((1u8, 2u8), "pair");
        match serialize(&map) {
            SerializedValue::Text(text) => {
                assert!(!text.is_empty());
                assert!(text.contains("pair"));
            }
            other => panic!("expected text fallback, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_settlement_variants() {
        assert_eq!(
            decode_settlement(r#"{"kind":"undefined"}"#).unwrap(),
            SerializedValue::Undefined
        );
        assert_eq!(
            decode_settlement(r#"{"kind":"json","json":"{\"a\":[1,2]}"}"#).unwrap(),
            SerializedValue::Json(serde_json::json!({ "a": [1, 2] }))
        );
        assert_eq!(
            decode_settlement(r#"{"kind":"text","text":"[object Object]"}"#).unwrap(),
            SerializedValue::Text("[object Object]".into())
        );
    }

    #[test]
    fn test_empty_text_is_never_returned() {
        assert_eq!(
            decode_settlement(r#"{"kind":"text","text":"","reason":"cycle"}"#).unwrap(),
            SerializedValue::Text(EMPTY_FALLBACK.into())
        );
    }

    #[test]
    fn test_decode_settlement_rejects_garbage() {
        assert!(decode_settlement("not json").is_err());
        assert!(decode_settlement(r#"{"kind":"json","json":"{"}"#).is_err());
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(SerializedValue::Undefined.encoded_len(), 0);
        assert_eq!(
            SerializedValue::Json(serde_json::json!([1, 2])).encoded_len(),
            "[1,2]".len()
        );
    }
}
