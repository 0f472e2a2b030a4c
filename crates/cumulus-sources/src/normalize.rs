//! JSON extraction helpers shared by the normalizers.
//!
//! Every helper is total: missing keys, `null`, empty strings and values of
//! the wrong type all come back as `Field::Unknown` (or an empty list), so a
//! malformed payload still produces a record.

use cumulus_core::Field;
use cumulus_core::hash::payload_id;
use serde_json::Value;

/// Text at a JSON pointer (`"/people/0/name"`).
pub fn text(raw: &Value, pointer: &str) -> Field<String> {
    text_of(raw.pointer(pointer))
}

/// Text of a single value; arrays yield their first usable element.
pub fn text_of(value: Option<&Value>) -> Field<String> {
    match value {
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Field::Unknown
            } else {
                Field::Known(s.to_string())
            }
        }
        Some(Value::Number(n)) => Field::Known(n.to_string()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| text_of(Some(item)))
            .find(|f| !f.is_unknown())
            .unwrap_or_default(),
        _ => Field::Unknown,
    }
}

/// First known text among several pointers.
pub fn first_text(raw: &Value, pointers: &[&str]) -> Field<String> {
    pointers
        .iter()
        .map(|p| text(raw, p))
        .find(|f| !f.is_unknown())
        .unwrap_or_default()
}

/// Every usable string at `pointer` (a string or an array of scalars).
pub fn texts(raw: &Value, pointer: &str) -> Vec<String> {
    match raw.pointer(pointer) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| text_of(Some(item)).as_known().cloned())
            .collect(),
        other => text_of(other).as_known().cloned().into_iter().collect(),
    }
}

/// `key` of every object in the array at `pointer` (`tags[].term`).
pub fn texts_by_key(raw: &Value, pointer: &str, key: &str) -> Vec<String> {
    raw.pointer(pointer)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| text_of(item.get(key)).as_known().cloned())
                .collect()
        })
        .unwrap_or_default()
}

/// Absolute http(s) URL at `pointer`.
pub fn url(raw: &Value, pointer: &str) -> Option<String> {
    url_of(raw.pointer(pointer))
}

pub fn url_of(value: Option<&Value>) -> Option<String> {
    text_of(value)
        .as_known()
        .filter(|s| s.starts_with("http://") || s.starts_with("https://"))
        .cloned()
}

/// Object id at `pointer`, or a content hash of the payload when absent.
pub fn object_id(raw: &Value, pointer: &str) -> String {
    match text(raw, pointer) {
        Field::Known(id) => id,
        Field::Unknown => payload_id(raw),
    }
}

/// Integer at `pointer`, accepting numeric strings.
pub fn number(raw: &Value, pointer: &str) -> Option<u64> {
    match raw.pointer(pointer)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_handles_wrong_types() {
        let raw = json!({
            "title": "  Clouds over Haarlem ",
            "empty": "",
            "null": null,
            "year": 1650,
            "flag": true,
            "list": ["", "first", "second"],
            "nested": {"a": 1}
        });
        assert_eq!(text(&raw, "/title"), Field::Known("Clouds over Haarlem".into()));
        assert_eq!(text(&raw, "/empty"), Field::Unknown);
        assert_eq!(text(&raw, "/null"), Field::Unknown);
        assert_eq!(text(&raw, "/missing"), Field::Unknown);
        assert_eq!(text(&raw, "/year"), Field::Known("1650".into()));
        assert_eq!(text(&raw, "/flag"), Field::Unknown);
        assert_eq!(text(&raw, "/list"), Field::Known("first".into()));
        assert_eq!(text(&raw, "/nested"), Field::Unknown);
    }

    #[test]
    fn first_text_falls_through() {
        let raw = json!({"a": "", "b": "Sky"});
        assert_eq!(first_text(&raw, &["/a", "/b"]), Field::Known("Sky".into()));
        assert_eq!(first_text(&raw, &["/x", "/y"]), Field::Unknown);
    }

    #[test]
    fn lists_skip_unusable_entries() {
        let raw = json!({
            "subjects": ["Clouds", null, " ", "Weather"],
            "single": "Fog",
            "tags": [{"term": "Landscapes"}, {"term": ""}, {"other": 1}, {"term": "Sky"}]
        });
        assert_eq!(texts(&raw, "/subjects"), vec!["Clouds", "Weather"]);
        assert_eq!(texts(&raw, "/single"), vec!["Fog"]);
        assert!(texts(&raw, "/missing").is_empty());
        assert_eq!(texts_by_key(&raw, "/tags", "term"), vec!["Landscapes", "Sky"]);
    }

    #[test]
    fn url_requires_scheme() {
        let raw = json!({"a": "https://images.example/1.jpg", "b": "/relative.jpg", "c": ""});
        assert_eq!(url(&raw, "/a").as_deref(), Some("https://images.example/1.jpg"));
        assert_eq!(url(&raw, "/b"), None);
        assert_eq!(url(&raw, "/c"), None);
    }

    #[test]
    fn object_id_synthesized_when_missing() {
        let with_id = json!({"id": 123});
        assert_eq!(object_id(&with_id, "/id"), "123");

        let without = json!({"title": "Cumulus"});
        let id = object_id(&without, "/id");
        assert!(id.starts_with("h-"));
        assert_eq!(id, object_id(&without.clone(), "/id"));
    }

    #[test]
    fn number_accepts_strings() {
        let raw = json!({"a": 5, "b": "7", "c": "x"});
        assert_eq!(number(&raw, "/a"), Some(5));
        assert_eq!(number(&raw, "/b"), Some(7));
        assert_eq!(number(&raw, "/c"), None);
    }
}
