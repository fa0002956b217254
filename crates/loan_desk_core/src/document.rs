//! crates/loan_desk_core/src/document.rs
//!
//! Write semantics shared by every document store adapter, plus the lenient
//! readers used for fields that other clients may have written loosely.

use serde_json::{Map, Value};

use crate::ports::{PortError, PortResult};

/// Unwraps a JSON object, rejecting any other kind of value.
pub fn into_object(value: Value) -> PortResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(PortError::Unexpected(format!(
            "Documents must be JSON objects, got {other}"
        ))),
    }
}

/// Merge write: top-level keys in `patch` replace those in `target`.
pub fn merge_fields(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        target.insert(key, value);
    }
}

/// Set-union append: each item is added to the list at `field` unless an equal
/// value is already present. A missing or non-list field becomes a new list.
pub fn union_into_list(target: &mut Map<String, Value>, field: &str, items: Vec<Value>) {
    let list = target
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if !list.is_array() {
        *list = Value::Array(Vec::new());
    }
    if let Value::Array(list) = list {
        for item in items {
            if !list.contains(&item) {
                list.push(item);
            }
        }
    }
}

/// Reads a money or count value stored as a number or as numeric text
/// (`"85,000"` included). Negative or non-numeric values read as absent.
pub fn as_amount(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            cleaned
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        }
        _ => None,
    }
}

/// A non-empty string field of a document.
pub fn field_str<'a>(document: &'a Value, key: &str) -> Option<&'a str> {
    document
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Serde `deserialize_with` helpers for loosely typed profile fields.
pub(crate) mod lenient {
    use super::*;
    use crate::domain::ExtraDocument;
    use serde::{Deserialize, Deserializer};
    use std::collections::BTreeMap;

    pub fn amount<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Ok(as_amount(&Value::deserialize(d)?))
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(Value::deserialize(d)?.as_bool().unwrap_or(false))
    }

    pub fn url_map<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<String, String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Object(map) => map
                .into_iter()
                .filter_map(|(key, value)| match value {
                    Value::String(url) if !url.trim().is_empty() => Some((key, url)),
                    _ => None,
                })
                .collect(),
            _ => BTreeMap::new(),
        })
    }

    pub fn extra_documents<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<ExtraDocument>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        into_object(value).unwrap()
    }

    #[test]
    fn merge_keeps_untouched_fields() {
        let mut doc = object(json!({"chatName": "Old", "messages": [1]}));
        merge_fields(&mut doc, object(json!({"chatName": "New"})));
        assert_eq!(Value::Object(doc), json!({"chatName": "New", "messages": [1]}));
    }

    #[test]
    fn union_skips_values_already_present() {
        let mut doc = object(json!({"messages": [{"id": 1}]}));
        union_into_list(&mut doc, "messages", vec![json!({"id": 1}), json!({"id": 2})]);
        assert_eq!(doc["messages"], json!([{"id": 1}, {"id": 2}]));
    }

    #[test]
    fn union_creates_missing_list() {
        let mut doc = object(json!({"messages": "corrupt"}));
        union_into_list(&mut doc, "messages", vec![json!("a")]);
        assert_eq!(doc["messages"], json!(["a"]));
        let mut empty = Map::new();
        union_into_list(&mut empty, "extraDocs", vec![]);
        assert_eq!(empty["extraDocs"], json!([]));
    }

    #[test]
    fn amounts_accept_numbers_and_text() {
        assert_eq!(as_amount(&json!(500000)), Some(500000));
        assert_eq!(as_amount(&json!(12.9)), Some(12));
        assert_eq!(as_amount(&json!("5,00,000")), Some(500000));
        assert_eq!(as_amount(&json!(-4)), None);
        assert_eq!(as_amount(&json!("N/A")), None);
        assert_eq!(as_amount(&Value::Null), None);
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(into_object(json!([1, 2])).is_err());
        assert!(into_object(Value::Null).unwrap().is_empty());
    }
}
