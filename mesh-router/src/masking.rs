//! Field-level response masking.
//!
//! Grounded on `enforcement_service.py`'s `_apply_masking`/`_mask_dict`:
//! any map key named in `masking_rules` is replaced with the literal
//! `"[REDACTED]"`; lists are walked element-wise; primitives pass
//! through unchanged. Masking never removes keys or shortens lists.

use serde_json::{Map, Value};

/// Applies field-level masking to `data`, recursing into nested maps
/// and lists.
#[must_use]
pub fn apply_masking(data: &Value, masking_rules: &[String]) -> Value {
    if masking_rules.is_empty() {
        return data.clone();
    }

    match data {
        Value::Object(map) => Value::Object(mask_map(map, masking_rules)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| apply_masking(item, masking_rules)).collect())
        }
        other => other.clone(),
    }
}

fn mask_map(map: &Map<String, Value>, masking_rules: &[String]) -> Map<String, Value> {
    let mut masked = Map::with_capacity(map.len());
    for (key, value) in map {
        if masking_rules.iter().any(|rule| rule == key) {
            masked.insert(key.clone(), Value::String("[REDACTED]".to_owned()));
        } else {
            masked.insert(key.clone(), apply_masking(value, masking_rules));
        }
    }
    masked
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_rules_returns_data_unchanged() {
        let data = json!({"ssn": "123-45-6789"});
        assert_eq!(apply_masking(&data, &[]), data);
    }

    #[test]
    fn masks_top_level_field() {
        let data = json!({"name": "Alice", "ssn": "123-45-6789"});
        let masked = apply_masking(&data, &["ssn".to_owned()]);
        assert_eq!(masked["ssn"], "[REDACTED]");
        assert_eq!(masked["name"], "Alice");
    }

    #[test]
    fn masks_nested_and_list_fields_without_shortening() {
        let data = json!({
            "rows": [
                {"name": "Alice", "ssn": "1"},
                {"name": "Bob", "ssn": "2"},
            ]
        });
        let masked = apply_masking(&data, &["ssn".to_owned()]);
        let rows = masked["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["ssn"], "[REDACTED]");
        assert_eq!(rows[1]["ssn"], "[REDACTED]");
        assert_eq!(rows[0]["name"], "Alice");
    }

    #[test]
    fn primitives_pass_through() {
        assert_eq!(apply_masking(&json!(42), &["ssn".to_owned()]), json!(42));
        assert_eq!(apply_masking(&json!(null), &["ssn".to_owned()]), json!(null));
    }
}
