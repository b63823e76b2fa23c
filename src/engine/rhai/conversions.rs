//! Conversion of JSON query results into Rhai values.

use rhai::{Array, Dynamic, Map};
use serde_json::Value;

/// Converts a JSON value into a Rhai `Dynamic`.
///
/// Integers that fit in `i64` stay integers, every other number becomes a
/// float. `null` becomes `()`.
pub fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().map(Dynamic::from_float).unwrap_or(Dynamic::UNIT),
        },
        Value::String(s) => s.clone().into(),
        Value::Array(items) => {
            let array: Array = items.iter().map(json_to_dynamic).collect();
            array.into()
        }
        Value::Object(map) => json_object_to_map(map).into(),
    }
}

/// Converts a JSON object into a Rhai `Map`.
pub fn json_object_to_map(map: &serde_json::Map<String, Value>) -> Map {
    map.iter().map(|(k, v)| (k.as_str().into(), json_to_dynamic(v))).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_scalars() {
        assert!(json_to_dynamic(&json!(null)).is_unit());
        assert_eq!(json_to_dynamic(&json!(true)).as_bool().unwrap(), true);
        assert_eq!(json_to_dynamic(&json!(42)).as_int().unwrap(), 42);
        assert_eq!(json_to_dynamic(&json!(1.5)).as_float().unwrap(), 1.5);
        assert_eq!(json_to_dynamic(&json!(u64::MAX)).as_float().unwrap(), u64::MAX as f64);
        assert_eq!(json_to_dynamic(&json!("x")).into_string().unwrap(), "x");
    }

    #[test]
    fn test_nested_structures() {
        let value = json!({ "hits": { "total": { "value": 3 } }, "tags": ["a", 1] });
        let map = json_to_dynamic(&value).cast::<Map>();

        let hits = map["hits"].clone().cast::<Map>();
        let total = hits["total"].clone().cast::<Map>();
        assert_eq!(total["value"].as_int().unwrap(), 3);

        let tags = map["tags"].clone().cast::<Array>();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[1].as_int().unwrap(), 1);
    }
}
