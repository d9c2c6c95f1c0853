//! Conversions between guest values and host JSON.

use crate::error::PluginHostError;
use rhai::{Array, Blob, Dynamic, FnPtr, ImmutableString, Map};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Key of the marker object that replaces a guest function found outside a
/// callback slot. The normalizer rejects it wherever a ref is expected.
pub const FUNCTION_MARKER: &str = "$fn";

/// Deepest container nesting converted to JSON. Deeper guest values are
/// rejected rather than walked.
pub const MAX_VALUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("guest value nests deeper than {limit} levels")]
pub struct ValueTooDeep {
    pub limit: usize,
}

/// Converts a guest value into JSON. Functions become marker objects, blobs
/// become `0x` hex text, opaque host types become null. Fails only on
/// values nested deeper than [`MAX_VALUE_DEPTH`].
pub fn dynamic_to_json(value: &Dynamic) -> Result<Value, ValueTooDeep> {
    to_json_at(value, 0)
}

fn to_json_at(value: &Dynamic, depth: usize) -> Result<Value, ValueTooDeep> {
    let value = value.flatten_clone();

    if value.is_unit() {
        return Ok(Value::Null);
    }
    if let Ok(v) = value.as_bool() {
        return Ok(Value::Bool(v));
    }
    if let Ok(v) = value.as_int() {
        return Ok(Value::from(v));
    }
    if let Ok(v) = value.as_float() {
        return Ok(serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null));
    }
    if let Ok(v) = value.as_char() {
        return Ok(Value::String(v.to_string()));
    }
    if let Some(s) = value.read_lock::<ImmutableString>() {
        return Ok(Value::String(s.to_string()));
    }
    if value.is_array() || value.is_map() {
        if depth >= MAX_VALUE_DEPTH {
            return Err(ValueTooDeep {
                limit: MAX_VALUE_DEPTH,
            });
        }
        if let Some(items) = value.read_lock::<Array>() {
            return items
                .iter()
                .map(|item| to_json_at(item, depth + 1))
                .collect::<Result<Vec<_>, ValueTooDeep>>()
                .map(Value::Array);
        }
        if let Some(map) = value.read_lock::<Map>() {
            return map
                .iter()
                .map(|(k, v)| Ok((k.to_string(), to_json_at(v, depth + 1)?)))
                .collect::<Result<serde_json::Map<_, _>, ValueTooDeep>>()
                .map(Value::Object);
        }
    }
    if let Some(blob) = value.read_lock::<Blob>() {
        return Ok(Value::String(format!("0x{}", hex::encode(&*blob))));
    }
    if let Some(f) = value.read_lock::<FnPtr>() {
        let mut marker = serde_json::Map::new();
        marker.insert(FUNCTION_MARKER.to_string(), Value::String(f.fn_name().to_string()));
        return Ok(Value::Object(marker));
    }
    Ok(Value::Null)
}

/// Hands a host value to the guest.
pub fn to_guest<T: Serialize>(value: &T) -> Result<Dynamic, PluginHostError> {
    rhai::serde::to_dynamic(value).map_err(|e| PluginHostError::Conversion(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_guest_values_convert() {
        let engine = rhai::Engine::new();
        let value: Dynamic = engine
            .eval(r#"#{ name: "hq", level: 3, ratio: 0.5, tags: ["a", 'b'], none: () }"#)
            .unwrap();
        assert_eq!(
            dynamic_to_json(&value).unwrap(),
            json!({"name": "hq", "level": 3, "ratio": 0.5, "tags": ["a", "b"], "none": null})
        );
    }

    #[test]
    fn functions_become_markers() {
        let engine = rhai::Engine::new();
        let value: Dynamic = engine.eval("#{ f: || 1 }").unwrap();
        let json = dynamic_to_json(&value).unwrap();
        assert!(json["f"][FUNCTION_MARKER].is_string());
    }

    #[test]
    fn blobs_become_hex() {
        let value = Dynamic::from_blob(vec![0xde, 0xad]);
        assert_eq!(dynamic_to_json(&value).unwrap(), json!("0xdead"));
    }

    fn nested_arrays(depth: usize) -> Dynamic {
        (0..depth).fold(Dynamic::from_array(Array::new()), |inner, _| {
            Dynamic::from_array(vec![inner])
        })
    }

    #[test]
    fn nesting_is_capped() {
        assert!(dynamic_to_json(&nested_arrays(MAX_VALUE_DEPTH - 1)).is_ok());
        assert_eq!(
            dynamic_to_json(&nested_arrays(MAX_VALUE_DEPTH + 1)),
            Err(ValueTooDeep {
                limit: MAX_VALUE_DEPTH
            })
        );
    }

    #[test]
    fn json_reaches_guest_as_map() {
        let engine = rhai::Engine::new();
        let guest = to_guest(&json!({"amount": 5, "who": "me"})).unwrap();
        let mut scope = rhai::Scope::new();
        scope.push("values", guest);
        let total: i64 = engine.eval_with_scope(&mut scope, "values.amount + 1").unwrap();
        assert_eq!(total, 6);
    }
}
