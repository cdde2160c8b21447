//! JSON <-> JavaScript value conversions
//!
//! Request snapshots, `state` values and handler results cross the lane
//! boundary as `serde_json::Value`; these functions move them in and out of
//! Boa.
//!
//! | JSON Type | JavaScript Type |
//! |-----------|-----------------|
//! | null | null |
//! | boolean | Boolean |
//! | number | Number |
//! | string | String |
//! | array | Array |
//! | object | Object |
//!
//! Going from JavaScript to JSON follows `JSON.stringify` where it matters:
//! functions and `undefined` properties are dropped, functions and `undefined`
//! inside arrays become `null`, and non-finite numbers become `null`.

use boa_engine::{
    js_string,
    object::{builtins::JsArray, JsObject},
    property::PropertyKey,
    value::JsValue,
    Context,
};
use serde_json::Value as JsonValue;

use scriptgate_common::protocol::{Result, ScriptgateError};

/// Deeper structures are almost certainly cyclic.
const MAX_DEPTH: usize = 128;

/// Converts a JSON value into a fresh JavaScript value.
pub fn json_to_js_value(json: JsonValue, ctx: &mut Context) -> Result<JsValue> {
    match json {
        JsonValue::Null => Ok(JsValue::null()),
        JsonValue::Bool(b) => Ok(JsValue::new(b)),
        JsonValue::Number(n) => n
            .as_f64()
            .map(JsValue::new)
            .ok_or_else(|| ScriptgateError::InvalidRequest("Number out of range".into())),
        JsonValue::String(s) => Ok(JsValue::new(js_string!(s))),
        JsonValue::Array(arr) => {
            let js_array = JsArray::new(ctx);
            for (i, v) in arr.into_iter().enumerate() {
                let js_value = json_to_js_value(v, ctx)?;
                js_array.push(js_value, ctx).map_err(|e| {
                    ScriptgateError::ScriptError(format!("Failed to push array element {}: {}", i, e))
                })?;
            }
            Ok(js_array.into())
        }
        JsonValue::Object(obj) => {
            let js_obj = JsObject::with_object_proto(ctx.intrinsics());
            for (key, value) in obj {
                let js_value = json_to_js_value(value, ctx)?;
                js_obj
                    .create_data_property_or_throw(js_string!(key.clone()), js_value, ctx)
                    .map_err(|e| {
                        ScriptgateError::ScriptError(format!("Failed to set property '{}': {}", key, e))
                    })?;
            }
            Ok(js_obj.into())
        }
    }
}

/// Converts a JavaScript value to JSON.
///
/// `undefined`, functions and symbols become `null` at the top level.
pub fn js_value_to_json(value: JsValue, ctx: &mut Context) -> Result<JsonValue> {
    Ok(to_json_inner(&value, ctx, 0)?.unwrap_or(JsonValue::Null))
}

/// True for values `JSON.stringify` would leave out of an object.
fn is_unrepresentable(value: &JsValue) -> bool {
    value.is_undefined()
        || value.is_symbol()
        || value.as_object().map_or(false, |o| o.is_callable())
}

/// `None` marks a value with no JSON representation.
fn to_json_inner(value: &JsValue, ctx: &mut Context, depth: usize) -> Result<Option<JsonValue>> {
    if depth > MAX_DEPTH {
        return Err(ScriptgateError::ScriptError(
            "value is nested too deeply or is cyclic".into(),
        ));
    }

    if is_unrepresentable(value) {
        return Ok(None);
    }

    if value.is_null() {
        return Ok(Some(JsonValue::Null));
    }

    if let Some(b) = value.as_boolean() {
        return Ok(Some(JsonValue::Bool(b)));
    }

    if let Some(n) = value.as_number() {
        if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
            return Ok(Some(JsonValue::Number((n as i64).into())));
        }
        return Ok(Some(
            serde_json::Number::from_f64(n)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
        ));
    }

    if let Some(s) = value.as_string() {
        return Ok(Some(JsonValue::String(s.to_std_string_escaped())));
    }

    if value.is_bigint() {
        return Ok(Some(JsonValue::String(value.display().to_string())));
    }

    let Some(obj) = value.as_object() else {
        return Ok(None);
    };
    let obj: JsObject = obj.clone();

    if obj.is_array() {
        let array = JsArray::from_object(obj.clone())
            .map_err(|e| ScriptgateError::ScriptError(format!("Object is not a valid array: {}", e)))?;

        let length: usize = array
            .length(ctx)
            .map_err(|e| ScriptgateError::ScriptError(format!("Failed to get array length: {}", e)))?
            .try_into()
            .map_err(|_| ScriptgateError::ScriptError("Array length overflow".into()))?;

        let mut result = Vec::with_capacity(length.min(1024));
        for i in 0..length {
            let elem = array.get(i, ctx).map_err(|e| {
                ScriptgateError::ScriptError(format!("Failed to get array element {}: {}", i, e))
            })?;
            result.push(to_json_inner(&elem, ctx, depth + 1)?.unwrap_or(JsonValue::Null));
        }
        return Ok(Some(JsonValue::Array(result)));
    }

    let keys = obj
        .own_property_keys(ctx)
        .map_err(|e| ScriptgateError::ScriptError(format!("Failed to get object keys: {}", e)))?;

    let mut result = serde_json::Map::new();
    for key in keys {
        let key_str = match &key {
            PropertyKey::String(s) => s.to_std_string_escaped(),
            PropertyKey::Index(i) => i.get().to_string(),
            PropertyKey::Symbol(_) => continue,
        };

        let prop_value = obj.get(key.clone(), ctx).map_err(|e| {
            ScriptgateError::ScriptError(format!("Failed to get property '{}': {}", key_str, e))
        })?;

        if let Some(json) = to_json_inner(&prop_value, ctx, depth + 1)? {
            result.insert(key_str, json);
        }
    }

    Ok(Some(JsonValue::Object(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;
    use serde_json::json;

    fn eval_to_json(code: &str) -> Result<JsonValue> {
        let mut ctx = Context::default();
        let value = ctx.eval(Source::from_bytes(code)).unwrap();
        js_value_to_json(value, &mut ctx)
    }

    #[test]
    fn test_json_survives_a_trip_through_boa() {
        let mut ctx = Context::default();
        let original = json!({"name": "Ada", "tags": ["a", "b"], "n": 3, "nested": {"ok": true, "none": null}});
        let js = json_to_js_value(original.clone(), &mut ctx).unwrap();
        assert_eq!(js_value_to_json(js, &mut ctx).unwrap(), original);
    }

    #[test]
    fn test_integers_stay_integers() {
        assert_eq!(eval_to_json("1 + 1").unwrap(), json!(2));
        assert_eq!(eval_to_json("0.5").unwrap(), json!(0.5));
    }

    #[test]
    fn test_functions_and_undefined_are_dropped_from_objects() {
        let value = eval_to_json("({a: 1, f() {}, u: undefined, s: Symbol('x')})").unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_unrepresentable_array_elements_become_null() {
        let value = eval_to_json("[1, undefined, () => 1, NaN]").unwrap();
        assert_eq!(value, json!([1, null, null, null]));
    }

    #[test]
    fn test_top_level_undefined_is_null() {
        assert_eq!(eval_to_json("undefined").unwrap(), JsonValue::Null);
    }

    #[test]
    fn test_cyclic_object_is_an_error() {
        let err = eval_to_json("const o = {}; o.self = o; o").unwrap_err();
        assert!(err.to_string().contains("cyclic"));
    }
}
