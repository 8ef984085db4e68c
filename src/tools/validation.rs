//! Validate JSON values against a JSON Schema subset.
//!
//! Used for tool call arguments before execution and for an agent's declared
//! output schema before a run completes. Covers `type` (string or list),
//! `required`, `properties`, `additionalProperties: false`, `items` and
//! `enum`, recursing into nested objects and arrays.

use serde_json::Value;

/// Validate a value against a JSON Schema.
///
/// Returns `Ok(())` when valid, `Err(message)` describing the first
/// violation found. The message carries a JSON-pointer-like path.
pub fn validate_value(value: &Value, schema: &Value) -> Result<(), String> {
    validate_at(value, schema, "$")
}

/// Validate tool arguments against a tool's parameter schema.
///
/// A `null` argument payload is treated as an empty object, since many
/// backends omit arguments for zero-parameter tools.
pub fn validate_arguments(args: &Value, schema: &Value) -> Result<(), String> {
    if args.is_null() {
        return validate_value(&Value::Object(Default::default()), schema);
    }
    validate_value(args, schema)
}

fn validate_at(value: &Value, schema: &Value, path: &str) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema_obj.get("type") {
        let matches = match expected {
            Value::String(t) => value_matches_type(value, t),
            Value::Array(types) => types
                .iter()
                .filter_map(|t| t.as_str())
                .any(|t| value_matches_type(value, t)),
            _ => true,
        };
        if !matches {
            return Err(format!(
                "{path}: expected type {}, got {}",
                expected,
                json_type_name(value)
            ));
        }
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(|v| v.as_array()) {
        if !allowed.contains(value) {
            return Err(format!("{path}: value {value} is not one of the allowed values"));
        }
    }

    if let Some(obj) = value.as_object() {
        if let Some(required) = schema_obj.get("required").and_then(|v| v.as_array()) {
            for field in required.iter().filter_map(|f| f.as_str()) {
                if !obj.contains_key(field) {
                    return Err(format!("{path}: missing required field '{field}'"));
                }
            }
        }

        let properties = schema_obj.get("properties").and_then(|v| v.as_object());
        let closed = matches!(schema_obj.get("additionalProperties"), Some(Value::Bool(false)));
        for (key, field_value) in obj {
            match properties.and_then(|p| p.get(key)) {
                Some(field_schema) => {
                    validate_at(field_value, field_schema, &format!("{path}.{key}"))?;
                }
                None if closed => {
                    return Err(format!("{path}: unexpected field '{key}'"));
                }
                None => {}
            }
        }
    }

    if let (Some(items), Some(array)) = (schema_obj.get("items"), value.as_array()) {
        for (index, item) in array.iter().enumerate() {
            validate_at(item, items, &format!("{path}[{index}]"))?;
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
