//! Argument validation against a tool's `inputSchema`.
//!
//! Supports the JSON Schema subset tools actually declare: an object with
//! `properties` (type + optional `enum`), `required`, and
//! `additionalProperties`. Unknown argument fields are accepted unless
//! the schema sets `additionalProperties: false` (strict mode) — clients
//! built against a newer catalogue keep working against an older server.

use serde_json::Value;

/// Check `arguments` against `schema`. Returns a human-readable detail
/// string naming the offending field on the first violation found.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    // A tool that declares no object schema accepts anything.
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };
    if schema_obj.get("type").and_then(Value::as_str) != Some("object") {
        return Ok(());
    }

    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => {
            // Null arguments are fine only when nothing is required.
            return match first_required(schema_obj) {
                Some(field) => Err(format!("missing required field '{field}'")),
                None => Ok(()),
            };
        }
        other => return Err(format!("arguments must be an object, got {}", type_name(other))),
    };

    let empty = serde_json::Map::new();
    let properties = schema_obj
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(field) {
                return Err(format!("missing required field '{field}'"));
            }
        }
    }

    let strict = schema_obj.get("additionalProperties") == Some(&Value::Bool(false));

    for (name, value) in args {
        let Some(prop) = properties.get(name) else {
            if strict {
                return Err(format!("unexpected field '{name}'"));
            }
            continue;
        };
        if let Some(expected) = prop.get("type").and_then(Value::as_str) {
            if !type_matches(expected, value) {
                return Err(format!(
                    "field '{name}': expected {expected}, got {}",
                    type_name(value)
                ));
            }
        }
        if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(format!(
                    "field '{name}': value {value} not in {allowed:?}",
                    allowed = allowed
                ));
            }
        }
    }

    Ok(())
}

fn first_required(schema_obj: &serde_json::Map<String, Value>) -> Option<&str> {
    schema_obj
        .get("required")
        .and_then(Value::as_array)
        .and_then(|r| r.iter().filter_map(Value::as_str).next())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // Unknown declared type — be permissive.
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
