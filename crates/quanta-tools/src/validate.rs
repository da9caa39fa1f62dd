// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde_json::Value;

/// Validate `args` against a JSON-Schema parameters object.
///
/// Covers the subset the tool catalog uses: object root, `required`,
/// per-property `type`, `enum`, and one level of array `items` typing.
/// Returns the first violation as a human-readable message the model can
/// act on.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    if schema.get("type").and_then(Value::as_str) == Some("object") && !args.is_object() {
        return Err(format!("expected an argument object, got {}", type_name(args)));
    }

    let empty = serde_json::Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if args.get(key).is_none() {
                return Err(format!("missing required parameter '{key}'"));
            }
        }
    }

    for (key, spec) in properties {
        let Some(value) = args.get(key) else { continue };
        check_value(key, spec, value)?;
    }
    Ok(())
}

fn check_value(key: &str, spec: &Value, value: &Value) -> Result<(), String> {
    if let Some(expected) = spec.get("type").and_then(Value::as_str) {
        let ok = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !ok {
            return Err(format!(
                "parameter '{key}' must be {expected}, got {}",
                type_name(value)
            ));
        }
    }

    if let Some(allowed) = spec.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!(
                "parameter '{key}' must be one of {}",
                serde_json::to_string(allowed).unwrap_or_default()
            ));
        }
    }

    if let (Some(items), Some(elements)) = (spec.get("items"), value.as_array()) {
        for (i, element) in elements.iter().enumerate() {
            check_value(&format!("{key}[{i}]"), items, element)?;
            if let (Some(props), Some(obj)) = (
                items.get("properties").and_then(Value::as_object),
                element.as_object(),
            ) {
                if let Some(required) = items.get("required").and_then(Value::as_array) {
                    for rk in required.iter().filter_map(Value::as_str) {
                        if !obj.contains_key(rk) {
                            return Err(format!(
                                "parameter '{key}[{i}]' missing required field '{rk}'"
                            ));
                        }
                    }
                }
                for (pk, pspec) in props {
                    if let Some(pv) = obj.get(pk) {
                        check_value(&format!("{key}[{i}].{pk}"), pspec, pv)?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
