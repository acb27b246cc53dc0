// SPDX-License-Identifier: MIT OR Apache-2.0
//! Loose-typed parameter coercion.
//!
//! Tool inputs arrive as JSON with string-typed integers and booleans mixed
//! in; this layer substitutes for dynamic typing and is non-optional.  A
//! digit string and a native integer must produce identical outcomes, and
//! anything else fails with `INVALID_PARAMETER_FORMAT` before a facade is
//! ever called.

use serde_json::Value;
use tbp_error::TbpError;

/// Coerce an integer parameter.
///
/// Accepts a JSON integer or a string matching `^-?[0-9]+$`.  Empty
/// strings, other strings, floats, and other types are rejected.
pub fn coerce_integer(name: &str, value: &Value) -> Result<i64, TbpError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| invalid(name, "an integer")),
        Value::String(s) => {
            let digits = s.strip_prefix('-').unwrap_or(s);
            if s.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid(name, "an integer or digit string"));
            }
            s.parse().map_err(|_| invalid(name, "an integer in range"))
        }
        _ => Err(invalid(name, "an integer or digit string")),
    }
}

/// Coerce an integer parameter and range-check it.
pub fn coerce_integer_in_range(
    name: &str,
    value: &Value,
    min: i64,
    max: i64,
) -> Result<i64, TbpError> {
    let parsed = coerce_integer(name, value)?;
    if parsed < min || parsed > max {
        return Err(invalid(name, &format!("an integer in [{min}, {max}]")));
    }
    Ok(parsed)
}

/// Coerce a boolean parameter.
///
/// Accepts a JSON boolean or one of
/// `true/false/1/0/yes/no/on/off` (case-insensitive).
pub fn coerce_boolean(name: &str, value: &Value) -> Result<bool, TbpError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(invalid(name, "a boolean (true/false/1/0/yes/no/on/off)")),
        },
        _ => Err(invalid(name, "a boolean (true/false/1/0/yes/no/on/off)")),
    }
}

/// Optional-variant of [`coerce_boolean`]: `None`/`null` maps to `default`.
pub fn coerce_boolean_or(name: &str, value: Option<&Value>, default: bool) -> Result<bool, TbpError> {
    match value {
        None | Some(Value::Null) => Ok(default),
        Some(value) => coerce_boolean(name, value),
    }
}

/// Coerce the `limit` parameter: integer in `[1, 1000]`.
pub fn coerce_limit(value: Option<&Value>) -> Result<Option<usize>, TbpError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(
            coerce_integer_in_range("limit", value, 1, 1_000)? as usize
        )),
    }
}

/// Coerce `progress_percentage`: integer in `[0, 100]`.
pub fn coerce_progress(value: Option<&Value>) -> Result<Option<u8>, TbpError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(value) => Ok(Some(coerce_integer_in_range(
            "progress_percentage",
            value,
            0,
            100,
        )? as u8)),
    }
}

/// A parameter that may be a JSON array of strings or a single string.
pub fn coerce_string_list(name: &str, value: Option<&Value>) -> Result<Vec<String>, TbpError> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(name, "an array of strings"))
            })
            .collect(),
        Some(_) => Err(invalid(name, "a string or array of strings")),
    }
}

/// Parse an embedded JSON string (e.g. `client_info` arriving stringified).
/// A plain object passes through unchanged.
pub fn coerce_embedded_json(name: &str, value: &Value) -> Result<Value, TbpError> {
    match value {
        Value::String(raw) => serde_json::from_str(raw)
            .map_err(|e| invalid(name, "valid JSON").with_context("parse_error", e.to_string())),
        other => Ok(other.clone()),
    }
}

fn invalid(name: &str, expected: &str) -> TbpError {
    TbpError::invalid_parameter(name, expected)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
