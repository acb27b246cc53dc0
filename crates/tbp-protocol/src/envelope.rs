// SPDX-License-Identifier: MIT OR Apache-2.0
//! The tool envelope controllers emit.
//!
//! Controllers build the raw (redundant) envelope; the response optimizer
//! consolidates it into the profile the caller sees.  The raw shape carries
//! the duplication on purpose — `confirmation.operation_details` mirrors the
//! top level so legacy consumers keep working until they migrate.

use chrono::Utc;
use serde_json::{json, Map, Value};
use tbp_error::{ErrorDto, TbpError};
use uuid::Uuid;

/// One parsed tool invocation: the dispatch `action` plus everything else.
#[derive(Debug, Clone, Default)]
pub struct ToolCall {
    /// The dispatch parameter.
    pub action: String,
    /// All remaining parameters, untyped.
    pub params: Map<String, Value>,
}

impl ToolCall {
    /// Split a raw `arguments` object into action and parameters.
    ///
    /// A missing or non-string `action` yields an empty action, which the
    /// controller's action validation then rejects with the valid set.
    pub fn from_arguments(arguments: Value) -> Self {
        let mut params = arguments.as_object().cloned().unwrap_or_default();
        let action = params
            .remove("action")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        Self { action, params }
    }

    /// Borrow one parameter.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// A parameter as `&str`, if present and a string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    /// A required string parameter, or a `MISSING_FIELD` error.
    pub fn require_str(&self, name: &str) -> Result<&str, TbpError> {
        match self.params.get(name) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s),
            _ => Err(TbpError::missing_field(name)),
        }
    }
}

/// Raw success envelope for an operation.
pub fn success_envelope(operation: &str, data: Value) -> Value {
    json!({
        "success": true,
        "status": "success",
        "operation": operation,
        "operation_id": Uuid::new_v4(),
        "timestamp": Utc::now(),
        "data": data,
        "confirmation": {
            "operation_completed": true,
            "data_persisted": true,
            "partial_failures": [],
            "operation_details": {
                "operation": operation,
            },
        },
    })
}

/// Raw error envelope for an operation.
pub fn error_envelope(operation: &str, error: &TbpError) -> Value {
    let dto: ErrorDto = error.into();
    json!({
        "success": false,
        "operation": operation,
        "operation_id": Uuid::new_v4(),
        "timestamp": Utc::now(),
        "error": dto,
    })
}
