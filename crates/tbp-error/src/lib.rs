//! Unified error taxonomy with stable error codes for the task backplane.
//!
//! Every control-plane error carries an [`ErrorCode`] (a machine-readable,
//! stable string tag), a human-readable message, an optional cause chain, and
//! arbitrary key-value context.  Tool envelopes serialize the [`ErrorDto`]
//! form.  Use the builder returned by [`TbpError::new`] to construct errors
//! fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Action-dispatch errors (unknown `action` values).
    Action,
    /// Parameter shape errors (missing fields, bad coercion).
    Parameter,
    /// Business-rule violations.
    Validation,
    /// Entity lookup and ownership errors.
    Resource,
    /// Task dependency graph errors.
    Dependency,
    /// Parameter-enforcement gate errors.
    Enforcement,
    /// Event-bus saturation errors.
    Queue,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Action => "action",
            Self::Parameter => "parameter",
            Self::Validation => "validation",
            Self::Resource => "resource",
            Self::Dependency => "dependency",
            Self::Enforcement => "enforcement",
            Self::Queue => "queue",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.  This is the closed set
/// that may appear in a tool envelope's `error.code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The `action` parameter is not in the controller's action set.
    UnknownAction,
    /// A required parameter is absent (business-level, not JSON-RPC schema).
    MissingField,
    /// A parameter could not be coerced (bad integer/boolean string, invalid
    /// embedded JSON).
    InvalidParameterFormat,
    /// A business rule was violated (bad status transition, out-of-range
    /// value, non-catalog agent).
    ValidationError,
    /// Entity not found, or the caller does not own it.
    NotFound,
    /// A uniqueness constraint was violated.
    Conflict,
    /// Adding the dependency would introduce a cycle.
    DependencyCycle,
    /// Strict parameter enforcement prevented the call.
    EnforcementBlocked,
    /// The event bus queue is saturated.
    QueueFull,
    /// Catch-all for unexpected internal errors.
    InternalError,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownAction => ErrorCategory::Action,

            Self::MissingField | Self::InvalidParameterFormat => ErrorCategory::Parameter,

            Self::ValidationError => ErrorCategory::Validation,

            Self::NotFound | Self::Conflict => ErrorCategory::Resource,

            Self::DependencyCycle => ErrorCategory::Dependency,

            Self::EnforcementBlocked => ErrorCategory::Enforcement,

            Self::QueueFull => ErrorCategory::Queue,

            Self::InternalError => ErrorCategory::Internal,
        }
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"INVALID_PARAMETER_FORMAT"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownAction => "UNKNOWN_ACTION",
            Self::MissingField => "MISSING_FIELD",
            Self::InvalidParameterFormat => "INVALID_PARAMETER_FORMAT",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::DependencyCycle => "DEPENDENCY_CYCLE",
            Self::EnforcementBlocked => "ENFORCEMENT_BLOCKED",
            Self::QueueFull => "QUEUE_FULL",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TbpError
// ---------------------------------------------------------------------------

/// Unified control-plane error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, optional
/// envelope extras (`field`, `hint`, `expected`), an optional source error
/// for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use tbp_error::{ErrorCode, TbpError};
///
/// let err = TbpError::new(ErrorCode::InvalidParameterFormat, "limit must be an integer")
///     .with_field("limit")
///     .with_expected("integer or digit string")
///     .with_context("provided", "abc");
/// ```
pub struct TbpError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Parameter the error refers to, if any.
    pub field: Option<String>,
    /// Actionable hint for the caller.
    pub hint: Option<String>,
    /// What a valid value would have looked like.
    pub expected: Option<String>,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl TbpError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
            hint: None,
            expected: None,
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Shorthand for a [`ErrorCode::NotFound`] error over a named entity.
    ///
    /// Ownership violations use this same constructor so that probing another
    /// user's ids is indistinguishable from a genuinely missing row.
    pub fn not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("{entity_type} not found: {id}"))
            .with_context("entity_type", entity_type)
    }

    /// Shorthand for a [`ErrorCode::MissingField`] error.
    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorCode::MissingField, format!("missing required parameter: {field}"))
            .with_field(field)
    }

    /// Shorthand for an [`ErrorCode::UnknownAction`] error listing the valid set.
    pub fn unknown_action(action: &str, valid: &[&str]) -> Self {
        Self::new(ErrorCode::UnknownAction, format!("unknown action: {action}"))
            .with_field("action")
            .with_expected(valid.join(", "))
            .with_context("valid_actions", valid)
    }

    /// Shorthand for an [`ErrorCode::InvalidParameterFormat`] error.
    pub fn invalid_parameter(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidParameterFormat,
            format!("parameter '{field}' has invalid format"),
        )
        .with_field(field)
        .with_expected(expected)
    }

    /// Shorthand for an [`ErrorCode::InternalError`] error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Set the parameter name this error refers to.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Attach an actionable hint for the caller.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Describe what a valid value would have looked like.
    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for TbpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("TbpError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref field) = self.field {
            d.field("field", field);
        }
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for TbpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for TbpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serialisable snapshot of a [`TbpError`] — the `error` object inside a
/// tool envelope (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, schemars::JsonSchema)]
pub struct ErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Parameter the error refers to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Actionable hint for the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// What a valid value would have looked like.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Structured context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl From<&TbpError> for ErrorDto {
    fn from(err: &TbpError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            field: err.field.clone(),
            hint: err.hint.clone(),
            expected: err.expected.clone(),
            context: err.context.clone(),
        }
    }
}

impl From<TbpError> for ErrorDto {
    fn from(err: TbpError) -> Self {
        (&err).into()
    }
}

impl From<ErrorDto> for TbpError {
    fn from(dto: ErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            field: dto.field,
            hint: dto.hint,
            expected: dto.expected,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
