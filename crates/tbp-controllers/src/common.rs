// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared controller plumbing.

use serde_json::Value;
use tbp_app::{EnforcementLevel, EnforcementResult};
use tbp_error::{ErrorCode, TbpError};
use tbp_protocol::{
    error_envelope, OptimizationContext, ResponseOptimizer, ResponseProfile, ToolCall,
};
use uuid::Uuid;

/// Per-request signals extracted by the transport layer.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Explicit `profile=` override from the request.
    pub profile_override: Option<ResponseProfile>,
    /// The calling agent, from `agent=` in the request context.
    pub agent: Option<String>,
    /// `debug=true` or the `X-Debug: true` header.
    pub debug: bool,
    /// Per-call enforcement override.
    pub enforcement_override: Option<EnforcementLevel>,
}

impl RequestContext {
    pub(crate) fn optimization(&self) -> OptimizationContext {
        OptimizationContext {
            profile_override: self.profile_override,
            agent: self.agent.clone(),
            debug: self.debug,
        }
    }
}

/// The authenticated caller, or the error envelope a controller returns
/// when invoked outside a request scope.
pub(crate) fn authenticated_user(operation: &str) -> Result<String, Value> {
    tbp_auth::current_user_id().ok_or_else(|| {
        error_envelope(
            operation,
            &TbpError::internal("no authenticated user bound to this request"),
        )
    })
}

/// Parse a UUID parameter, mapping failures to `INVALID_PARAMETER_FORMAT`.
pub(crate) fn parse_uuid(name: &str, raw: &str) -> Result<Uuid, TbpError> {
    raw.parse()
        .map_err(|_| TbpError::invalid_parameter(name, "a UUID"))
}

/// A required UUID parameter.
pub(crate) fn require_uuid(call: &ToolCall, name: &str) -> Result<Uuid, TbpError> {
    parse_uuid(name, call.require_str(name)?)
}

/// An optional UUID parameter.
pub(crate) fn optional_uuid(call: &ToolCall, name: &str) -> Result<Option<Uuid>, TbpError> {
    match call.get_str(name) {
        Some(raw) if !raw.is_empty() => Ok(Some(parse_uuid(name, raw)?)),
        _ => Ok(None),
    }
}

/// The agent id a compliance record is tracked under: explicit `agent_id`
/// parameter first, then the request context.
pub(crate) fn agent_for_tracking(call: &ToolCall, ctx: &RequestContext) -> Option<String> {
    call.get_str("agent_id")
        .map(str::to_string)
        .or_else(|| ctx.agent.clone())
}

/// Envelope for a strict-enforcement block.
pub(crate) fn enforcement_blocked_envelope(
    operation: &str,
    result: &EnforcementResult,
) -> Value {
    let err = TbpError::new(ErrorCode::EnforcementBlocked, result.message.clone())
        .with_hint(result.hints.join("; "))
        .with_context("missing_required", &result.missing_required)
        .with_context("missing_recommended", &result.missing_recommended)
        .with_context("examples", &result.examples);
    error_envelope(operation, &err)
}

/// Shape an envelope and attach enforcement hints when the gate produced
/// any.  Hints from the gate survive every profile — a caller told to add
/// `completion_summary` must see that regardless of response size tuning.
pub(crate) fn finish(
    optimizer: &ResponseOptimizer,
    operation: &str,
    envelope: Value,
    ctx: &RequestContext,
    enforcement: Option<&EnforcementResult>,
) -> Value {
    let profile = optimizer.auto_select(operation, &envelope, &ctx.optimization());
    let mut shaped = optimizer.optimize(envelope, profile);

    if let Some(result) = enforcement {
        if !result.hints.is_empty() {
            if let Some(map) = shaped.as_object_mut() {
                let hints = map
                    .entry("hints")
                    .or_insert_with(|| Value::Array(Vec::new()));
                match hints {
                    Value::Array(existing) => {
                        existing.extend(result.hints.iter().map(|h| Value::String(h.clone())));
                    }
                    other => {
                        // Optimizer-produced hints object: keep both shapes.
                        let mut merged = other
                            .as_object()
                            .cloned()
                            .unwrap_or_default();
                        merged.insert(
                            "enforcement".into(),
                            Value::Array(
                                result
                                    .hints
                                    .iter()
                                    .map(|h| Value::String(h.clone()))
                                    .collect(),
                            ),
                        );
                        *other = Value::Object(merged);
                    }
                }
            }
        }
    }
    shaped
}
