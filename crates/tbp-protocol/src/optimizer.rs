// SPDX-License-Identifier: MIT OR Apache-2.0
//! The response optimizer.
//!
//! Every tool envelope passes through here on the way out.  The optimizer
//! strips the raw envelope's redundancy (duplicate fields, nulls, singleton
//! arrays), consolidates bookkeeping into one `meta` object, derives
//! actionable `hints` from workflow guidance, and then filters the result
//! down to the selected profile.  For any non-trivial payload the profile
//! sizes are ordered `MINIMAL ≤ STANDARD ≤ DETAILED ≤ DEBUG`.
//!
//! The optimizer never fails a request: if shaping goes wrong the raw
//! envelope is logged and returned unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::warn;

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Response shaping profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseProfile {
    /// `success`, `operation`, `data` only.
    Minimal,
    /// Adds the consolidated `meta` object.
    #[default]
    Standard,
    /// Adds simplified `hints` derived from workflow guidance.
    Detailed,
    /// Everything, plus `debug_info.optimization_steps`.
    Debug,
}

impl ResponseProfile {
    /// Stable string form matching the wire encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Standard => "standard",
            Self::Detailed => "detailed",
            Self::Debug => "debug",
        }
    }

    /// Parse the wire encoding back into a profile.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "minimal" => Some(Self::Minimal),
            "standard" => Some(Self::Standard),
            "detailed" => Some(Self::Detailed),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }
}

/// Per-request signals the auto-selector reads.
#[derive(Debug, Clone, Default)]
pub struct OptimizationContext {
    /// Explicit `profile=` override; beats every heuristic.
    pub profile_override: Option<ResponseProfile>,
    /// The calling agent, when the request carries `agent=...`.
    pub agent: Option<String>,
    /// `debug=true` or an `X-Debug: true` header.
    pub debug: bool,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Shaping statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizerMetrics {
    /// Envelopes shaped.
    pub total_optimized: u64,
    /// Serialized bytes removed across all envelopes.
    pub total_bytes_saved: u64,
    /// Mean of `optimized_size / original_size`.
    pub average_compression_ratio: f64,
    /// Envelope count per profile name.
    pub profile_usage: BTreeMap<String, u64>,
}

#[derive(Default)]
struct MetricsInner {
    total_optimized: u64,
    total_bytes_saved: u64,
    ratio_sum: f64,
    profile_usage: BTreeMap<String, u64>,
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

/// Stateless shaping over stateful metrics.
pub struct ResponseOptimizer {
    metrics: Mutex<MetricsInner>,
}

impl ResponseOptimizer {
    /// Threshold above which a list response forces the minimal profile.
    const LARGE_LIST: usize = 15;

    /// Fresh optimizer.
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(MetricsInner::default()),
        }
    }

    /// Pick a profile for a response.
    ///
    /// Order: explicit override, debug signals, list-shaped responses
    /// (minimal), agent-facing responses (detailed), otherwise standard.
    pub fn auto_select(
        &self,
        operation: &str,
        response: &Value,
        ctx: &OptimizationContext,
    ) -> ResponseProfile {
        if let Some(profile) = ctx.profile_override {
            return profile;
        }
        if ctx.debug {
            return ResponseProfile::Debug;
        }
        if matches!(operation, "list" | "get_status") || contains_large_list(response, Self::LARGE_LIST)
        {
            return ResponseProfile::Minimal;
        }
        if ctx.agent.is_some() || mentions_agent_assignees(response) {
            return ResponseProfile::Detailed;
        }
        ResponseProfile::Standard
    }

    /// Shape `envelope` for `profile`.
    ///
    /// Never fails: any internal error returns the input unchanged.
    pub fn optimize(&self, envelope: Value, profile: ResponseProfile) -> Value {
        let original_size = serialized_len(&envelope);
        let shaped = match shape(envelope.clone(), profile) {
            Ok(shaped) => shaped,
            Err(reason) => {
                warn!(reason, "response optimization failed; returning raw envelope");
                return envelope;
            }
        };
        let optimized_size = serialized_len(&shaped);

        let mut metrics = self.metrics.lock().expect("optimizer metrics poisoned");
        metrics.total_optimized += 1;
        metrics.total_bytes_saved += original_size.saturating_sub(optimized_size) as u64;
        metrics.ratio_sum += if original_size == 0 {
            1.0
        } else {
            optimized_size as f64 / original_size as f64
        };
        *metrics
            .profile_usage
            .entry(profile.as_str().to_string())
            .or_insert(0) += 1;
        shaped
    }

    /// Current shaping statistics.
    pub fn metrics(&self) -> OptimizerMetrics {
        let inner = self.metrics.lock().expect("optimizer metrics poisoned");
        OptimizerMetrics {
            total_optimized: inner.total_optimized,
            total_bytes_saved: inner.total_bytes_saved,
            average_compression_ratio: if inner.total_optimized == 0 {
                1.0
            } else {
                inner.ratio_sum / inner.total_optimized as f64
            },
            profile_usage: inner.profile_usage.clone(),
        }
    }
}

impl Default for ResponseOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

fn serialized_len(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Shaping pipeline
// ---------------------------------------------------------------------------

fn shape(envelope: Value, profile: ResponseProfile) -> Result<Value, &'static str> {
    let Value::Object(mut map) = envelope else {
        return Err("envelope is not an object");
    };
    let mut steps: Vec<&'static str> = Vec::new();

    // Debug keeps the raw shape for forensics; everything else is cleaned.
    let raw_for_debug = (profile == ResponseProfile::Debug).then(|| map.clone());

    remove_duplicates(&mut map);
    steps.push("remove_duplicates");

    flatten_structure(&mut map);
    steps.push("flatten_structure");

    let mut value = Value::Object(map);
    remove_nulls(&mut value);
    flatten_singletons(&mut value);
    steps.push("remove_nulls");
    steps.push("flatten_singletons");

    let Value::Object(mut map) = value else {
        return Err("cleanup produced a non-object");
    };
    consolidate_meta(&mut map);
    steps.push("consolidate_meta");

    let hints = simplify_guidance(map.remove("workflow_guidance"));
    steps.push("simplify_guidance");

    Ok(apply_profile(map, profile, hints, raw_for_debug, steps))
}

/// Drop fields that restate other fields.
fn remove_duplicates(map: &mut Map<String, Value>) {
    // `status: "success"` restates `success: true`.
    if map.contains_key("success") {
        map.remove("status");
    }
    let top: Vec<(String, Value)> = ["operation", "operation_id", "timestamp"]
        .iter()
        .filter_map(|k| map.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect();
    let top_success = map_success(map.get("success"));
    if let Some(confirmation) = map.get_mut("confirmation").and_then(Value::as_object_mut) {
        // operation_details duplicating the top level adds nothing.
        let duplicated = confirmation
            .get("operation_details")
            .and_then(Value::as_object)
            .is_some_and(|details| {
                details
                    .iter()
                    .all(|(k, v)| top.iter().any(|(tk, tv)| tk == k && tv == v))
            });
        if duplicated {
            confirmation.remove("operation_details");
        }
        // operation_completed mirrors the success boolean.
        if map_success(confirmation.get("operation_completed")) == top_success {
            confirmation.remove("operation_completed");
        }
    }
}

fn map_success(value: Option<&Value>) -> Option<bool> {
    value.and_then(Value::as_bool)
}

/// Hoist confirmation bookkeeping into `meta`.
fn flatten_structure(map: &mut Map<String, Value>) {
    let Some(Value::Object(confirmation)) = map.remove("confirmation") else {
        return;
    };
    let meta = map
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .expect("meta is always an object");
    if let Some(persisted) = confirmation.get("data_persisted") {
        meta.insert("persisted".into(), persisted.clone());
    }
    if let Some(failures) = confirmation.get("partial_failures") {
        meta.insert("partial_failures".into(), failures.clone());
    }
    // Anything else in the confirmation is legacy noise.
}

/// Recursively remove nulls, empty strings, empty arrays, and empty maps.
fn remove_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                remove_nulls(child);
            }
            map.retain(|_, v| !is_empty_value(v));
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                remove_nulls(item);
            }
            items.retain(|v| !matches!(v, Value::Null));
        }
        _ => {}
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

/// Flatten single-item arrays to their scalar, recursively.
fn flatten_singletons(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                flatten_singletons(child);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                flatten_singletons(item);
            }
            if items.len() == 1 {
                *value = items.remove(0);
            }
        }
        _ => {}
    }
}

/// Move loose bookkeeping fields under one `meta` object.
fn consolidate_meta(map: &mut Map<String, Value>) {
    let operation_id = map.remove("operation_id");
    let timestamp = map.remove("timestamp");
    let operation = map.get("operation").cloned();

    let meta = map
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .expect("meta is always an object");
    if let Some(id) = operation_id {
        meta.insert("id".into(), id);
    }
    if let Some(timestamp) = timestamp {
        meta.insert("timestamp".into(), timestamp);
    }
    if let Some(operation) = operation {
        meta.insert("operation".into(), operation);
    }
}

/// Reduce `workflow_guidance` to the four-field `hints` object.
fn simplify_guidance(guidance: Option<Value>) -> Option<Value> {
    let guidance = guidance?;
    let mut hints = Map::new();
    if let Some(next) = guidance
        .pointer("/next_steps/recommendations")
        .filter(|v| !is_empty_value(v))
    {
        hints.insert("next".into(), next.clone());
    }
    if let Some(required) = guidance
        .pointer("/next_steps/required_actions")
        .filter(|v| !is_empty_value(v))
    {
        hints.insert("required".into(), required.clone());
    }
    if let Some(tips) = guidance
        .pointer("/next_steps/optional_actions")
        .filter(|v| !is_empty_value(v))
    {
        hints.insert("tips".into(), tips.clone());
    }
    if let Some(confidence) = guidance.pointer("/autonomous_guidance/confidence") {
        hints.insert("confidence".into(), confidence.clone());
    }
    if hints.is_empty() {
        None
    } else {
        Some(Value::Object(hints))
    }
}

/// Filter the cleaned envelope down to the profile's field set.
fn apply_profile(
    cleaned: Map<String, Value>,
    profile: ResponseProfile,
    hints: Option<Value>,
    raw_for_debug: Option<Map<String, Value>>,
    steps: Vec<&'static str>,
) -> Value {
    let mut out = Map::new();
    let success = cleaned.get("success").cloned().unwrap_or(Value::Bool(true));
    out.insert("success".into(), success.clone());
    if let Some(operation) = cleaned.get("operation") {
        out.insert("operation".into(), operation.clone());
    }
    if let Some(data) = cleaned.get("data") {
        out.insert("data".into(), data.clone());
    }

    // Errors survive every profile; minimal keeps only the essentials.
    if let Some(error) = cleaned.get("error") {
        let error = if profile == ResponseProfile::Minimal {
            minimal_error(error)
        } else {
            error.clone()
        };
        out.insert("error".into(), error);
    }

    if profile == ResponseProfile::Minimal {
        return Value::Object(out);
    }

    if let Some(meta) = cleaned.get("meta") {
        out.insert("meta".into(), meta.clone());
    }

    if matches!(profile, ResponseProfile::Detailed | ResponseProfile::Debug) {
        if let Some(hints) = hints {
            out.insert("hints".into(), hints);
        }
    }

    if profile == ResponseProfile::Debug {
        // Everything the cleanup kept, plus forensics.
        for (key, value) in cleaned {
            out.entry(key).or_insert(value);
        }
        let mut debug_info = Map::new();
        debug_info.insert("optimization_steps".into(), json!(steps));
        if let Some(raw) = raw_for_debug {
            debug_info.insert("raw_envelope".into(), Value::Object(raw));
        }
        out.insert("debug_info".into(), Value::Object(debug_info));
    }

    Value::Object(out)
}

fn minimal_error(error: &Value) -> Value {
    let mut out = Map::new();
    for key in ["code", "message"] {
        if let Some(value) = error.get(key) {
            out.insert(key.to_string(), value.clone());
        }
    }
    Value::Object(out)
}

// ---------------------------------------------------------------------------
// Heuristics
// ---------------------------------------------------------------------------

fn contains_large_list(value: &Value, threshold: usize) -> bool {
    match value {
        Value::Array(items) => {
            items.len() > threshold || items.iter().any(|v| contains_large_list(v, threshold))
        }
        Value::Object(map) => map.values().any(|v| contains_large_list(v, threshold)),
        _ => false,
    }
}

fn mentions_agent_assignees(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().any(|(key, child)| {
            if key == "assignees" {
                child_has_agent(child)
            } else {
                mentions_agent_assignees(child)
            }
        }),
        Value::Array(items) => items.iter().any(mentions_agent_assignees),
        _ => false,
    }
}

fn child_has_agent(value: &Value) -> bool {
    match value {
        Value::String(s) => s.starts_with('@'),
        Value::Array(items) => items
            .iter()
            .any(|v| v.as_str().is_some_and(|s| s.starts_with('@'))),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// A representative raw envelope with every redundancy the optimizer
    /// exists to remove.
    fn redundant_envelope() -> Value {
        json!({
            "status": "success",
            "success": true,
            "operation": "create",
            "operation_id": "uuid-123",
            "timestamp": "2025-01-01T00:00:00Z",
            "confirmation": {
                "operation_completed": true,
                "data_persisted": true,
                "partial_failures": [],
                "operation_details": {
                    "operation": "create",
                    "operation_id": "uuid-123",
                    "timestamp": "2025-01-01T00:00:00Z"
                }
            },
            "data": {
                "task": {
                    "id": "task-456",
                    "title": "Test Task",
                    "status": "todo",
                    "empty_field": "",
                    "null_field": null,
                    "single_item_array": ["single_value"]
                }
            },
            "metadata": {
                "empty_list": [],
                "null_value": null
            },
            "workflow_guidance": {
                "next_steps": {
                    "recommendations": ["update_status", "add_description"],
                    "required_actions": ["add_assignee"],
                    "optional_actions": ["set_priority", "add_labels"]
                },
                "validation": {"errors": [], "warnings": []},
                "autonomous_guidance": {"decision_points": [], "confidence": 0.85}
            }
        })
    }

    // -- transformations -------------------------------------------------

    #[test]
    fn duplicates_are_removed() {
        let Value::Object(mut map) = redundant_envelope() else {
            unreachable!()
        };
        remove_duplicates(&mut map);
        assert!(!map.contains_key("status"));
        let confirmation = map["confirmation"].as_object().unwrap();
        assert!(!confirmation.contains_key("operation_details"));
        assert!(!confirmation.contains_key("operation_completed"));
    }

    #[test]
    fn confirmation_flattens_into_meta() {
        let Value::Object(mut map) = json!({
            "confirmation": {"data_persisted": true, "partial_failures": []},
            "data": {"items": ["only"]}
        }) else {
            unreachable!()
        };
        flatten_structure(&mut map);
        assert!(!map.contains_key("confirmation"));
        assert_eq!(map["meta"]["persisted"], json!(true));
    }

    #[test]
    fn nulls_and_empties_removed_recursively() {
        let mut value = json!({
            "keep": "v",
            "null": null,
            "empty_str": "",
            "empty_arr": [],
            "empty_map": {},
            "nested": {"keep": 1, "drop": null, "empty": ""}
        });
        remove_nulls(&mut value);
        let map = value.as_object().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["nested"], json!({"keep": 1}));
    }

    #[test]
    fn singleton_arrays_flatten_to_scalars() {
        let mut value = json!({"a": ["only"], "b": ["x", "y"], "nested": {"c": [42]}});
        flatten_singletons(&mut value);
        assert_eq!(value["a"], json!("only"));
        assert_eq!(value["b"], json!(["x", "y"]));
        assert_eq!(value["nested"]["c"], json!(42));
    }

    #[test]
    fn guidance_reduces_to_hints() {
        let guidance = redundant_envelope()["workflow_guidance"].clone();
        let hints = simplify_guidance(Some(guidance)).unwrap();
        assert_eq!(hints["next"], json!(["update_status", "add_description"]));
        assert_eq!(hints["required"], json!(["add_assignee"]));
        assert_eq!(hints["tips"], json!(["set_priority", "add_labels"]));
        assert_eq!(hints["confidence"], json!(0.85));
    }

    // -- profiles ---------------------------------------------------------

    #[test]
    fn minimal_keeps_only_core_fields() {
        let optimizer = ResponseOptimizer::new();
        let shaped = optimizer.optimize(redundant_envelope(), ResponseProfile::Minimal);
        let map = shaped.as_object().unwrap();
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(keys, vec!["success", "operation", "data"]);
    }

    #[test]
    fn standard_adds_meta() {
        let optimizer = ResponseOptimizer::new();
        let shaped = optimizer.optimize(redundant_envelope(), ResponseProfile::Standard);
        assert_eq!(shaped["meta"]["operation"], json!("create"));
        assert_eq!(shaped["meta"]["id"], json!("uuid-123"));
        assert_eq!(shaped["meta"]["persisted"], json!(true));
        assert!(shaped.get("hints").is_none());
    }

    #[test]
    fn detailed_adds_hints() {
        let optimizer = ResponseOptimizer::new();
        let shaped = optimizer.optimize(redundant_envelope(), ResponseProfile::Detailed);
        assert_eq!(shaped["hints"]["confidence"], json!(0.85));
    }

    #[test]
    fn debug_keeps_everything_plus_steps() {
        let optimizer = ResponseOptimizer::new();
        let shaped = optimizer.optimize(redundant_envelope(), ResponseProfile::Debug);
        let steps = shaped["debug_info"]["optimization_steps"].as_array().unwrap();
        assert!(steps.iter().any(|s| s == "remove_duplicates"));
        assert!(shaped["debug_info"]["raw_envelope"].is_object());
    }

    #[test]
    fn profile_sizes_are_ordered() {
        let optimizer = ResponseOptimizer::new();
        let envelope = redundant_envelope();
        let sizes: Vec<usize> = [
            ResponseProfile::Minimal,
            ResponseProfile::Standard,
            ResponseProfile::Detailed,
            ResponseProfile::Debug,
        ]
        .iter()
        .map(|p| serialized_len(&optimizer.optimize(envelope.clone(), *p)))
        .collect();
        assert!(sizes[0] <= sizes[1], "{sizes:?}");
        assert!(sizes[1] <= sizes[2], "{sizes:?}");
        assert!(sizes[2] <= sizes[3], "{sizes:?}");
    }

    #[test]
    fn data_survives_every_profile() {
        let optimizer = ResponseOptimizer::new();
        for profile in [
            ResponseProfile::Minimal,
            ResponseProfile::Standard,
            ResponseProfile::Detailed,
            ResponseProfile::Debug,
        ] {
            let shaped = optimizer.optimize(redundant_envelope(), profile);
            assert_eq!(shaped["data"]["task"]["id"], json!("task-456"), "{profile:?}");
        }
    }

    // -- errors ------------------------------------------------------------

    #[test]
    fn error_envelopes_keep_success_false_everywhere() {
        let optimizer = ResponseOptimizer::new();
        let envelope = json!({
            "success": false,
            "operation": "complete",
            "error": {"code": "NOT_FOUND", "message": "task not found", "hint": "check the id"}
        });
        for profile in [
            ResponseProfile::Minimal,
            ResponseProfile::Standard,
            ResponseProfile::Detailed,
            ResponseProfile::Debug,
        ] {
            let shaped = optimizer.optimize(envelope.clone(), profile);
            assert_eq!(shaped["success"], json!(false), "{profile:?}");
            assert_eq!(shaped["error"]["code"], json!("NOT_FOUND"));
        }
    }

    #[test]
    fn minimal_error_drops_hint_but_keeps_essentials() {
        let optimizer = ResponseOptimizer::new();
        let envelope = json!({
            "success": false,
            "operation": "complete",
            "error": {"code": "NOT_FOUND", "message": "task not found", "hint": "check the id"}
        });
        let shaped = optimizer.optimize(envelope, ResponseProfile::Minimal);
        assert_eq!(shaped["error"]["message"], json!("task not found"));
        assert!(shaped["error"].get("hint").is_none());
    }

    #[test]
    fn non_object_envelope_returned_unchanged() {
        let optimizer = ResponseOptimizer::new();
        let odd = json!(["not", "an", "object"]);
        assert_eq!(optimizer.optimize(odd.clone(), ResponseProfile::Standard), odd);
    }

    // -- auto-selection ----------------------------------------------------

    #[test]
    fn override_beats_everything() {
        let optimizer = ResponseOptimizer::new();
        let ctx = OptimizationContext {
            profile_override: Some(ResponseProfile::Debug),
            ..OptimizationContext::default()
        };
        assert_eq!(
            optimizer.auto_select("list", &json!({}), &ctx),
            ResponseProfile::Debug
        );
    }

    #[test]
    fn debug_flag_selects_debug() {
        let optimizer = ResponseOptimizer::new();
        let ctx = OptimizationContext {
            debug: true,
            ..OptimizationContext::default()
        };
        assert_eq!(
            optimizer.auto_select("get", &json!({}), &ctx),
            ResponseProfile::Debug
        );
    }

    #[test]
    fn list_operations_select_minimal() {
        let optimizer = ResponseOptimizer::new();
        let ctx = OptimizationContext::default();
        assert_eq!(
            optimizer.auto_select("list", &json!({}), &ctx),
            ResponseProfile::Minimal
        );
        assert_eq!(
            optimizer.auto_select("get_status", &json!({}), &ctx),
            ResponseProfile::Minimal
        );
    }

    #[test]
    fn long_lists_select_minimal() {
        let optimizer = ResponseOptimizer::new();
        let items: Vec<Value> = (0..16).map(|n| json!({ "n": n })).collect();
        let response = json!({"data": {"tasks": items}});
        assert_eq!(
            optimizer.auto_select("search", &response, &OptimizationContext::default()),
            ResponseProfile::Minimal
        );
    }

    #[test]
    fn agent_assignees_select_detailed() {
        let optimizer = ResponseOptimizer::new();
        let response = json!({"data": {"task": {"assignees": ["@coding-agent"]}}});
        assert_eq!(
            optimizer.auto_select("get", &response, &OptimizationContext::default()),
            ResponseProfile::Detailed
        );
    }

    #[test]
    fn agent_context_selects_detailed() {
        let optimizer = ResponseOptimizer::new();
        let ctx = OptimizationContext {
            agent: Some("@coding-agent".into()),
            ..OptimizationContext::default()
        };
        assert_eq!(
            optimizer.auto_select("get", &json!({}), &ctx),
            ResponseProfile::Detailed
        );
    }

    #[test]
    fn plain_responses_select_standard() {
        let optimizer = ResponseOptimizer::new();
        assert_eq!(
            optimizer.auto_select("get", &json!({"data": {}}), &OptimizationContext::default()),
            ResponseProfile::Standard
        );
    }

    // -- metrics -----------------------------------------------------------

    #[test]
    fn metrics_accumulate() {
        let optimizer = ResponseOptimizer::new();
        optimizer.optimize(redundant_envelope(), ResponseProfile::Minimal);
        optimizer.optimize(redundant_envelope(), ResponseProfile::Minimal);
        optimizer.optimize(redundant_envelope(), ResponseProfile::Debug);

        let metrics = optimizer.metrics();
        assert_eq!(metrics.total_optimized, 3);
        assert_eq!(metrics.profile_usage["minimal"], 2);
        assert_eq!(metrics.profile_usage["debug"], 1);
        assert!(metrics.total_bytes_saved > 0);
        assert!(metrics.average_compression_ratio > 0.0);
    }
}
