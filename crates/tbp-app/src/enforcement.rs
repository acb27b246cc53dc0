// SPDX-License-Identifier: MIT OR Apache-2.0
//! The parameter enforcement gate.
//!
//! For every gated action two parameter lists are declared: `strict`
//! parameters MUST be present and non-empty, `recommended` parameters are
//! reported as hints.  Four progressive levels decide what absence means,
//! from pass-through to a blocking envelope.  Per-agent compliance is
//! tracked across calls.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

/// How strictly missing parameters are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementLevel {
    /// No checks at all.
    Disabled,
    /// Log only; always allow.
    Soft,
    /// Allow, but return hints for everything missing.
    #[default]
    Warning,
    /// Block the call when strict parameters are missing.
    Strict,
}

impl EnforcementLevel {
    /// Stable string form matching the wire encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Soft => "soft",
            Self::Warning => "warning",
            Self::Strict => "strict",
        }
    }

    /// Parse the wire encoding back into a level.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "disabled" => Some(Self::Disabled),
            "soft" => Some(Self::Soft),
            "warning" => Some(Self::Warning),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Requirements & templates
// ---------------------------------------------------------------------------

/// `(strict, recommended)` parameter lists per gated action.
fn requirements(action: &str) -> (&'static [&'static str], &'static [&'static str]) {
    match action {
        "update" => (
            &["work_notes", "progress_made"],
            &["files_modified", "blockers_encountered", "decisions_made"],
        ),
        "complete" => (
            &["completion_summary"],
            &["testing_notes", "deployment_notes"],
        ),
        "create" => (&[], &["estimated_effort", "initial_thoughts"]),
        "subtask_update" => (&["progress_notes"], &["blockers", "insights_found"]),
        "subtask_complete" => (
            &["completion_summary"],
            &["impact_on_parent", "insights_found", "testing_notes"],
        ),
        _ => (&[], &[]),
    }
}

/// Fill-in templates surfaced with hints and blocking errors.
fn parameter_template(param: &str) -> Option<Value> {
    let template = match param {
        "work_notes" => json!("Brief description of work being done, e.g. 'Refactoring the auth middleware'"),
        "progress_made" => json!("What was accomplished, e.g. 'Bearer validation wired into the router'"),
        "completion_summary" => {
            json!("What was completed, e.g. 'Implemented token validation with rate limiting and tests'")
        }
        "progress_notes" => json!("Current state of the subtask, e.g. 'Parser handles all fixtures'"),
        "testing_notes" => json!("Testing performed, e.g. 'Unit tests added, integration suite green'"),
        "files_modified" => json!(["src/auth/middleware.rs", "src/auth/token.rs"]),
        "blockers_encountered" => json!(["Upstream schema not published yet"]),
        "decisions_made" => json!(["Kept counters in the cache instead of the token row"]),
        "insights_found" => json!(["Existing retry helper covers this case"]),
        _ => return None,
    };
    Some(template)
}

/// A worked example for the blocking error envelope.
fn example_command(action: &str) -> Option<Value> {
    match action {
        "complete" | "subtask_complete" => Some(json!({
            "action": "complete",
            "task_id": "<task_id>",
            "completion_summary": "Implemented the branch-scoped listing with tests",
            "testing_notes": "Unit and integration tests passing",
        })),
        "update" => Some(json!({
            "action": "update",
            "task_id": "<task_id>",
            "work_notes": "Working on the repository scoping layer",
            "progress_made": "Ownership checks now surface NOT_FOUND",
        })),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Results & compliance
// ---------------------------------------------------------------------------

/// Outcome of one enforcement check.
#[derive(Debug, Clone, Serialize)]
pub struct EnforcementResult {
    /// Whether the operation may proceed.
    pub allowed: bool,
    /// Level the check ran at.
    pub level: EnforcementLevel,
    /// Strict parameters that were absent or empty.
    pub missing_required: Vec<String>,
    /// Recommended parameters that were absent or empty.
    pub missing_recommended: Vec<String>,
    /// Human-readable outcome.
    pub message: String,
    /// Actionable hints (populated from `Warning` upward).
    pub hints: Vec<String>,
    /// Parameter templates and an `example_command`, keyed by name.
    pub examples: Map<String, Value>,
    /// Whether this check updated an agent's compliance record.
    pub compliance_tracked: bool,
    /// The tracked agent, if any.
    pub agent_id: Option<String>,
}

/// Per-agent compliance statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCompliance {
    /// Agent identifier.
    pub agent_id: String,
    /// Checks run for this agent.
    pub total_operations: u64,
    /// Checks with no missing strict parameters.
    pub compliant_operations: u64,
    /// Non-blocking failures.
    pub warnings_issued: u64,
    /// Blocking failures.
    pub operations_blocked: u64,
    /// Failures since the last compliant operation.
    pub consecutive_failures: u64,
    /// When the agent last ran an operation.
    pub last_operation: Option<DateTime<Utc>>,
    /// `compliant_operations / total_operations`.
    pub compliance_rate: f64,
}

impl AgentCompliance {
    fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            total_operations: 0,
            compliant_operations: 0,
            warnings_issued: 0,
            operations_blocked: 0,
            consecutive_failures: 0,
            last_operation: None,
            compliance_rate: 0.0,
        }
    }

    fn update(&mut self, is_compliant: bool, was_blocked: bool) {
        self.total_operations += 1;
        if is_compliant {
            self.compliant_operations += 1;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            if was_blocked {
                self.operations_blocked += 1;
            } else {
                self.warnings_issued += 1;
            }
        }
        self.compliance_rate = self.compliant_operations as f64 / self.total_operations as f64;
        self.last_operation = Some(Utc::now());
    }
}

/// Plane-wide compliance summary.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    /// Agents with at least one tracked operation.
    pub tracked_agents: usize,
    /// Total checks across all agents.
    pub total_operations: u64,
    /// Total blocking failures.
    pub operations_blocked: u64,
    /// Per-agent records, sorted by agent id.
    pub agents: Vec<AgentCompliance>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// The enforcement gate controllers call before their facade.
pub struct ParameterEnforcementService {
    default_level: EnforcementLevel,
    // DashMap shards give the per-agent update the lock granularity the
    // compliance contract asks for.
    compliance: DashMap<String, AgentCompliance>,
}

impl ParameterEnforcementService {
    /// Gate with the given default level.
    pub fn new(default_level: EnforcementLevel) -> Self {
        Self {
            default_level,
            compliance: DashMap::new(),
        }
    }

    /// The level used when a call carries no override.
    pub fn default_level(&self) -> EnforcementLevel {
        self.default_level
    }

    /// Check `provided` against the requirements of `action`.
    ///
    /// A parameter counts as missing when it is absent, `null`, an empty
    /// string, or an empty array.
    pub fn enforce(
        &self,
        action: &str,
        provided: &Map<String, Value>,
        agent_id: Option<&str>,
        level_override: Option<EnforcementLevel>,
    ) -> EnforcementResult {
        let level = level_override.unwrap_or(self.default_level);
        if level == EnforcementLevel::Disabled {
            return EnforcementResult {
                allowed: true,
                level,
                missing_required: Vec::new(),
                missing_recommended: Vec::new(),
                message: "parameter enforcement disabled".into(),
                hints: Vec::new(),
                examples: Map::new(),
                compliance_tracked: false,
                agent_id: agent_id.map(str::to_string),
            };
        }

        let (strict, recommended) = requirements(action);
        let missing_required: Vec<String> = strict
            .iter()
            .filter(|p| is_missing(provided.get(**p)))
            .map(|p| p.to_string())
            .collect();
        let missing_recommended: Vec<String> = recommended
            .iter()
            .filter(|p| is_missing(provided.get(**p)))
            .map(|p| p.to_string())
            .collect();

        let is_compliant = missing_required.is_empty();
        let blocks = level == EnforcementLevel::Strict && !is_compliant;
        let tracked = if let Some(agent_id) = agent_id {
            self.track(agent_id, is_compliant, blocks);
            true
        } else {
            false
        };

        match level {
            EnforcementLevel::Disabled => unreachable!("handled above"),
            EnforcementLevel::Soft => {
                if !is_compliant || !missing_recommended.is_empty() {
                    info!(
                        action,
                        missing_required = ?missing_required,
                        missing_recommended = ?missing_recommended,
                        "soft enforcement: parameters missing"
                    );
                }
                EnforcementResult {
                    allowed: true,
                    level,
                    missing_required,
                    missing_recommended,
                    message: "operation allowed (soft enforcement, logging only)".into(),
                    hints: Vec::new(),
                    examples: Map::new(),
                    compliance_tracked: tracked,
                    agent_id: agent_id.map(str::to_string),
                }
            }
            EnforcementLevel::Warning => {
                let mut hints = Vec::new();
                let mut examples = Map::new();
                if !missing_required.is_empty() {
                    warn!(action, missing = ?missing_required, "missing required parameters");
                    hints.push(format!(
                        "Missing required parameters: {}",
                        missing_required.join(", ")
                    ));
                    hints.push("These parameters block the call in strict mode".into());
                    collect_templates(&missing_required, &mut examples);
                }
                if !missing_recommended.is_empty() {
                    hints.push(format!(
                        "Consider adding: {}",
                        missing_recommended.join(", ")
                    ));
                }
                EnforcementResult {
                    allowed: true,
                    level,
                    message: if missing_required.is_empty() {
                        "operation allowed".into()
                    } else {
                        "operation allowed with warnings".into()
                    },
                    missing_required,
                    missing_recommended,
                    hints,
                    examples,
                    compliance_tracked: tracked,
                    agent_id: agent_id.map(str::to_string),
                }
            }
            EnforcementLevel::Strict => {
                if is_compliant {
                    return EnforcementResult {
                        allowed: true,
                        level,
                        missing_required,
                        missing_recommended,
                        message: "all required parameters provided".into(),
                        hints: Vec::new(),
                        examples: Map::new(),
                        compliance_tracked: tracked,
                        agent_id: agent_id.map(str::to_string),
                    };
                }
                warn!(action, missing = ?missing_required, "strict enforcement blocked operation");
                let mut hints = vec![
                    format!(
                        "Operation blocked: missing required parameters for {action}: {}",
                        missing_required.join(", ")
                    ),
                    "Provide these parameters to proceed".into(),
                ];
                if !missing_recommended.is_empty() {
                    hints.push(format!(
                        "Also recommended: {}",
                        missing_recommended.join(", ")
                    ));
                }
                let mut examples = Map::new();
                collect_templates(&missing_required, &mut examples);
                if let Some(example) = example_command(action) {
                    examples.insert("example_command".into(), example);
                }
                EnforcementResult {
                    allowed: false,
                    level,
                    message: format!(
                        "operation blocked: missing required parameters ({})",
                        missing_required.join(", ")
                    ),
                    missing_required,
                    missing_recommended,
                    hints,
                    examples,
                    compliance_tracked: tracked,
                    agent_id: agent_id.map(str::to_string),
                }
            }
        }
    }

    fn track(&self, agent_id: &str, is_compliant: bool, was_blocked: bool) {
        let mut entry = self
            .compliance
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentCompliance::new(agent_id));
        entry.update(is_compliant, was_blocked);
        if entry.compliance_rate < 0.5 && entry.total_operations >= 10 {
            warn!(
                agent_id,
                compliance_rate = entry.compliance_rate,
                total_operations = entry.total_operations,
                "agent compliance below 50%"
            );
        }
    }

    /// One agent's compliance record.
    pub fn compliance_for(&self, agent_id: &str) -> Option<AgentCompliance> {
        self.compliance.get(agent_id).map(|c| c.clone())
    }

    /// Plane-wide compliance summary.
    pub fn compliance_report(&self) -> ComplianceReport {
        let mut agents: Vec<AgentCompliance> =
            self.compliance.iter().map(|e| e.value().clone()).collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        ComplianceReport {
            tracked_agents: agents.len(),
            total_operations: agents.iter().map(|a| a.total_operations).sum(),
            operations_blocked: agents.iter().map(|a| a.operations_blocked).sum(),
            agents,
        }
    }
}

impl Default for ParameterEnforcementService {
    fn default() -> Self {
        Self::new(EnforcementLevel::default())
    }
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(_) => false,
    }
}

fn collect_templates(params: &[String], examples: &mut Map<String, Value>) {
    for param in params {
        if let Some(template) = parameter_template(param) {
            examples.insert(param.clone(), template);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
