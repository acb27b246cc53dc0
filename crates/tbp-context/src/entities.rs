// SPDX-License-Identifier: MIT OR Apache-2.0
//! Context rows, one struct per level.
//!
//! Known settings keys live in typed slots; anything else is tucked into a
//! `_custom` slot on write and restored on read so round-trips are lossless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tbp_storage::UserOwned;
use uuid::Uuid;

/// The four context scopes, ordered root-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextLevel {
    /// Per-user root scope.
    Global,
    /// One per project.
    Project,
    /// One per git branch.
    Branch,
    /// One per task.
    Task,
}

impl ContextLevel {
    /// Stable string form matching the wire encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Project => "project",
            Self::Branch => "branch",
            Self::Task => "task",
        }
    }

    /// Parse the wire encoding back into a level.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "global" => Some(Self::Global),
            "project" => Some(Self::Project),
            "branch" => Some(Self::Branch),
            "task" => Some(Self::Task),
            _ => None,
        }
    }

    /// The scope this one inherits from (`None` for global).
    pub fn parent(&self) -> Option<Self> {
        match self {
            Self::Global => None,
            Self::Project => Some(Self::Global),
            Self::Branch => Some(Self::Project),
            Self::Task => Some(Self::Branch),
        }
    }
}

impl fmt::Display for ContextLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known keys of a [`ProjectContext`]'s settings.
pub(crate) const PROJECT_KNOWN_KEYS: &[&str] = &[
    "team_preferences",
    "technology_stack",
    "project_workflow",
    "local_standards",
];

/// Known keys of a [`BranchContext`]'s settings.
pub(crate) const BRANCH_KNOWN_KEYS: &[&str] = &[
    "branch_workflow",
    "branch_standards",
    "agent_assignments",
];

/// Known keys of a [`TaskContext`]'s data.
pub(crate) const TASK_KNOWN_KEYS: &[&str] = &[
    "execution_context",
    "discovered_patterns",
    "local_decisions",
    "implementation_notes",
];

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// The per-user root context.
///
/// "Global" means global to one user's data.  The id is always
/// [`crate::global_context_id`] of the owner — one row per user, never a
/// shared singleton.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalContext {
    /// Derived id (`global_context_id(user_id)`).
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Display name for the owning organization.
    #[serde(default)]
    pub organization_name: String,
    /// Org-wide autonomy rules.
    #[serde(default = "empty_object")]
    pub autonomous_rules: Value,
    /// Org-wide security policies.
    #[serde(default = "empty_object")]
    pub security_policies: Value,
    /// Org-wide coding standards.
    #[serde(default = "empty_object")]
    pub coding_standards: Value,
    /// Workflow templates; also hosts the `_custom` slot.
    #[serde(default = "empty_object")]
    pub workflow_templates: Value,
    /// Delegation rules.
    #[serde(default = "empty_object")]
    pub delegation_rules: Value,
    /// Engine bookkeeping (`auto_created`, delegations, …).
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Monotonic version, bumped per update.
    #[serde(default)]
    pub version: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl GlobalContext {
    /// Empty context for `user_id` with the derived id.
    pub fn empty(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: crate::global_context_id(user_id),
            user_id: user_id.to_string(),
            organization_name: String::new(),
            autonomous_rules: empty_object(),
            security_policies: empty_object(),
            coding_standards: empty_object(),
            workflow_templates: empty_object(),
            delegation_rules: empty_object(),
            metadata: BTreeMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Split a settings object into the typed slots, tucking unknown keys
    /// into `workflow_templates._custom`.
    pub fn apply_settings(&mut self, settings: Map<String, Value>) {
        let mut custom = Map::new();
        for (key, value) in settings {
            match key.as_str() {
                "organization_name" => {
                    if let Value::String(name) = value {
                        self.organization_name = name;
                    }
                }
                "autonomous_rules" => crate::deep_merge(&mut self.autonomous_rules, &value),
                "security_policies" => crate::deep_merge(&mut self.security_policies, &value),
                "coding_standards" => crate::deep_merge(&mut self.coding_standards, &value),
                "workflow_templates" => crate::deep_merge(&mut self.workflow_templates, &value),
                "delegation_rules" => crate::deep_merge(&mut self.delegation_rules, &value),
                _ => {
                    custom.insert(key, value);
                }
            }
        }
        if !custom.is_empty() {
            let slot = self
                .workflow_templates
                .as_object_mut()
                .expect("workflow_templates is always an object");
            let existing = slot
                .entry("_custom")
                .or_insert_with(|| Value::Object(Map::new()));
            crate::deep_merge(existing, &Value::Object(custom));
        }
    }

    /// Reassemble the settings view, restoring `_custom` keys to the top
    /// level.
    pub fn settings(&self) -> Map<String, Value> {
        let mut out = Map::new();
        if !self.organization_name.is_empty() {
            out.insert(
                "organization_name".into(),
                Value::String(self.organization_name.clone()),
            );
        }
        let mut workflow_templates = self.workflow_templates.clone();
        let custom = workflow_templates
            .as_object_mut()
            .and_then(|m| m.remove("_custom"));

        for (key, value) in [
            ("autonomous_rules", self.autonomous_rules.clone()),
            ("security_policies", self.security_policies.clone()),
            ("coding_standards", self.coding_standards.clone()),
            ("workflow_templates", workflow_templates),
            ("delegation_rules", self.delegation_rules.clone()),
        ] {
            if value.as_object().is_some_and(|m| !m.is_empty()) {
                out.insert(key.into(), value);
            }
        }
        if let Some(Value::Object(custom)) = custom {
            for (key, value) in custom {
                out.insert(key, value);
            }
        }
        out
    }
}

impl UserOwned for GlobalContext {
    const ENTITY_TYPE: &'static str = "context";

    fn id(&self) -> Uuid {
        self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn set_user_id(&mut self, user_id: String) {
        self.user_id = user_id;
    }
}

macro_rules! leveled_context {
    (
        $(#[$doc:meta])*
        $name:ident, settings_field: $settings:ident $(, parent_field: $parent:ident)?
    ) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            /// Context id — equal to the owning entity's id.
            pub id: Uuid,
            $(
                /// Parent scope id.
                pub $parent: Uuid,
            )?
            /// Owning user.
            pub user_id: String,
            /// Settings object; unknown keys live under `_custom`.
            #[serde(default = "empty_object")]
            pub $settings: Value,
            /// Engine bookkeeping (`auto_created`, delegations, …).
            #[serde(default)]
            pub metadata: BTreeMap<String, Value>,
            /// Monotonic version, bumped per update.
            #[serde(default)]
            pub version: u64,
            /// Creation timestamp.
            pub created_at: DateTime<Utc>,
            /// Last-update timestamp.
            pub updated_at: DateTime<Utc>,
        }

        impl UserOwned for $name {
            const ENTITY_TYPE: &'static str = "context";

            fn id(&self) -> Uuid {
                self.id
            }

            fn user_id(&self) -> &str {
                &self.user_id
            }

            fn set_user_id(&mut self, user_id: String) {
                self.user_id = user_id;
            }
        }
    };
}

leveled_context! {
    /// Project-scope context; id equals the project id.
    ProjectContext, settings_field: project_settings
}

leveled_context! {
    /// Branch-scope context; id equals the branch id.
    BranchContext, settings_field: branch_settings, parent_field: project_id
}

/// Task-scope context; id equals the task id.  Progress (insights and
/// completion notes) rides in its own slot next to the data payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Context id — equal to the task id.
    pub id: Uuid,
    /// Parent branch id.
    pub branch_id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Data payload; unknown keys live under `_custom`.
    #[serde(default = "empty_object")]
    pub task_data: Value,
    /// Progress payload (insights, completion notes).
    #[serde(default = "empty_object")]
    pub progress: Value,
    /// Engine bookkeeping (`auto_created`, delegations, …).
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Monotonic version, bumped per update.
    #[serde(default)]
    pub version: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl UserOwned for TaskContext {
    const ENTITY_TYPE: &'static str = "context";

    fn id(&self) -> Uuid {
        self.id
    }

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn set_user_id(&mut self, user_id: String) {
        self.user_id = user_id;
    }
}

impl ProjectContext {
    /// Empty context for a project.
    pub fn empty(project_id: Uuid, user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: project_id,
            user_id: user_id.to_string(),
            project_settings: empty_object(),
            metadata: BTreeMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl BranchContext {
    /// Empty context for a branch under `project_id`.
    pub fn empty(branch_id: Uuid, project_id: Uuid, user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: branch_id,
            project_id,
            user_id: user_id.to_string(),
            branch_settings: empty_object(),
            metadata: BTreeMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

impl TaskContext {
    /// Empty context for a task under `branch_id`.
    pub fn empty(task_id: Uuid, branch_id: Uuid, user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: task_id,
            branch_id,
            user_id: user_id.to_string(),
            task_data: empty_object(),
            progress: empty_object(),
            metadata: BTreeMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
