//! The stable domain contract for the task backplane.
//!
//! Everything a controller, facade, or repository exchanges is defined here:
//! tasks, subtasks, projects, git branches, API tokens, and the closed agent
//! catalog.  All user-owned entities carry a `user_id`; no other crate is
//! allowed to invent an entity shape of its own.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The closed agent catalog and `@name` normalization.
pub mod agent;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

pub use agent::AgentName;

/// Current control-plane contract version, embedded in capability and status
/// payloads.
pub const PLANE_VERSION: &str = "tbp/v0.1";

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a [`Task`] or [`Subtask`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Todo,
    /// Actively being worked on.
    InProgress,
    /// Waiting on something external.
    Blocked,
    /// Awaiting review.
    Review,
    /// Completed.
    Done,
    /// Abandoned.
    Cancelled,
}

impl TaskStatus {
    /// Stable string form matching the wire encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Review => "review",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the wire encoding back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(Self::Todo),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "review" => Some(Self::Review),
            "done" => Some(Self::Done),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// `true` for `done` and `cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    /// Map a progress percentage onto a status: 0 → todo, 100 → done,
    /// anything in between → in_progress.
    pub fn from_progress(pct: u8) -> Self {
        match pct {
            0 => Self::Todo,
            100 => Self::Done,
            _ => Self::InProgress,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Scheduling priority of a [`Task`].
///
/// Ordering is semantic: `Low < Medium < High < Urgent < Critical`, so the
/// `next` use case can pick `max()` directly.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// Elevated priority.
    High,
    /// Needs attention now.
    Urgent,
    /// Drop everything.
    Critical,
}

impl Priority {
    /// Stable string form matching the wire encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
            Self::Critical => "critical",
        }
    }

    /// Parse the wire encoding back into a priority.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Project / GitBranch
// ---------------------------------------------------------------------------

/// A project owned by a single user.  Project names are unique per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Project name, unique within the owner's scope.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Create a project with a fresh id and `now` timestamps.
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            name: name.into(),
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A git branch within a [`Project`]; the unit that owns tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GitBranch {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Branch name, unique within `(user_id, project_id)`.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl GitBranch {
    /// Create a branch with a fresh id and `now` timestamps.
    pub fn new(
        project_id: Uuid,
        user_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            user_id: user_id.into(),
            name: name.into(),
            description: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of orchestrated work, owned by a user and attached to a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    /// Unique identifier.
    pub id: Uuid,
    /// Branch this task belongs to.  Never a task id.
    pub git_branch_id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Short imperative title.
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Lifecycle state.
    #[serde(default)]
    pub status: TaskStatus,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: Priority,
    /// Assigned agents, normalized to `@name` form.
    #[serde(default)]
    pub assignees: BTreeSet<AgentName>,
    /// Free-form labels.
    #[serde(default)]
    pub labels: BTreeSet<String>,
    /// Completion progress in `[0, 100]`.
    #[serde(default)]
    pub progress_percentage: u8,
    /// Outgoing dependency edges: this task depends on each listed task.
    #[serde(default)]
    pub dependencies: BTreeSet<Uuid>,
    /// Optional due date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    /// Optional effort estimate (free-form, e.g. `"2h"`, `"3 days"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_effort: Option<String>,
    /// Attached task context, if one was created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<Uuid>,
    /// Summary recorded at completion time.  Required to reach `done`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_summary: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a task with defaults (`todo`, `medium`) and `now` timestamps.
    pub fn new(
        git_branch_id: Uuid,
        user_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            git_branch_id,
            user_id: user_id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::default(),
            priority: Priority::default(),
            assignees: BTreeSet::new(),
            labels: BTreeSet::new(),
            progress_percentage: 0,
            dependencies: BTreeSet::new(),
            due_date: None,
            estimated_effort: None,
            context_id: None,
            completion_summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Assignees a subtask created without its own list inherits.
    pub fn inherited_assignees(&self) -> BTreeSet<AgentName> {
        self.assignees.clone()
    }

    /// Bump `updated_at` to now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// Subtask
// ---------------------------------------------------------------------------

/// A child unit of a [`Task`].  The parent is always a task, never a branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Subtask {
    /// Unique identifier.
    pub id: Uuid,
    /// Parent task.
    pub task_id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Short imperative title.
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Lifecycle state.
    #[serde(default)]
    pub status: TaskStatus,
    /// Completion progress in `[0, 100]`.
    #[serde(default)]
    pub progress_percentage: u8,
    /// Assigned agents, normalized to `@name` form.
    #[serde(default)]
    pub assignees: BTreeSet<AgentName>,
    /// Noteworthy discoveries recorded while working.
    #[serde(default)]
    pub insights_found: Vec<String>,
    /// Summary recorded at completion time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_summary: Option<String>,
    /// When the subtask reached `done`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Subtask {
    /// Create a subtask with defaults and `now` timestamps.
    pub fn new(task_id: Uuid, user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id,
            user_id: user_id.into(),
            title: title.into(),
            description: String::new(),
            status: TaskStatus::default(),
            progress_percentage: 0,
            assignees: BTreeSet::new(),
            insights_found: Vec::new(),
            completion_summary: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a progress update, deriving the status from the percentage.
    pub fn apply_progress(&mut self, pct: u8) {
        self.progress_percentage = pct.min(100);
        self.status = TaskStatus::from_progress(self.progress_percentage);
        if self.status == TaskStatus::Done && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        self.updated_at = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// ApiToken
// ---------------------------------------------------------------------------

/// A hashed API token.  The plaintext never appears in storage; only the
/// SHA-256 hash is kept, and `token_hash` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ApiToken {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Human-assigned token name.
    pub name: String,
    /// Hex-encoded SHA-256 of the plaintext token.
    pub token_hash: String,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Expiry, if the token is time-limited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Last successful validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    /// Number of successful validations.
    #[serde(default)]
    pub usage_count: u64,
    /// Maximum validations per minute, if rate-limited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    /// `false` once revoked.
    pub is_active: bool,
}

impl ApiToken {
    /// `true` when the token is active and not past its expiry.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// The kind of repository access being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccessOp {
    /// Row creation.
    Create,
    /// Single-row read.
    Read,
    /// Row mutation.
    Update,
    /// Row removal.
    Delete,
    /// Multi-row read.
    List,
}

impl AccessOp {
    /// Stable string form matching the wire encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }
}

/// One audited repository access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuditRecord {
    /// User on whose behalf the access ran (absent during bootstrap).
    pub user_id: Option<String>,
    /// Entity table touched (e.g. `"task"`).
    pub entity_type: String,
    /// Row id, when the access targets a single row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Kind of access.
    pub op: AccessOp,
    /// When the access ran.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Domain metadata
// ---------------------------------------------------------------------------

/// Arbitrary key-value metadata attached to entities and events,
/// deterministic in ordering.
pub type Metadata = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
