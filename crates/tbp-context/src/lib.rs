// SPDX-License-Identifier: MIT OR Apache-2.0
//! Four-level hierarchical context engine.
//!
//! Contexts hang off four scopes — global, project, branch, task — and every
//! one of them is user-scoped: a user's "global" context is global to *their*
//! data only, with an id derived deterministically from their user id.
//! [`UnifiedContextService`] is the only write path; it owns ancestor
//! auto-creation, inheritance resolution, delegation, and invalidation, so
//! nothing can bypass those by talking to a level store directly.

#![deny(unsafe_code)]

mod entities;
mod merge;
mod service;

pub use entities::{BranchContext, ContextLevel, GlobalContext, ProjectContext, TaskContext};
pub use merge::deep_merge;
pub use service::{ContextView, DelegationOutcome, UnifiedContextService};

use uuid::{uuid, Uuid};

/// Namespace for deriving per-user global-context ids.
pub const GLOBAL_CONTEXT_NAMESPACE: Uuid = uuid!("9c31a5f6-6d48-4e02-8f1b-d1f0a2c94be7");

/// Historical alias some clients still send for the global context id.
/// Always normalized to the caller's derived id; never stored.
pub const GLOBAL_SINGLETON_ALIAS: &str = "global_singleton";

/// Deterministic global-context id for a user.
///
/// Stable across restarts, distinct across users, and never the old shared
/// singleton row.
pub fn global_context_id(user_id: &str) -> Uuid {
    Uuid::new_v5(&GLOBAL_CONTEXT_NAMESPACE, user_id.as_bytes())
}
