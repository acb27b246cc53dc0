// SPDX-License-Identifier: MIT OR Apache-2.0
//! Agent inheritance for subtasks.

use std::collections::BTreeSet;
use tbp_core::agent::validate_assignees;
use tbp_core::{AgentName, Task};
use tbp_error::TbpError;
use tracing::debug;

/// Resolves the assignee list for a new subtask.
///
/// A subtask created without its own assignees inherits the parent task's
/// list; an explicit list is validated against the catalog and normalized.
/// A parent with no assignees yields an empty set — inheritance never
/// invents agents.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentInheritanceService;

impl AgentInheritanceService {
    /// Resolve assignees for a subtask under `parent`.
    pub fn resolve_assignees(
        &self,
        parent: &Task,
        requested: Option<&[String]>,
    ) -> Result<BTreeSet<AgentName>, TbpError> {
        match requested {
            Some(list) if !list.is_empty() => validate_assignees(list),
            _ => {
                let inherited = parent.inherited_assignees();
                debug!(
                    task_id = %parent.id,
                    count = inherited.len(),
                    "subtask inherits parent assignees"
                );
                Ok(inherited)
            }
        }
    }
}
