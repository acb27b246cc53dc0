// SPDX-License-Identifier: MIT OR Apache-2.0
//! Project and branch facades.
//!
//! Thin by design: both aggregates are simple CRUD with uniqueness rules
//! living in the repositories.  They exist so controllers and seeding paths
//! go through one layer that emits domain events, same as the heavy
//! aggregates.

use crate::events::{domain_event, publish_domain_event};
use serde_json::json;
use std::sync::Arc;
use tbp_core::{GitBranch, Project};
use tbp_error::TbpError;
use tbp_events::EventBus;
use tbp_storage::{BranchRepository, ProjectRepository};
use uuid::Uuid;

/// Application facade for the project aggregate.
pub struct ProjectFacade {
    projects: Arc<dyn ProjectRepository>,
    bus: EventBus,
    user_id: String,
}

impl ProjectFacade {
    /// Assemble a facade from scoped collaborators.
    pub fn new(projects: Arc<dyn ProjectRepository>, bus: EventBus, user_id: String) -> Self {
        Self {
            projects,
            bus,
            user_id,
        }
    }

    /// Create a project with a per-user unique name.
    pub async fn create_project(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<Project, TbpError> {
        let mut project = Project::new(self.user_id.clone(), name);
        project.description = description.unwrap_or_default();
        let project = self.projects.create(project).await?;
        publish_domain_event(
            &self.bus,
            domain_event::PROJECT_CREATED,
            json!({"project_id": project.id, "name": project.name}),
            &self.user_id,
        );
        Ok(project)
    }

    /// One project the caller owns.
    pub async fn get_project(&self, id: Uuid) -> Result<Project, TbpError> {
        self.projects.get(id).await
    }

    /// All projects the caller owns.
    pub async fn list_projects(&self) -> Result<Vec<Project>, TbpError> {
        self.projects.list().await
    }

    /// Delete a project the caller owns.
    pub async fn delete_project(&self, id: Uuid) -> Result<Project, TbpError> {
        self.projects.delete(id).await
    }
}

/// Application facade for the git-branch aggregate.
pub struct BranchFacade {
    branches: Arc<dyn BranchRepository>,
    bus: EventBus,
    user_id: String,
}

impl BranchFacade {
    /// Assemble a facade from scoped collaborators.
    pub fn new(branches: Arc<dyn BranchRepository>, bus: EventBus, user_id: String) -> Self {
        Self {
            branches,
            bus,
            user_id,
        }
    }

    /// Create a branch under an owned project.
    pub async fn create_branch(
        &self,
        project_id: Uuid,
        name: &str,
        description: Option<String>,
    ) -> Result<GitBranch, TbpError> {
        let mut branch = GitBranch::new(project_id, self.user_id.clone(), name);
        branch.description = description.unwrap_or_default();
        let branch = self.branches.create(branch).await?;
        publish_domain_event(
            &self.bus,
            domain_event::BRANCH_CREATED,
            json!({"git_branch_id": branch.id, "project_id": project_id}),
            &self.user_id,
        );
        Ok(branch)
    }

    /// One branch the caller owns.
    pub async fn get_branch(&self, id: Uuid) -> Result<GitBranch, TbpError> {
        self.branches.get(id).await
    }

    /// All branches of one owned project.
    pub async fn list_branches(&self, project_id: Uuid) -> Result<Vec<GitBranch>, TbpError> {
        self.branches.list_by_project(project_id).await
    }

    /// Delete a branch the caller owns.
    pub async fn delete_branch(&self, id: Uuid) -> Result<GitBranch, TbpError> {
        self.branches.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tbp_error::ErrorCode;
    use tbp_storage::{InvalidationEmitter, StorageEngine};

    fn bus() -> EventBus {
        let bus = EventBus::default();
        bus.start();
        bus
    }

    #[tokio::test]
    async fn project_then_branch_roundtrip() {
        let engine = StorageEngine::new(InvalidationEmitter::disabled());
        let projects = ProjectFacade::new(engine.projects().with_user("user-a"), bus(), "user-a".into());
        let branches = BranchFacade::new(engine.branches().with_user("user-a"), bus(), "user-a".into());

        let project = projects.create_project("plane", None).await.unwrap();
        let branch = branches
            .create_branch(project.id, "main", Some("trunk".into()))
            .await
            .unwrap();

        assert_eq!(branch.project_id, project.id);
        assert_eq!(branches.list_branches(project.id).await.unwrap().len(), 1);
        assert_eq!(projects.get_project(project.id).await.unwrap().name, "plane");
    }

    #[tokio::test]
    async fn duplicate_project_name_conflicts() {
        let engine = StorageEngine::new(InvalidationEmitter::disabled());
        let projects = ProjectFacade::new(engine.projects().with_user("user-a"), bus(), "user-a".into());
        projects.create_project("plane", None).await.unwrap();
        let err = projects.create_project("plane", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
    }
}
