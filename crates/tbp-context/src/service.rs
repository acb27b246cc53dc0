// SPDX-License-Identifier: MIT OR Apache-2.0
//! The unified context service — the only context write path.
//!
//! Owns id normalization, atomic ancestor auto-creation with rollback,
//! inheritance resolution, delegation, and invalidation emission.  The
//! per-level stores are crate-private on purpose: a direct write to a level
//! store would bypass all of the above.

use crate::entities::{
    BranchContext, ContextLevel, GlobalContext, ProjectContext, TaskContext, BRANCH_KNOWN_KEYS,
    PROJECT_KNOWN_KEYS, TASK_KNOWN_KEYS,
};
use crate::merge::{deep_merge, pack_settings, unpack_settings};
use crate::{global_context_id, GLOBAL_SINGLETON_ALIAS};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tbp_cache::InvalidationOp;
use tbp_error::{ErrorCode, TbpError};
use tbp_storage::{AuditLog, BranchRepository, InvalidationEmitter, ScopedTable};
use tracing::{debug, info};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// View types
// ---------------------------------------------------------------------------

/// Read view of a context at any level.
#[derive(Debug, Clone, Serialize)]
pub struct ContextView {
    /// Context id.
    pub id: Uuid,
    /// Level of this view.
    pub level: ContextLevel,
    /// Owning user.
    pub user_id: String,
    /// Settings (merged with ancestors when `inherited`).
    pub settings: Map<String, Value>,
    /// Progress payload (task level only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<Value>,
    /// Engine bookkeeping.
    pub metadata: BTreeMap<String, Value>,
    /// Row version.
    pub version: u64,
    /// Whether ancestor settings were merged in.
    pub inherited: bool,
    /// Parent project, for branch contexts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<Uuid>,
    /// Parent branch, for task contexts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Both sides of a completed delegation.
#[derive(Debug, Clone, Serialize)]
pub struct DelegationOutcome {
    /// The context the fields left.
    pub source: ContextView,
    /// The context the fields landed in.
    pub target: ContextView,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// The authoritative context engine.
pub struct UnifiedContextService {
    global: ScopedTable<GlobalContext>,
    project: ScopedTable<ProjectContext>,
    branch: ScopedTable<BranchContext>,
    task: ScopedTable<TaskContext>,
    branches: Arc<dyn BranchRepository>,
    emitter: InvalidationEmitter,
    user_id: Option<String>,
}

impl UnifiedContextService {
    /// Bootstrap (unscoped) service.  Scope with
    /// [`UnifiedContextService::with_user`] before serving requests.
    ///
    /// The level stores share `audit` but emit no invalidations themselves;
    /// the service emits with level and propagation info the stores lack.
    pub fn new(
        audit: AuditLog,
        branches: Arc<dyn BranchRepository>,
        emitter: InvalidationEmitter,
    ) -> Self {
        Self {
            global: ScopedTable::new(audit.clone(), InvalidationEmitter::disabled()),
            project: ScopedTable::new(audit.clone(), InvalidationEmitter::disabled()),
            branch: ScopedTable::new(audit.clone(), InvalidationEmitter::disabled()),
            task: ScopedTable::new(audit, InvalidationEmitter::disabled()),
            branches,
            emitter,
            user_id: None,
        }
    }

    /// A copy of this service scoped to `user_id`.  Cheap; shares stores.
    pub fn with_user(&self, user_id: &str) -> Self {
        Self {
            global: self.global.with_user(user_id),
            project: self.project.with_user(user_id),
            branch: self.branch.with_user(user_id),
            task: self.task.with_user(user_id),
            branches: self.branches.with_user(user_id),
            emitter: self.emitter.clone(),
            user_id: Some(user_id.to_string()),
        }
    }

    fn require_user(&self) -> Result<&str, TbpError> {
        self.user_id
            .as_deref()
            .ok_or_else(|| TbpError::internal("context service used without a user scope"))
    }

    /// Normalize a caller-supplied context id for a level.
    ///
    /// The global level derives the id from the caller — the legacy
    /// `"global_singleton"` alias (or any other value) maps to the same
    /// per-user UUID and is never stored.
    pub fn normalize_id(&self, level: ContextLevel, raw: &str) -> Result<Uuid, TbpError> {
        match level {
            ContextLevel::Global => Ok(global_context_id(self.require_user()?)),
            _ => {
                if raw == GLOBAL_SINGLETON_ALIAS {
                    return Err(TbpError::new(
                        ErrorCode::ValidationError,
                        format!("'{GLOBAL_SINGLETON_ALIAS}' is only meaningful at the global level"),
                    ));
                }
                raw.parse()
                    .map_err(|_| TbpError::invalid_parameter("context_id", "a UUID"))
            }
        }
    }

    fn emit(&self, id: Uuid, op: InvalidationOp, level: ContextLevel, propagate: bool) {
        self.emitter.emit(
            "context",
            id,
            op,
            self.user_id.as_deref(),
            Some(level.as_str()),
            propagate,
        );
    }

    // -- creation --------------------------------------------------------

    /// Create a context, materializing any missing ancestors first.
    ///
    /// The whole chain is atomic: if any step fails, contexts created along
    /// the way are rolled back.  Every row this call materializes (the
    /// target included) carries `metadata.auto_created = true`.
    pub async fn create_context(
        &self,
        level: ContextLevel,
        context_id: &str,
        data: Value,
    ) -> Result<ContextView, TbpError> {
        let user = self.require_user()?.to_string();
        let id = self.normalize_id(level, context_id)?;
        let data = as_object(data)?;

        let mut created: Vec<(ContextLevel, Uuid)> = Vec::new();
        let result = self
            .create_chain(level, id, data, &user, &mut created)
            .await;

        match result {
            Ok(view) => {
                for (created_level, created_id) in &created {
                    self.emit(*created_id, InvalidationOp::Create, *created_level, false);
                }
                info!(
                    level = %level,
                    id = %id,
                    ancestors = created.len().saturating_sub(1),
                    "context created"
                );
                Ok(view)
            }
            Err(err) => {
                // Unwind the partial chain, deepest first.
                for (created_level, created_id) in created.into_iter().rev() {
                    let _ = match created_level {
                        ContextLevel::Global => self.global.remove(created_id).await.map(|_| ()),
                        ContextLevel::Project => self.project.remove(created_id).await.map(|_| ()),
                        ContextLevel::Branch => self.branch.remove(created_id).await.map(|_| ()),
                        ContextLevel::Task => self.task.remove(created_id).await.map(|_| ()),
                    };
                }
                Err(err)
            }
        }
    }

    async fn create_chain(
        &self,
        level: ContextLevel,
        id: Uuid,
        data: Map<String, Value>,
        user: &str,
        created: &mut Vec<(ContextLevel, Uuid)>,
    ) -> Result<ContextView, TbpError> {
        match level {
            ContextLevel::Global => {
                if self.global.find(id).await.is_some() {
                    return Err(already_exists(ContextLevel::Global));
                }
                let mut ctx = GlobalContext::empty(user);
                ctx.apply_settings(data);
                mark_auto_created(&mut ctx.metadata);
                let ctx = self.global.insert(ctx).await?;
                created.push((ContextLevel::Global, ctx.id));
                Ok(self.view_global(&ctx, false))
            }
            ContextLevel::Project => {
                self.ensure_global(user, created).await?;
                if self.project.find(id).await.is_some() {
                    return Err(already_exists(ContextLevel::Project));
                }
                let mut ctx = ProjectContext::empty(id, user);
                pack_settings(&mut ctx.project_settings, data, PROJECT_KNOWN_KEYS);
                mark_auto_created(&mut ctx.metadata);
                let ctx = self.project.insert(ctx).await?;
                created.push((ContextLevel::Project, ctx.id));
                Ok(self.view_project(&ctx, false))
            }
            ContextLevel::Branch => {
                let project_id = self.resolve_branch_project(id, &data).await?;
                self.ensure_global(user, created).await?;
                self.ensure_project(project_id, user, created).await?;
                if self.branch.find(id).await.is_some() {
                    return Err(already_exists(ContextLevel::Branch));
                }
                let mut ctx = BranchContext::empty(id, project_id, user);
                let mut data = data;
                data.remove("project_id");
                pack_settings(&mut ctx.branch_settings, data, BRANCH_KNOWN_KEYS);
                mark_auto_created(&mut ctx.metadata);
                let ctx = self.branch.insert(ctx).await?;
                created.push((ContextLevel::Branch, ctx.id));
                Ok(self.view_branch(&ctx, false))
            }
            ContextLevel::Task => {
                let branch_id = parse_parent_id(&data, "branch_id")?.ok_or_else(|| {
                    TbpError::new(
                        ErrorCode::ValidationError,
                        "task context creation requires branch_id",
                    )
                    .with_field("branch_id")
                })?;
                // The branch entity is the authority for the project id.
                let branch = self.branches.get(branch_id).await?;
                self.ensure_global(user, created).await?;
                self.ensure_project(branch.project_id, user, created).await?;
                self.ensure_branch(branch_id, branch.project_id, user, created)
                    .await?;
                if self.task.find(id).await.is_some() {
                    return Err(already_exists(ContextLevel::Task));
                }
                let mut ctx = TaskContext::empty(id, branch_id, user);
                let mut data = data;
                data.remove("branch_id");
                if let Some(progress) = data.remove("progress") {
                    deep_merge(&mut ctx.progress, &progress);
                }
                pack_settings(&mut ctx.task_data, data, TASK_KNOWN_KEYS);
                mark_auto_created(&mut ctx.metadata);
                let ctx = self.task.insert(ctx).await?;
                created.push((ContextLevel::Task, ctx.id));
                Ok(self.view_task(&ctx, false))
            }
        }
    }

    async fn resolve_branch_project(
        &self,
        branch_id: Uuid,
        data: &Map<String, Value>,
    ) -> Result<Uuid, TbpError> {
        if let Some(project_id) = parse_parent_id(data, "project_id")? {
            return Ok(project_id);
        }
        // Fall back to the branch entity when the caller omitted it.
        match self.branches.get(branch_id).await {
            Ok(branch) => Ok(branch.project_id),
            Err(_) => Err(TbpError::new(
                ErrorCode::ValidationError,
                "branch context creation requires project_id",
            )
            .with_field("project_id")),
        }
    }

    async fn ensure_global(
        &self,
        user: &str,
        created: &mut Vec<(ContextLevel, Uuid)>,
    ) -> Result<Uuid, TbpError> {
        let id = global_context_id(user);
        if self.global.find(id).await.is_some() {
            return Ok(id);
        }
        let mut ctx = GlobalContext::empty(user);
        mark_auto_created(&mut ctx.metadata);
        self.global.insert(ctx).await?;
        created.push((ContextLevel::Global, id));
        debug!(user_id = user, id = %id, "global context auto-created");
        Ok(id)
    }

    async fn ensure_project(
        &self,
        project_id: Uuid,
        user: &str,
        created: &mut Vec<(ContextLevel, Uuid)>,
    ) -> Result<(), TbpError> {
        if self.project.find(project_id).await.is_some() {
            return Ok(());
        }
        let mut ctx = ProjectContext::empty(project_id, user);
        mark_auto_created(&mut ctx.metadata);
        self.project.insert(ctx).await?;
        created.push((ContextLevel::Project, project_id));
        Ok(())
    }

    async fn ensure_branch(
        &self,
        branch_id: Uuid,
        project_id: Uuid,
        user: &str,
        created: &mut Vec<(ContextLevel, Uuid)>,
    ) -> Result<(), TbpError> {
        if self.branch.find(branch_id).await.is_some() {
            return Ok(());
        }
        let mut ctx = BranchContext::empty(branch_id, project_id, user);
        mark_auto_created(&mut ctx.metadata);
        self.branch.insert(ctx).await?;
        created.push((ContextLevel::Branch, branch_id));
        Ok(())
    }

    // -- reads -----------------------------------------------------------

    /// Fetch one context; with `include_inherited`, ancestor settings are
    /// deep-merged underneath the row's own (never across users — the
    /// stores are scoped).
    pub async fn get_context(
        &self,
        level: ContextLevel,
        context_id: &str,
        include_inherited: bool,
    ) -> Result<ContextView, TbpError> {
        self.require_user()?;
        let id = self.normalize_id(level, context_id)?;
        let mut view = match level {
            ContextLevel::Global => {
                let ctx = self.get_global(id).await?;
                self.view_global(&ctx, false)
            }
            ContextLevel::Project => {
                let ctx = self.project.get(id).await?;
                self.view_project(&ctx, false)
            }
            ContextLevel::Branch => {
                let ctx = self.branch.get(id).await?;
                self.view_branch(&ctx, false)
            }
            ContextLevel::Task => {
                let ctx = self.task.get(id).await?;
                self.view_task(&ctx, false)
            }
        };

        if include_inherited {
            let chain = self.ancestor_settings(level, &view).await;
            let mut merged = Value::Object(Map::new());
            for settings in chain {
                deep_merge(&mut merged, &Value::Object(settings));
            }
            deep_merge(&mut merged, &Value::Object(view.settings.clone()));
            view.settings = merged
                .as_object()
                .cloned()
                .unwrap_or_default();
            view.inherited = true;
        }
        Ok(view)
    }

    async fn get_global(&self, id: Uuid) -> Result<GlobalContext, TbpError> {
        self.global.get(id).await
    }

    /// Ancestor settings root-first, skipping levels with no row yet.
    async fn ancestor_settings(
        &self,
        level: ContextLevel,
        view: &ContextView,
    ) -> Vec<Map<String, Value>> {
        let mut chain = Vec::new();
        let Ok(user) = self.require_user() else {
            return chain;
        };

        let (mut project_id, mut branch_id) = (view.project_id, view.branch_id);
        if level == ContextLevel::Task {
            if let Some(branch_id) = branch_id {
                if let Some(branch_ctx) = self.branch.find(branch_id).await {
                    project_id = Some(branch_ctx.project_id);
                }
            }
        }
        if level == ContextLevel::Global {
            return chain;
        }

        if let Some(global) = self.global.find(global_context_id(user)).await {
            chain.push(global.settings());
        }
        if matches!(level, ContextLevel::Branch | ContextLevel::Task) {
            if let Some(project_id) = project_id {
                if let Some(project) = self.project.find(project_id).await {
                    chain.push(unpack_settings(&project.project_settings));
                }
            }
        }
        if level == ContextLevel::Task {
            if let Some(branch_id) = branch_id.take() {
                if let Some(branch) = self.branch.find(branch_id).await {
                    chain.push(unpack_settings(&branch.branch_settings));
                }
            }
        }
        chain
    }

    /// All contexts at one level the caller owns.
    pub async fn list_contexts(&self, level: ContextLevel) -> Result<Vec<ContextView>, TbpError> {
        self.require_user()?;
        Ok(match level {
            ContextLevel::Global => self
                .global
                .list_where(|_| true)
                .await
                .iter()
                .map(|c| self.view_global(c, false))
                .collect(),
            ContextLevel::Project => self
                .project
                .list_where(|_| true)
                .await
                .iter()
                .map(|c| self.view_project(c, false))
                .collect(),
            ContextLevel::Branch => self
                .branch
                .list_where(|_| true)
                .await
                .iter()
                .map(|c| self.view_branch(c, false))
                .collect(),
            ContextLevel::Task => self
                .task
                .list_where(|_| true)
                .await
                .iter()
                .map(|c| self.view_task(c, false))
                .collect(),
        })
    }

    // -- updates ---------------------------------------------------------

    /// Merge `data` into a context's settings.  With `propagate_changes`,
    /// cached views of every descendant are invalidated too.
    pub async fn update_context(
        &self,
        level: ContextLevel,
        context_id: &str,
        data: Value,
        propagate_changes: bool,
    ) -> Result<ContextView, TbpError> {
        self.require_user()?;
        let id = self.normalize_id(level, context_id)?;
        let data = as_object(data)?;

        let view = match level {
            ContextLevel::Global => {
                let ctx = self
                    .global
                    .update(id, |ctx| {
                        ctx.apply_settings(data);
                        ctx.version += 1;
                        ctx.updated_at = Utc::now();
                    })
                    .await?;
                self.view_global(&ctx, false)
            }
            ContextLevel::Project => {
                let ctx = self
                    .project
                    .update(id, |ctx| {
                        pack_settings(&mut ctx.project_settings, data, PROJECT_KNOWN_KEYS);
                        ctx.version += 1;
                        ctx.updated_at = Utc::now();
                    })
                    .await?;
                self.view_project(&ctx, false)
            }
            ContextLevel::Branch => {
                let ctx = self
                    .branch
                    .update(id, |ctx| {
                        pack_settings(&mut ctx.branch_settings, data, BRANCH_KNOWN_KEYS);
                        ctx.version += 1;
                        ctx.updated_at = Utc::now();
                    })
                    .await?;
                self.view_branch(&ctx, false)
            }
            ContextLevel::Task => {
                let ctx = self
                    .task
                    .update(id, |ctx| {
                        let mut data = data;
                        if let Some(progress) = data.remove("progress") {
                            deep_merge(&mut ctx.progress, &progress);
                        }
                        pack_settings(&mut ctx.task_data, data, TASK_KNOWN_KEYS);
                        ctx.version += 1;
                        ctx.updated_at = Utc::now();
                    })
                    .await?;
                self.view_task(&ctx, false)
            }
        };

        self.emit(id, InvalidationOp::Update, level, propagate_changes);
        Ok(view)
    }

    /// Delete one context.  The subtree's cached views are always
    /// invalidated — a dangling merged view would resurrect deleted data.
    pub async fn delete_context(
        &self,
        level: ContextLevel,
        context_id: &str,
    ) -> Result<(), TbpError> {
        self.require_user()?;
        let id = self.normalize_id(level, context_id)?;
        match level {
            ContextLevel::Global => self.global.remove(id).await.map(|_| ())?,
            ContextLevel::Project => self.project.remove(id).await.map(|_| ())?,
            ContextLevel::Branch => self.branch.remove(id).await.map(|_| ())?,
            ContextLevel::Task => self.task.remove(id).await.map(|_| ())?,
        }
        self.emit(id, InvalidationOp::Delete, level, true);
        Ok(())
    }

    /// Append an insight to a task context's progress slot.
    pub async fn add_insight(
        &self,
        task_context_id: &str,
        content: &str,
        category: Option<&str>,
        importance: Option<&str>,
    ) -> Result<ContextView, TbpError> {
        self.require_user()?;
        let id = self.normalize_id(ContextLevel::Task, task_context_id)?;
        let insight = json!({
            "content": content,
            "category": category.unwrap_or("general"),
            "importance": importance.unwrap_or("medium"),
            "recorded_at": Utc::now(),
        });
        let ctx = self
            .task
            .update(id, |ctx| {
                let progress = ctx
                    .progress
                    .as_object_mut()
                    .expect("progress is always an object");
                progress
                    .entry("insights")
                    .or_insert_with(|| Value::Array(Vec::new()))
                    .as_array_mut()
                    .expect("insights is always an array")
                    .push(insight);
                ctx.version += 1;
                ctx.updated_at = Utc::now();
            })
            .await?;
        self.emit(id, InvalidationOp::Update, ContextLevel::Task, false);
        Ok(self.view_task(&ctx, false))
    }

    // -- delegation ------------------------------------------------------

    /// Move `fields` from a context up to an ancestor level, recording the
    /// delegation in the source's metadata and invalidating the target's
    /// subtree.
    pub async fn delegate(
        &self,
        level: ContextLevel,
        context_id: &str,
        delegate_to: ContextLevel,
        fields: &[String],
    ) -> Result<DelegationOutcome, TbpError> {
        let user = self.require_user()?.to_string();
        if fields.is_empty() {
            return Err(TbpError::new(
                ErrorCode::ValidationError,
                "delegation requires at least one field",
            )
            .with_field("delegate_fields"));
        }
        if !is_proper_ancestor(delegate_to, level) {
            return Err(TbpError::new(
                ErrorCode::ValidationError,
                format!("cannot delegate from {level} to {delegate_to}"),
            )
            .with_expected("a higher level (task → branch → project → global)"));
        }
        let id = self.normalize_id(level, context_id)?;

        // Resolve the target and check the fields exist before mutating
        // anything, so a failed resolution cannot lose source data.
        let source_preview = self.get_context(level, context_id, false).await?;
        if !fields.iter().any(|f| source_preview.settings.contains_key(f)) {
            return Err(TbpError::new(
                ErrorCode::ValidationError,
                "none of the requested fields exist on the source context",
            )
            .with_context("fields", fields));
        }
        let parent_ref = source_preview.project_id.or(source_preview.branch_id);
        let target_id = self
            .resolve_target_id(level, delegate_to, parent_ref, &user)
            .await?;

        // Pull the fields out of the source and land them on the target.
        let (source_view, moved) = self.extract_fields(level, id, fields, delegate_to).await?;
        let target_view = self
            .update_or_create_target(delegate_to, target_id, moved)
            .await?;

        self.emit(id, InvalidationOp::Update, level, false);
        self.emit(target_id, InvalidationOp::Update, delegate_to, true);
        info!(
            source_level = %level,
            target_level = %delegate_to,
            source = %id,
            target = %target_id,
            fields = fields.len(),
            "context fields delegated"
        );
        Ok(DelegationOutcome {
            source: source_view,
            target: target_view,
        })
    }

    /// Remove `fields` from the source context, returning its fresh view
    /// and the moved payload.
    async fn extract_fields(
        &self,
        level: ContextLevel,
        id: Uuid,
        fields: &[String],
        delegate_to: ContextLevel,
    ) -> Result<(ContextView, Map<String, Value>), TbpError> {
        let record = delegation_record(fields, delegate_to);
        match level {
            ContextLevel::Global => unreachable!("global has no ancestor to delegate to"),
            ContextLevel::Project => {
                let mut moved = Map::new();
                let ctx = self
                    .project
                    .update(id, |ctx| {
                        moved = take_fields(&mut ctx.project_settings, fields);
                        push_delegation(&mut ctx.metadata, record);
                        ctx.version += 1;
                        ctx.updated_at = Utc::now();
                    })
                    .await?;
                Ok((self.view_project(&ctx, false), moved))
            }
            ContextLevel::Branch => {
                let mut moved = Map::new();
                let ctx = self
                    .branch
                    .update(id, |ctx| {
                        moved = take_fields(&mut ctx.branch_settings, fields);
                        push_delegation(&mut ctx.metadata, record);
                        ctx.version += 1;
                        ctx.updated_at = Utc::now();
                    })
                    .await?;
                Ok((self.view_branch(&ctx, false), moved))
            }
            ContextLevel::Task => {
                let mut moved = Map::new();
                let ctx = self
                    .task
                    .update(id, |ctx| {
                        moved = take_fields(&mut ctx.task_data, fields);
                        push_delegation(&mut ctx.metadata, record);
                        ctx.version += 1;
                        ctx.updated_at = Utc::now();
                    })
                    .await?;
                Ok((self.view_task(&ctx, false), moved))
            }
        }
    }

    /// Walk up from the source's parent reference to the target level's id.
    async fn resolve_target_id(
        &self,
        source: ContextLevel,
        delegate_to: ContextLevel,
        parent_ref: Option<Uuid>,
        user: &str,
    ) -> Result<Uuid, TbpError> {
        if delegate_to == ContextLevel::Global {
            return Ok(global_context_id(user));
        }
        let parent_ref =
            parent_ref.ok_or_else(|| TbpError::internal("delegation target unresolvable"))?;
        match (source, delegate_to) {
            // From a branch, the parent ref already is the project.
            (ContextLevel::Branch, ContextLevel::Project) => Ok(parent_ref),
            // From a task, the ref is the branch; hop once more.
            (ContextLevel::Task, ContextLevel::Project) => {
                let branch_ctx = self.branch.get(parent_ref).await?;
                Ok(branch_ctx.project_id)
            }
            (ContextLevel::Task, ContextLevel::Branch) => Ok(parent_ref),
            _ => Err(TbpError::internal("delegation target unresolvable")),
        }
    }

    async fn update_or_create_target(
        &self,
        level: ContextLevel,
        target_id: Uuid,
        moved: Map<String, Value>,
    ) -> Result<ContextView, TbpError> {
        let user = self.require_user()?.to_string();
        match level {
            ContextLevel::Global => {
                let mut created = Vec::new();
                self.ensure_global(&user, &mut created).await?;
                let ctx = self
                    .global
                    .update(target_id, |ctx| {
                        ctx.apply_settings(moved);
                        ctx.version += 1;
                        ctx.updated_at = Utc::now();
                    })
                    .await?;
                Ok(self.view_global(&ctx, false))
            }
            ContextLevel::Project => {
                let mut created = Vec::new();
                self.ensure_project(target_id, &user, &mut created).await?;
                let ctx = self
                    .project
                    .update(target_id, |ctx| {
                        pack_settings(&mut ctx.project_settings, moved, PROJECT_KNOWN_KEYS);
                        ctx.version += 1;
                        ctx.updated_at = Utc::now();
                    })
                    .await?;
                Ok(self.view_project(&ctx, false))
            }
            ContextLevel::Branch => {
                let ctx = self
                    .branch
                    .update(target_id, |ctx| {
                        pack_settings(&mut ctx.branch_settings, moved, BRANCH_KNOWN_KEYS);
                        ctx.version += 1;
                        ctx.updated_at = Utc::now();
                    })
                    .await?;
                Ok(self.view_branch(&ctx, false))
            }
            ContextLevel::Task => unreachable!("task is never a delegation target"),
        }
    }

    // -- views -----------------------------------------------------------

    fn view_global(&self, ctx: &GlobalContext, inherited: bool) -> ContextView {
        ContextView {
            id: ctx.id,
            level: ContextLevel::Global,
            user_id: ctx.user_id.clone(),
            settings: ctx.settings(),
            progress: None,
            metadata: ctx.metadata.clone(),
            version: ctx.version,
            inherited,
            project_id: None,
            branch_id: None,
            created_at: ctx.created_at,
            updated_at: ctx.updated_at,
        }
    }

    fn view_project(&self, ctx: &ProjectContext, inherited: bool) -> ContextView {
        ContextView {
            id: ctx.id,
            level: ContextLevel::Project,
            user_id: ctx.user_id.clone(),
            settings: unpack_settings(&ctx.project_settings),
            progress: None,
            metadata: ctx.metadata.clone(),
            version: ctx.version,
            inherited,
            project_id: None,
            branch_id: None,
            created_at: ctx.created_at,
            updated_at: ctx.updated_at,
        }
    }

    fn view_branch(&self, ctx: &BranchContext, inherited: bool) -> ContextView {
        ContextView {
            id: ctx.id,
            level: ContextLevel::Branch,
            user_id: ctx.user_id.clone(),
            settings: unpack_settings(&ctx.branch_settings),
            progress: None,
            metadata: ctx.metadata.clone(),
            version: ctx.version,
            inherited,
            project_id: Some(ctx.project_id),
            branch_id: None,
            created_at: ctx.created_at,
            updated_at: ctx.updated_at,
        }
    }

    fn view_task(&self, ctx: &TaskContext, inherited: bool) -> ContextView {
        ContextView {
            id: ctx.id,
            level: ContextLevel::Task,
            user_id: ctx.user_id.clone(),
            settings: unpack_settings(&ctx.task_data),
            progress: Some(ctx.progress.clone()),
            metadata: ctx.metadata.clone(),
            version: ctx.version,
            inherited,
            project_id: None,
            branch_id: Some(ctx.branch_id),
            created_at: ctx.created_at,
            updated_at: ctx.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn as_object(data: Value) -> Result<Map<String, Value>, TbpError> {
    match data {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(TbpError::new(
            ErrorCode::ValidationError,
            "context data must be a JSON object",
        )
        .with_field("data")
        .with_context("provided_type", json_type_name(&other))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn already_exists(level: ContextLevel) -> TbpError {
    TbpError::new(
        ErrorCode::Conflict,
        format!("{level} context already exists; use update instead"),
    )
}

fn mark_auto_created(metadata: &mut BTreeMap<String, Value>) {
    metadata.insert("auto_created".into(), Value::Bool(true));
}

fn is_proper_ancestor(candidate: ContextLevel, of: ContextLevel) -> bool {
    let mut cursor = of.parent();
    while let Some(level) = cursor {
        if level == candidate {
            return true;
        }
        cursor = level.parent();
    }
    false
}

fn parse_parent_id(data: &Map<String, Value>, key: &str) -> Result<Option<Uuid>, TbpError> {
    match data.get(key) {
        None => Ok(None),
        Some(Value::String(raw)) => raw
            .parse()
            .map(Some)
            .map_err(|_| TbpError::invalid_parameter(key, "a UUID")),
        Some(_) => Err(TbpError::invalid_parameter(key, "a UUID string")),
    }
}

/// Remove `fields` from a packed settings object (top level or `_custom`),
/// returning what was taken.
fn take_fields(stored: &mut Value, fields: &[String]) -> Map<String, Value> {
    let mut moved = Map::new();
    let Some(map) = stored.as_object_mut() else {
        return moved;
    };
    for field in fields {
        if let Some(value) = map.remove(field) {
            moved.insert(field.clone(), value);
            continue;
        }
        if let Some(custom) = map.get_mut("_custom").and_then(Value::as_object_mut) {
            if let Some(value) = custom.remove(field) {
                moved.insert(field.clone(), value);
            }
        }
    }
    // Drop an emptied _custom slot.
    if map
        .get("_custom")
        .and_then(Value::as_object)
        .is_some_and(Map::is_empty)
    {
        map.remove("_custom");
    }
    moved
}

fn delegation_record(fields: &[String], to: ContextLevel) -> Value {
    json!({
        "fields": fields,
        "delegated_to": to.as_str(),
        "delegated_at": Utc::now(),
    })
}

fn push_delegation(metadata: &mut BTreeMap<String, Value>, record: Value) {
    metadata
        .entry("delegations".into())
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .expect("delegations is always an array")
        .push(record);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
