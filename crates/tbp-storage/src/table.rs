// SPDX-License-Identifier: MIT OR Apache-2.0
//! The user-scoped table — the base every repository builds on.
//!
//! A [`ScopedTable`] is a shared row store plus an optional `user_id` scope.
//! `with_user` is cheap (the rows are behind an `Arc`), reads apply the
//! scope as a filter, writes stamp it, and updates/deletes assert ownership
//! and answer `NOT_FOUND` otherwise.  Every access lands in the audit log
//! and every mutation emits a cache-invalidation event.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tbp_cache::{InvalidationEvent, InvalidationOp, CACHE_INVALIDATION_EVENT};
use tbp_core::{AccessOp, AuditRecord};
use tbp_error::TbpError;
use tbp_events::{Event, EventBus};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// UserOwned
// ---------------------------------------------------------------------------

/// An entity with a mandatory owner column.
pub trait UserOwned: Clone + Send + Sync + 'static {
    /// Table name used in audit records and cache keys.
    const ENTITY_TYPE: &'static str;

    /// Row id.
    fn id(&self) -> Uuid;
    /// Owner column.
    fn user_id(&self) -> &str;
    /// Stamp the owner column (called on create).
    fn set_user_id(&mut self, user_id: String);
}

macro_rules! impl_user_owned {
    ($ty:ty, $name:literal) => {
        impl UserOwned for $ty {
            const ENTITY_TYPE: &'static str = $name;

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

impl_user_owned!(tbp_core::Project, "project");
impl_user_owned!(tbp_core::GitBranch, "git_branch");
impl_user_owned!(tbp_core::Task, "task");
impl_user_owned!(tbp_core::Subtask, "subtask");
impl_user_owned!(tbp_core::ApiToken, "api_token");

// ---------------------------------------------------------------------------
// AuditLog
// ---------------------------------------------------------------------------

/// Bounded, shared audit trail of repository accesses.
#[derive(Clone)]
pub struct AuditLog {
    records: Arc<Mutex<VecDeque<AuditRecord>>>,
    capacity: usize,
}

impl AuditLog {
    /// Default number of records retained.
    pub const DEFAULT_CAPACITY: usize = 10_000;

    /// Empty log with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Empty log with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            capacity,
        }
    }

    /// Append one record, dropping the oldest when full.
    pub fn record(
        &self,
        user_id: Option<&str>,
        entity_type: &str,
        entity_id: Option<Uuid>,
        op: AccessOp,
    ) {
        let mut records = self.records.lock().expect("audit log poisoned");
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(AuditRecord {
            user_id: user_id.map(str::to_string),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.map(|id| id.to_string()),
            op,
            timestamp: Utc::now(),
        });
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.lock().expect("audit log poisoned").len()
    }

    /// `true` when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records for one user, oldest first.
    pub fn for_user(&self, user_id: &str) -> Vec<AuditRecord> {
        self.records
            .lock()
            .expect("audit log poisoned")
            .iter()
            .filter(|r| r.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect()
    }

    /// The most recent `limit` records, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<AuditRecord> {
        let records = self.records.lock().expect("audit log poisoned");
        records
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// InvalidationEmitter
// ---------------------------------------------------------------------------

/// Publishes cache-invalidation events after successful mutations.
#[derive(Clone, Default)]
pub struct InvalidationEmitter {
    bus: Option<EventBus>,
}

impl InvalidationEmitter {
    /// Emitter publishing on `bus`.
    pub fn new(bus: EventBus) -> Self {
        Self { bus: Some(bus) }
    }

    /// Emitter that drops everything (bootstrap and unit tests).
    pub fn disabled() -> Self {
        Self { bus: None }
    }

    /// Publish one invalidation.  A saturated bus is logged loudly — the
    /// mutation has already committed, so the write must not be failed here.
    pub fn emit(
        &self,
        entity_type: &str,
        entity_id: Uuid,
        operation: InvalidationOp,
        user_id: Option<&str>,
        level: Option<&str>,
        propagate: bool,
    ) {
        let Some(bus) = &self.bus else {
            return;
        };
        let payload = InvalidationEvent {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            operation,
            user_id: user_id.map(str::to_string),
            level: level.map(str::to_string),
            propagate,
        };
        let payload =
            serde_json::to_value(&payload).expect("invalidation serialization is infallible");
        let mut event = Event::new(CACHE_INVALIDATION_EVENT, payload);
        if let Some(user_id) = user_id {
            event = event.with_user_id(user_id);
        }
        if let Err(err) = bus.publish(event) {
            warn!(
                entity_type,
                entity_id = %entity_id,
                error = %err,
                "cache invalidation dropped: event bus saturated"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// ScopedTable
// ---------------------------------------------------------------------------

/// Shared row store with per-instance user scoping.
pub struct ScopedTable<T: UserOwned> {
    rows: Arc<RwLock<HashMap<Uuid, T>>>,
    scope: Option<String>,
    audit: AuditLog,
    invalidation: InvalidationEmitter,
}

impl<T: UserOwned> Clone for ScopedTable<T> {
    fn clone(&self) -> Self {
        Self {
            rows: self.rows.clone(),
            scope: self.scope.clone(),
            audit: self.audit.clone(),
            invalidation: self.invalidation.clone(),
        }
    }
}

impl<T: UserOwned> ScopedTable<T> {
    /// Unscoped (bootstrap) table.
    pub fn new(audit: AuditLog, invalidation: InvalidationEmitter) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            scope: None,
            audit,
            invalidation,
        }
    }

    /// A copy of this table bound to `user_id`.  Cheap: shares rows, audit
    /// log, and emitter.
    pub fn with_user(&self, user_id: &str) -> Self {
        Self {
            rows: self.rows.clone(),
            scope: Some(user_id.to_string()),
            audit: self.audit.clone(),
            invalidation: self.invalidation.clone(),
        }
    }

    /// The bound user, if any.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// The shared audit log.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    fn owns(&self, row: &T) -> bool {
        match &self.scope {
            Some(user_id) => row.user_id() == user_id,
            None => true,
        }
    }

    /// Insert a row, stamping the scope's `user_id`.
    ///
    /// Uniqueness beyond the primary key is the calling repository's
    /// business rule; use [`ScopedTable::find_where`] first.
    pub async fn insert(&self, mut row: T) -> Result<T, TbpError> {
        if let Some(user_id) = &self.scope {
            row.set_user_id(user_id.clone());
        }
        let id = row.id();
        {
            let mut rows = self.rows.write().await;
            if rows.contains_key(&id) {
                return Err(TbpError::new(
                    tbp_error::ErrorCode::Conflict,
                    format!("{} already exists: {id}", T::ENTITY_TYPE),
                ));
            }
            rows.insert(id, row.clone());
        }
        self.audit
            .record(self.scope(), T::ENTITY_TYPE, Some(id), AccessOp::Create);
        self.invalidation.emit(
            T::ENTITY_TYPE,
            id,
            InvalidationOp::Create,
            self.scope(),
            None,
            false,
        );
        Ok(row)
    }

    /// Fetch a row the caller owns; foreign and missing rows are both
    /// `NOT_FOUND`.
    pub async fn get(&self, id: Uuid) -> Result<T, TbpError> {
        self.audit
            .record(self.scope(), T::ENTITY_TYPE, Some(id), AccessOp::Read);
        let rows = self.rows.read().await;
        rows.get(&id)
            .filter(|row| self.owns(row))
            .cloned()
            .ok_or_else(|| TbpError::not_found(T::ENTITY_TYPE, id))
    }

    /// Like [`ScopedTable::get`] but `None` instead of an error.
    pub async fn find(&self, id: Uuid) -> Option<T> {
        let rows = self.rows.read().await;
        rows.get(&id).filter(|row| self.owns(row)).cloned()
    }

    /// First owned row matching `pred`.
    pub async fn find_where(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        let rows = self.rows.read().await;
        rows.values()
            .find(|row| self.owns(row) && pred(row))
            .cloned()
    }

    /// All owned rows matching `pred`.
    pub async fn list_where(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.audit
            .record(self.scope(), T::ENTITY_TYPE, None, AccessOp::List);
        let rows = self.rows.read().await;
        rows.values()
            .filter(|row| self.owns(row) && pred(row))
            .cloned()
            .collect()
    }

    /// Mutate a row the caller owns.  The ownership check runs before the
    /// mutator; violations are `NOT_FOUND`.
    pub async fn update(&self, id: Uuid, mutate: impl FnOnce(&mut T)) -> Result<T, TbpError> {
        let scope = self.scope.clone();
        let updated = {
            let mut rows = self.rows.write().await;
            let row = rows
                .get_mut(&id)
                .filter(|row| scope.as_deref().is_none_or(|user| row.user_id() == user))
                .ok_or_else(|| TbpError::not_found(T::ENTITY_TYPE, id))?;
            mutate(row);
            row.clone()
        };
        self.audit
            .record(self.scope(), T::ENTITY_TYPE, Some(id), AccessOp::Update);
        self.invalidation.emit(
            T::ENTITY_TYPE,
            id,
            InvalidationOp::Update,
            self.scope(),
            None,
            false,
        );
        Ok(updated)
    }

    /// Replace a row the caller owns with `row` (same id).
    pub async fn replace(&self, row: T) -> Result<T, TbpError> {
        let id = row.id();
        self.update(id, move |slot| *slot = row).await
    }

    /// Remove a row the caller owns.
    pub async fn remove(&self, id: Uuid) -> Result<T, TbpError> {
        let removed = {
            let mut rows = self.rows.write().await;
            let owned = rows
                .get(&id)
                .map(|row| self.owns(row))
                .unwrap_or(false);
            if !owned {
                return Err(TbpError::not_found(T::ENTITY_TYPE, id));
            }
            rows.remove(&id).expect("row vanished under write lock")
        };
        self.audit
            .record(self.scope(), T::ENTITY_TYPE, Some(id), AccessOp::Delete);
        self.invalidation.emit(
            T::ENTITY_TYPE,
            id,
            InvalidationOp::Delete,
            self.scope(),
            None,
            false,
        );
        Ok(removed)
    }

    /// Number of rows in the whole table (all users).
    pub async fn total_rows(&self) -> usize {
        self.rows.read().await.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
