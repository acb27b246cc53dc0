// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted feature flags with environment overrides.
//!
//! Flags live in a JSON file keyed by flag name; environment variables of
//! the form `FEATURE_<NAME>` override stored values at read time, so an
//! operator can flip behaviour without touching the file.  A fixed group of
//! migration flags gates the staged rollout of control-plane subsystems and
//! can be enabled per phase.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One persisted flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlag {
    /// Flag name, stored upper-cased.
    pub name: String,
    /// Stored value (before any environment override).
    pub enabled: bool,
    /// What the flag gates.
    #[serde(default)]
    pub description: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last toggle timestamp.
    pub updated_at: DateTime<Utc>,
    /// Arbitrary metadata recorded with the last toggle.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Effective status of one flag, override included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagStatus {
    /// The stored flag.
    #[serde(flatten)]
    pub flag: FeatureFlag,
    /// Raw value of `FEATURE_<NAME>` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_override: Option<String>,
    /// The value [`FeatureFlagService::is_enabled`] resolves to.
    pub effective: bool,
}

/// Rollout summary across the migration flag group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatus {
    /// Number of migration flags.
    pub total: usize,
    /// How many are effectively enabled.
    pub enabled: usize,
    /// `enabled / total` as a percentage.
    pub percentage: f64,
    /// Effective value per flag.
    pub flags: BTreeMap<String, bool>,
}

/// Errors from flag persistence.
#[derive(Debug, thiserror::Error)]
pub enum FlagError {
    /// The flags file could not be read or written.
    #[error("flag store io error: {0}")]
    Io(#[from] std::io::Error),
    /// The flags file is not valid JSON of the expected shape.
    #[error("flag store parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// The requested migration phase does not exist.
    #[error("unknown migration phase: {0}")]
    UnknownPhase(String),
}

// ---------------------------------------------------------------------------
// Migration flag group
// ---------------------------------------------------------------------------

/// Flags gating the staged subsystem rollout, with default values.
const MIGRATION_FLAGS: &[(&str, bool, &str)] = &[
    (
        "USE_USER_SCOPED_REPOSITORIES",
        false,
        "Route every repository through the user-scoped base",
    ),
    (
        "USE_UNIFIED_CONTEXT",
        false,
        "Route all context writes through the unified context service",
    ),
    (
        "USE_PARAMETER_ENFORCEMENT",
        false,
        "Gate controller actions on the parameter enforcement service",
    ),
    (
        "USE_RESPONSE_OPTIMIZER",
        false,
        "Shape tool envelopes through the response optimizer",
    ),
    (
        "USE_CACHED_REPOSITORIES",
        false,
        "Wrap repositories in the caching decorator",
    ),
    (
        "USE_EVENT_DRIVEN_INVALIDATION",
        false,
        "Invalidate caches from bus events instead of inline",
    ),
    (
        "ENABLE_MIGRATION_LOGGING",
        true,
        "Enhanced logging while the rollout is in progress",
    ),
];

/// Flags belonging to the `critical` phase.
const CRITICAL_PHASE: &[&str] = &[
    "USE_USER_SCOPED_REPOSITORIES",
    "USE_UNIFIED_CONTEXT",
    "USE_PARAMETER_ENFORCEMENT",
];

fn migration_flag_names() -> Vec<&'static str> {
    MIGRATION_FLAGS.iter().map(|(name, _, _)| *name).collect()
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Flag store bound to one JSON file.
///
/// Instances are cheap to scope with [`FeatureFlagService::with_user`]; the
/// user id is carried for audit-style logging only — flags themselves are
/// shared plane-wide, which is why [`FeatureFlag`] is the one table without
/// a `user_id` column.
pub struct FeatureFlagService {
    path: PathBuf,
    user_id: Option<String>,
    flags: Mutex<BTreeMap<String, FeatureFlag>>,
}

impl FeatureFlagService {
    /// Load (or initialise) the flag store at `path`.
    ///
    /// Missing files are treated as empty; the migration flag group is
    /// seeded with defaults and persisted.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FlagError> {
        let path = path.as_ref().to_path_buf();
        let mut flags: BTreeMap<String, FeatureFlag> = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            BTreeMap::new()
        };

        let now = Utc::now();
        let mut seeded = false;
        for (name, enabled, description) in MIGRATION_FLAGS {
            if !flags.contains_key(*name) {
                flags.insert(
                    (*name).to_string(),
                    FeatureFlag {
                        name: (*name).to_string(),
                        enabled: *enabled,
                        description: (*description).to_string(),
                        created_at: now,
                        updated_at: now,
                        metadata: BTreeMap::new(),
                    },
                );
                seeded = true;
            }
        }

        let service = Self {
            path,
            user_id: None,
            flags: Mutex::new(flags),
        };
        if seeded {
            service.save()?;
        }
        Ok(service)
    }

    /// A copy of this service scoped to `user_id` (logging only; flags stay
    /// shared).
    pub fn with_user(&self, user_id: impl Into<String>) -> Self {
        Self {
            path: self.path.clone(),
            user_id: Some(user_id.into()),
            flags: Mutex::new(self.flags.lock().expect("flag table poisoned").clone()),
        }
    }

    fn save(&self) -> Result<(), FlagError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let flags = self.flags.lock().expect("flag table poisoned");
        let raw = serde_json::to_string_pretty(&*flags)?;
        std::fs::write(&self.path, raw)?;
        info!(count = flags.len(), path = %self.path.display(), "feature flags saved");
        Ok(())
    }

    /// Effective value of a flag: environment override first, then the
    /// stored value, then `false` for unknown names.
    pub fn is_enabled(&self, flag_name: &str) -> bool {
        let name = flag_name.to_uppercase();
        if let Ok(env_value) = std::env::var(format!("FEATURE_{name}")) {
            return parse_env_bool(&env_value);
        }
        let flags = self.flags.lock().expect("flag table poisoned");
        match flags.get(&name) {
            Some(flag) => flag.enabled,
            None => {
                warn!(flag = %name, "unknown feature flag, defaulting to false");
                false
            }
        }
    }

    /// Enable a flag, recording optional metadata, and persist.
    pub fn enable_flag(
        &self,
        flag_name: &str,
        metadata: Option<BTreeMap<String, serde_json::Value>>,
    ) -> Result<(), FlagError> {
        self.update_flag(flag_name, true, metadata)
    }

    /// Disable a flag, recording optional metadata, and persist.
    pub fn disable_flag(
        &self,
        flag_name: &str,
        metadata: Option<BTreeMap<String, serde_json::Value>>,
    ) -> Result<(), FlagError> {
        self.update_flag(flag_name, false, metadata)
    }

    fn update_flag(
        &self,
        flag_name: &str,
        enabled: bool,
        metadata: Option<BTreeMap<String, serde_json::Value>>,
    ) -> Result<(), FlagError> {
        let name = flag_name.to_uppercase();
        let now = Utc::now();
        {
            let mut flags = self.flags.lock().expect("flag table poisoned");
            let entry = flags.entry(name.clone()).or_insert_with(|| FeatureFlag {
                name: name.clone(),
                enabled: false,
                description: String::new(),
                created_at: now,
                updated_at: now,
                metadata: BTreeMap::new(),
            });
            entry.enabled = enabled;
            entry.updated_at = now;
            if let Some(metadata) = metadata {
                entry.metadata.extend(metadata);
            }
        }
        info!(
            flag = %name,
            enabled,
            user_id = self.user_id.as_deref().unwrap_or("-"),
            "feature flag toggled"
        );
        self.save()
    }

    /// Effective status of one flag, or `None` for unknown names.
    pub fn flag_status(&self, flag_name: &str) -> Option<FlagStatus> {
        let name = flag_name.to_uppercase();
        let flag = self
            .flags
            .lock()
            .expect("flag table poisoned")
            .get(&name)
            .cloned()?;
        Some(FlagStatus {
            environment_override: std::env::var(format!("FEATURE_{name}")).ok(),
            effective: self.is_enabled(&name),
            flag,
        })
    }

    /// All stored flags, name-ordered.
    pub fn list_flags(&self) -> Vec<FeatureFlag> {
        self.flags
            .lock()
            .expect("flag table poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Enable every flag in a migration phase (`critical`, `remaining`, or
    /// `all`), stamping the phase into each flag's metadata.
    pub fn enable_migration_phase(&self, phase: &str) -> Result<usize, FlagError> {
        let names: Vec<&str> = match phase {
            "critical" => CRITICAL_PHASE.to_vec(),
            "remaining" => migration_flag_names()
                .into_iter()
                .filter(|n| !CRITICAL_PHASE.contains(n))
                .collect(),
            "all" => migration_flag_names(),
            other => return Err(FlagError::UnknownPhase(other.to_string())),
        };
        let metadata = BTreeMap::from([(
            "migration_phase".to_string(),
            serde_json::Value::String(phase.to_string()),
        )]);
        for name in &names {
            self.enable_flag(name, Some(metadata.clone()))?;
        }
        info!(phase, count = names.len(), "migration phase enabled");
        Ok(names.len())
    }

    /// Disable the whole migration flag group.
    pub fn rollback_migration(&self) -> Result<usize, FlagError> {
        let names = migration_flag_names();
        let metadata = BTreeMap::from([(
            "migration_phase".to_string(),
            serde_json::Value::String("rollback".to_string()),
        )]);
        for name in &names {
            self.disable_flag(name, Some(metadata.clone()))?;
        }
        warn!(count = names.len(), "migration flags rolled back");
        Ok(names.len())
    }

    /// Effective rollout status across the migration flag group.
    pub fn migration_status(&self) -> MigrationStatus {
        let names = migration_flag_names();
        let flags: BTreeMap<String, bool> = names
            .iter()
            .map(|name| ((*name).to_string(), self.is_enabled(name)))
            .collect();
        let enabled = flags.values().filter(|v| **v).count();
        MigrationStatus {
            total: flags.len(),
            enabled,
            percentage: if flags.is_empty() {
                0.0
            } else {
                enabled as f64 / flags.len() as f64 * 100.0
            },
            flags,
        }
    }
}

/// The boolean grammar environment overrides accept.
fn parse_env_bool(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> FeatureFlagService {
        FeatureFlagService::load(dir.path().join("flags.json")).unwrap()
    }

    #[test]
    fn seeds_migration_flags_on_first_load() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let flags = service.list_flags();
        assert!(flags.iter().any(|f| f.name == "USE_UNIFIED_CONTEXT"));
        // ENABLE_MIGRATION_LOGGING defaults on.
        assert!(service.is_enabled("ENABLE_MIGRATION_LOGGING"));
        assert!(!service.is_enabled("USE_UNIFIED_CONTEXT"));
    }

    #[test]
    fn toggles_persist_across_reload() {
        let dir = TempDir::new().unwrap();
        {
            let service = service(&dir);
            service.enable_flag("USE_UNIFIED_CONTEXT", None).unwrap();
        }
        let reloaded = service(&dir);
        assert!(reloaded.is_enabled("USE_UNIFIED_CONTEXT"));
    }

    #[test]
    fn unknown_flag_defaults_false() {
        let dir = TempDir::new().unwrap();
        assert!(!service(&dir).is_enabled("NO_SUCH_FLAG"));
    }

    #[test]
    fn flag_names_are_uppercased() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        service.enable_flag("custom_flag", None).unwrap();
        assert!(service.is_enabled("CUSTOM_FLAG"));
        assert!(service.is_enabled("custom_flag"));
        assert!(service.flag_status("custom_flag").is_some());
    }

    #[test]
    fn env_override_wins_over_stored_value() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        service.enable_flag("OVERRIDE_ME", None).unwrap();

        // Env overrides are read live; use a flag name unique to this test
        // to avoid cross-test interference.
        std::env::set_var("FEATURE_OVERRIDE_ME", "off");
        assert!(!service.is_enabled("OVERRIDE_ME"));
        std::env::set_var("FEATURE_OVERRIDE_ME", "yes");
        assert!(service.is_enabled("OVERRIDE_ME"));
        std::env::remove_var("FEATURE_OVERRIDE_ME");
        assert!(service.is_enabled("OVERRIDE_ME"));
    }

    #[test]
    fn env_bool_grammar() {
        for truthy in ["true", "TRUE", "1", "yes", "on", "On"] {
            assert!(parse_env_bool(truthy), "{truthy}");
        }
        for falsy in ["false", "0", "no", "off", "banana", ""] {
            assert!(!parse_env_bool(falsy), "{falsy}");
        }
    }

    #[test]
    fn critical_phase_enables_its_flags_only() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let count = service.enable_migration_phase("critical").unwrap();
        assert_eq!(count, 3);
        assert!(service.is_enabled("USE_USER_SCOPED_REPOSITORIES"));
        assert!(!service.is_enabled("USE_RESPONSE_OPTIMIZER"));

        let status = service.flag_status("USE_UNIFIED_CONTEXT").unwrap();
        assert_eq!(
            status.flag.metadata["migration_phase"],
            serde_json::json!("critical")
        );
    }

    #[test]
    fn unknown_phase_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            service(&dir).enable_migration_phase("beta"),
            Err(FlagError::UnknownPhase(_))
        ));
    }

    #[test]
    fn migration_status_tracks_percentage() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        let before = service.migration_status();
        assert_eq!(before.total, 7);
        assert_eq!(before.enabled, 1); // ENABLE_MIGRATION_LOGGING

        service.enable_migration_phase("all").unwrap();
        let after = service.migration_status();
        assert_eq!(after.enabled, after.total);
        assert!((after.percentage - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rollback_disables_everything() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir);
        service.enable_migration_phase("all").unwrap();
        service.rollback_migration().unwrap();
        let status = service.migration_status();
        assert_eq!(status.enabled, 0);
    }

    #[test]
    fn with_user_shares_the_same_file() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        let scoped = svc.with_user("user-a");
        scoped.enable_flag("SCOPED_TOGGLE", None).unwrap();
        let reloaded = service(&dir);
        assert!(reloaded.is_enabled("SCOPED_TOGGLE"));
    }
}
