// SPDX-License-Identifier: MIT OR Apache-2.0
//! Token validation backends.
//!
//! API tokens are stored hashed (SHA-256, hex); validation looks the hash up,
//! checks revocation and expiry, enforces the per-minute rate limit with
//! counters kept in the cache, and touches the usage bookkeeping.

use crate::{AuthError, AuthInfo, TokenValidator};
use bytes_from_counter::{decode_counter, encode_counter};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tbp_cache::MultiLevelCache;
use tbp_core::ApiToken;
use tbp_error::TbpError;
use tracing::{debug, warn};
use uuid::Uuid;

/// Hex-encoded SHA-256 of a plaintext token.  The plaintext never reaches
/// storage; this is the only form the plane keeps.
pub fn hash_token(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

// ---------------------------------------------------------------------------
// ApiTokenStore seam
// ---------------------------------------------------------------------------

/// Lookup and bookkeeping seam the validator needs from storage.
///
/// Implemented by the API-token repository; kept narrow so the auth crate
/// never sees session or scoping machinery.
#[async_trait::async_trait]
pub trait ApiTokenStore: Send + Sync {
    /// Find a token row by its hex-encoded hash.
    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<ApiToken>, TbpError>;

    /// Record a successful validation: touch `last_used_at`, bump
    /// `usage_count`.
    async fn record_usage(&self, token_id: Uuid, when: DateTime<Utc>) -> Result<(), TbpError>;
}

// ---------------------------------------------------------------------------
// ApiTokenValidator
// ---------------------------------------------------------------------------

/// Validates hashed API tokens against the token store.
pub struct ApiTokenValidator {
    store: Arc<dyn ApiTokenStore>,
    cache: Arc<MultiLevelCache>,
}

impl ApiTokenValidator {
    /// Create a validator over the given store, with rate counters in `cache`.
    pub fn new(store: Arc<dyn ApiTokenStore>, cache: Arc<MultiLevelCache>) -> Self {
        Self { store, cache }
    }

    /// Sliding-minute rate check.  Counters live in the cache under
    /// `auth:rate:{token_id}:{minute}` with a 60 s TTL.
    async fn check_rate_limit(&self, token: &ApiToken, now: DateTime<Utc>) -> Result<(), AuthError> {
        let Some(limit) = token.rate_limit else {
            return Ok(());
        };
        let minute = now.timestamp() / 60;
        let key = format!("auth:rate:{}:{minute}", token.id);

        let used = match self.cache.get(&key).await {
            Some(raw) => decode_counter(&raw),
            None => 0,
        };
        if used >= u64::from(limit) {
            warn!(token_id = %token.id, limit, "api token rate limit exceeded");
            return Err(AuthError::RateLimited);
        }
        self.cache
            .put(&key, encode_counter(used + 1), Some(Duration::from_secs(60)))
            .await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl TokenValidator for ApiTokenValidator {
    async fn validate(&self, token: &str) -> Result<AuthInfo, AuthError> {
        let hash = hash_token(token);
        let row = self
            .store
            .find_by_hash(&hash)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
            .ok_or(AuthError::InvalidToken)?;

        let now = Utc::now();
        if !row.is_active {
            return Err(AuthError::TokenRevoked);
        }
        if row.expires_at.is_some_and(|exp| exp <= now) {
            return Err(AuthError::TokenExpired);
        }

        self.check_rate_limit(&row, now).await?;

        self.store
            .record_usage(row.id, now)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        debug!(token_id = %row.id, user_id = %row.user_id, "api token accepted");
        Ok(AuthInfo {
            user_id: row.user_id.clone(),
            email: None,
            realm_roles: Vec::new(),
            resource_access: BTreeMap::new(),
            scopes: row.scopes.iter().cloned().collect(),
            sub: row.id.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// StaticTokenValidator
// ---------------------------------------------------------------------------

/// Fixed token → claims table for dev wiring and tests.
#[derive(Default)]
pub struct StaticTokenValidator {
    tokens: BTreeMap<String, AuthInfo>,
}

impl StaticTokenValidator {
    /// Empty table; every token is rejected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `token` as belonging to `auth`.
    pub fn insert(mut self, token: impl Into<String>, auth: AuthInfo) -> Self {
        self.tokens.insert(token.into(), auth);
        self
    }
}

#[async_trait::async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str) -> Result<AuthInfo, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

// Counter cells are stored as decimal text so they stay readable in cache
// dumps and external L2 stores.
mod bytes_from_counter {
    use bytes::Bytes;

    pub fn encode_counter(value: u64) -> Bytes {
        Bytes::from(value.to_string())
    }

    pub fn decode_counter(raw: &Bytes) -> u64 {
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}
