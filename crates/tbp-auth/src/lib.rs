// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bearer-token authentication and request-scoped identity.
//!
//! The transport layer validates an opaque bearer token into an [`AuthInfo`]
//! and binds it to the request task via [`with_auth`].  Everything downstream
//! retrieves the caller with a single lookup — [`current_user_id`] — which is
//! the only legitimate source of user scoping.  Caller-supplied `user_id`
//! parameters are never consulted for authorization.

#![deny(unsafe_code)]

mod context;
mod token;

pub use context::{current_auth, current_user_id, with_auth};
pub use token::{hash_token, ApiTokenStore, ApiTokenValidator, StaticTokenValidator};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// AuthInfo
// ---------------------------------------------------------------------------

/// The claims record an accepted bearer token resolves to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuthInfo {
    /// Stable user identifier; stamped on every scoped entity.
    pub user_id: String,
    /// Email, when the identity provider supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Realm-level roles.
    #[serde(default)]
    pub realm_roles: Vec<String>,
    /// Client-scoped roles keyed by resource name.
    #[serde(default)]
    pub resource_access: BTreeMap<String, Vec<String>>,
    /// OAuth scopes granted to the token.
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    /// Raw subject claim from the provider.
    pub sub: String,
}

impl AuthInfo {
    /// Minimal claims record for a known user id (dev and test paths).
    pub fn for_user(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            sub: user_id.clone(),
            user_id,
            email: None,
            realm_roles: Vec::new(),
            resource_access: BTreeMap::new(),
            scopes: BTreeSet::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Authentication failures surfaced before any controller logic runs.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No bearer token was presented.
    #[error("missing bearer token")]
    MissingToken,
    /// The token did not validate.
    #[error("invalid bearer token")]
    InvalidToken,
    /// The token validated but is past its expiry.
    #[error("token expired")]
    TokenExpired,
    /// The token validated but has been revoked.
    #[error("token revoked")]
    TokenRevoked,
    /// The token's per-minute budget is exhausted.
    #[error("rate limit exceeded")]
    RateLimited,
    /// Authentication is disabled; tool endpoints reject everything.
    #[error("authentication disabled")]
    AuthDisabled,
    /// The validator itself failed.
    #[error("validator failure: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Validator seam
// ---------------------------------------------------------------------------

/// Validates an opaque bearer token into claims.
///
/// The identity provider is an external collaborator; this trait is the only
/// seam the server sees.  [`ApiTokenValidator`] covers hashed API tokens,
/// [`StaticTokenValidator`] covers dev/test wiring, and a Keycloak-backed
/// implementation plugs in behind the same signature.
#[async_trait::async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate `token`, returning the caller's claims on success.
    async fn validate(&self, token: &str) -> Result<AuthInfo, AuthError>;
}

// ---------------------------------------------------------------------------
// Identity provider coordinates
// ---------------------------------------------------------------------------

/// Keycloak coordinates, read from the environment.  Opaque to the plane —
/// carried for the concrete validator wiring only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeycloakConfig {
    /// Base URL of the Keycloak instance.
    pub url: Option<String>,
    /// Realm name.
    pub realm: Option<String>,
    /// OAuth client id.
    pub client_id: Option<String>,
    /// OAuth client secret.
    pub client_secret: Option<String>,
}

impl KeycloakConfig {
    /// Read `KEYCLOAK_URL`, `KEYCLOAK_REALM`, `KEYCLOAK_CLIENT_ID`, and
    /// `KEYCLOAK_CLIENT_SECRET`.
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("KEYCLOAK_URL").ok(),
            realm: std::env::var("KEYCLOAK_REALM").ok(),
            client_id: std::env::var("KEYCLOAK_CLIENT_ID").ok(),
            client_secret: std::env::var("KEYCLOAK_CLIENT_SECRET").ok(),
        }
    }

    /// `true` when enough coordinates are present to talk to the provider.
    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.realm.is_some() && self.client_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_user_fills_sub() {
        let auth = AuthInfo::for_user("user-a");
        assert_eq!(auth.user_id, "user-a");
        assert_eq!(auth.sub, "user-a");
        assert!(auth.realm_roles.is_empty());
    }

    #[test]
    fn auth_info_serde_roundtrip() {
        let mut auth = AuthInfo::for_user("user-a");
        auth.email = Some("a@example.com".into());
        auth.realm_roles.push("admin".into());
        let json = serde_json::to_string(&auth).unwrap();
        let back: AuthInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, auth);
    }

    #[test]
    fn keycloak_config_requires_core_coordinates() {
        let mut cfg = KeycloakConfig::default();
        assert!(!cfg.is_configured());
        cfg.url = Some("https://kc.example.com".into());
        cfg.realm = Some("plane".into());
        assert!(!cfg.is_configured());
        cfg.client_id = Some("mcp".into());
        assert!(cfg.is_configured());
    }
}
