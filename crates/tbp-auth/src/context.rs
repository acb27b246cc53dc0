// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request-scoped identity propagation.
//!
//! The middleware wraps each request future in [`with_auth`]; any code
//! running inside that future — controllers, facades, repositories — can call
//! [`current_user_id`] without threading the identity through every
//! signature.

use crate::AuthInfo;
use std::future::Future;

tokio::task_local! {
    static CURRENT_AUTH: AuthInfo;
}

/// Run `fut` with `auth` bound as the request identity.
///
/// Nested calls shadow the outer binding for their own scope, which keeps
/// spawned sub-requests (e.g. event replay on behalf of a user) honest.
pub async fn with_auth<F: Future>(auth: AuthInfo, fut: F) -> F::Output {
    CURRENT_AUTH.scope(auth, fut).await
}

/// The authenticated caller's claims, if a request scope is active.
pub fn current_auth() -> Option<AuthInfo> {
    CURRENT_AUTH.try_with(|auth| auth.clone()).ok()
}

/// The authenticated caller's user id, if a request scope is active.
///
/// This is the single lookup the rest of the plane scopes by.
pub fn current_user_id() -> Option<String> {
    CURRENT_AUTH.try_with(|auth| auth.user_id.clone()).ok()
}
