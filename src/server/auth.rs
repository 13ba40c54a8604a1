//! Bearer-key authentication middleware.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;

use crate::common::identity::AuthUser;

use super::error::ApiError;
use super::state::AppState;

/// Extract the bearer credential from the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Resolve the caller and attach an [`AuthUser`] to the request.
///
/// Missing or unknown credentials and unverified accounts are rejected with 401.
pub async fn require_verified_user(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let user = state
        .auth
        .authenticate(&token)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("invalid credentials".to_string()))?;

    if !user.role.is_verified() {
        tracing::debug!(user_id = %user.id, role = %user.role, "rejected unverified account");
        return Err(ApiError::Unauthorized("account is not verified".to_string()));
    }

    tracing::debug!(user_id = %user.id, role = %user.role, "authenticated request");
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Reject callers without the admin role.
///
/// # Errors
/// Returns `Forbidden` for non-admin callers.
pub fn require_admin(user: &AuthUser) -> Result<(), ApiError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("admin privileges required".to_string()))
    }
}
