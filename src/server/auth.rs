//! Bearer API key authentication and path access rules.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::config::AuthUser;
use super::handlers::ApiError;
use super::AppState;

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    // Extract Authorization header
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let api_key = match auth_header {
        Some(h) => match h.strip_prefix("Bearer ") {
            Some(key) => key,
            None => {
                return ApiError::unauthorized(
                    "invalid_auth",
                    "Authorization header must use Bearer scheme",
                )
                .into_response();
            }
        },
        None => {
            return ApiError::unauthorized("missing_auth", "Authorization header required")
                .into_response();
        }
    };

    // Validate API key
    match state.api_keys.validate(api_key) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => ApiError::unauthorized("invalid_key", "Invalid API key").into_response(),
    }
}

/// Checks that `user` may touch the path made of `segments`.
///
/// `users/{uid}/...` belongs to `uid` alone; any other top-level collection
/// must be listed as shared.
pub fn authorize(state: &AppState, user: &AuthUser, segments: &[&str]) -> Result<(), ApiError> {
    let allowed = match segments {
        ["users", owner, _, ..] => *owner == user.user_id,
        ["users", ..] => false,
        [top, ..] => state.shared_collections.contains(*top),
        [] => false,
    };

    if allowed {
        Ok(())
    } else {
        tracing::warn!(user_id = %user.user_id, path = %segments.join("/"), "Access denied");
        Err(ApiError::forbidden(format!(
            "{} may not access {}",
            user.user_id,
            segments.join("/")
        )))
    }
}
