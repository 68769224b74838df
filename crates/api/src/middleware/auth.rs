use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use services::user::ports::UserRole;
use services::{SessionId, UserId};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::ApiError;

/// Authenticated user information inserted into request extensions by the auth middleware.
/// Extract in route handlers using `Extension<AuthenticatedUser>`
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub session_id: SessionId,
}

/// State for authentication middleware
#[derive(Clone)]
pub struct AuthState {
    pub session_repository: Arc<dyn services::auth::ports::SessionRepository>,
    pub user_repository: Arc<dyn services::user::ports::UserRepository>,
}

/// Hash a session token for lookup
fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Extract and validate token from Authorization header
fn extract_token_from_request(request: &Request) -> Result<String, ApiError> {
    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok());

    let auth_value = auth_header.ok_or_else(|| {
        tracing::warn!("No authorization header found");
        ApiError::missing_auth_header()
    })?;

    let token = auth_value.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::warn!("Authorization header does not start with 'Bearer '");
        ApiError::invalid_auth_header()
    })?;

    // Validate token format (should start with sess_ and be the right length)
    if !token.starts_with("sess_") {
        tracing::warn!("Invalid session token format: token does not start with 'sess_'");
        return Err(ApiError::invalid_token());
    }

    if token.len() != 37 {
        tracing::warn!(
            "Invalid session token format: expected length 37, got {}",
            token.len()
        );
        return Err(ApiError::invalid_token());
    }

    Ok(token.to_string())
}

/// Authenticate a token string against the session repository
async fn authenticate_token_string(
    token: String,
    auth_state: &AuthState,
) -> Result<AuthenticatedUser, ApiError> {
    let token_hash = hash_session_token(&token);

    let session = auth_state
        .session_repository
        .get_session_by_token_hash(token_hash)
        .await
        .map_err(|e| {
            tracing::error!("Failed to get session from repository: {}", e);
            ApiError::internal_server_error("Failed to authenticate session")
        })?
        .ok_or_else(|| {
            tracing::warn!("Session not found for supplied token");
            ApiError::session_not_found()
        })?;

    let now = Utc::now();
    if session.expires_at < now {
        tracing::warn!(
            "Session expired: session_id={}, expired {} seconds ago",
            session.session_id,
            now.signed_duration_since(session.expires_at).num_seconds()
        );
        return Err(ApiError::session_expired());
    }

    tracing::debug!(
        "Successfully authenticated session: user_id={}, session_id={}",
        session.user_id,
        session.session_id
    );

    Ok(AuthenticatedUser {
        user_id: session.user_id,
        session_id: session.session_id,
    })
}

/// Authentication middleware that validates session tokens
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_token_from_request(&request).map_err(|e| e.into_response())?;
    let user = authenticate_token_string(token, &state)
        .await
        .map_err(|e| e.into_response())?;

    tracing::debug!(
        "Authentication successful for user_id={} on {} {}",
        user.user_id,
        request.method(),
        request.uri().path()
    );
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Authentication middleware for admin routes. Validates the session token
/// and requires the account's role to be ADMIN.
pub async fn admin_auth_middleware(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_token_from_request(&request).map_err(|e| e.into_response())?;
    let user = authenticate_token_string(token, &state)
        .await
        .map_err(|e| e.into_response())?;

    let account = state
        .user_repository
        .get_user(user.user_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load user for admin check: {}", e);
            ApiError::internal_server_error("Failed to authenticate session").into_response()
        })?
        .ok_or_else(|| {
            ApiError::unauthorized("User account no longer exists").into_response()
        })?;

    if account.role != UserRole::Admin {
        tracing::warn!(
            "Non-admin user attempted admin route: user_id={}",
            user.user_id
        );
        return Err(
            ApiError::forbidden("You do not have permission to perform this action")
                .into_response(),
        );
    }

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_auth(value: Option<&str>) -> Request {
        let mut builder = http::Request::builder().uri("/payments/subscribe");
        if let Some(value) = value {
            builder = builder.header("authorization", value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_token_missing_header() {
        let err = extract_token_from_request(&request_with_auth(None)).unwrap_err();
        assert_eq!(err.status, http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_extract_token_rejects_non_bearer() {
        let err =
            extract_token_from_request(&request_with_auth(Some("Basic abc"))).unwrap_err();
        assert_eq!(err.status, http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_extract_token_rejects_bad_format() {
        let err = extract_token_from_request(&request_with_auth(Some("Bearer short")))
            .unwrap_err();
        assert_eq!(err.status, http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_extract_token_accepts_valid_format() {
        // sess_ prefix plus 32 chars of token body
        let token = format!("sess_{}", "a".repeat(32));
        let header = format!("Bearer {}", token);
        let extracted =
            extract_token_from_request(&request_with_auth(Some(&header))).unwrap();
        assert_eq!(extracted, token);
    }

    #[test]
    fn test_hash_session_token_is_stable() {
        let a = hash_session_token("sess_example");
        let b = hash_session_token("sess_example");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_session_token("sess_other"));
    }
}
