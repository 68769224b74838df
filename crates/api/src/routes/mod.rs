pub mod payments;

use axum::{middleware::from_fn_with_state, routing::get, Json, Router};
use http::HeaderValue;
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::ToSchema;

use crate::{middleware::AuthState, state::AppState};

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// API version
    pub version: &'static str,
}

/// Health check endpoint
///
/// Returns the health status of the API service, used by load balancers and
/// monitoring systems to verify service availability.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn is_origin_allowed(origin_str: &str, cors_config: &config::CorsConfig) -> bool {
    if cors_config.exact_matches.iter().any(|o| o == origin_str) {
        return true;
    }

    if let Some(remainder) = origin_str.strip_prefix("http://localhost") {
        if remainder.is_empty() || remainder.starts_with(':') {
            return true;
        }
    }

    if let Some(remainder) = origin_str.strip_prefix("http://127.0.0.1") {
        if remainder.is_empty() || remainder.starts_with(':') {
            return true;
        }
    }

    if origin_str.starts_with("https://")
        && cors_config
            .wildcard_suffixes
            .iter()
            .any(|suffix| origin_str.ends_with(suffix))
    {
        return true;
    }

    false
}

/// Create the main API router with CORS configuration
pub fn create_router_with_cors(app_state: AppState, cors_config: config::CorsConfig) -> Router {
    // Create auth state for middleware
    let auth_state = AuthState {
        session_repository: app_state.session_repository.clone(),
        user_repository: app_state.user_repository.clone(),
    };

    // Payment routes (requires authentication)
    let payment_routes = payments::create_payments_router().layer(from_fn_with_state(
        auth_state.clone(),
        crate::middleware::auth_middleware,
    ));

    // Admin listing (requires admin authentication)
    let admin_routes = payments::create_admin_payments_router().layer(from_fn_with_state(
        auth_state,
        crate::middleware::admin_auth_middleware,
    ));

    // Public routes (no auth required)
    let public_routes = payments::create_public_payments_router();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| is_origin_allowed(o, &cors_config))
                .unwrap_or(false)
        }))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .merge(payment_routes)
        .merge(admin_routes)
        .merge(public_routes)
        .layer(cors)
        .with_state(app_state)
}

/// Create the main API router with default CORS configuration
pub fn create_router(app_state: AppState) -> Router {
    create_router_with_cors(app_state, config::CorsConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cors_config() -> config::CorsConfig {
        config::CorsConfig {
            exact_matches: vec!["https://lms.example.com".to_string()],
            wildcard_suffixes: vec![".example.org".to_string()],
        }
    }

    #[test]
    fn test_origin_exact_match() {
        assert!(is_origin_allowed("https://lms.example.com", &cors_config()));
        assert!(!is_origin_allowed("https://evil.example.com", &cors_config()));
    }

    #[test]
    fn test_origin_localhost_always_allowed() {
        assert!(is_origin_allowed("http://localhost:3000", &cors_config()));
        assert!(is_origin_allowed("http://127.0.0.1:8080", &cors_config()));
    }

    #[test]
    fn test_origin_wildcard_requires_https() {
        assert!(is_origin_allowed("https://app.example.org", &cors_config()));
        assert!(!is_origin_allowed("http://app.example.org", &cors_config()));
    }
}
