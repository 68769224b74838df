pub mod error;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiErrorResponse};
pub use middleware::{admin_auth_middleware, auth_middleware, AuthState, AuthenticatedUser};
pub use openapi::ApiDoc;
pub use routes::create_router;
pub use state::AppState;
