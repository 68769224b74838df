pub mod auth;

pub use auth::{admin_auth_middleware, auth_middleware, AuthState, AuthenticatedUser};
