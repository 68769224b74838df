use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub billing_service: Arc<dyn services::billing::ports::BillingService>,
    pub user_repository: Arc<dyn services::user::ports::UserRepository>,
    pub session_repository: Arc<dyn services::auth::ports::SessionRepository>,
    /// Public provider key served to the client checkout widget
    pub razorpay_key_id: String,
}
