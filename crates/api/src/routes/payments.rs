use crate::{error::ApiError, middleware::AuthenticatedUser, state::AppState};
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use services::billing::ports::{BillingError, ProviderSubscriptionItem};
use utoipa::ToSchema;

/// Response for a newly initiated subscription purchase
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscribeResponse {
    pub success: bool,
    /// Provider subscription id for the client checkout widget
    pub subscription_id: String,
}

/// Payment confirmation submitted by the client checkout flow
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    pub razorpay_payment_id: String,
    pub razorpay_subscription_id: String,
    pub razorpay_signature: String,
}

/// Response for a verified payment
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub message: String,
}

/// Response for a cancelled subscription
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UnsubscribeResponse {
    pub success: bool,
    pub message: String,
}

/// Response containing the public provider key
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RazorpayKeyResponse {
    pub success: bool,
    pub key: String,
}

/// Query parameters for the admin payment listing
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListPaymentsParams {
    /// Number of subscriptions to fetch from the provider
    #[serde(default = "default_count")]
    pub count: u32,
    /// Number of subscriptions to skip
    #[serde(default)]
    pub skip: u32,
}

fn default_count() -> u32 {
    10
}

/// Aggregate payment listing for the admin dashboard
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ListPaymentsResponse {
    pub success: bool,
    pub count: usize,
    pub payments: Vec<ProviderSubscriptionItem>,
    /// Per-calendar-month subscription counts (January first, 12 entries)
    pub monthly_counts: Vec<u32>,
}

/// Start a subscription purchase for the authenticated user
#[utoipa::path(
    post,
    path = "/payments/subscribe",
    tag = "Payments",
    responses(
        (status = 200, description = "Subscription created successfully", body = SubscribeResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 403, description = "Admins cannot purchase subscriptions", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Account not found", body = crate::error::ApiErrorResponse),
        (status = 502, description = "Billing provider error", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn subscribe(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SubscribeResponse>, ApiError> {
    tracing::info!("Subscribe requested by user_id={}", user.user_id);

    let subscription_id = app_state
        .billing_service
        .initiate(user.user_id)
        .await
        .map_err(|e| match e {
            BillingError::AccountNotFound => ApiError::not_found("Account not found"),
            BillingError::AdminNotAllowed => {
                ApiError::forbidden("Admin accounts cannot purchase subscriptions")
            }
            BillingError::Provider(msg) => {
                tracing::error!(error = ?msg, "Provider error creating subscription");
                ApiError::bad_gateway("Failed to create subscription with billing provider")
            }
            BillingError::Database(msg) => {
                tracing::error!(error = ?msg, "Database error creating subscription");
                ApiError::internal_server_error("Failed to create subscription")
            }
            _ => {
                tracing::error!(error = ?e, "Failed to create subscription");
                ApiError::internal_server_error("Failed to create subscription")
            }
        })?;

    Ok(Json(SubscribeResponse {
        success: true,
        subscription_id,
    }))
}

/// Verify a payment signature and activate the subscription
#[utoipa::path(
    post,
    path = "/payments/verify",
    tag = "Payments",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment verified successfully", body = VerifyPaymentResponse),
        (status = 400, description = "Payment verification failed", body = crate::error::ApiErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Account or subscription not found", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn verify_payment(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(req): Json<VerifyPaymentRequest>,
) -> Result<Json<VerifyPaymentResponse>, ApiError> {
    tracing::info!(
        "Payment verification requested by user_id={}, payment_id={}",
        user.user_id,
        req.razorpay_payment_id
    );

    app_state
        .billing_service
        .verify(
            user.user_id,
            &req.razorpay_payment_id,
            &req.razorpay_subscription_id,
            &req.razorpay_signature,
        )
        .await
        .map_err(|e| match e {
            BillingError::AccountNotFound => ApiError::not_found("Account not found"),
            BillingError::NoSubscription => {
                ApiError::not_found("No subscription found for this account")
            }
            BillingError::PaymentVerificationFailed => {
                ApiError::bad_request("Payment verification failed")
            }
            BillingError::Database(msg) => {
                tracing::error!(error = ?msg, "Database error verifying payment");
                ApiError::internal_server_error("Failed to verify payment")
            }
            _ => {
                tracing::error!(error = ?e, "Failed to verify payment");
                ApiError::internal_server_error("Failed to verify payment")
            }
        })?;

    Ok(Json(VerifyPaymentResponse {
        success: true,
        message: "Payment verified successfully".to_string(),
    }))
}

/// Cancel the authenticated user's subscription, refunding the payment
/// when still inside the refund window
#[utoipa::path(
    post,
    path = "/payments/unsubscribe",
    tag = "Payments",
    responses(
        (status = 200, description = "Subscription cancelled successfully", body = UnsubscribeResponse),
        (status = 400, description = "Refund window expired", body = crate::error::ApiErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 403, description = "Admins cannot cancel subscriptions", body = crate::error::ApiErrorResponse),
        (status = 404, description = "Account, subscription or payment not found", body = crate::error::ApiErrorResponse),
        (status = 502, description = "Billing provider error", body = crate::error::ApiErrorResponse),
        (status = 500, description = "Internal server error", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn unsubscribe(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<UnsubscribeResponse>, ApiError> {
    tracing::info!("Unsubscribe requested by user_id={}", user.user_id);

    app_state
        .billing_service
        .cancel(user.user_id)
        .await
        .map_err(|e| match e {
            BillingError::AccountNotFound => ApiError::not_found("Account not found"),
            BillingError::NoSubscription => {
                ApiError::not_found("No subscription found for this account")
            }
            BillingError::AdminNotAllowed => {
                ApiError::forbidden("Admin accounts cannot cancel subscriptions")
            }
            BillingError::PaymentRecordNotFound => ApiError::not_found(
                "Subscription cancelled but no payment record was found for it",
            ),
            BillingError::Provider(msg) => {
                tracing::error!(error = ?msg, "Provider error cancelling subscription");
                ApiError::bad_gateway("Failed to cancel subscription with billing provider")
            }
            BillingError::RefundWindowExpired => ApiError::bad_request(
                "Subscription cancelled, but the refund window has expired",
            ),
            BillingError::RefundFailed(msg) => {
                tracing::error!(error = ?msg, "Refund failed during cancellation");
                ApiError::bad_gateway("Subscription cancelled, but the refund failed")
            }
            BillingError::Database(msg) => {
                tracing::error!(error = ?msg, "Database error cancelling subscription");
                ApiError::internal_server_error("Failed to cancel subscription")
            }
            BillingError::PaymentVerificationFailed => {
                tracing::error!("Unexpected PaymentVerificationFailed in cancel");
                ApiError::internal_server_error("Failed to cancel subscription")
            }
        })?;

    Ok(Json(UnsubscribeResponse {
        success: true,
        message: "Subscription cancelled successfully".to_string(),
    }))
}

/// Get the public provider key for the client checkout widget
#[utoipa::path(
    get,
    path = "/payments/razorpay-key",
    tag = "Payments",
    responses(
        (status = 200, description = "Provider key retrieved successfully", body = RazorpayKeyResponse)
    )
)]
pub async fn get_razorpay_key(
    State(app_state): State<AppState>,
) -> Json<RazorpayKeyResponse> {
    Json(RazorpayKeyResponse {
        success: true,
        key: app_state.razorpay_key_id.clone(),
    })
}

/// List provider payments with monthly aggregates (admin only)
#[utoipa::path(
    get,
    path = "/payments",
    tag = "Payments",
    params(
        ListPaymentsParams
    ),
    responses(
        (status = 200, description = "Payments retrieved successfully", body = ListPaymentsResponse),
        (status = 401, description = "Unauthorized", body = crate::error::ApiErrorResponse),
        (status = 403, description = "Admin access required", body = crate::error::ApiErrorResponse),
        (status = 502, description = "Billing provider error", body = crate::error::ApiErrorResponse)
    ),
    security(
        ("session_token" = [])
    )
)]
pub async fn list_payments(
    State(app_state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(params): Query<ListPaymentsParams>,
) -> Result<Json<ListPaymentsResponse>, ApiError> {
    tracing::debug!(
        "Listing payments for admin user_id={}, count={}, skip={}",
        user.user_id,
        params.count,
        params.skip
    );

    let summary = app_state
        .billing_service
        .list_payments(params.count, params.skip)
        .await
        .map_err(|e| match e {
            BillingError::Provider(msg) => {
                tracing::error!(error = ?msg, "Provider error listing payments");
                ApiError::bad_gateway("Failed to list payments from billing provider")
            }
            _ => {
                tracing::error!(error = ?e, "Failed to list payments");
                ApiError::internal_server_error("Failed to list payments")
            }
        })?;

    Ok(Json(ListPaymentsResponse {
        success: true,
        count: summary.count,
        payments: summary.items,
        monthly_counts: summary.monthly_counts,
    }))
}

/// Subscription routes for authenticated users
pub fn create_payments_router() -> Router<AppState> {
    Router::new()
        .route("/payments/subscribe", post(subscribe))
        .route("/payments/verify", post(verify_payment))
        .route("/payments/unsubscribe", post(unsubscribe))
}

/// Admin-only payment listing
pub fn create_admin_payments_router() -> Router<AppState> {
    Router::new().route("/payments", get(list_payments))
}

/// Public payment routes (no auth)
pub fn create_public_payments_router() -> Router<AppState> {
    Router::new().route("/payments/razorpay-key", get(get_razorpay_key))
}
