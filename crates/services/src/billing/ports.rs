use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::user::ports::SubscriptionStatus;
use crate::UserId;

/// Ledger entry for a verified payment, keyed by provider subscription id.
/// Exactly one record exists per verified payment; it is deleted when the
/// payment is refunded during cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub subscription_id: String,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

/// A subscription as reported by the billing provider on create/cancel
#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: SubscriptionStatus,
}

/// A subscription row from the provider's listing API. The status here is
/// the provider's raw vocabulary, which is wider than our local lifecycle.
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSubscriptionItem {
    pub id: String,
    pub plan_id: String,
    pub status: String,
    /// When the provider started billing this subscription
    pub start_at: Option<DateTime<Utc>>,
}

/// Refund processing speed passed through to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundSpeed {
    Normal,
    Optimum,
}

impl RefundSpeed {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundSpeed::Normal => "normal",
            RefundSpeed::Optimum => "optimum",
        }
    }
}

/// Aggregate view of provider payments for the admin dashboard
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSummary {
    pub count: usize,
    pub items: Vec<ProviderSubscriptionItem>,
    /// Per-calendar-month subscription counts (January first, 12 entries)
    pub monthly_counts: Vec<u32>,
}

/// Error types for billing operations
#[derive(Debug)]
pub enum BillingError {
    /// Account does not exist
    AccountNotFound,
    /// Account has no subscription reference
    NoSubscription,
    /// No ledger entry for the subscription (cancelled upstream, ledger inconsistent)
    PaymentRecordNotFound,
    /// Admins may not purchase or cancel subscriptions
    AdminNotAllowed,
    /// Supplied signature does not match the computed digest
    PaymentVerificationFailed,
    /// Billing provider call failed
    Provider(String),
    /// Cancellation committed but the refund window has passed
    RefundWindowExpired,
    /// Cancellation committed but the provider refund failed
    RefundFailed(String),
    /// Database error
    Database(String),
}

impl fmt::Display for BillingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccountNotFound => write!(f, "Account not found"),
            Self::NoSubscription => write!(f, "Account has no subscription"),
            Self::PaymentRecordNotFound => {
                write!(f, "No payment record found for subscription")
            }
            Self::AdminNotAllowed => {
                write!(f, "Admin accounts cannot purchase or cancel subscriptions")
            }
            Self::PaymentVerificationFailed => write!(f, "Payment verification failed"),
            Self::Provider(msg) => write!(f, "Billing provider error: {}", msg),
            Self::RefundWindowExpired => write!(f, "Refund window has expired"),
            Self::RefundFailed(msg) => write!(f, "Refund failed: {}", msg),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for BillingError {}

impl From<anyhow::Error> for BillingError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Repository trait for the payment ledger
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Append a verified payment to the ledger
    async fn create_payment(&self, record: PaymentRecord) -> anyhow::Result<PaymentRecord>;

    /// Look up a payment by provider subscription id
    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> anyhow::Result<Option<PaymentRecord>>;

    /// Delete a payment record after a successful refund
    async fn delete_payment(&self, payment_id: &str) -> anyhow::Result<()>;
}

/// Gateway trait for the external billing provider. Implemented by the
/// Razorpay adapter and substituted with a fake in tests.
#[async_trait]
pub trait BillingProviderGateway: Send + Sync {
    /// Create a recurring-billing subscription on the given plan
    async fn create_subscription(
        &self,
        plan_id: &str,
        total_count: u32,
        customer_notify: bool,
    ) -> anyhow::Result<ProviderSubscription>;

    /// Cancel a subscription; returns the provider-reported status
    async fn cancel_subscription(&self, subscription_id: &str)
        -> anyhow::Result<ProviderSubscription>;

    /// Refund a captured payment
    async fn refund_payment(&self, payment_id: &str, speed: RefundSpeed) -> anyhow::Result<()>;

    /// List subscriptions known to the provider (paginated)
    async fn list_subscriptions(
        &self,
        count: u32,
        skip: u32,
    ) -> anyhow::Result<Vec<ProviderSubscriptionItem>>;
}

/// Service trait for the subscription workflow
#[async_trait]
pub trait BillingService: Send + Sync {
    /// Start a subscription purchase for the account.
    /// Returns the provider subscription id for the client checkout flow.
    async fn initiate(&self, user_id: UserId) -> Result<String, BillingError>;

    /// Verify a payment signature submitted by the client checkout flow
    /// and activate the subscription.
    async fn verify(
        &self,
        user_id: UserId,
        payment_id: &str,
        subscription_id: &str,
        signature: &str,
    ) -> Result<(), BillingError>;

    /// Cancel the account's subscription and refund the payment when still
    /// inside the refund window. Cancellation commits even when the refund
    /// does not.
    async fn cancel(&self, user_id: UserId) -> Result<(), BillingError>;

    /// Admin only: aggregate provider payments with monthly counts
    async fn list_payments(&self, count: u32, skip: u32)
        -> Result<PaymentSummary, BillingError>;
}
