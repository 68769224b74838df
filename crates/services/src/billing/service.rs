use super::ports::{
    BillingError, BillingProviderGateway, BillingService, PaymentRecord, PaymentRepository,
    PaymentSummary, ProviderSubscriptionItem, RefundSpeed,
};
use crate::user::ports::{SubscriptionRef, SubscriptionStatus, UserRepository, UserRole};
use crate::UserId;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;

type HmacSha256 = Hmac<Sha256>;

/// Number of billing cycles a subscription runs for
const BILLING_CYCLE_COUNT: u32 = 12;

/// Whether the provider notifies the customer about subscription events
const CUSTOMER_NOTIFY: bool = true;

/// How long after a verified payment a cancellation still refunds
const REFUND_WINDOW_MS: i64 = 14 * 24 * 60 * 60 * 1000;

/// Refund processing speed requested from the provider
const REFUND_SPEED: RefundSpeed = RefundSpeed::Normal;

/// Configuration for BillingServiceImpl
pub struct BillingServiceConfig {
    pub user_repo: Arc<dyn UserRepository>,
    pub payment_repo: Arc<dyn PaymentRepository>,
    pub gateway: Arc<dyn BillingProviderGateway>,
    /// Shared secret for payment signature verification
    pub payment_secret: String,
    /// Provider plan to subscribe users to
    pub plan_id: String,
}

pub struct BillingServiceImpl {
    user_repo: Arc<dyn UserRepository>,
    payment_repo: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn BillingProviderGateway>,
    payment_secret: String,
    plan_id: String,
    /// Per-account locks serializing initiate/verify/cancel so concurrent
    /// cancels for the same account cannot double-refund
    account_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl BillingServiceImpl {
    pub fn new(config: BillingServiceConfig) -> Self {
        Self {
            user_repo: config.user_repo,
            payment_repo: config.payment_repo,
            gateway: config.gateway,
            payment_secret: config.payment_secret,
            plan_id: config.plan_id,
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn account_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.account_locks.lock().await;
        locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Load the account and reject admins, which may not buy or cancel
    async fn get_billable_user(
        &self,
        user_id: UserId,
    ) -> Result<crate::user::ports::User, BillingError> {
        let user = self
            .user_repo
            .get_user(user_id)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?
            .ok_or(BillingError::AccountNotFound)?;

        if user.role == UserRole::Admin {
            tracing::warn!(
                "Admin account attempted a subscription operation: user_id={}",
                user_id
            );
            return Err(BillingError::AdminNotAllowed);
        }

        Ok(user)
    }
}

/// Compute the hex HMAC-SHA256 digest over `"<payment_id>|<subscription_id>"`
fn compute_payment_signature(secret: &str, payment_id: &str, subscription_id: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any size");
    mac.update(format!("{}|{}", payment_id, subscription_id).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison of the computed digest against the supplied one
fn signatures_match(expected: &str, supplied: &str) -> bool {
    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}

/// A payment is refundable while elapsed time has not exceeded the window
fn within_refund_window(created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(created_at).num_milliseconds() <= REFUND_WINDOW_MS
}

/// Bucket provider subscriptions by the calendar month of their start
/// timestamp. January first, 12 entries; items without a start are skipped.
fn monthly_subscription_counts(items: &[ProviderSubscriptionItem]) -> Vec<u32> {
    let mut counts = vec![0u32; 12];
    for item in items {
        if let Some(start_at) = item.start_at {
            counts[start_at.month0() as usize] += 1;
        }
    }
    counts
}

#[async_trait]
impl BillingService for BillingServiceImpl {
    async fn initiate(&self, user_id: UserId) -> Result<String, BillingError> {
        tracing::info!("Initiating subscription for user_id={}", user_id);

        let lock = self.account_lock(user_id).await;
        let _guard = lock.lock().await;

        self.get_billable_user(user_id).await?;

        let subscription = self
            .gateway
            .create_subscription(&self.plan_id, BILLING_CYCLE_COUNT, CUSTOMER_NOTIFY)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "Provider error creating subscription");
                BillingError::Provider(e.to_string())
            })?;

        self.user_repo
            .update_subscription(
                user_id,
                SubscriptionRef {
                    id: Some(subscription.id.clone()),
                    status: Some(subscription.status),
                },
            )
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::info!(
            "Subscription created: user_id={}, subscription_id={}, status={}",
            user_id,
            subscription.id,
            subscription.status
        );

        Ok(subscription.id)
    }

    async fn verify(
        &self,
        user_id: UserId,
        payment_id: &str,
        subscription_id: &str,
        signature: &str,
    ) -> Result<(), BillingError> {
        tracing::info!(
            "Verifying payment for user_id={}, payment_id={}",
            user_id,
            payment_id
        );

        let lock = self.account_lock(user_id).await;
        let _guard = lock.lock().await;

        let user = self
            .user_repo
            .get_user(user_id)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?
            .ok_or(BillingError::AccountNotFound)?;

        // The digest is computed over the subscription id we stored at
        // initiate time. The client-supplied id is untrusted input and is
        // never used for anything but logging.
        let stored_subscription_id = user
            .subscription
            .id
            .as_deref()
            .ok_or(BillingError::NoSubscription)?;

        if subscription_id != stored_subscription_id {
            tracing::debug!(
                "Client-supplied subscription id differs from stored: user_id={}",
                user_id
            );
        }

        let expected =
            compute_payment_signature(&self.payment_secret, payment_id, stored_subscription_id);
        if !signatures_match(&expected, signature) {
            tracing::warn!(
                "Payment signature mismatch: user_id={}, payment_id={}",
                user_id,
                payment_id
            );
            return Err(BillingError::PaymentVerificationFailed);
        }

        self.payment_repo
            .create_payment(PaymentRecord {
                payment_id: payment_id.to_string(),
                subscription_id: stored_subscription_id.to_string(),
                signature: signature.to_string(),
                created_at: Utc::now(),
            })
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        self.user_repo
            .update_subscription(
                user_id,
                SubscriptionRef {
                    id: Some(stored_subscription_id.to_string()),
                    status: Some(SubscriptionStatus::Active),
                },
            )
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::info!(
            "Payment verified, subscription active: user_id={}, payment_id={}",
            user_id,
            payment_id
        );

        Ok(())
    }

    async fn cancel(&self, user_id: UserId) -> Result<(), BillingError> {
        tracing::info!("Cancelling subscription for user_id={}", user_id);

        let lock = self.account_lock(user_id).await;
        let _guard = lock.lock().await;

        let user = self.get_billable_user(user_id).await?;

        let subscription_id = user
            .subscription
            .id
            .as_deref()
            .ok_or(BillingError::NoSubscription)?
            .to_string();

        // Step 1: cancel at the provider. On failure nothing local changes
        // and the whole operation is safe to retry.
        let cancelled = self
            .gateway
            .cancel_subscription(&subscription_id)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "Provider error cancelling subscription");
                BillingError::Provider(e.to_string())
            })?;

        // Step 2: commit the provider-reported status. Everything past this
        // point leaves the subscription cancelled whether or not the refund
        // goes through; the refund is gated, the cancellation is not.
        self.user_repo
            .update_subscription(
                user_id,
                SubscriptionRef {
                    id: Some(subscription_id.clone()),
                    status: Some(cancelled.status),
                },
            )
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        let record = self
            .payment_repo
            .find_by_subscription_id(&subscription_id)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?
            .ok_or_else(|| {
                tracing::error!(
                    "Subscription cancelled but no payment record exists: user_id={}, subscription_id={}",
                    user_id,
                    subscription_id
                );
                BillingError::PaymentRecordNotFound
            })?;

        if !within_refund_window(record.created_at, Utc::now()) {
            tracing::info!(
                "Refund window expired: user_id={}, payment_id={}, paid_at={}",
                user_id,
                record.payment_id,
                record.created_at
            );
            return Err(BillingError::RefundWindowExpired);
        }

        self.gateway
            .refund_payment(&record.payment_id, REFUND_SPEED)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = ?e,
                    "Refund failed, subscription remains cancelled: user_id={}, payment_id={}",
                    user_id,
                    record.payment_id
                );
                BillingError::RefundFailed(e.to_string())
            })?;

        self.user_repo
            .update_subscription(user_id, SubscriptionRef::none())
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        self.payment_repo
            .delete_payment(&record.payment_id)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))?;

        tracing::info!(
            "Subscription cancelled and refunded: user_id={}, payment_id={}",
            user_id,
            record.payment_id
        );

        Ok(())
    }

    async fn list_payments(
        &self,
        count: u32,
        skip: u32,
    ) -> Result<PaymentSummary, BillingError> {
        tracing::debug!("Listing provider payments: count={}, skip={}", count, skip);

        let items = self
            .gateway
            .list_subscriptions(count, skip)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "Provider error listing subscriptions");
                BillingError::Provider(e.to_string())
            })?;

        let monthly_counts = monthly_subscription_counts(&items);

        Ok(PaymentSummary {
            count: items.len(),
            items,
            monthly_counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::ports::ProviderSubscription;
    use crate::user::ports::User;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    const SECRET: &str = "test_payment_secret";
    const PLAN: &str = "plan_test_basic";

    struct InMemoryUserRepository {
        users: StdMutex<HashMap<UserId, User>>,
    }

    impl InMemoryUserRepository {
        fn new() -> Self {
            Self {
                users: StdMutex::new(HashMap::new()),
            }
        }

        fn insert(&self, user: User) {
            self.users.lock().unwrap().insert(user.id, user);
        }

        fn get(&self, user_id: UserId) -> Option<User> {
            self.users.lock().unwrap().get(&user_id).cloned()
        }
    }

    #[async_trait]
    impl UserRepository for InMemoryUserRepository {
        async fn get_user(&self, user_id: UserId) -> anyhow::Result<Option<User>> {
            Ok(self.users.lock().unwrap().get(&user_id).cloned())
        }

        async fn update_subscription(
            &self,
            user_id: UserId,
            subscription: SubscriptionRef,
        ) -> anyhow::Result<()> {
            let mut users = self.users.lock().unwrap();
            let user = users
                .get_mut(&user_id)
                .ok_or_else(|| anyhow::anyhow!("user not found"))?;
            user.subscription = subscription;
            user.updated_at = Utc::now();
            Ok(())
        }
    }

    struct InMemoryPaymentRepository {
        records: StdMutex<Vec<PaymentRecord>>,
    }

    impl InMemoryPaymentRepository {
        fn new() -> Self {
            Self {
                records: StdMutex::new(Vec::new()),
            }
        }

        fn all(&self) -> Vec<PaymentRecord> {
            self.records.lock().unwrap().clone()
        }

        fn insert(&self, record: PaymentRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    #[async_trait]
    impl PaymentRepository for InMemoryPaymentRepository {
        async fn create_payment(&self, record: PaymentRecord) -> anyhow::Result<PaymentRecord> {
            self.records.lock().unwrap().push(record.clone());
            Ok(record)
        }

        async fn find_by_subscription_id(
            &self,
            subscription_id: &str,
        ) -> anyhow::Result<Option<PaymentRecord>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.subscription_id == subscription_id)
                .cloned())
        }

        async fn delete_payment(&self, payment_id: &str) -> anyhow::Result<()> {
            self.records
                .lock()
                .unwrap()
                .retain(|r| r.payment_id != payment_id);
            Ok(())
        }
    }

    struct FakeGateway {
        create_calls: AtomicU32,
        cancel_calls: AtomicU32,
        refund_calls: AtomicU32,
        fail_create: bool,
        fail_cancel: bool,
        fail_refund: bool,
        list_items: StdMutex<Vec<ProviderSubscriptionItem>>,
    }

    impl FakeGateway {
        fn new() -> Self {
            Self {
                create_calls: AtomicU32::new(0),
                cancel_calls: AtomicU32::new(0),
                refund_calls: AtomicU32::new(0),
                fail_create: false,
                fail_cancel: false,
                fail_refund: false,
                list_items: StdMutex::new(Vec::new()),
            }
        }

        fn failing_create() -> Self {
            Self {
                fail_create: true,
                ..Self::new()
            }
        }

        fn failing_cancel() -> Self {
            Self {
                fail_cancel: true,
                ..Self::new()
            }
        }

        fn failing_refund() -> Self {
            Self {
                fail_refund: true,
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl BillingProviderGateway for FakeGateway {
        async fn create_subscription(
            &self,
            _plan_id: &str,
            _total_count: u32,
            _customer_notify: bool,
        ) -> anyhow::Result<ProviderSubscription> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                anyhow::bail!("provider unavailable");
            }
            Ok(ProviderSubscription {
                id: "sub_test_456".to_string(),
                status: SubscriptionStatus::Created,
            })
        }

        async fn cancel_subscription(
            &self,
            subscription_id: &str,
        ) -> anyhow::Result<ProviderSubscription> {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_cancel {
                anyhow::bail!("provider unavailable");
            }
            Ok(ProviderSubscription {
                id: subscription_id.to_string(),
                status: SubscriptionStatus::Cancelled,
            })
        }

        async fn refund_payment(
            &self,
            _payment_id: &str,
            _speed: RefundSpeed,
        ) -> anyhow::Result<()> {
            self.refund_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_refund {
                anyhow::bail!("refund rejected");
            }
            Ok(())
        }

        async fn list_subscriptions(
            &self,
            count: u32,
            skip: u32,
        ) -> anyhow::Result<Vec<ProviderSubscriptionItem>> {
            let items = self.list_items.lock().unwrap().clone();
            Ok(items
                .into_iter()
                .skip(skip as usize)
                .take(count as usize)
                .collect())
        }
    }

    struct TestContext {
        users: Arc<InMemoryUserRepository>,
        payments: Arc<InMemoryPaymentRepository>,
        gateway: Arc<FakeGateway>,
        service: Arc<BillingServiceImpl>,
    }

    fn context_with_gateway(gateway: FakeGateway) -> TestContext {
        let users = Arc::new(InMemoryUserRepository::new());
        let payments = Arc::new(InMemoryPaymentRepository::new());
        let gateway = Arc::new(gateway);
        let service = Arc::new(BillingServiceImpl::new(BillingServiceConfig {
            user_repo: users.clone(),
            payment_repo: payments.clone(),
            gateway: gateway.clone(),
            payment_secret: SECRET.to_string(),
            plan_id: PLAN.to_string(),
        }));
        TestContext {
            users,
            payments,
            gateway,
            service,
        }
    }

    fn context() -> TestContext {
        context_with_gateway(FakeGateway::new())
    }

    fn test_user(role: UserRole, subscription: SubscriptionRef) -> User {
        User {
            id: UserId::new(),
            email: "student@example.com".to_string(),
            name: Some("Test Student".to_string()),
            role,
            subscription,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn subscribed(id: &str, status: SubscriptionStatus) -> SubscriptionRef {
        SubscriptionRef {
            id: Some(id.to_string()),
            status: Some(status),
        }
    }

    fn payment_record_aged(payment_id: &str, subscription_id: &str, age: Duration) -> PaymentRecord {
        PaymentRecord {
            payment_id: payment_id.to_string(),
            subscription_id: subscription_id.to_string(),
            signature: compute_payment_signature(SECRET, payment_id, subscription_id),
            created_at: Utc::now() - age,
        }
    }

    #[test]
    fn test_signature_known_vector() {
        // HMAC-SHA256("test_payment_secret", "pay_test_123|sub_test_456")
        assert_eq!(
            compute_payment_signature(SECRET, "pay_test_123", "sub_test_456"),
            "cb98292d80610822565d9b8b1973b4fe173ca419cbd22dad40952a97a5282df9"
        );
    }

    #[test]
    fn test_signature_single_character_mutation_flips_result() {
        let valid = compute_payment_signature(SECRET, "pay_test_123", "sub_test_456");
        assert!(signatures_match(&valid, &valid));

        for i in 0..valid.len() {
            let mut tampered: Vec<u8> = valid.as_bytes().to_vec();
            tampered[i] = if tampered[i] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(tampered).unwrap();
            if tampered != valid {
                assert!(!signatures_match(&valid, &tampered), "mutation at {}", i);
            }
        }
    }

    #[test]
    fn test_refund_window_boundaries() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let window = Duration::milliseconds(REFUND_WINDOW_MS);

        assert!(within_refund_window(
            created,
            created + window - Duration::milliseconds(1)
        ));
        assert!(within_refund_window(created, created + window));
        assert!(!within_refund_window(
            created,
            created + window + Duration::milliseconds(1)
        ));
    }

    #[test]
    fn test_monthly_subscription_counts() {
        let item = |month: u32| ProviderSubscriptionItem {
            id: format!("sub_{}", month),
            plan_id: PLAN.to_string(),
            status: "active".to_string(),
            start_at: Some(Utc.with_ymd_and_hms(2024, month, 15, 0, 0, 0).unwrap()),
        };
        let no_start = ProviderSubscriptionItem {
            id: "sub_pending".to_string(),
            plan_id: PLAN.to_string(),
            status: "created".to_string(),
            start_at: None,
        };

        let counts =
            monthly_subscription_counts(&[item(1), item(3), item(3), item(12), no_start]);
        assert_eq!(counts.len(), 12);
        assert_eq!(counts[0], 1);
        assert_eq!(counts[2], 2);
        assert_eq!(counts[11], 1);
        assert_eq!(counts.iter().sum::<u32>(), 4);
    }

    #[tokio::test]
    async fn test_initiate_stores_subscription_on_account() {
        let ctx = context();
        let user = test_user(UserRole::User, SubscriptionRef::none());
        let user_id = user.id;
        ctx.users.insert(user);

        let subscription_id = ctx.service.initiate(user_id).await.unwrap();
        assert_eq!(subscription_id, "sub_test_456");

        let stored = ctx.users.get(user_id).unwrap();
        assert_eq!(stored.subscription.id.as_deref(), Some("sub_test_456"));
        assert_eq!(
            stored.subscription.status,
            Some(SubscriptionStatus::Created)
        );
        assert_eq!(ctx.gateway.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_initiate_unknown_account() {
        let ctx = context();
        let err = ctx.service.initiate(UserId::new()).await.unwrap_err();
        assert!(matches!(err, BillingError::AccountNotFound));
        assert_eq!(ctx.gateway.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_initiate_forbidden_for_admin() {
        let ctx = context();
        let admin = test_user(UserRole::Admin, SubscriptionRef::none());
        let admin_id = admin.id;
        ctx.users.insert(admin);

        let err = ctx.service.initiate(admin_id).await.unwrap_err();
        assert!(matches!(err, BillingError::AdminNotAllowed));
        assert_eq!(ctx.gateway.create_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            ctx.users.get(admin_id).unwrap().subscription,
            SubscriptionRef::none()
        );
    }

    #[tokio::test]
    async fn test_initiate_provider_error_leaves_account_unchanged() {
        let ctx = context_with_gateway(FakeGateway::failing_create());
        let user = test_user(UserRole::User, SubscriptionRef::none());
        let user_id = user.id;
        ctx.users.insert(user);

        let err = ctx.service.initiate(user_id).await.unwrap_err();
        assert!(matches!(err, BillingError::Provider(_)));
        assert_eq!(
            ctx.users.get(user_id).unwrap().subscription,
            SubscriptionRef::none()
        );
    }

    #[tokio::test]
    async fn test_verify_activates_subscription_and_records_payment() {
        let ctx = context();
        let user = test_user(
            UserRole::User,
            subscribed("sub_test_456", SubscriptionStatus::Created),
        );
        let user_id = user.id;
        ctx.users.insert(user);

        let signature = compute_payment_signature(SECRET, "pay_test_123", "sub_test_456");
        ctx.service
            .verify(user_id, "pay_test_123", "sub_test_456", &signature)
            .await
            .unwrap();

        let records = ctx.payments.all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payment_id, "pay_test_123");
        assert_eq!(records[0].subscription_id, "sub_test_456");

        let stored = ctx.users.get(user_id).unwrap();
        assert_eq!(stored.subscription.status, Some(SubscriptionStatus::Active));
        assert_eq!(stored.subscription.id.as_deref(), Some("sub_test_456"));
    }

    #[tokio::test]
    async fn test_verify_rejects_tampered_signature() {
        let ctx = context();
        let user = test_user(
            UserRole::User,
            subscribed("sub_test_456", SubscriptionStatus::Created),
        );
        let user_id = user.id;
        ctx.users.insert(user);

        let mut signature = compute_payment_signature(SECRET, "pay_test_123", "sub_test_456");
        let tampered_char = if signature.starts_with('0') { "1" } else { "0" };
        signature.replace_range(0..1, tampered_char);

        let err = ctx
            .service
            .verify(user_id, "pay_test_123", "sub_test_456", &signature)
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::PaymentVerificationFailed));
        assert!(ctx.payments.all().is_empty());
        assert_eq!(
            ctx.users.get(user_id).unwrap().subscription.status,
            Some(SubscriptionStatus::Created)
        );
    }

    #[tokio::test]
    async fn test_verify_computes_digest_over_stored_subscription_id() {
        let ctx = context();
        let user = test_user(
            UserRole::User,
            subscribed("sub_stored", SubscriptionStatus::Created),
        );
        let user_id = user.id;
        ctx.users.insert(user);

        // A signature over a client-chosen subscription id must not verify,
        // even when the client submits that same id alongside it.
        let forged = compute_payment_signature(SECRET, "pay_1", "sub_other");
        let err = ctx
            .service
            .verify(user_id, "pay_1", "sub_other", &forged)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::PaymentVerificationFailed));

        // The digest over the stored id verifies regardless of the supplied id.
        let genuine = compute_payment_signature(SECRET, "pay_1", "sub_stored");
        ctx.service
            .verify(user_id, "pay_1", "sub_other", &genuine)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_without_subscription() {
        let ctx = context();
        let user = test_user(UserRole::User, SubscriptionRef::none());
        let user_id = user.id;
        ctx.users.insert(user);

        let err = ctx
            .service
            .verify(user_id, "pay_1", "sub_1", "sig")
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NoSubscription));
    }

    #[tokio::test]
    async fn test_cancel_within_window_refunds_and_clears() {
        let ctx = context();
        let user = test_user(
            UserRole::User,
            subscribed("sub_test_456", SubscriptionStatus::Active),
        );
        let user_id = user.id;
        ctx.users.insert(user);
        ctx.payments.insert(payment_record_aged(
            "pay_test_123",
            "sub_test_456",
            Duration::days(2),
        ));

        ctx.service.cancel(user_id).await.unwrap();

        let stored = ctx.users.get(user_id).unwrap();
        assert_eq!(stored.subscription, SubscriptionRef::none());
        assert!(ctx.payments.all().is_empty());
        assert_eq!(ctx.gateway.cancel_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.gateway.refund_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_window_keeps_record_and_cancelled_status() {
        let ctx = context();
        let user = test_user(
            UserRole::User,
            subscribed("sub_test_456", SubscriptionStatus::Active),
        );
        let user_id = user.id;
        ctx.users.insert(user);
        ctx.payments.insert(payment_record_aged(
            "pay_test_123",
            "sub_test_456",
            Duration::days(20),
        ));

        let err = ctx.service.cancel(user_id).await.unwrap_err();
        assert!(matches!(err, BillingError::RefundWindowExpired));

        // Cancellation committed even though the refund did not.
        let stored = ctx.users.get(user_id).unwrap();
        assert_eq!(
            stored.subscription.status,
            Some(SubscriptionStatus::Cancelled)
        );
        assert_eq!(stored.subscription.id.as_deref(), Some("sub_test_456"));
        assert_eq!(ctx.payments.all().len(), 1);
        assert_eq!(ctx.gateway.refund_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_forbidden_for_admin_regardless_of_state() {
        let ctx = context();
        let admin = test_user(
            UserRole::Admin,
            subscribed("sub_test_456", SubscriptionStatus::Active),
        );
        let admin_id = admin.id;
        ctx.users.insert(admin);

        let err = ctx.service.cancel(admin_id).await.unwrap_err();
        assert!(matches!(err, BillingError::AdminNotAllowed));
        assert_eq!(ctx.gateway.cancel_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_without_subscription() {
        let ctx = context();
        let user = test_user(UserRole::User, SubscriptionRef::none());
        let user_id = user.id;
        ctx.users.insert(user);

        let err = ctx.service.cancel(user_id).await.unwrap_err();
        assert!(matches!(err, BillingError::NoSubscription));
        assert_eq!(ctx.gateway.cancel_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_provider_error_leaves_local_state() {
        let ctx = context_with_gateway(FakeGateway::failing_cancel());
        let user = test_user(
            UserRole::User,
            subscribed("sub_test_456", SubscriptionStatus::Active),
        );
        let user_id = user.id;
        ctx.users.insert(user);
        ctx.payments.insert(payment_record_aged(
            "pay_test_123",
            "sub_test_456",
            Duration::days(2),
        ));

        let err = ctx.service.cancel(user_id).await.unwrap_err();
        assert!(matches!(err, BillingError::Provider(_)));

        let stored = ctx.users.get(user_id).unwrap();
        assert_eq!(stored.subscription.status, Some(SubscriptionStatus::Active));
        assert_eq!(ctx.payments.all().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_surfaces_missing_payment_record() {
        let ctx = context();
        let user = test_user(
            UserRole::User,
            subscribed("sub_test_456", SubscriptionStatus::Active),
        );
        let user_id = user.id;
        ctx.users.insert(user);

        let err = ctx.service.cancel(user_id).await.unwrap_err();
        assert!(matches!(err, BillingError::PaymentRecordNotFound));

        // The provider-side cancellation already committed.
        assert_eq!(
            ctx.users.get(user_id).unwrap().subscription.status,
            Some(SubscriptionStatus::Cancelled)
        );
        assert_eq!(ctx.gateway.cancel_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_refund_failure_keeps_record() {
        let ctx = context_with_gateway(FakeGateway::failing_refund());
        let user = test_user(
            UserRole::User,
            subscribed("sub_test_456", SubscriptionStatus::Active),
        );
        let user_id = user.id;
        ctx.users.insert(user);
        ctx.payments.insert(payment_record_aged(
            "pay_test_123",
            "sub_test_456",
            Duration::days(2),
        ));

        let err = ctx.service.cancel(user_id).await.unwrap_err();
        assert!(matches!(err, BillingError::RefundFailed(_)));

        let stored = ctx.users.get(user_id).unwrap();
        assert_eq!(
            stored.subscription.status,
            Some(SubscriptionStatus::Cancelled)
        );
        assert_eq!(ctx.payments.all().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cancels_refund_once() {
        let ctx = context();
        let user = test_user(
            UserRole::User,
            subscribed("sub_test_456", SubscriptionStatus::Active),
        );
        let user_id = user.id;
        ctx.users.insert(user);
        ctx.payments.insert(payment_record_aged(
            "pay_test_123",
            "sub_test_456",
            Duration::days(2),
        ));

        let (first, second) =
            tokio::join!(ctx.service.cancel(user_id), ctx.service.cancel(user_id));

        // The account lock serializes the two: one wins, the other finds the
        // subscription already cleared.
        assert_ne!(first.is_ok(), second.is_ok());
        let loser = if first.is_err() { first } else { second };
        assert!(matches!(loser.unwrap_err(), BillingError::NoSubscription));
        assert_eq!(ctx.gateway.refund_calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.gateway.cancel_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let ctx = context();
        let user = test_user(UserRole::User, SubscriptionRef::none());
        let user_id = user.id;
        ctx.users.insert(user);

        let subscription_id = ctx.service.initiate(user_id).await.unwrap();
        let signature = compute_payment_signature(SECRET, "pay_1", &subscription_id);
        ctx.service
            .verify(user_id, "pay_1", &subscription_id, &signature)
            .await
            .unwrap();

        assert_eq!(
            ctx.users.get(user_id).unwrap().subscription.status,
            Some(SubscriptionStatus::Active)
        );
        assert_eq!(ctx.payments.all().len(), 1);

        // Pretend the payment happened two days ago.
        {
            let mut records = ctx.payments.records.lock().unwrap();
            records[0].created_at = Utc::now() - Duration::days(2);
        }

        ctx.service.cancel(user_id).await.unwrap();

        let stored = ctx.users.get(user_id).unwrap();
        assert_eq!(stored.subscription, SubscriptionRef::none());
        assert!(ctx.payments.all().is_empty());
    }

    #[tokio::test]
    async fn test_list_payments_aggregates_monthly_counts() {
        let ctx = context();
        {
            let mut items = ctx.gateway.list_items.lock().unwrap();
            items.push(ProviderSubscriptionItem {
                id: "sub_jan".to_string(),
                plan_id: PLAN.to_string(),
                status: "active".to_string(),
                start_at: Some(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()),
            });
            items.push(ProviderSubscriptionItem {
                id: "sub_jun".to_string(),
                plan_id: PLAN.to_string(),
                status: "cancelled".to_string(),
                start_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            });
        }

        let summary = ctx.service.list_payments(10, 0).await.unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.monthly_counts[0], 1);
        assert_eq!(summary.monthly_counts[5], 1);
        assert_eq!(summary.monthly_counts.iter().sum::<u32>(), 2);
    }
}
