use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Account roles. Admins manage content and may not purchase subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "USER",
            UserRole::Admin => "ADMIN",
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(UserRole::User),
            "ADMIN" => Ok(UserRole::Admin),
            other => Err(format!("Unknown user role: {}", other)),
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of an account's recurring-billing subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub enum SubscriptionStatus {
    Created,
    Active,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Created => "created",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(SubscriptionStatus::Created),
            "active" => Ok(SubscriptionStatus::Active),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(format!("Unknown subscription status: {}", other)),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's embedded subscription reference. Both fields are None until
/// a subscription is initiated, and cleared again after a refunded cancel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRef {
    pub id: Option<String>,
    pub status: Option<SubscriptionStatus>,
}

impl SubscriptionRef {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Represents a user in the system
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: Option<String>,
    pub role: UserRole,
    pub subscription: SubscriptionRef,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Repository trait for user accounts. Only the billing workflow mutates
/// the subscription reference; account creation lives in the signup flow.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Get a user by id
    async fn get_user(&self, user_id: UserId) -> anyhow::Result<Option<User>>;

    /// Replace the user's subscription reference
    async fn update_subscription(
        &self,
        user_id: UserId,
        subscription: SubscriptionRef,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_roundtrip() {
        assert_eq!("USER".parse::<UserRole>().unwrap(), UserRole::User);
        assert_eq!("ADMIN".parse::<UserRole>().unwrap(), UserRole::Admin);
        assert!("user".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            SubscriptionStatus::Created,
            SubscriptionStatus::Active,
            SubscriptionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>(), Ok(status));
        }
        assert!("canceled".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn test_subscription_ref_default_is_none() {
        let sub = SubscriptionRef::none();
        assert!(sub.id.is_none());
        assert!(sub.status.is_none());
    }
}
