use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{SessionId, UserId};

/// An authenticated session, looked up by the hash of its bearer token.
/// Sessions are provisioned by the login flow; this service only reads them.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Repository trait for session lookup
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Get a session by the SHA-256 hash of its token
    async fn get_session_by_token_hash(
        &self,
        token_hash: String,
    ) -> anyhow::Result<Option<Session>>;
}
