use crate::pool::DbPool;
use async_trait::async_trait;
use services::auth::ports::{Session, SessionRepository};

pub struct PostgresSessionRepository {
    pool: DbPool,
}

impl PostgresSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn get_session_by_token_hash(
        &self,
        token_hash: String,
    ) -> anyhow::Result<Option<Session>> {
        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "SELECT session_id, user_id, token_hash, created_at, expires_at
                 FROM sessions
                 WHERE token_hash = $1",
                &[&token_hash],
            )
            .await?;

        Ok(row.map(|row| Session {
            session_id: row.get("session_id"),
            user_id: row.get("user_id"),
            token_hash: row.get("token_hash"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        }))
    }
}
