use crate::pool::DbPool;
use async_trait::async_trait;
use services::user::ports::{SubscriptionRef, User, UserRepository};
use services::UserId;

pub struct PostgresUserRepository {
    pool: DbPool,
}

impl PostgresUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: tokio_postgres::Row) -> anyhow::Result<User> {
    let role: String = row.get("role");
    let subscription_status: Option<String> = row.get("subscription_status");
    let status = subscription_status
        .map(|s| s.parse().map_err(|e: String| anyhow::anyhow!(e)))
        .transpose()?;

    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        role: role.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        subscription: SubscriptionRef {
            id: row.get("subscription_id"),
            status,
        },
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn get_user(&self, user_id: UserId) -> anyhow::Result<Option<User>> {
        tracing::debug!("Repository: Fetching user - user_id={}", user_id);

        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "SELECT id, email, name, role, subscription_id, subscription_status,
                        created_at, updated_at
                 FROM users
                 WHERE id = $1",
                &[&user_id],
            )
            .await?;

        row.map(row_to_user).transpose()
    }

    async fn update_subscription(
        &self,
        user_id: UserId,
        subscription: SubscriptionRef,
    ) -> anyhow::Result<()> {
        tracing::info!(
            "Repository: Updating subscription - user_id={}, subscription_id={:?}, status={:?}",
            user_id,
            subscription.id,
            subscription.status
        );

        let client = self.pool.get().await?;
        let status = subscription.status.map(|s| s.as_str().to_string());

        let updated = client
            .execute(
                "UPDATE users
                 SET subscription_id = $2, subscription_status = $3, updated_at = NOW()
                 WHERE id = $1",
                &[&user_id, &subscription.id, &status],
            )
            .await?;

        if updated == 0 {
            anyhow::bail!("No user found with id {}", user_id);
        }

        Ok(())
    }
}
