use crate::pool::DbPool;
use async_trait::async_trait;
use services::billing::ports::{PaymentRecord, PaymentRepository};

pub struct PostgresPaymentRepository {
    pool: DbPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: tokio_postgres::Row) -> PaymentRecord {
    PaymentRecord {
        payment_id: row.get("payment_id"),
        subscription_id: row.get("subscription_id"),
        signature: row.get("signature"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn create_payment(&self, record: PaymentRecord) -> anyhow::Result<PaymentRecord> {
        tracing::info!(
            "Repository: Recording payment - payment_id={}, subscription_id={}",
            record.payment_id,
            record.subscription_id
        );

        let client = self.pool.get().await?;

        let row = client
            .query_one(
                "INSERT INTO payments (payment_id, subscription_id, signature, created_at)
                 VALUES ($1, $2, $3, $4)
                 RETURNING payment_id, subscription_id, signature, created_at",
                &[
                    &record.payment_id,
                    &record.subscription_id,
                    &record.signature,
                    &record.created_at,
                ],
            )
            .await?;

        Ok(row_to_record(row))
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> anyhow::Result<Option<PaymentRecord>> {
        tracing::debug!(
            "Repository: Fetching payment - subscription_id={}",
            subscription_id
        );

        let client = self.pool.get().await?;

        let row = client
            .query_opt(
                "SELECT payment_id, subscription_id, signature, created_at
                 FROM payments
                 WHERE subscription_id = $1
                 ORDER BY created_at DESC
                 LIMIT 1",
                &[&subscription_id],
            )
            .await?;

        Ok(row.map(row_to_record))
    }

    async fn delete_payment(&self, payment_id: &str) -> anyhow::Result<()> {
        tracing::info!("Repository: Deleting payment - payment_id={}", payment_id);

        let client = self.pool.get().await?;

        client
            .execute("DELETE FROM payments WHERE payment_id = $1", &[&payment_id])
            .await?;

        Ok(())
    }
}
