pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, DbPool};

use anyhow::Result;
use repositories::{
    PostgresPaymentRepository, PostgresSessionRepository, PostgresUserRepository,
};
use std::sync::Arc;

/// Database service combining all repositories
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database service from a connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a new database service from configuration
    pub async fn from_config(config: &config::DatabaseConfig) -> Result<Self> {
        let pool = create_pool(config)?;
        Ok(Self::new(pool))
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run(&self.pool).await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn user_repository(&self) -> Arc<dyn services::user::ports::UserRepository> {
        Arc::new(PostgresUserRepository::new(self.pool.clone()))
    }

    pub fn payment_repository(&self) -> Arc<dyn services::billing::ports::PaymentRepository> {
        Arc::new(PostgresPaymentRepository::new(self.pool.clone()))
    }

    pub fn session_repository(&self) -> Arc<dyn services::auth::ports::SessionRepository> {
        Arc::new(PostgresSessionRepository::new(self.pool.clone()))
    }
}
