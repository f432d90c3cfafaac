//! Persistence layer for notifications, subscriptions and target profiles.
//!
//! Repositories are traits so the service layer can run against
//! PostgreSQL ([`repositories`]) or the in-memory implementations in
//! [`memory`] (tests, single-process demos). [`Storage`] bundles one of
//! each.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

pub mod memory;
pub mod models;
pub mod repositories;

use repositories::{
    NotificationRepository, PgNotificationRepo, PgSubscriptionRepo, PgTargetDirectory,
    SubscriptionRepository, TargetDirectory,
};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply the embedded migrations in `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// One repository of each kind, sharing a backend.
#[derive(Clone)]
pub struct Storage {
    pub notifications: Arc<dyn NotificationRepository>,
    pub subscriptions: Arc<dyn SubscriptionRepository>,
    pub targets: Arc<dyn TargetDirectory>,
    pool: Option<DbPool>,
}

impl Storage {
    /// PostgreSQL-backed storage.
    pub fn postgres(pool: DbPool) -> Self {
        Self {
            notifications: Arc::new(PgNotificationRepo::new(pool.clone())),
            subscriptions: Arc::new(PgSubscriptionRepo::new(pool.clone())),
            targets: Arc::new(PgTargetDirectory::new(pool.clone())),
            pool: Some(pool),
        }
    }

    /// Process-local storage. Contents are lost on drop.
    pub fn in_memory() -> Self {
        Self {
            notifications: Arc::new(memory::InMemoryNotificationRepo::new()),
            subscriptions: Arc::new(memory::InMemorySubscriptionRepo::new()),
            targets: Arc::new(memory::InMemoryTargetDirectory::new()),
            pool: None,
        }
    }

    /// The underlying pool, when backed by PostgreSQL.
    pub fn pool(&self) -> Option<&DbPool> {
        self.pool.as_ref()
    }

    /// Check backend reachability. In-memory storage is always healthy.
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        match &self.pool {
            Some(pool) => health_check(pool).await,
            None => Ok(()),
        }
    }
}
