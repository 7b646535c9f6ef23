//! Postgres access: pool setup, embedded migrations, queries and the store seams.

pub mod memory;
pub mod queries;
pub mod store;

use std::time::Duration;

use sqlx::migrate::MigrateError;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Connect to PostgreSQL. Workers size the pool to their concurrency.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(2))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
}

/// Apply the migrations embedded from `./migrations`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
