pub mod settings;
pub mod source;
pub mod sync;
pub mod uom;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tradesync_common::error::{TradeSyncError, TradeSyncResult};

/// Create a Postgres connection pool from a database URL.
///
/// The integrator runs jobs one at a time, so a small pool is enough.
pub async fn create_pool(database_url: &str, max_connections: u32) -> TradeSyncResult<PgPool> {
    tracing::info!(max_connections, "connecting to database");
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| TradeSyncError::Database(e.to_string()))
}
