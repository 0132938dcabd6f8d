use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::settings::repositories::{SettingEntry, SettingsRepository};
use tradesync_common::error::{TradeSyncError, TradeSyncResult};

pub struct PgSettingsRepository {
    pool: PgPool,
}

impl PgSettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> SettingEntry {
        SettingEntry {
            scope: row.get("scope"),
            key: row.get("key"),
            value: row.get("value"),
        }
    }
}

#[async_trait]
impl SettingsRepository for PgSettingsRepository {
    async fn load_all(&self, source_system_id: i32) -> TradeSyncResult<Vec<SettingEntry>> {
        let rows = sqlx::query(
            "select scope, key, value
             from integration_settings
             where source_system_id = $1
             order by scope, key",
        )
        .bind(source_system_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TradeSyncError::Database(e.to_string()))?;

        tracing::debug!(source_system_id, count = rows.len(), "loaded integration settings");
        Ok(rows.into_iter().map(Self::map_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create_pool;
    use uuid::Uuid;

    async fn test_repo() -> Option<(PgSettingsRepository, PgPool)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = create_pool(&url, 2).await.expect("db should connect");
        sqlx::query(
            "create table if not exists integration_settings (
               source_system_id int not null,
               scope text not null,
               key text not null,
               value text not null,
               primary key (source_system_id, scope, key)
             )",
        )
        .execute(&pool)
        .await
        .ok()?;
        Some((PgSettingsRepository::new(pool.clone()), pool))
    }

    #[tokio::test]
    async fn load_all_returns_only_the_requested_source_system() {
        let (repo, pool) = match test_repo().await {
            Some(r) => r,
            None => return,
        };
        let ssid = (Uuid::new_v4().as_u128() % 1_000_000_000) as i32 + 1_000_000;
        for (system, scope, key, value) in [
            (ssid, "Global", "BatchSize", "1000"),
            (ssid, "trades", "TradeTypes", "1,2"),
            (ssid + 1, "trades", "TradeTypes", "9"),
        ] {
            sqlx::query(
                "insert into integration_settings (source_system_id, scope, key, value)
                 values ($1, $2, $3, $4)",
            )
            .bind(system)
            .bind(scope)
            .bind(key)
            .bind(value)
            .execute(&pool)
            .await
            .expect("seed");
        }

        let entries = repo.load_all(ssid).await.expect("load");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].scope, "Global");
        assert_eq!(entries[1].value, "1,2");
    }
}
