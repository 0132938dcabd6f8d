use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::sync::models::{IntegrationStatusRecord, ResyncSet, RunStatus, WatermarkCursor};
use crate::sync::repositories::{ResyncRepository, StatusStore};
use tradesync_common::error::{TradeSyncError, TradeSyncResult};

const CACHE_EXPIRY_CHANNEL: &str = "integration_cache_expiry";

#[derive(Clone)]
pub struct PgStatusRepository {
    pool: PgPool,
}

impl PgStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> TradeSyncResult<IntegrationStatusRecord> {
        let status_raw: String = row.get("status");
        let status = RunStatus::from_str(&status_raw).map_err(TradeSyncError::Internal)?;

        Ok(IntegrationStatusRecord {
            source_system_id: row.get("source_system_id"),
            integration_name: row.get("integration_name"),
            status,
            watermark: WatermarkCursor {
                last_timestamp: row.get("max_sync_date_time"),
                last_id: row.get("max_sync_date_max_pk_id"),
            },
            last_started_at: row.get("last_started_at"),
            last_finished_at: row.get("last_finished_at"),
            error_message: row.get("error_message"),
            updated_at: row.get("updated_at"),
        })
    }

    pub async fn get_status(
        &self,
        source_system_id: i32,
        name: &str,
    ) -> TradeSyncResult<Option<IntegrationStatusRecord>> {
        let row = sqlx::query(
            "select source_system_id, integration_name, status, max_sync_date_time, max_sync_date_max_pk_id,
                    last_started_at, last_finished_at, error_message, updated_at
             from integration_status
             where source_system_id = $1 and integration_name = $2",
        )
        .bind(source_system_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TradeSyncError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }
}

#[async_trait]
impl StatusStore for PgStatusRepository {
    async fn source_system_id_by_name(&self, name: &str) -> TradeSyncResult<i32> {
        let row = sqlx::query("select id from source_systems where name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TradeSyncError::Database(e.to_string()))?;

        row.map(|r| r.get::<i32, _>("id"))
            .ok_or_else(|| TradeSyncError::NotFound(format!("source system {name}")))
    }

    async fn integration_start(
        &self,
        source_system_id: i32,
        name: &str,
    ) -> TradeSyncResult<WatermarkCursor> {
        let row = sqlx::query(
            "insert into integration_status (source_system_id, integration_name, status, last_started_at, updated_at)
             values ($1, $2, 'running', $3, $3)
             on conflict (source_system_id, integration_name) do update
               set status = 'running', error_message = null, last_started_at = $3, updated_at = $3
             returning max_sync_date_time, max_sync_date_max_pk_id",
        )
        .bind(source_system_id)
        .bind(name)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| TradeSyncError::Database(e.to_string()))?;

        Ok(WatermarkCursor {
            last_timestamp: row.get("max_sync_date_time"),
            last_id: row.get("max_sync_date_max_pk_id"),
        })
    }

    async fn save_watermark(
        &self,
        source_system_id: i32,
        name: &str,
        cursor: &WatermarkCursor,
    ) -> TradeSyncResult<()> {
        sqlx::query(
            "update integration_status
             set max_sync_date_time = $1, max_sync_date_max_pk_id = $2, updated_at = $3
             where source_system_id = $4 and integration_name = $5",
        )
        .bind(cursor.last_timestamp)
        .bind(cursor.last_id)
        .bind(Utc::now())
        .bind(source_system_id)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| TradeSyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn integration_stop(
        &self,
        source_system_id: i32,
        name: &str,
        cursor: &WatermarkCursor,
    ) -> TradeSyncResult<()> {
        let now = Utc::now();
        sqlx::query(
            "update integration_status
             set status = 'idle', max_sync_date_time = $1, max_sync_date_max_pk_id = $2,
                 error_message = null, last_finished_at = $3, updated_at = $3
             where source_system_id = $4 and integration_name = $5",
        )
        .bind(cursor.last_timestamp)
        .bind(cursor.last_id)
        .bind(now)
        .bind(source_system_id)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| TradeSyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn integration_error(
        &self,
        source_system_id: i32,
        name: &str,
        cursor: &WatermarkCursor,
        message: &str,
    ) -> TradeSyncResult<()> {
        sqlx::query(
            "update integration_status
             set status = 'failed', max_sync_date_time = $1, max_sync_date_max_pk_id = $2,
                 error_message = $3, updated_at = $4
             where source_system_id = $5 and integration_name = $6",
        )
        .bind(cursor.last_timestamp)
        .bind(cursor.last_id)
        .bind(message)
        .bind(Utc::now())
        .bind(source_system_id)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(|e| TradeSyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn expire_caches(&self, source_system_id: i32) -> TradeSyncResult<()> {
        sqlx::query("select pg_notify($1, $2)")
            .bind(CACHE_EXPIRY_CHANNEL)
            .bind(source_system_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| TradeSyncError::Database(e.to_string()))?;

        Ok(())
    }

    async fn track_integrations_completed(
        &self,
        source_system_id: i32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> TradeSyncResult<()> {
        sqlx::query(
            "insert into integration_runs (id, source_system_id, started_at, finished_at)
             values ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(source_system_id)
        .bind(started_at)
        .bind(finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| TradeSyncError::Database(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl ResyncRepository for PgStatusRepository {
    async fn counterparty_ids_to_resync(&self, source_system_id: i32) -> TradeSyncResult<ResyncSet> {
        let rows = sqlx::query(
            "select counterparty_source_id from counterparty_resync
             where source_system_id = $1 and resync",
        )
        .bind(source_system_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TradeSyncError::Database(e.to_string()))?;

        Ok(ResyncSet::new(
            rows.into_iter().map(|r| r.get::<i64, _>("counterparty_source_id")),
        ))
    }

    async fn reset_resync_flags(
        &self,
        source_system_id: i32,
        ids: &ResyncSet,
    ) -> TradeSyncResult<()> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            "update counterparty_resync
             set resync = false, updated_at = $1
             where source_system_id = $2 and counterparty_source_id = any($3)",
        )
        .bind(Utc::now())
        .bind(source_system_id)
        .bind(ids.ids())
        .execute(&self.pool)
        .await
        .map_err(|e| TradeSyncError::Database(e.to_string()))?;

        Ok(())
    }
}
