use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::sync::models::{ResyncSet, WatermarkCursor};
use tradesync_common::error::TradeSyncResult;

/// Persisted per-job sync state, keyed by source system and integration name.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Resolve a source system id by its configured name.
    async fn source_system_id_by_name(&self, name: &str) -> TradeSyncResult<i32>;

    /// Mark the job running and return the watermark it should resume from.
    async fn integration_start(
        &self,
        source_system_id: i32,
        name: &str,
    ) -> TradeSyncResult<WatermarkCursor>;

    /// Checkpoint the watermark mid-run, leaving the job marked running.
    async fn save_watermark(
        &self,
        source_system_id: i32,
        name: &str,
        cursor: &WatermarkCursor,
    ) -> TradeSyncResult<()>;

    /// Mark the job idle and persist its final watermark.
    async fn integration_stop(
        &self,
        source_system_id: i32,
        name: &str,
        cursor: &WatermarkCursor,
    ) -> TradeSyncResult<()>;

    /// Mark the job failed, keeping the watermark of the last pushed batch.
    async fn integration_error(
        &self,
        source_system_id: i32,
        name: &str,
        cursor: &WatermarkCursor,
        message: &str,
    ) -> TradeSyncResult<()>;

    /// Tell downstream consumers that cached aggregates are stale.
    async fn expire_caches(&self, source_system_id: i32) -> TradeSyncResult<()>;

    /// Record a fully successful run.
    async fn track_integrations_completed(
        &self,
        source_system_id: i32,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> TradeSyncResult<()>;
}

/// Counterparty resync flags.
#[async_trait]
pub trait ResyncRepository: Send + Sync {
    async fn counterparty_ids_to_resync(&self, source_system_id: i32) -> TradeSyncResult<ResyncSet>;

    /// Clear the flags that a successful run consumed.
    async fn reset_resync_flags(&self, source_system_id: i32, ids: &ResyncSet)
        -> TradeSyncResult<()>;
}
