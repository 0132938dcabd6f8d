use std::time::Duration;

use async_trait::async_trait;

use crate::source::filters::{BaseFilter, ResolvedFilter};
use crate::source::models::{BatchRequest, BatchResult, SourceRow};
use tradesync_common::error::TradeSyncResult;

/// Cursor-driven reader for one incremental entity type.
#[async_trait]
pub trait BatchFetcher: Send + Sync {
    /// Eligibility filters, resolved against job settings before the first fetch.
    fn base_filters(&self) -> &[BaseFilter];

    /// Whether rows carry an owning counterparty, which resync passes need.
    fn supports_resync(&self) -> bool {
        true
    }

    /// Next ordered batch strictly after `request.cursor`, at most `batch_size` rows.
    async fn next_batch(&self, request: &BatchRequest<'_>) -> TradeSyncResult<BatchResult>;
}

/// Whole-table reader for reference data synced in bulk.
#[async_trait]
pub trait BulkFetcher: Send + Sync {
    fn base_filters(&self) -> &[BaseFilter];

    async fn fetch_all(
        &self,
        base: &[ResolvedFilter],
        timeout: Option<Duration>,
    ) -> TradeSyncResult<Vec<SourceRow>>;
}
