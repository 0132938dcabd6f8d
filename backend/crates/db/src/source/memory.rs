use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::source::filters::{BaseFilter, FilterPipeline, ResolvedFilter};
use crate::source::models::{BatchRequest, BatchResult, EntityKind, SourceRow};
use crate::source::repositories::{BatchFetcher, BulkFetcher};
use tradesync_common::error::{TradeSyncError, TradeSyncResult};

/// In-memory source for engine tests. Built only under `cfg(test)` or the
/// `test-util` feature.
///
/// Applies the same [`FilterPipeline`] as the Postgres fetcher, so batches
/// come back in `(change_timestamp, id)` order with identical boundaries.
pub struct MemorySource {
    entity: EntityKind,
    base_filters: Vec<BaseFilter>,
    supports_resync: bool,
    rows: Vec<SourceRow>,
    fetches: AtomicUsize,
    fail_on_fetch: Option<usize>,
}

impl MemorySource {
    pub fn new(entity: EntityKind, rows: Vec<SourceRow>) -> Self {
        Self {
            entity,
            base_filters: Vec::new(),
            supports_resync: true,
            rows,
            fetches: AtomicUsize::new(0),
            fail_on_fetch: None,
        }
    }

    pub fn with_filter(mut self, filter: BaseFilter) -> Self {
        self.base_filters.push(filter);
        self
    }

    pub fn without_resync(mut self) -> Self {
        self.supports_resync = false;
        self
    }

    /// Make the n-th fetch (1-based) fail with a database error.
    pub fn failing_on_fetch(mut self, n: usize) -> Self {
        self.fail_on_fetch = Some(n);
        self
    }

    /// Number of fetch calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn record_fetch(&self) -> TradeSyncResult<()> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_fetch == Some(n) {
            return Err(TradeSyncError::Database(format!(
                "{} source unavailable",
                self.entity
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BatchFetcher for MemorySource {
    fn base_filters(&self) -> &[BaseFilter] {
        &self.base_filters
    }

    fn supports_resync(&self) -> bool {
        self.supports_resync
    }

    async fn next_batch(&self, request: &BatchRequest<'_>) -> TradeSyncResult<BatchResult> {
        self.record_fetch()?;

        let pipeline = FilterPipeline::new(request);
        let mut selected: Vec<SourceRow> = self
            .rows
            .iter()
            .filter(|row| pipeline.admits(row))
            .cloned()
            .collect();

        selected.sort_by_key(|row| (row.change_timestamp, row.id));
        selected.truncate(request.batch_size);
        Ok(BatchResult::new(selected))
    }
}

#[async_trait]
impl BulkFetcher for MemorySource {
    fn base_filters(&self) -> &[BaseFilter] {
        &self.base_filters
    }

    async fn fetch_all(
        &self,
        base: &[ResolvedFilter],
        _timeout: Option<Duration>,
    ) -> TradeSyncResult<Vec<SourceRow>> {
        self.record_fetch()?;

        let mut rows: Vec<SourceRow> = self
            .rows
            .iter()
            .filter(|row| base.iter().all(|f| f.matches(&row.payload)))
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::models::{ResyncSet, WatermarkCursor};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, minute, 0).unwrap()
    }

    fn row(id: i64, minute: u32, counterparty: i64) -> SourceRow {
        SourceRow {
            id,
            change_timestamp: Some(at(minute)),
            counterparty_id: Some(counterparty),
            payload: serde_json::json!({ "id": id }),
        }
    }

    fn request<'a>(resync: Option<&'a ResyncSet>, cursor: WatermarkCursor) -> BatchRequest<'a> {
        BatchRequest {
            base: &[],
            resync,
            cursor,
            cutoff: at(59),
            batch_size: 2,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn batches_are_ordered_and_truncated() {
        let source = MemorySource::new(
            EntityKind::Trade,
            vec![row(4, 2, 1), row(3, 1, 1), row(1, 1, 1), row(2, 1, 1)],
        );

        let first = source.next_batch(&request(None, WatermarkCursor::empty())).await.unwrap();
        let ids: Vec<i64> = first.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);

        let cursor = first.advance(&WatermarkCursor::empty());
        let second = source.next_batch(&request(None, cursor)).await.unwrap();
        let ids: Vec<i64> = second.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn resync_restricts_to_counterparties() {
        let source = MemorySource::new(EntityKind::Trade, vec![row(1, 1, 10), row(2, 1, 20)]);
        let resync = ResyncSet::new([20]);
        let batch = source
            .next_batch(&request(Some(&resync), WatermarkCursor::empty()))
            .await
            .unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].id, 2);
    }

    #[tokio::test]
    async fn configured_fetch_failure_surfaces_as_database_error() {
        let source = MemorySource::new(EntityKind::Trade, vec![row(1, 1, 1)]).failing_on_fetch(1);
        let err = source
            .next_batch(&request(None, WatermarkCursor::empty()))
            .await
            .unwrap_err();
        assert!(matches!(err, TradeSyncError::Database(_)));
    }

    #[tokio::test]
    async fn fetch_all_applies_base_filters() {
        let mut active = row(1, 1, 1);
        active.payload = serde_json::json!({ "status": "A" });
        let mut inactive = row(2, 1, 1);
        inactive.payload = serde_json::json!({ "status": "I" });
        let source = MemorySource::new(EntityKind::Currency, vec![inactive, active]);

        let rows = source
            .fetch_all(
                &[ResolvedFilter::TextEquals {
                    column: "status".into(),
                    value: "A".into(),
                }],
                None,
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 1);
    }
}
