use async_trait::async_trait;

use crate::translate::IntegrationRecord;
use tradesync_common::error::TradeSyncResult;
use tradesync_db::sync::models::WatermarkCursor;

/// Destination endpoint for one entity type.
///
/// Pushes are upserts keyed by source id: resyncs, overlap windows and
/// batches re-fetched after a crash all deliver records more than once.
#[async_trait]
pub trait PushService: Send + Sync {
    async fn push(&self, source_system_id: i32, records: &[IntegrationRecord])
        -> TradeSyncResult<()>;

    /// Replace the destination's copy of a reference table.
    async fn bulk_sync(
        &self,
        source_system_id: i32,
        records: &[IntegrationRecord],
    ) -> TradeSyncResult<()> {
        self.push(source_system_id, records).await
    }

    /// Called once a pass has drained its source.
    async fn complete_pass(
        &self,
        _source_system_id: i32,
        _cursor: &WatermarkCursor,
    ) -> TradeSyncResult<()> {
        Ok(())
    }
}

/// Push `records` in order, `chunk_size` at a time. Returns the number pushed.
pub async fn push_in_chunks(
    push: &dyn PushService,
    source_system_id: i32,
    records: &[IntegrationRecord],
    chunk_size: usize,
) -> TradeSyncResult<usize> {
    for chunk in records.chunks(chunk_size.max(1)) {
        push.push(source_system_id, chunk).await?;
    }
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record, RecordingPush};

    #[tokio::test]
    async fn splits_into_ordered_chunks() {
        let push = RecordingPush::default();
        let records: Vec<_> = (1..=5).map(record).collect();

        let pushed = push_in_chunks(&push, 1, &records, 2).await.unwrap();

        assert_eq!(pushed, 5);
        assert_eq!(push.pushed_ids(), vec![vec![1, 2], vec![3, 4], vec![5]]);
    }

    #[tokio::test]
    async fn stops_at_first_failed_chunk() {
        let push = RecordingPush::default().failing_on_push(2);
        let records: Vec<_> = (1..=5).map(record).collect();

        assert!(push_in_chunks(&push, 1, &records, 2).await.is_err());
        assert_eq!(push.pushed_ids(), vec![vec![1, 2]]);
    }

    #[tokio::test]
    async fn bulk_sync_defaults_to_push() {
        let push = RecordingPush::default();
        PushService::bulk_sync(&push, 1, &[record(9)]).await.unwrap();
        assert_eq!(push.pushed_ids(), vec![vec![9]]);
    }
}
