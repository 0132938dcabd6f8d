use std::sync::Arc;

use async_trait::async_trait;

use crate::job::{IntegrationStatus, JobContext, JobKind, JobStats, SyncJob};
use crate::push::PushService;
use crate::translate::Translator;
use tradesync_common::error::TradeSyncResult;
use tradesync_db::source::filters::resolve_all;
use tradesync_db::source::repositories::BulkFetcher;

/// Reference-data job: reads the whole relation and replaces the destination copy.
pub struct BulkJob {
    name: String,
    fetcher: Arc<dyn BulkFetcher>,
    translator: Arc<dyn Translator>,
    push: Arc<dyn PushService>,
}

impl BulkJob {
    pub fn new(
        name: &str,
        fetcher: Arc<dyn BulkFetcher>,
        translator: Arc<dyn Translator>,
        push: Arc<dyn PushService>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            fetcher,
            translator,
            push,
        }
    }
}

#[async_trait]
impl SyncJob for BulkJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> JobKind {
        JobKind::Bulk
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        _status: &mut IntegrationStatus,
    ) -> TradeSyncResult<JobStats> {
        let base = resolve_all(self.fetcher.base_filters(), &ctx.settings)?;
        self.translator.prepare().await?;

        let rows = self.fetcher.fetch_all(&base, ctx.command_timeout).await?;
        let records = self.translator.translate(ctx.source_system_id, &rows);
        tracing::info!(job = %self.name, fetched = rows.len(), records = records.len(), "syncing reference data");

        self.push.bulk_sync(ctx.source_system_id, &records).await?;

        Ok(JobStats {
            batches: 1,
            fetched: rows.len(),
            pushed: records.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, row, settings, MockStatusStore, RecordingPush};
    use crate::translate::RecordTranslator;
    use tradesync_common::error::TradeSyncError;
    use tradesync_db::source::filters::BaseFilter;
    use tradesync_db::source::memory::MemorySource;
    use tradesync_db::source::models::EntityKind;
    use tradesync_db::sync::models::{ResyncSet, WatermarkCursor};

    fn context(entries: &[(&str, &str, &str)]) -> JobContext {
        JobContext::new(
            1,
            at(0),
            Arc::new(ResyncSet::default()),
            settings(entries).for_job("currencies"),
            None,
            Arc::new(MockStatusStore::default()),
        )
    }

    #[tokio::test]
    async fn syncs_every_row_in_one_call_and_leaves_status_alone() {
        let push = Arc::new(RecordingPush::default());
        let job = BulkJob::new(
            "currencies",
            Arc::new(MemorySource::new(
                EntityKind::Currency,
                vec![row(3, 0, 0), row(1, 0, 0), row(2, 0, 0)],
            )),
            Arc::new(RecordTranslator::new(EntityKind::Currency)),
            push.clone(),
        );
        let loaded = WatermarkCursor::new(at(5), 1);
        let mut status = IntegrationStatus::new(loaded);

        let stats = job.execute(&context(&[]), &mut status).await.unwrap();

        assert_eq!(push.pushed_ids(), vec![vec![1, 2, 3]]);
        assert_eq!(stats.fetched, 3);
        assert_eq!(status.persistable(), loaded);
    }

    #[tokio::test]
    async fn source_failure_propagates() {
        let job = BulkJob::new(
            "currencies",
            Arc::new(MemorySource::new(EntityKind::Currency, vec![]).failing_on_fetch(1)),
            Arc::new(RecordTranslator::new(EntityKind::Currency)),
            Arc::new(RecordingPush::default()),
        );
        let err = job
            .execute(&context(&[]), &mut IntegrationStatus::fresh())
            .await
            .unwrap_err();
        assert!(matches!(err, TradeSyncError::Database(_)));
    }

    #[tokio::test]
    async fn base_filters_resolve_from_settings() {
        let push = Arc::new(RecordingPush::default());
        let mut usd = row(1, 0, 0);
        usd.payload = serde_json::json!({ "code": "USD" });
        let mut cad = row(2, 0, 0);
        cad.payload = serde_json::json!({ "code": "CAD" });
        let job = BulkJob::new(
            "currencies",
            Arc::new(
                MemorySource::new(EntityKind::Currency, vec![usd, cad])
                    .with_filter(BaseFilter::text_in("code", "Currencies", false)),
            ),
            Arc::new(RecordTranslator::new(EntityKind::Currency)),
            push.clone(),
        );

        job.execute(
            &context(&[("currencies", "Currencies", "CAD")]),
            &mut IntegrationStatus::fresh(),
        )
        .await
        .unwrap();

        assert_eq!(push.pushed_ids(), vec![vec![2]]);
    }
}
