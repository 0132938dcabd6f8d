use std::sync::Arc;

use async_trait::async_trait;

use crate::job::{IntegrationStatus, JobContext, JobKind, JobStats, SyncJob};
use crate::push::{push_in_chunks, PushService};
use crate::translate::Translator;
use tradesync_common::error::{TradeSyncError, TradeSyncResult};
use tradesync_config::JobSettings;
use tradesync_db::source::filters::{resolve_all, ResolvedFilter};
use tradesync_db::source::models::BatchRequest;
use tradesync_db::source::repositories::BatchFetcher;
use tradesync_db::sync::models::ResyncSet;

/// Fetch and push batch sizes, configured independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSizes {
    pub fetch: usize,
    pub push: usize,
}

impl BatchSizes {
    /// `BatchSize` is required; `PushBatchSize` defaults to it.
    pub fn from_settings(settings: &JobSettings) -> TradeSyncResult<Self> {
        let fetch = positive_size(settings, "BatchSize", true)?.ok_or_else(|| {
            TradeSyncError::Config(format!("setting {}.BatchSize is required", settings.job()))
        })?;
        let push = positive_size(settings, "PushBatchSize", false)?.unwrap_or(fetch);
        Ok(Self { fetch, push })
    }
}

fn positive_size(settings: &JobSettings, key: &str, required: bool) -> TradeSyncResult<Option<usize>> {
    match settings.get_int(key, required)? {
        Some(value) if value > 0 => Ok(Some(value as usize)),
        Some(value) => Err(TradeSyncError::Config(format!(
            "setting {}.{key} must be positive, got {value}",
            settings.job()
        ))),
        None => Ok(None),
    }
}

/// Cursor-paged job: an optional resync pass, then the incremental pass.
pub struct IncrementalJob {
    name: String,
    fetcher: Arc<dyn BatchFetcher>,
    translator: Arc<dyn Translator>,
    push: Arc<dyn PushService>,
}

impl IncrementalJob {
    pub fn new(
        name: &str,
        fetcher: Arc<dyn BatchFetcher>,
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

    /// Fetch, translate and push until a short batch. A push is always
    /// awaited before the cursor moves past its batch.
    async fn run_pass(
        &self,
        ctx: &JobContext,
        base: &[ResolvedFilter],
        sizes: BatchSizes,
        resync: Option<&ResyncSet>,
        status: &mut IntegrationStatus,
    ) -> TradeSyncResult<JobStats> {
        let mut stats = JobStats::default();
        let cutoff = ctx.cutoff();

        loop {
            let request = BatchRequest {
                base,
                resync,
                cursor: status.cursor(),
                cutoff,
                batch_size: sizes.fetch,
                timeout: ctx.command_timeout,
            };
            let batch = self.fetcher.next_batch(&request).await?;
            let next = batch.advance(&status.cursor());

            tracing::info!(
                job = %self.name,
                count = batch.count(),
                max_pk_id = ?next.last_id,
                max_sync_at = ?next.last_timestamp,
                is_resync = resync.is_some(),
                "acquired batch"
            );
            stats.batches += 1;
            stats.fetched += batch.count();

            if batch.count() > 0 {
                let records = self.translator.translate(ctx.source_system_id, &batch.records);
                if records.is_empty() {
                    tracing::debug!(job = %self.name, "batch translated to no records, nothing to push");
                } else {
                    stats.pushed +=
                        push_in_chunks(self.push.as_ref(), ctx.source_system_id, &records, sizes.push)
                            .await?;
                }

                if batch.is_full(sizes.fetch) && next == status.cursor() {
                    return Err(TradeSyncError::Internal(format!(
                        "{} cursor did not advance past {next}",
                        self.name
                    )));
                }
                status.advance(next);
                if resync.is_none() {
                    ctx.checkpoint(status).await?;
                }
            }

            if !batch.is_full(sizes.fetch) {
                break;
            }
        }

        self.push
            .complete_pass(ctx.source_system_id, &status.cursor())
            .await?;
        Ok(stats)
    }
}

#[async_trait]
impl SyncJob for IncrementalJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> JobKind {
        JobKind::Incremental
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        status: &mut IntegrationStatus,
    ) -> TradeSyncResult<JobStats> {
        let base = resolve_all(self.fetcher.base_filters(), &ctx.settings)?;
        let sizes = BatchSizes::from_settings(&ctx.settings)?;
        self.translator.prepare().await?;

        let mut stats = JobStats::default();

        if ctx.resync.is_empty() {
            tracing::debug!(job = %self.name, "no counterparties flagged, skipping resync pass");
        } else if !self.fetcher.supports_resync() {
            tracing::debug!(job = %self.name, "source has no counterparty, skipping resync pass");
        } else {
            tracing::info!(job = %self.name, counterparties = %ctx.resync, "starting resync pass");
            let mut phase = IntegrationStatus::fresh();
            stats.absorb(
                self.run_pass(ctx, &base, sizes, Some(ctx.resync.as_ref()), &mut phase)
                    .await?,
            );
        }

        stats.absorb(self.run_pass(ctx, &base, sizes, None, status).await?);
        Ok(stats)
    }
}
