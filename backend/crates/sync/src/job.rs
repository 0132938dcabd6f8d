use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};

use tradesync_common::error::TradeSyncResult;
use tradesync_config::JobSettings;
use tradesync_db::sync::models::{ResyncSet, WatermarkCursor};
use tradesync_db::sync::repositories::StatusStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Re-syncs a whole reference table every run, no cursor.
    Bulk,
    /// Syncs rows changed since the persisted watermark.
    Incremental,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bulk => "bulk",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters a job reports for the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    pub batches: usize,
    pub fetched: usize,
    pub pushed: usize,
}

impl JobStats {
    pub fn absorb(&mut self, other: JobStats) {
        self.batches += other.batches;
        self.fetched += other.fetched;
        self.pushed += other.pushed;
    }
}

/// Watermark state of one job invocation.
///
/// `loaded` is what the status store returned at start; `cursor` is where the
/// scan currently stands. A sync overlap rewinds `cursor` below `loaded`, so
/// the value persisted is the greater of the two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationStatus {
    loaded: WatermarkCursor,
    cursor: WatermarkCursor,
}

impl IntegrationStatus {
    pub fn new(loaded: WatermarkCursor) -> Self {
        Self {
            loaded,
            cursor: loaded,
        }
    }

    /// Phase-scoped status used by resync passes.
    pub fn fresh() -> Self {
        Self::default()
    }

    pub fn with_overlap(mut self, overlap: TimeDelta) -> TradeSyncResult<Self> {
        self.cursor = self.loaded.rewound(overlap)?;
        Ok(self)
    }

    pub fn loaded(&self) -> WatermarkCursor {
        self.loaded
    }

    pub fn cursor(&self) -> WatermarkCursor {
        self.cursor
    }

    pub fn advance(&mut self, next: WatermarkCursor) {
        if next > self.cursor {
            self.cursor = next;
        }
    }

    pub fn persistable(&self) -> WatermarkCursor {
        self.loaded.max(self.cursor)
    }
}

/// Everything a job needs from the current run.
#[derive(Clone)]
pub struct JobContext {
    pub source_system_id: i32,
    /// Start of the incremental phase; its minute is the cutoff for every job.
    pub incremental_started_at: DateTime<Utc>,
    pub resync: Arc<ResyncSet>,
    pub settings: JobSettings,
    pub command_timeout: Option<Duration>,
    status_store: Arc<dyn StatusStore>,
}

impl JobContext {
    pub fn new(
        source_system_id: i32,
        incremental_started_at: DateTime<Utc>,
        resync: Arc<ResyncSet>,
        settings: JobSettings,
        command_timeout: Option<Duration>,
        status_store: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            source_system_id,
            incremental_started_at,
            resync,
            settings,
            command_timeout,
            status_store,
        }
    }

    pub fn job_name(&self) -> &str {
        self.settings.job()
    }

    /// Rows changed at or after the start of the run's current minute may
    /// still be in flight and are left for the next run.
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.incremental_started_at
            .duration_trunc(TimeDelta::minutes(1))
            .unwrap_or(self.incremental_started_at)
    }

    /// Persist the watermark of the last pushed batch.
    pub async fn checkpoint(&self, status: &IntegrationStatus) -> TradeSyncResult<()> {
        self.status_store
            .save_watermark(self.source_system_id, self.job_name(), &status.persistable())
            .await
    }
}

/// A repeatable unit of synchronization: fetch, translate, push.
#[async_trait]
pub trait SyncJob: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> JobKind;

    /// Checked before any watermark access; disabled jobs are skipped.
    fn enabled(&self, settings: &JobSettings) -> TradeSyncResult<bool> {
        settings.enabled()
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        status: &mut IntegrationStatus,
    ) -> TradeSyncResult<JobStats>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{settings, MockStatusStore};
    use chrono::TimeZone;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, minute, second).unwrap()
    }

    #[test]
    fn cutoff_truncates_to_the_minute() {
        let ctx = JobContext::new(
            1,
            at(14, 37),
            Arc::new(ResyncSet::default()),
            settings(&[]).for_job("trades"),
            None,
            Arc::new(MockStatusStore::default()),
        );
        assert_eq!(ctx.cutoff(), at(14, 0));
    }

    #[test]
    fn overlap_rewinds_cursor_but_not_persisted_watermark() {
        let loaded = WatermarkCursor::new(at(30, 0), 9);
        let mut status = IntegrationStatus::new(loaded)
            .with_overlap(TimeDelta::minutes(10))
            .unwrap();
        assert_eq!(status.cursor().last_timestamp, Some(at(20, 0)));
        assert_eq!(status.persistable(), loaded);

        status.advance(WatermarkCursor::new(at(25, 0), 1));
        assert_eq!(status.persistable(), loaded);

        let past = WatermarkCursor::new(at(31, 0), 2);
        status.advance(past);
        assert_eq!(status.persistable(), past);
    }

    #[test]
    fn advance_never_moves_backwards() {
        let mut status = IntegrationStatus::fresh();
        status.advance(WatermarkCursor::new(at(5, 0), 3));
        status.advance(WatermarkCursor::new(at(4, 0), 99));
        assert_eq!(status.cursor(), WatermarkCursor::new(at(5, 0), 3));
    }

    #[tokio::test]
    async fn checkpoint_saves_persistable_watermark() {
        let store = Arc::new(MockStatusStore::default());
        let ctx = JobContext::new(
            7,
            at(0, 0),
            Arc::new(ResyncSet::default()),
            settings(&[]).for_job("invoices"),
            None,
            store.clone(),
        );
        let mut status = IntegrationStatus::fresh();
        status.advance(WatermarkCursor::new(at(1, 0), 4));
        ctx.checkpoint(&status).await.unwrap();

        assert_eq!(
            store.saved("invoices"),
            vec![WatermarkCursor::new(at(1, 0), 4)]
        );
    }
}
