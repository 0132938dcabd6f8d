use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};

use crate::job::{IntegrationStatus, JobContext, JobKind, JobStats, SyncJob};
use tradesync_common::error::{TradeSyncError, TradeSyncResult};
use tradesync_config::{JobSettings, Settings};
use tradesync_db::sync::models::{ResyncSet, WatermarkCursor};
use tradesync_db::sync::repositories::StatusStore;

pub const DISABLE_SKIPPED_LOGGING: &str = "DisableSkippedIntegrationLogging";

/// Human-readable outcome lines of one run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    entries: Vec<String>,
}

impl ExecutionSummary {
    pub fn push(&mut self, line: impl Into<String>) {
        self.entries.push(line.into());
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ExecutionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.entries.join("\n"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Completed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub name: String,
    pub kind: JobKind,
    pub state: JobState,
    pub elapsed: Duration,
    pub stats: JobStats,
    /// Watermark persisted on stop; `None` for skipped jobs.
    pub watermark: Option<WatermarkCursor>,
}

/// Values shared by every job of one phase of a run.
#[derive(Debug, Clone)]
pub struct RunScope {
    pub source_system_id: i32,
    pub incremental_started_at: DateTime<Utc>,
    pub resync: Arc<ResyncSet>,
}

/// Runs one job: enable check, status bookkeeping, timing and error wrapping.
pub struct JobRunner {
    status_store: Arc<dyn StatusStore>,
    settings: Arc<Settings>,
}

impl JobRunner {
    pub fn new(status_store: Arc<dyn StatusStore>, settings: Arc<Settings>) -> Self {
        Self {
            status_store,
            settings,
        }
    }

    /// Run `job` to completion. A failure is recorded against the job with the
    /// watermark of its last pushed batch, then returned wrapped with the job's
    /// name so the caller can abort the run.
    pub async fn run(
        &self,
        job: &dyn SyncJob,
        scope: &RunScope,
        summary: &mut ExecutionSummary,
    ) -> TradeSyncResult<JobOutcome> {
        let name = job.name().to_owned();
        let settings = self.settings.for_job(&name);

        let enabled = job.enabled(&settings).map_err(|e| {
            tracing::error!(job = %name, error = %e, "unreadable job settings");
            TradeSyncError::job(&name, e)
        })?;
        if !enabled {
            if !self.settings.flag(DISABLE_SKIPPED_LOGGING) {
                let line = format!("Skipped integration {name}, because it is disabled");
                tracing::info!(job = %name, "{line}");
                summary.push(line);
            }
            return Ok(JobOutcome {
                name,
                kind: job.kind(),
                state: JobState::Skipped,
                elapsed: Duration::ZERO,
                stats: JobStats::default(),
                watermark: None,
            });
        }

        let timer = Instant::now();
        tracing::info!(job = %name, kind = %job.kind(), "starting integration");

        let loaded = self
            .status_store
            .integration_start(scope.source_system_id, &name)
            .await
            .map_err(|e| TradeSyncError::job(&name, e))?;
        let mut status = IntegrationStatus::new(loaded);

        match self.execute(job, settings, scope, &mut status).await {
            Ok(stats) => {
                let watermark = status.persistable();
                self.status_store
                    .integration_stop(scope.source_system_id, &name, &watermark)
                    .await
                    .map_err(|e| TradeSyncError::job(&name, e))?;

                let elapsed = timer.elapsed();
                let line = format!(
                    "Finished integration: {name} with total run time of {}ms ({} fetched, {} pushed)",
                    elapsed.as_millis(),
                    stats.fetched,
                    stats.pushed
                );
                tracing::info!(
                    job = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    watermark = %watermark,
                    "{line}"
                );
                summary.push(line);

                Ok(JobOutcome {
                    name,
                    kind: job.kind(),
                    state: JobState::Completed,
                    elapsed,
                    stats,
                    watermark: Some(watermark),
                })
            }
            Err(e) => {
                let watermark = status.persistable();
                if let Err(store_err) = self
                    .status_store
                    .integration_error(scope.source_system_id, &name, &watermark, &e.to_string())
                    .await
                {
                    tracing::error!(job = %name, error = %store_err, "failed to record integration error");
                }
                tracing::error!(job = %name, error = %e, watermark = %watermark, "integration failed");
                Err(TradeSyncError::job(&name, e))
            }
        }
    }

    async fn execute(
        &self,
        job: &dyn SyncJob,
        settings: JobSettings,
        scope: &RunScope,
        status: &mut IntegrationStatus,
    ) -> TradeSyncResult<JobStats> {
        let command_timeout = settings
            .get_int("CommandTimeoutSeconds", false)?
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64));

        if job.kind() == JobKind::Incremental {
            if let Some(minutes) = settings
                .get_int("SyncOverlapMinutes", false)?
                .filter(|m| *m > 0)
            {
                let overlap = TimeDelta::try_minutes(minutes).ok_or_else(|| {
                    TradeSyncError::Config(format!(
                        "setting {}.SyncOverlapMinutes is out of range: {minutes}",
                        job.name()
                    ))
                })?;
                *status = status.with_overlap(overlap)?;
                tracing::info!(
                    job = %job.name(),
                    overlap_minutes = minutes,
                    from = %status.cursor(),
                    "applied sync overlap"
                );
            }
        }

        let ctx = JobContext::new(
            scope.source_system_id,
            scope.incremental_started_at,
            Arc::clone(&scope.resync),
            settings,
            command_timeout,
            Arc::clone(&self.status_store),
        );
        job.execute(&ctx, status).await
    }
}
