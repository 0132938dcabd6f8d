use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::job::JobKind;
use crate::registry::JobRegistry;
use crate::runner::{ExecutionSummary, JobOutcome, JobRunner, RunScope};
use crate::uom::CacheInvalidation;
use tradesync_common::error::{TradeSyncError, TradeSyncResult};
use tradesync_config::Settings;
use tradesync_db::settings::repositories::SettingsRepository;
use tradesync_db::sync::models::ResyncSet;
use tradesync_db::sync::repositories::{ResyncRepository, StatusStore};

/// Result of a fully successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub source_system_id: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<JobOutcome>,
    /// Counterparties whose resync flags this run consumed and cleared.
    pub resynced: ResyncSet,
    pub summary: ExecutionSummary,
}

/// Runs bulk jobs, expires caches, then runs incremental jobs against one
/// source system. The first job failure aborts the run; resync flags are
/// only cleared after every job has succeeded.
pub struct IntegrationManager {
    source_system_name: String,
    registry: JobRegistry,
    status_store: Arc<dyn StatusStore>,
    resync_repo: Arc<dyn ResyncRepository>,
    settings_repo: Arc<dyn SettingsRepository>,
    overrides: HashMap<String, String>,
    caches: Vec<Arc<dyn CacheInvalidation>>,
}

impl IntegrationManager {
    pub fn new(
        source_system_name: &str,
        registry: JobRegistry,
        status_store: Arc<dyn StatusStore>,
        resync_repo: Arc<dyn ResyncRepository>,
        settings_repo: Arc<dyn SettingsRepository>,
    ) -> Self {
        Self {
            source_system_name: source_system_name.to_owned(),
            registry,
            status_store,
            resync_repo,
            settings_repo,
            overrides: HashMap::new(),
            caches: Vec::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Register a cache to clear once bulk data has been re-synced.
    pub fn with_cache(mut self, cache: Arc<dyn CacheInvalidation>) -> Self {
        self.caches.push(cache);
        self
    }

    pub async fn execute(&self) -> TradeSyncResult<RunReport> {
        let started_at = Utc::now();
        let timer = Instant::now();

        let source_system_id = self
            .status_store
            .source_system_id_by_name(&self.source_system_name)
            .await?;
        tracing::info!(
            source_system = %self.source_system_name,
            source_system_id,
            bulk_jobs = self.registry.names(JobKind::Bulk).len(),
            incremental_jobs = self.registry.names(JobKind::Incremental).len(),
            "starting integration run"
        );

        if self.registry.is_empty() {
            tracing::warn!(source_system = %self.source_system_name, "no jobs registered, run will only track completion");
        }

        let settings = self.load_settings(source_system_id).await?;
        let runner = JobRunner::new(Arc::clone(&self.status_store), settings);
        let mut summary = ExecutionSummary::default();
        let mut outcomes = Vec::new();

        let bulk_scope = RunScope {
            source_system_id,
            incremental_started_at: started_at,
            resync: Arc::new(ResyncSet::default()),
        };
        self.run_jobs(JobKind::Bulk, &runner, &bulk_scope, &mut summary, &mut outcomes)
            .await?;

        self.expire_caches(source_system_id).await?;

        let resync = Arc::new(
            self.resync_repo
                .counterparty_ids_to_resync(source_system_id)
                .await?,
        );
        if !resync.is_empty() {
            tracing::info!(count = resync.len(), counterparties = %resync, "counterparties flagged for resync");
        }

        let incremental_scope = RunScope {
            source_system_id,
            incremental_started_at: Utc::now(),
            resync: Arc::clone(&resync),
        };
        self.run_jobs(
            JobKind::Incremental,
            &runner,
            &incremental_scope,
            &mut summary,
            &mut outcomes,
        )
        .await?;

        if !resync.is_empty() {
            self.resync_repo
                .reset_resync_flags(source_system_id, &resync)
                .await?;
        }

        let finished_at = Utc::now();
        self.status_store
            .track_integrations_completed(source_system_id, started_at, finished_at)
            .await?;

        tracing::info!(
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "Extract completed successfully. Summary:\n{summary}"
        );

        Ok(RunReport {
            source_system_id,
            started_at,
            finished_at,
            outcomes,
            resynced: resync.as_ref().clone(),
            summary,
        })
    }

    async fn load_settings(&self, source_system_id: i32) -> TradeSyncResult<Arc<Settings>> {
        let entries = self.settings_repo.load_all(source_system_id).await?;
        let settings = Settings::from_entries(
            entries
                .into_iter()
                .map(|entry| (entry.scope, entry.key, entry.value)),
        )
        .with_overrides(self.overrides.clone());
        Ok(Arc::new(settings))
    }

    async fn run_jobs(
        &self,
        kind: JobKind,
        runner: &JobRunner,
        scope: &RunScope,
        summary: &mut ExecutionSummary,
        outcomes: &mut Vec<JobOutcome>,
    ) -> TradeSyncResult<()> {
        for registered in self.registry.jobs(kind) {
            let job = registered
                .build()
                .map_err(|e| TradeSyncError::job(registered.name(), e))?;
            outcomes.push(runner.run(job.as_ref(), scope, summary).await?);
        }
        Ok(())
    }

    async fn expire_caches(&self, source_system_id: i32) -> TradeSyncResult<()> {
        self.status_store.expire_caches(source_system_id).await?;
        for cache in &self.caches {
            cache.invalidate();
            tracing::debug!(cache = cache.name(), "invalidated cache");
        }
        Ok(())
    }
}
