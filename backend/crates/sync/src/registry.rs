use crate::job::{JobKind, SyncJob};
use tradesync_common::error::{TradeSyncError, TradeSyncResult};

pub type JobFactory = Box<dyn Fn() -> TradeSyncResult<Box<dyn SyncJob>> + Send + Sync>;

/// A declared job: identity plus a constructor invoked once per run.
pub struct RegisteredJob {
    name: String,
    kind: JobKind,
    factory: JobFactory,
}

impl RegisteredJob {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Construct a fresh job instance for this run.
    pub fn build(&self) -> TradeSyncResult<Box<dyn SyncJob>> {
        let job = (self.factory)()?;
        if job.name() != self.name || job.kind() != self.kind {
            return Err(TradeSyncError::Internal(format!(
                "job registered as {} ({}) built {} ({})",
                self.name,
                self.kind,
                job.name(),
                job.kind()
            )));
        }
        Ok(job)
    }
}

/// Ordered list of the jobs a run executes. Declaration order within each
/// kind is execution order.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Vec<RegisteredJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, kind: JobKind, factory: F) -> TradeSyncResult<()>
    where
        F: Fn() -> TradeSyncResult<Box<dyn SyncJob>> + Send + Sync + 'static,
    {
        if self.jobs.iter().any(|job| job.name == name) {
            return Err(TradeSyncError::Config(format!("job {name} registered twice")));
        }
        self.jobs.push(RegisteredJob {
            name: name.to_owned(),
            kind,
            factory: Box::new(factory),
        });
        Ok(())
    }

    pub fn jobs(&self, kind: JobKind) -> impl Iterator<Item = &RegisteredJob> {
        self.jobs.iter().filter(move |job| job.kind == kind)
    }

    pub fn names(&self, kind: JobKind) -> Vec<&str> {
        self.jobs(kind).map(RegisteredJob::name).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{IntegrationStatus, JobContext, JobStats};
    use async_trait::async_trait;

    struct NoopJob(&'static str, JobKind);

    #[async_trait]
    impl SyncJob for NoopJob {
        fn name(&self) -> &str {
            self.0
        }

        fn kind(&self) -> JobKind {
            self.1
        }

        async fn execute(
            &self,
            _ctx: &JobContext,
            _status: &mut IntegrationStatus,
        ) -> TradeSyncResult<JobStats> {
            Ok(JobStats::default())
        }
    }

    fn noop(name: &'static str, kind: JobKind) -> impl Fn() -> TradeSyncResult<Box<dyn SyncJob>> {
        move || Ok(Box::new(NoopJob(name, kind)) as Box<dyn SyncJob>)
    }

    #[test]
    fn keeps_declaration_order_per_kind() {
        let mut registry = JobRegistry::new();
        registry.register("products", JobKind::Bulk, noop("products", JobKind::Bulk)).unwrap();
        registry.register("trades", JobKind::Incremental, noop("trades", JobKind::Incremental)).unwrap();
        registry.register("currencies", JobKind::Bulk, noop("currencies", JobKind::Bulk)).unwrap();

        assert_eq!(registry.names(JobKind::Bulk), vec!["products", "currencies"]);
        assert_eq!(registry.names(JobKind::Incremental), vec!["trades"]);
        assert_eq!(registry.len(), 3);
        assert!(!registry.is_empty());
        assert!(JobRegistry::new().is_empty());
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = JobRegistry::new();
        registry.register("books", JobKind::Bulk, noop("books", JobKind::Bulk)).unwrap();
        assert!(matches!(
            registry.register("books", JobKind::Bulk, noop("books", JobKind::Bulk)),
            Err(TradeSyncError::Config(_))
        ));
    }

    #[test]
    fn build_checks_identity() {
        let mut registry = JobRegistry::new();
        registry.register("efts", JobKind::Incremental, noop("prices", JobKind::Incremental)).unwrap();
        let registered = registry.jobs(JobKind::Incremental).next().unwrap();
        assert!(matches!(registered.build(), Err(TradeSyncError::Internal(_))));
    }
}
