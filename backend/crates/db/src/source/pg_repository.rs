use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};

use crate::source::filters::{BaseFilter, FilterPipeline, PipelineColumns, ResolvedFilter};
use crate::source::models::{BatchRequest, BatchResult, EntityKind, EntitySource, SourceRow};
use crate::source::repositories::{BatchFetcher, BulkFetcher};
use tradesync_common::error::{TradeSyncError, TradeSyncResult};

/// Reads one entity type from the source trading system's database.
#[derive(Clone)]
pub struct PgSourceRepository {
    pool: PgPool,
    source: EntitySource,
}

impl PgSourceRepository {
    pub fn new(pool: PgPool, source: EntitySource) -> Self {
        Self { pool, source }
    }

    /// `change_ts` must already be typed as `timestamptz`.
    fn select_prefix(&self, change_ts: &str) -> QueryBuilder<'static, Postgres> {
        let counterparty = self.source.counterparty_column.as_deref().unwrap_or("null");
        let mut qb = QueryBuilder::new("select (");
        qb.push(&self.source.id_column)
            .push(")::bigint as source_id, ")
            .push(change_ts)
            .push(" as change_ts, (")
            .push(counterparty)
            .push(")::bigint as counterparty_id, ")
            .push(&self.source.payload)
            .push(" as payload from ")
            .push(&self.source.relation);
        qb
    }

    fn batch_query(&self, request: &BatchRequest<'_>) -> TradeSyncResult<QueryBuilder<'static, Postgres>> {
        let change_ts = self
            .source
            .change_timestamp
            .as_ref()
            .ok_or_else(|| {
                TradeSyncError::Config(format!(
                    "{} has no change timestamp and cannot be synced incrementally",
                    self.source.kind
                ))
            })?
            .typed_sql();

        let mut qb = self.select_prefix(&change_ts);
        FilterPipeline::new(request).push_where(
            &mut qb,
            PipelineColumns {
                change_timestamp: &change_ts,
                id: &self.source.id_column,
                counterparty: self.source.counterparty_column.as_deref(),
            },
        )?;
        qb.push(" order by ")
            .push(&change_ts)
            .push(", ")
            .push(&self.source.id_column)
            .push(" limit ")
            .push_bind(request.batch_size as i64);
        Ok(qb)
    }

    fn bulk_query(&self, base: &[ResolvedFilter]) -> QueryBuilder<'static, Postgres> {
        let change_ts = self
            .source
            .change_timestamp
            .as_ref()
            .map(|ts| ts.typed_sql())
            .unwrap_or_else(|| "(null)::timestamptz".to_owned());

        let mut qb = self.select_prefix(&change_ts);
        qb.push(" where true");
        for filter in base {
            qb.push(" and ");
            filter.push_sql(&mut qb);
        }
        qb.push(" order by ").push(&self.source.id_column);
        qb
    }

    fn map_row(row: PgRow) -> TradeSyncResult<SourceRow> {
        Ok(SourceRow {
            id: row
                .try_get("source_id")
                .map_err(|e| TradeSyncError::Database(e.to_string()))?,
            change_timestamp: row
                .try_get("change_ts")
                .map_err(|e| TradeSyncError::Database(e.to_string()))?,
            counterparty_id: row
                .try_get("counterparty_id")
                .map_err(|e| TradeSyncError::Database(e.to_string()))?,
            payload: row
                .try_get("payload")
                .map_err(|e| TradeSyncError::Database(e.to_string()))?,
        })
    }
}

/// Run a source query, honouring the job's command timeout.
async fn run_query<F>(
    entity: EntityKind,
    timeout: Option<Duration>,
    query: F,
) -> TradeSyncResult<Vec<PgRow>>
where
    F: Future<Output = Result<Vec<PgRow>, sqlx::Error>>,
{
    let result = match timeout {
        Some(limit) => tokio::time::timeout(limit, query).await.map_err(|_| {
            TradeSyncError::Timeout(format!(
                "{entity} source query exceeded {}s",
                limit.as_secs()
            ))
        })?,
        None => query.await,
    };
    result.map_err(|e| TradeSyncError::Database(e.to_string()))
}

#[async_trait]
impl BatchFetcher for PgSourceRepository {
    fn base_filters(&self) -> &[BaseFilter] {
        &self.source.base_filters
    }

    fn supports_resync(&self) -> bool {
        self.source.counterparty_column.is_some()
    }

    async fn next_batch(&self, request: &BatchRequest<'_>) -> TradeSyncResult<BatchResult> {
        if request.resync.is_some_and(|ids| ids.is_empty()) {
            return Ok(BatchResult::default());
        }

        let mut qb = self.batch_query(request)?;
        let rows = run_query(
            self.source.kind,
            request.timeout,
            qb.build().fetch_all(&self.pool),
        )
        .await?;

        let records = rows
            .into_iter()
            .map(Self::map_row)
            .collect::<TradeSyncResult<Vec<_>>>()?;
        Ok(BatchResult::new(records))
    }
}

#[async_trait]
impl BulkFetcher for PgSourceRepository {
    fn base_filters(&self) -> &[BaseFilter] {
        &self.source.base_filters
    }

    async fn fetch_all(
        &self,
        base: &[ResolvedFilter],
        timeout: Option<Duration>,
    ) -> TradeSyncResult<Vec<SourceRow>> {
        let mut qb = self.bulk_query(base);
        let rows = run_query(self.source.kind, timeout, qb.build().fetch_all(&self.pool)).await?;
        rows.into_iter().map(Self::map_row).collect()
    }
}
