//! Composable source-query filters.
//!
//! A batch query is the conjunction of four stages applied in a fixed order:
//! base eligibility, resync restriction, cursor resumption, and the
//! current-minute cutoff. [`FilterPipeline`] renders those stages to SQL for the
//! Postgres fetcher and evaluates them in memory for `MemorySource`, so both
//! agree on which rows belong to a batch.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};

use crate::source::models::{BatchRequest, SourceRow};
use crate::sync::models::{ResyncSet, WatermarkCursor};
use tradesync_common::error::{TradeSyncError, TradeSyncResult};
use tradesync_config::JobSettings;

/// Declarative eligibility filter whose values come from job settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseFilter {
    /// `column in (<int list setting>)`; an unset optional setting applies no filter.
    IntInSetting {
        column: String,
        setting: String,
        required: bool,
    },
    /// `column in (<text list setting>)`.
    TextInSetting {
        column: String,
        setting: String,
        required: bool,
    },
    /// `column >= <date setting>`.
    AtOrAfterSetting {
        column: String,
        setting: String,
        required: bool,
    },
    /// `column = <literal>`.
    TextEquals { column: String, value: String },
}

impl BaseFilter {
    pub fn int_in(column: &str, setting: &str, required: bool) -> Self {
        Self::IntInSetting {
            column: column.to_owned(),
            setting: setting.to_owned(),
            required,
        }
    }

    pub fn text_in(column: &str, setting: &str, required: bool) -> Self {
        Self::TextInSetting {
            column: column.to_owned(),
            setting: setting.to_owned(),
            required,
        }
    }

    pub fn at_or_after(column: &str, setting: &str, required: bool) -> Self {
        Self::AtOrAfterSetting {
            column: column.to_owned(),
            setting: setting.to_owned(),
            required,
        }
    }

    pub fn text_equals(column: &str, value: &str) -> Self {
        Self::TextEquals {
            column: column.to_owned(),
            value: value.to_owned(),
        }
    }

    /// Bind the filter to concrete values. A missing required setting is a
    /// configuration error; a missing optional one yields `None`.
    pub fn resolve(&self, settings: &JobSettings) -> TradeSyncResult<Option<ResolvedFilter>> {
        Ok(match self {
            Self::IntInSetting {
                column,
                setting,
                required,
            } => settings
                .get_int_array(setting, *required)?
                .map(|values| ResolvedFilter::IntIn {
                    column: column.clone(),
                    values,
                }),
            Self::TextInSetting {
                column,
                setting,
                required,
            } => settings
                .get_string_array(setting, *required)?
                .map(|values| ResolvedFilter::TextIn {
                    column: column.clone(),
                    values,
                }),
            Self::AtOrAfterSetting {
                column,
                setting,
                required,
            } => settings
                .get_datetime(setting, *required)?
                .map(|at| ResolvedFilter::AtOrAfter {
                    column: column.clone(),
                    at,
                }),
            Self::TextEquals { column, value } => Some(ResolvedFilter::TextEquals {
                column: column.clone(),
                value: value.clone(),
            }),
        })
    }
}

/// Resolve every base filter of a job, failing on the first configuration error.
pub fn resolve_all(
    filters: &[BaseFilter],
    settings: &JobSettings,
) -> TradeSyncResult<Vec<ResolvedFilter>> {
    let mut resolved = Vec::with_capacity(filters.len());
    for filter in filters {
        if let Some(f) = filter.resolve(settings)? {
            resolved.push(f);
        }
    }
    Ok(resolved)
}

/// A base filter with its values bound.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedFilter {
    IntIn { column: String, values: Vec<i64> },
    TextIn { column: String, values: Vec<String> },
    AtOrAfter { column: String, at: DateTime<Utc> },
    TextEquals { column: String, value: String },
}

impl ResolvedFilter {
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Self::IntIn { column, values } => {
                qb.push(column).push(" = any(").push_bind(values.clone()).push(")");
            }
            Self::TextIn { column, values } => {
                qb.push(column).push(" = any(").push_bind(values.clone()).push(")");
            }
            Self::AtOrAfter { column, at } => {
                qb.push(column).push(" >= ").push_bind(*at);
            }
            Self::TextEquals { column, value } => {
                qb.push(column).push(" = ").push_bind(value.clone());
            }
        }
    }

    /// In-memory form: the column name is looked up as a payload key.
    pub fn matches(&self, payload: &Value) -> bool {
        match self {
            Self::IntIn { column, values } => payload
                .get(column)
                .and_then(Value::as_i64)
                .is_some_and(|v| values.contains(&v)),
            Self::TextIn { column, values } => payload
                .get(column)
                .and_then(Value::as_str)
                .is_some_and(|v| values.iter().any(|allowed| allowed == v)),
            Self::AtOrAfter { column, at } => payload
                .get(column)
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .is_some_and(|v| v.with_timezone(&Utc) >= *at),
            Self::TextEquals { column, value } => {
                payload.get(column).and_then(Value::as_str) == Some(value.as_str())
            }
        }
    }
}

/// SQL expressions the pipeline needs from an entity source.
#[derive(Debug, Clone, Copy)]
pub struct PipelineColumns<'c> {
    pub change_timestamp: &'c str,
    pub id: &'c str,
    pub counterparty: Option<&'c str>,
}

/// The four filter stages of one batch query.
#[derive(Debug, Clone)]
pub struct FilterPipeline<'a> {
    base: &'a [ResolvedFilter],
    resync: Option<&'a ResyncSet>,
    cursor: WatermarkCursor,
    cutoff: DateTime<Utc>,
}

impl<'a> FilterPipeline<'a> {
    pub fn new(request: &BatchRequest<'a>) -> Self {
        Self {
            base: request.base,
            resync: request.resync,
            cursor: request.cursor,
            cutoff: request.cutoff,
        }
    }

    pub fn admits(&self, row: &SourceRow) -> bool {
        if !self.base.iter().all(|f| f.matches(&row.payload)) {
            return false;
        }
        if let Some(resync) = self.resync {
            if !row.counterparty_id.is_some_and(|id| resync.contains(id)) {
                return false;
            }
        }
        // Rows without an effective change time never qualify, as in SQL.
        let Some(ts) = row.change_timestamp else {
            return false;
        };
        self.cursor.admits(ts, row.id) && ts < self.cutoff
    }

    pub fn push_where(
        &self,
        qb: &mut QueryBuilder<'_, Postgres>,
        columns: PipelineColumns<'_>,
    ) -> TradeSyncResult<()> {
        qb.push(" where true");

        for filter in self.base {
            qb.push(" and ");
            filter.push_sql(qb);
        }

        if let Some(resync) = self.resync {
            let counterparty = columns.counterparty.ok_or_else(|| {
                TradeSyncError::Config("resync requested for a source without counterparty".into())
            })?;
            qb.push(" and ")
                .push(counterparty)
                .push(" = any(")
                .push_bind(resync.ids())
                .push(")");
        }

        if let Some((ts, id)) = self.cursor.position() {
            qb.push(" and (")
                .push(columns.change_timestamp)
                .push(" > ")
                .push_bind(ts)
                .push(" or (")
                .push(columns.change_timestamp)
                .push(" = ")
                .push_bind(ts)
                .push(" and ")
                .push(columns.id)
                .push(" > ")
                .push_bind(id)
                .push("))");
        }

        qb.push(" and ")
            .push(columns.change_timestamp)
            .push(" < ")
            .push_bind(self.cutoff);

        Ok(())
    }
}
