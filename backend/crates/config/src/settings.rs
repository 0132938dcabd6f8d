use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tradesync_common::error::{TradeSyncError, TradeSyncResult};

/// Scope consulted when a job has no value of its own for a key.
pub const GLOBAL_SCOPE: &str = "Global";

/// Snapshot of named integration settings, loaded once per run.
///
/// Stored values are keyed `Scope.Key`. Overrides use the same keys and win
/// over stored values; a bare override key (no scope) acts as a global flag.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: HashMap<String, String>,
    overrides: HashMap<String, String>,
}

impl Settings {
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, S, S)>,
        S: Into<String>,
    {
        let values = entries
            .into_iter()
            .map(|(scope, key, value)| (scoped(&scope.into(), &key.into()), value.into()))
            .collect();
        Self {
            values,
            overrides: HashMap::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: HashMap<String, String>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    /// Resolve `key` for `scope`, falling back to the global scope.
    pub fn get(&self, scope: &str, key: &str) -> Option<&str> {
        let own = scoped(scope, key);
        let global = scoped(GLOBAL_SCOPE, key);
        self.overrides
            .get(&own)
            .or_else(|| self.values.get(&own))
            .or_else(|| self.overrides.get(&global))
            .or_else(|| self.values.get(&global))
            .map(String::as_str)
    }

    pub fn for_job(self: &Arc<Self>, job: &str) -> JobSettings {
        JobSettings::new(Arc::clone(self), job)
    }

    /// Process-wide boolean switch, e.g. `DisableSkippedIntegrationLogging`.
    pub fn flag(&self, key: &str) -> bool {
        self.overrides
            .get(key)
            .map(String::as_str)
            .or_else(|| self.get(GLOBAL_SCOPE, key))
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }
}

fn scoped(scope: &str, key: &str) -> String {
    format!("{scope}.{key}")
}

/// Settings view scoped to one job: `getSetting(jobName, key) -> value | default`.
#[derive(Debug, Clone)]
pub struct JobSettings {
    job: String,
    settings: Arc<Settings>,
}

impl JobSettings {
    pub fn new(settings: Arc<Settings>, job: &str) -> Self {
        Self {
            job: job.to_owned(),
            settings,
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.settings
            .get(&self.job, key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    }

    pub fn get_int(&self, key: &str, required: bool) -> TradeSyncResult<Option<i64>> {
        self.parse_with(key, required, |raw| raw.parse::<i64>().map_err(|e| e.to_string()))
    }

    pub fn get_bool(&self, key: &str) -> TradeSyncResult<Option<bool>> {
        self.parse_with(key, false, |raw| match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(format!("`{other}` is not a boolean")),
        })
    }

    /// Comma-separated integer list, e.g. `TradeTypes = 1,2,14`.
    pub fn get_int_array(&self, key: &str, required: bool) -> TradeSyncResult<Option<Vec<i64>>> {
        self.parse_with(key, required, |raw| {
            split_list(raw)
                .map(|item| item.parse::<i64>().map_err(|e| format!("`{item}`: {e}")))
                .collect()
        })
    }

    pub fn get_string_array(
        &self,
        key: &str,
        required: bool,
    ) -> TradeSyncResult<Option<Vec<String>>> {
        self.parse_with(key, required, |raw| Ok(split_list(raw).map(str::to_owned).collect()))
    }

    /// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` (UTC midnight).
    pub fn get_datetime(
        &self,
        key: &str,
        required: bool,
    ) -> TradeSyncResult<Option<DateTime<Utc>>> {
        self.parse_with(key, required, parse_datetime)
    }

    /// Jobs are enabled unless `Enabled` says otherwise. An unreadable value
    /// is a configuration error, not a silent skip.
    pub fn enabled(&self) -> TradeSyncResult<bool> {
        Ok(self.get_bool("Enabled")?.unwrap_or(true))
    }

    fn parse_with<T>(
        &self,
        key: &str,
        required: bool,
        parse: impl FnOnce(&str) -> Result<T, String>,
    ) -> TradeSyncResult<Option<T>> {
        match self.get_string(key) {
            Some(raw) => parse(&raw).map(Some).map_err(|e| {
                TradeSyncError::Config(format!("setting {}.{key} is invalid: {e}", self.job))
            }),
            None if required => Err(TradeSyncError::Config(format!(
                "setting {}.{key} is required but not set",
                self.job
            ))),
            None => Ok(None),
        }
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("`{raw}` is not a date"))
}
