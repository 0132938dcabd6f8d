use std::collections::HashMap;
use std::env;

use serde::Deserialize;
use tradesync_common::error::{TradeSyncError, TradeSyncResult};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source_database_url: String,
    pub status_database_url: String,
    pub destination_base_url: String,
    pub destination_api_token: Option<String>,
    pub destination_max_retries: u32,
    pub destination_timeout_secs: u64,
    pub source_system_name: String,
    pub log_level: String,
    pub run_interval_secs: Option<u64>,
    pub setting_overrides: HashMap<String, String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> TradeSyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            source_database_url: get_var("SOURCE_DATABASE_URL")?,
            status_database_url: get_var("STATUS_DATABASE_URL")?,
            destination_base_url: get_var("DESTINATION_BASE_URL")?,
            destination_api_token: env::var("DESTINATION_API_TOKEN").ok(),
            destination_max_retries: parse_var_or("DESTINATION_MAX_RETRIES", 3)?,
            destination_timeout_secs: parse_var_or("DESTINATION_TIMEOUT_SECS", 60)?,
            source_system_name: get_var_or("SOURCE_SYSTEM_NAME", "RightAngle"),
            log_level: get_var_or("LOG_LEVEL", "info"),
            run_interval_secs: match env::var("RUN_INTERVAL_SECS") {
                Ok(raw) => Some(parse_interval(&raw)?),
                Err(_) => None,
            },
            setting_overrides: match env::var("INTEGRATION_SETTING_OVERRIDES") {
                Ok(raw) => parse_overrides(&raw)?,
                Err(_) => HashMap::new(),
            },
        })
    }
}

/// Parse `Scope.Key=Value;Other=Value` into an override map.
///
/// Blank entries are ignored; an entry without `=` is rejected.
pub fn parse_overrides(raw: &str) -> TradeSyncResult<HashMap<String, String>> {
    let mut overrides = HashMap::new();
    for entry in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            TradeSyncError::Config(format!("setting override `{entry}` is missing `=`"))
        })?;
        overrides.insert(key.trim().to_owned(), value.trim().to_owned());
    }
    Ok(overrides)
}

fn parse_interval(raw: &str) -> TradeSyncResult<u64> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|e| TradeSyncError::Config(format!("invalid RUN_INTERVAL_SECS: {e}")))?;
    if secs == 0 {
        return Err(TradeSyncError::Config(
            "RUN_INTERVAL_SECS must be positive".to_owned(),
        ));
    }
    Ok(secs)
}

fn get_var(key: &str) -> TradeSyncResult<String> {
    env::var(key).map_err(|_| TradeSyncError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var_or<T>(key: &str, default: T) -> TradeSyncResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| TradeSyncError::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}
