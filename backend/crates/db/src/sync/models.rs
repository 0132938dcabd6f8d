use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tradesync_common::error::{TradeSyncError, TradeSyncResult};

/// Resume position of an incremental job: the highest `(change timestamp, id)`
/// already synchronized.
///
/// Field order matters: the derived `Ord` is the lexicographic
/// `(last_timestamp, last_id)` order the resumption predicate relies on.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct WatermarkCursor {
    pub last_timestamp: Option<DateTime<Utc>>,
    pub last_id: Option<i64>,
}

impl WatermarkCursor {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(last_timestamp: DateTime<Utc>, last_id: i64) -> Self {
        Self {
            last_timestamp: Some(last_timestamp),
            last_id: Some(last_id),
        }
    }

    /// A cursor only restricts the scan once both halves are known.
    pub fn is_empty(&self) -> bool {
        self.position().is_none()
    }

    pub fn position(&self) -> Option<(DateTime<Utc>, i64)> {
        self.last_timestamp.zip(self.last_id)
    }

    /// Resumption predicate: strictly after the cursor, ties broken on id.
    pub fn admits(&self, change_timestamp: DateTime<Utc>, id: i64) -> bool {
        match self.position() {
            None => true,
            Some((ts, last_id)) => change_timestamp > ts || (change_timestamp == ts && id > last_id),
        }
    }

    /// Move the cursor back by `overlap` so rows in that window are delivered again.
    pub fn rewound(&self, overlap: Duration) -> TradeSyncResult<Self> {
        let Some(ts) = self.last_timestamp else {
            return Ok(*self);
        };
        let rewound = ts.checked_sub_signed(overlap).ok_or_else(|| {
            TradeSyncError::Config(format!("sync overlap of {overlap} reaches before {ts}"))
        })?;
        Ok(Self {
            last_timestamp: Some(rewound),
            last_id: Some(i64::MIN),
        })
    }
}

impl fmt::Display for WatermarkCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position() {
            Some((ts, id)) => write!(f, "({}, {id})", ts.to_rfc3339()),
            None => f.write_str("(empty)"),
        }
    }
}

/// Counterparty ids flagged for a full re-scan regardless of watermark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncSet {
    counterparty_ids: BTreeSet<i64>,
}

impl ResyncSet {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            counterparty_ids: ids.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counterparty_ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counterparty_ids.len()
    }

    pub fn contains(&self, counterparty_id: i64) -> bool {
        self.counterparty_ids.contains(&counterparty_id)
    }

    pub fn ids(&self) -> Vec<i64> {
        self.counterparty_ids.iter().copied().collect()
    }
}

impl fmt::Display for ResyncSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.counterparty_ids.iter().map(i64::to_string).collect();
        f.write_str(&ids.join(", "))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Running,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown integration status: {value}")),
        }
    }
}

/// Persisted per-job state row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationStatusRecord {
    pub source_system_id: i32,
    pub integration_name: String,
    pub status: RunStatus,
    pub watermark: WatermarkCursor,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}
