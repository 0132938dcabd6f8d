use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tradesync_common::error::TradeSyncResult;

/// One stored setting: `scope` is a job name or `Global`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub scope: String,
    pub key: String,
    pub value: String,
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Every setting stored for a source system.
    async fn load_all(&self, source_system_id: i32) -> TradeSyncResult<Vec<SettingEntry>>;
}
