//! Test doubles shared by the engine's unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::push::PushService;
use crate::translate::IntegrationRecord;
use tradesync_common::error::{TradeSyncError, TradeSyncResult};
use tradesync_config::Settings;
use tradesync_db::settings::repositories::{SettingEntry, SettingsRepository};
use tradesync_db::source::models::{EntityKind, SourceRow};
use tradesync_db::sync::models::{ResyncSet, WatermarkCursor};
use tradesync_db::sync::repositories::{ResyncRepository, StatusStore};

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, minute, 0).unwrap()
}

pub fn row(id: i64, minute: u32, counterparty: i64) -> SourceRow {
    SourceRow {
        id,
        change_timestamp: Some(at(minute)),
        counterparty_id: Some(counterparty),
        payload: serde_json::json!({ "id": id }),
    }
}

pub fn record(id: i64) -> IntegrationRecord {
    IntegrationRecord {
        source_system_id: 1,
        source_id: id,
        entity: EntityKind::Trade,
        changed_at: None,
        fields: serde_json::Map::new(),
    }
}

pub fn settings(entries: &[(&str, &str, &str)]) -> Arc<Settings> {
    Arc::new(Settings::from_entries(entries.iter().copied()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Start(String),
    Save(String, WatermarkCursor),
    Stop(String, WatermarkCursor),
    Error(String, WatermarkCursor, String),
    ExpireCaches(i32),
    Completed(i32),
}

impl StatusEvent {
    fn job(&self) -> Option<&str> {
        match self {
            Self::Start(name)
            | Self::Save(name, _)
            | Self::Stop(name, _)
            | Self::Error(name, _, _) => Some(name),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct MockStatusStore {
    source_systems: HashMap<String, i32>,
    watermarks: Mutex<HashMap<String, WatermarkCursor>>,
    events: Mutex<Vec<StatusEvent>>,
}

impl MockStatusStore {
    pub fn with_source_system(mut self, name: &str, id: i32) -> Self {
        self.source_systems.insert(name.to_owned(), id);
        self
    }

    pub fn with_watermark(self, job: &str, cursor: WatermarkCursor) -> Self {
        self.watermarks.lock().unwrap().insert(job.to_owned(), cursor);
        self
    }

    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn touched(&self, job: &str) -> bool {
        self.events().iter().any(|e| e.job() == Some(job))
    }

    pub fn watermark_of(&self, job: &str) -> Option<WatermarkCursor> {
        self.watermarks.lock().unwrap().get(job).copied()
    }

    pub fn saved(&self, job: &str) -> Vec<WatermarkCursor> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                StatusEvent::Save(name, cursor) if name == job => Some(cursor),
                _ => None,
            })
            .collect()
    }

    pub fn stopped(&self, job: &str) -> Option<WatermarkCursor> {
        self.events().into_iter().find_map(|e| match e {
            StatusEvent::Stop(name, cursor) if name == job => Some(cursor),
            _ => None,
        })
    }

    pub fn errored(&self, job: &str) -> Option<(WatermarkCursor, String)> {
        self.events().into_iter().find_map(|e| match e {
            StatusEvent::Error(name, cursor, message) if name == job => Some((cursor, message)),
            _ => None,
        })
    }

    fn record(&self, event: StatusEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn store(&self, job: &str, cursor: WatermarkCursor) {
        self.watermarks.lock().unwrap().insert(job.to_owned(), cursor);
    }
}

#[async_trait]
impl StatusStore for MockStatusStore {
    async fn source_system_id_by_name(&self, name: &str) -> TradeSyncResult<i32> {
        self.source_systems
            .get(name)
            .copied()
            .ok_or_else(|| TradeSyncError::NotFound(format!("source system {name}")))
    }

    async fn integration_start(
        &self,
        _source_system_id: i32,
        name: &str,
    ) -> TradeSyncResult<WatermarkCursor> {
        self.record(StatusEvent::Start(name.to_owned()));
        Ok(self.watermark_of(name).unwrap_or_default())
    }

    async fn save_watermark(
        &self,
        _source_system_id: i32,
        name: &str,
        cursor: &WatermarkCursor,
    ) -> TradeSyncResult<()> {
        self.record(StatusEvent::Save(name.to_owned(), *cursor));
        self.store(name, *cursor);
        Ok(())
    }

    async fn integration_stop(
        &self,
        _source_system_id: i32,
        name: &str,
        cursor: &WatermarkCursor,
    ) -> TradeSyncResult<()> {
        self.record(StatusEvent::Stop(name.to_owned(), *cursor));
        self.store(name, *cursor);
        Ok(())
    }

    async fn integration_error(
        &self,
        _source_system_id: i32,
        name: &str,
        cursor: &WatermarkCursor,
        message: &str,
    ) -> TradeSyncResult<()> {
        self.record(StatusEvent::Error(name.to_owned(), *cursor, message.to_owned()));
        self.store(name, *cursor);
        Ok(())
    }

    async fn expire_caches(&self, source_system_id: i32) -> TradeSyncResult<()> {
        self.record(StatusEvent::ExpireCaches(source_system_id));
        Ok(())
    }

    async fn track_integrations_completed(
        &self,
        source_system_id: i32,
        _started_at: DateTime<Utc>,
        _finished_at: DateTime<Utc>,
    ) -> TradeSyncResult<()> {
        self.record(StatusEvent::Completed(source_system_id));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockResyncRepository {
    ids: ResyncSet,
    resets: Mutex<Vec<ResyncSet>>,
}

impl MockResyncRepository {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            ids: ResyncSet::new(ids),
            resets: Mutex::new(Vec::new()),
        }
    }

    pub fn resets(&self) -> Vec<ResyncSet> {
        self.resets.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResyncRepository for MockResyncRepository {
    async fn counterparty_ids_to_resync(&self, _source_system_id: i32) -> TradeSyncResult<ResyncSet> {
        Ok(self.ids.clone())
    }

    async fn reset_resync_flags(&self, _source_system_id: i32, ids: &ResyncSet) -> TradeSyncResult<()> {
        self.resets.lock().unwrap().push(ids.clone());
        Ok(())
    }
}

pub struct MockSettingsRepository {
    entries: Vec<SettingEntry>,
}

impl MockSettingsRepository {
    pub fn new(entries: &[(&str, &str, &str)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(scope, key, value)| SettingEntry {
                    scope: (*scope).to_owned(),
                    key: (*key).to_owned(),
                    value: (*value).to_owned(),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl SettingsRepository for MockSettingsRepository {
    async fn load_all(&self, _source_system_id: i32) -> TradeSyncResult<Vec<SettingEntry>> {
        Ok(self.entries.clone())
    }
}

/// Records every push; optionally fails the n-th push (1-based).
#[derive(Default)]
pub struct RecordingPush {
    pushes: Mutex<Vec<Vec<IntegrationRecord>>>,
    completed: Mutex<Vec<WatermarkCursor>>,
    calls: Mutex<usize>,
    fail_on_push: Option<usize>,
}

impl RecordingPush {
    pub fn failing_on_push(mut self, n: usize) -> Self {
        self.fail_on_push = Some(n);
        self
    }

    pub fn pushed_ids(&self) -> Vec<Vec<i64>> {
        self.pushes
            .lock()
            .unwrap()
            .iter()
            .map(|batch| batch.iter().map(|r| r.source_id).collect())
            .collect()
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().unwrap().len()
    }

    pub fn completed_passes(&self) -> Vec<WatermarkCursor> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushService for RecordingPush {
    async fn push(&self, _source_system_id: i32, records: &[IntegrationRecord]) -> TradeSyncResult<()> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if self.fail_on_push == Some(call) {
            return Err(TradeSyncError::Destination("503 service unavailable".into()));
        }
        self.pushes.lock().unwrap().push(records.to_vec());
        Ok(())
    }

    async fn complete_pass(&self, _source_system_id: i32, cursor: &WatermarkCursor) -> TradeSyncResult<()> {
        self.completed.lock().unwrap().push(*cursor);
        Ok(())
    }
}
