use async_trait::async_trait;
use serde::Serialize;

use super::client::DestinationClient;
use tradesync_common::error::{TradeSyncError, TradeSyncResult};
use tradesync_db::source::models::EntityKind;
use tradesync_db::sync::models::WatermarkCursor;
use tradesync_sync::push::PushService;
use tradesync_sync::translate::IntegrationRecord;

/// Body of a pass-completion call.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PassCompleted {
    max_sync_date_time: Option<chrono::DateTime<chrono::Utc>>,
    max_sync_date_max_pk_id: Option<i64>,
}

/// Pushes one entity type to `api/integration/{entity}/{source_system_id}`.
pub struct HttpPushService {
    client: DestinationClient,
    entity: EntityKind,
    notify_completion: bool,
}

impl HttpPushService {
    pub fn new(client: DestinationClient, entity: EntityKind) -> Self {
        Self {
            client,
            entity,
            notify_completion: false,
        }
    }

    /// Also call `.../complete` after each pass, so the destination can
    /// recompute aggregates up to the pass watermark.
    pub fn notifying_completion(mut self) -> Self {
        self.notify_completion = true;
        self
    }

    fn path(&self, source_system_id: i32, suffix: Option<&str>) -> String {
        let base = format!("api/integration/{}/{source_system_id}", self.entity);
        match suffix {
            Some(suffix) => format!("{base}/{suffix}"),
            None => base,
        }
    }

    async fn post<T>(&self, path: String, body: &T) -> TradeSyncResult<()>
    where
        T: Serialize + ?Sized + Sync,
    {
        self.client
            .post_json(&path, body)
            .await
            .map_err(|e| TradeSyncError::Destination(format!("{path}: {e}")))
    }
}

#[async_trait]
impl PushService for HttpPushService {
    async fn push(&self, source_system_id: i32, records: &[IntegrationRecord]) -> TradeSyncResult<()> {
        tracing::debug!(entity = %self.entity, count = records.len(), "pushing records");
        self.post(self.path(source_system_id, None), records).await
    }

    async fn bulk_sync(
        &self,
        source_system_id: i32,
        records: &[IntegrationRecord],
    ) -> TradeSyncResult<()> {
        tracing::debug!(entity = %self.entity, count = records.len(), "bulk syncing records");
        self.post(self.path(source_system_id, Some("bulk")), records)
            .await
    }

    async fn complete_pass(
        &self,
        source_system_id: i32,
        cursor: &WatermarkCursor,
    ) -> TradeSyncResult<()> {
        if !self.notify_completion {
            return Ok(());
        }
        let body = PassCompleted {
            max_sync_date_time: cursor.last_timestamp,
            max_sync_date_max_pk_id: cursor.last_id,
        };
        self.post(self.path(source_system_id, Some("complete")), &body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::client::DestinationClientConfig;
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> DestinationClient {
        DestinationClient::new(DestinationClientConfig {
            base_url: "http://localhost".into(),
            api_token: None,
            max_retries: 0,
            timeout_secs: 5,
        })
        .unwrap()
        .with_base_url(&server.uri())
    }

    fn record(id: i64) -> IntegrationRecord {
        IntegrationRecord {
            source_system_id: 4,
            source_id: id,
            entity: EntityKind::Trade,
            changed_at: None,
            fields: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn push_and_bulk_use_entity_routes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/integration/trade/4"))
            .and(body_partial_json(serde_json::json!([{ "sourceId": 7, "sourceSystemId": 4 }])))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/integration/trade/4/bulk"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let service = HttpPushService::new(client(&server), EntityKind::Trade);
        service.push(4, &[record(7)]).await.unwrap();
        service.bulk_sync(4, &[record(8)]).await.unwrap();
    }

    #[tokio::test]
    async fn destination_errors_map_to_destination_variant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("unknown product"))
            .mount(&server)
            .await;

        let service = HttpPushService::new(client(&server), EntityKind::Trade);
        let err = service.push(4, &[record(1)]).await.unwrap_err();
        assert!(matches!(err, TradeSyncError::Destination(ref msg) if msg.contains("unknown product")));
    }

    #[tokio::test]
    async fn completion_is_sent_only_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/integration/custom_invoice/4/complete"))
            .and(body_partial_json(serde_json::json!({ "maxSyncDateMaxPkId": 12 })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let cursor = WatermarkCursor::new(Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(), 12);

        HttpPushService::new(client(&server), EntityKind::Invoice)
            .complete_pass(4, &cursor)
            .await
            .unwrap();
        HttpPushService::new(client(&server), EntityKind::CustomInvoice)
            .notifying_completion()
            .complete_pass(4, &cursor)
            .await
            .unwrap();
    }
}
