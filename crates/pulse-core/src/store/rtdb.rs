// Realtime Database backend for `DeviceStore`.

use pulse_api::{DatabaseClient, ReconnectConfig, StreamHandle, TransportConfig};
use secrecy::SecretString;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DeviceStore, Subscription};
use crate::config::TrackerConfig;
use crate::error::CoreError;
use crate::model::schema::encode_record;
use crate::model::{DeviceId, DeviceRecord};

/// Device collection stored under `{database}/{collection}`.
pub struct RtdbStore {
    db: DatabaseClient,
    streaming: reqwest::Client,
    collection: String,
    reconnect: ReconnectConfig,
}

impl RtdbStore {
    /// Build the store and its HTTP clients from tracker configuration.
    pub fn new(config: &TrackerConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            timeout: config.timeout,
            ..TransportConfig::default()
        };
        let db = DatabaseClient::new(config.database_url.clone(), &transport)?;
        let streaming = transport.build_streaming_client()?;
        Ok(Self::with_client(
            db,
            streaming,
            &config.collection,
            config.reconnect.clone(),
        ))
    }

    /// Build the store around existing clients.
    pub fn with_client(
        db: DatabaseClient,
        streaming: reqwest::Client,
        collection: &str,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            db,
            streaming,
            collection: collection.trim_matches('/').to_owned(),
            reconnect,
        }
    }

    fn record_path(&self, id: &DeviceId) -> String {
        format!("{}/{id}", self.collection)
    }
}

impl DeviceStore for RtdbStore {
    async fn fetch_raw(&self) -> Result<Value, CoreError> {
        debug!(collection = %self.collection, "fetching device collection");
        self.db
            .get(&self.collection)
            .await
            .map_err(CoreError::read_failed)
    }

    fn subscribe_all(&self) -> Result<Subscription, CoreError> {
        let url = self.db.json_url(&self.collection)?;
        debug!(collection = %self.collection, "opening live device feed");
        let handle = StreamHandle::connect(
            self.streaming.clone(),
            url,
            self.reconnect.clone(),
            CancellationToken::new(),
        );
        Ok(Subscription::new(handle))
    }

    async fn upsert(&self, record: &DeviceRecord) -> Result<(), CoreError> {
        let path = self.record_path(&record.id);
        self.db
            .put(&path, &encode_record(record))
            .await
            .map(|_| ())
            .map_err(|e| CoreError::write_failed(record.id.as_str(), e))
    }

    async fn remove(&self, id: &DeviceId) -> Result<(), CoreError> {
        self.db
            .delete(&self.record_path(id))
            .await
            .map_err(|e| CoreError::write_failed(id.as_str(), e))
    }

    fn set_auth_token(&self, token: Option<SecretString>) {
        match token {
            Some(token) => self.db.set_auth_token(token),
            None => self.db.clear_auth_token(),
        }
    }
}
