// In-process backend for `DeviceStore`.
//
// Holds the collection as raw JSON, so legacy records can be seeded and
// go through the same decoder as remote data. Failure switches let tests
// reproduce an unreachable backend or a rules rejection.

use std::sync::Mutex;

use pulse_api::{StreamHandle, StreamMessage};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{DeviceStore, Subscription};
use crate::error::CoreError;
use crate::model::schema::encode_record;
use crate::model::{DeviceId, DeviceRecord};

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

/// A device collection kept in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    records: Map<String, Value>,
    subscribers: Vec<mpsc::Sender<StreamMessage>>,
    unavailable: Option<String>,
    rejecting: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a raw collection node (an object of records, or null).
    pub fn with_collection(collection: Value) -> Self {
        let records = match collection {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            inner: Mutex::new(MemoryInner {
                records,
                ..MemoryInner::default()
            }),
        }
    }

    /// Make reads fail with `reason` (`None` restores them).
    pub fn set_unavailable(&self, reason: Option<&str>) {
        self.lock().unavailable = reason.map(str::to_owned);
    }

    /// Make writes fail with `reason` (`None` restores them).
    pub fn set_rejecting_writes(&self, reason: Option<&str>) {
        self.lock().rejecting = reason.map(str::to_owned);
    }

    /// Write a raw record as another client would, notifying subscribers.
    pub fn put_raw(&self, key: &str, record: Value) {
        let mut inner = self.lock();
        if record.is_null() {
            inner.records.shift_remove(key);
        } else {
            inner.records.insert(key.to_owned(), record);
        }
        inner.notify();
    }

    /// Deliver a feed error to every open subscription.
    pub fn fail_subscriptions(&self, reason: &str) {
        let mut inner = self.lock();
        inner.broadcast(&StreamMessage::Error(reason.to_owned()));
    }

    /// The collection node as the remote store would return it.
    pub fn raw(&self) -> Value {
        self.lock().snapshot()
    }

    /// Subscriptions whose handle is still alive.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("memory store lock poisoned")
    }
}

impl MemoryInner {
    fn snapshot(&self) -> Value {
        if self.records.is_empty() {
            Value::Null
        } else {
            Value::Object(self.records.clone())
        }
    }

    fn notify(&mut self) {
        let snapshot = StreamMessage::Snapshot(self.snapshot());
        self.broadcast(&snapshot);
    }

    fn broadcast(&mut self, msg: &StreamMessage) {
        self.subscribers.retain(|tx| match tx.try_send(msg.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("memory store subscriber is not keeping up, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

impl DeviceStore for MemoryStore {
    async fn fetch_raw(&self) -> Result<Value, CoreError> {
        let inner = self.lock();
        match &inner.unavailable {
            Some(reason) => Err(CoreError::StoreUnavailable {
                reason: reason.clone(),
            }),
            None => Ok(inner.snapshot()),
        }
    }

    fn subscribe_all(&self) -> Result<Subscription, CoreError> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let mut inner = self.lock();
        tx.try_send(StreamMessage::Snapshot(inner.snapshot()))
            .map_err(|e| CoreError::Internal(format!("subscriber channel: {e}")))?;
        inner.subscribers.push(tx);
        Ok(Subscription::new(StreamHandle::from_channel(
            rx,
            CancellationToken::new(),
        )))
    }

    async fn upsert(&self, record: &DeviceRecord) -> Result<(), CoreError> {
        let mut inner = self.lock();
        if let Some(reason) = &inner.rejecting {
            return Err(CoreError::WriteRejected {
                id: record.id.to_string(),
                reason: reason.clone(),
            });
        }
        inner
            .records
            .insert(record.id.to_string(), encode_record(record));
        inner.notify();
        Ok(())
    }

    async fn remove(&self, id: &DeviceId) -> Result<(), CoreError> {
        let mut inner = self.lock();
        if let Some(reason) = &inner.rejecting {
            return Err(CoreError::WriteRejected {
                id: id.to_string(),
                reason: reason.clone(),
            });
        }
        if inner.records.shift_remove(id.as_str()).is_some() {
            inner.notify();
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::store::SubscriptionEvent;

    fn id(s: &str) -> DeviceId {
        DeviceId::new(s).unwrap()
    }

    #[tokio::test]
    async fn missing_collection_fetches_empty() {
        let store = MemoryStore::new();
        assert!(store.fetch_all().await.unwrap().is_empty());
        assert_eq!(store.raw(), Value::Null);
    }

    #[tokio::test]
    async fn upsert_then_fetch_round_trips() {
        let store = MemoryStore::new();
        let record = DeviceRecord::new(id("B1"))
            .with_name("Abuela")
            .with_position(0.0, 0.0)
            .with_battery(0)
            .with_updated_at(1_700_000_000_000);

        store.upsert(&record).await.unwrap();
        let all = store.fetch_all().await.unwrap();
        assert_eq!(all.get(&id("B1")), Some(&record));
    }

    #[tokio::test]
    async fn upsert_replaces_whole_record() {
        let store = MemoryStore::with_collection(json!({
            "B1": {"nombre": "Vieja", "bateria": 40, "latitud": 1.0, "longitud": 2.0}
        }));
        store
            .upsert(&DeviceRecord::new(id("B1")).with_battery(90))
            .await
            .unwrap();

        let all = store.fetch_all().await.unwrap();
        assert_eq!(all[&id("B1")], DeviceRecord::new(id("B1")).with_battery(90));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let store = MemoryStore::with_collection(json!({"B1": {"bateria": 40}}));
        store.remove(&id("B1")).await.unwrap();
        store.remove(&id("B1")).await.unwrap();
        assert!(store.fetch_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_reads_not_as_empty() {
        let store = MemoryStore::with_collection(json!({"B1": {"bateria": 40}}));
        store.set_unavailable(Some("offline"));
        assert!(matches!(
            store.fetch_all().await,
            Err(CoreError::StoreUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn rejected_writes_leave_store_untouched() {
        let store = MemoryStore::new();
        store.set_rejecting_writes(Some("Permission denied"));
        let result = store.upsert(&DeviceRecord::new(id("B1"))).await;
        assert!(matches!(result, Err(CoreError::WriteRejected { .. })));
        assert_eq!(store.raw(), Value::Null);
    }

    #[tokio::test]
    async fn subscription_delivers_current_then_changes() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe_all().unwrap();

        match sub.next().await.unwrap() {
            SubscriptionEvent::Snapshot(devices) => assert!(devices.is_empty()),
            other => panic!("unexpected {other:?}"),
        }

        store.put_raw("B1", json!({"bateria": 15}));
        match sub.next().await.unwrap() {
            SubscriptionEvent::Snapshot(devices) => {
                assert_eq!(devices[&id("B1")].battery_percent, Some(15));
            }
            other => panic!("unexpected {other:?}"),
        }

        store.fail_subscriptions("network lost");
        assert!(matches!(
            sub.next().await.unwrap(),
            SubscriptionEvent::Error(CoreError::StoreSubscription { .. })
        ));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_drop_releases() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe_all().unwrap();
        assert_eq!(store.subscriber_count(), 1);

        sub.cancel();
        sub.cancel();
        assert!(sub.is_cancelled());
        assert!(sub.next().await.is_none());

        drop(sub);
        assert_eq!(store.subscriber_count(), 0);
    }
}
