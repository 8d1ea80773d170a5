// ── Device record store ──
//
// The seam between the registry and the remote collection. `RtdbStore`
// talks to the Realtime Database; `MemoryStore` keeps the collection in
// process for tests and demos. Both hand out the same `Subscription`
// type, so everything above this module is backend-agnostic.

mod memory;
mod rtdb;

use std::future::Future;

use pulse_api::{StreamHandle, StreamMessage};
use secrecy::SecretString;
use serde_json::Value;

use crate::error::CoreError;
use crate::model::schema::decode_collection;
use crate::model::{DecodedCollection, DeviceId, DeviceMap, DeviceRecord};

pub use memory::MemoryStore;
pub use rtdb::RtdbStore;

/// Read/write access to the device collection.
///
/// Writes are unconditional: no locking, no version checks, the store's
/// last write wins.
pub trait DeviceStore: Send + Sync + 'static {
    /// One-shot read of the raw collection node (`Value::Null` if missing).
    fn fetch_raw(&self) -> impl Future<Output = Result<Value, CoreError>> + Send;

    /// Open a live feed. The first event is the current content.
    ///
    /// Must be called from within a Tokio runtime.
    fn subscribe_all(&self) -> Result<Subscription, CoreError>;

    /// Write `record` at its id, replacing whatever was there.
    /// Optional fields that are `None` are dropped from the stored record.
    fn upsert(&self, record: &DeviceRecord) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// Delete the record at `id`. Deleting a missing id succeeds.
    fn remove(&self, id: &DeviceId) -> impl Future<Output = Result<(), CoreError>> + Send;

    /// Attach (or drop) the signed-in user's token for subsequent requests.
    /// Open subscriptions keep the token they were opened with.
    fn set_auth_token(&self, _token: Option<SecretString>) {}

    /// One-shot read, decoded, with schema bookkeeping.
    fn fetch_decoded(&self) -> impl Future<Output = Result<DecodedCollection, CoreError>> + Send {
        async move {
            let raw = self.fetch_raw().await?;
            decode_collection(&raw).map_err(|e| CoreError::StoreUnavailable {
                reason: e.to_string(),
            })
        }
    }

    /// One-shot read of every usable record, in store key order.
    ///
    /// Fails with [`CoreError::StoreUnavailable`] when the backend cannot be
    /// reached: that means "unknown", never "zero devices".
    fn fetch_all(&self) -> impl Future<Output = Result<DeviceMap, CoreError>> + Send {
        async move { Ok(self.fetch_decoded().await?.devices) }
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// What a live feed delivers.
#[derive(Debug)]
pub enum SubscriptionEvent {
    /// The whole collection after a change.
    Snapshot(DeviceMap),
    /// The feed failed; earlier snapshots are now possibly stale.
    Error(CoreError),
}

/// Handle to a live feed of collection snapshots.
///
/// Delivery is ordered and last-snapshot-wins. [`cancel`](Self::cancel) is
/// idempotent, and dropping the handle cancels it, so the backend listener
/// is released on every exit path.
pub struct Subscription {
    handle: StreamHandle,
}

impl Subscription {
    pub fn new(handle: StreamHandle) -> Self {
        Self { handle }
    }

    /// Wait for the next event. `None` once cancelled or the feed has ended.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        let msg = self.handle.recv().await?;
        Some(match msg {
            StreamMessage::Snapshot(value) => match decode_collection(&value) {
                Ok(decoded) => SubscriptionEvent::Snapshot(decoded.devices),
                Err(e) => SubscriptionEvent::Error(CoreError::StoreSubscription {
                    reason: e.to_string(),
                }),
            },
            StreamMessage::Error(reason) => {
                SubscriptionEvent::Error(CoreError::StoreSubscription { reason })
            }
        })
    }

    /// Stop delivery. Calling this more than once is a no-op.
    pub fn cancel(&self) {
        self.handle.shutdown();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_shutdown()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
