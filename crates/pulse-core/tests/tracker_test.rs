#![allow(clippy::unwrap_used)]

// Session-level tests for `Tracker` over an in-memory store.
//
// Sign-in goes through a wiremock identity endpoint; everything else stays
// in process.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use pulse_api::IdentityClient;
use pulse_core::{
    ConnectionState, CoreError, DeviceForm, DeviceId, MemoryStore, RegistryView, SchemaVersion,
    Tracker, TrackerConfig, UpdateDeviceRequest,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::TryRecvError;
use tokio_stream::StreamExt;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

fn id(s: &str) -> DeviceId {
    DeviceId::new(s).unwrap()
}

fn config(live: bool) -> TrackerConfig {
    let mut config = TrackerConfig::new(Url::parse("https://demo.firebaseio.com").unwrap()).unwrap();
    config.live_updates = live;
    config
}

fn tracker(collection: Value, live: bool) -> Tracker<MemoryStore> {
    Tracker::with_store(config(live), MemoryStore::with_collection(collection), None)
}

async fn identity() -> (MockServer, IdentityClient) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:signInWithPassword"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "idToken": "id-token-abc",
            "email": "ops@example.com",
            "localId": "uid-1",
            "expiresIn": "3600",
        })))
        .mount(&server)
        .await;

    let base = Url::parse(&format!("{}/v1/", server.uri())).unwrap();
    let client = IdentityClient::with_client(
        reqwest::Client::new(),
        base,
        SecretString::from("web-key".to_owned()),
    );
    (server, client)
}

/// A connected tracker with a signed-in operator.
async fn admin_tracker(collection: Value, live: bool) -> (MockServer, Tracker<MemoryStore>) {
    let (server, identity) = identity().await;
    let tracker = Tracker::with_store(
        config(live),
        MemoryStore::with_collection(collection),
        Some(identity),
    );
    tracker.connect().await.unwrap();
    tracker
        .sign_in("ops@example.com", &SecretString::from("hunter2".to_owned()))
        .await
        .unwrap();
    (server, tracker)
}

async fn wait_for_view<F>(tracker: &Tracker<MemoryStore>, pred: F) -> Arc<RegistryView>
where
    F: Fn(&RegistryView) -> bool,
{
    let mut views = tracker.view_stream();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(view) = views.next().await {
            if pred(&view) {
                return view;
            }
        }
        panic!("view channel closed");
    })
    .await
    .expect("view never reached the expected state")
}

fn has(view: &RegistryView, key: &str) -> bool {
    view.devices.iter().any(|d| d.id == key)
}

fn ids(view: &RegistryView) -> Vec<String> {
    view.devices.iter().map(|d| d.id.to_string()).collect()
}

// ── Registry scenarios ──────────────────────────────────────────────

#[tokio::test]
async fn test_empty_store_shows_no_devices() {
    let tracker = tracker(Value::Null, true);
    tracker.connect().await.unwrap();

    let view = tracker.view();
    assert!(view.synced);
    assert!(view.is_empty());
    assert_eq!(view.selected, None);
    assert!(tracker.selected().is_none());

    tracker.disconnect().await;
}

#[tokio::test]
async fn test_first_low_device_is_selected_and_alerts_once() {
    let tracker = tracker(
        json!({"B1": {"latitude": 19.4, "longitude": -99.1, "batteryPercent": 15}}),
        true,
    );
    let mut alerts = tracker.alerts();
    tracker.connect().await.unwrap();

    assert_eq!(tracker.view().selected, Some(id("B1")));
    let alert = alerts.recv().await.unwrap();
    assert_eq!(alert.id, id("B1"));
    assert_eq!(alert.battery_percent, 15);
    assert_eq!(alert.threshold, 20);

    // Still low on later snapshots: no repeat.
    tracker
        .store()
        .put_raw("B1", json!({"latitude": 19.4, "longitude": -99.1, "batteryPercent": 14}));
    wait_for_view(&tracker, |v| {
        v.selected_record().and_then(|d| d.battery_percent) == Some(14)
    })
    .await;
    assert!(matches!(alerts.try_recv(), Err(TryRecvError::Empty)));

    tracker.disconnect().await;
}

#[tokio::test]
async fn test_select_next_rotates_through_devices() {
    let tracker = tracker(
        json!({"B1": {"batteryPercent": 90}, "B2": {"batteryPercent": 80}}),
        false,
    );
    tracker.connect().await.unwrap();
    assert_eq!(tracker.view().selected, Some(id("B1")));

    assert_eq!(tracker.select_next().await.selected, Some(id("B2")));
    assert_eq!(tracker.view().selected, Some(id("B2")));
    assert_eq!(tracker.select_next().await.selected, Some(id("B1")));

    tracker.disconnect().await;
}

#[tokio::test]
async fn test_select_unknown_id_keeps_selection() {
    let tracker = tracker(json!({"B1": {}, "B2": {}}), false);
    tracker.connect().await.unwrap();

    tracker.select_by_id(&id("B2")).await.unwrap();
    let result = tracker.select_by_id(&id("B9")).await;
    assert!(matches!(result, Err(CoreError::DeviceNotFound { .. })));
    assert_eq!(tracker.view().selected, Some(id("B2")));
}

#[tokio::test]
async fn test_removed_device_never_reappears() {
    let (_server, tracker) = admin_tracker(json!({"B1": {}}), true).await;

    tracker
        .add_device(DeviceForm {
            id: "B3".into(),
            name: "New".into(),
            ..DeviceForm::default()
        })
        .await
        .unwrap();
    tracker.remove_device(id("B3")).await.unwrap();

    // A later write flushes the feed past both B3 snapshots.
    tracker.store().put_raw("B9", json!({"name": "marker"}));
    let view = wait_for_view(&tracker, |v| has(v, "B9")).await;
    assert_eq!(ids(&view), vec!["B1", "B9"]);

    tracker.disconnect().await;
}

#[tokio::test]
async fn test_failed_refresh_keeps_last_known_devices() {
    let tracker = tracker(json!({"B1": {}, "B2": {}}), false);
    tracker.connect().await.unwrap();
    tracker.select_by_id(&id("B2")).await.unwrap();

    tracker.store().set_unavailable(Some("network unreachable"));
    let result = tracker.refresh().await;
    assert!(matches!(result, Err(CoreError::StoreUnavailable { .. })));

    let view = tracker.view();
    assert_eq!(ids(&view), vec!["B1", "B2"]);
    assert_eq!(view.selected, Some(id("B2")));
    assert!(view.is_stale());

    tracker.store().set_unavailable(None);
    tracker.refresh().await.unwrap();
    assert!(!tracker.view().is_stale());
}

#[tokio::test]
async fn test_connect_fails_when_store_unreachable() {
    let tracker = tracker(json!({"B1": {}}), true);
    tracker.store().set_unavailable(Some("offline"));
    let state = tracker.connection_state();

    let result = tracker.connect().await;
    assert!(matches!(result, Err(CoreError::StoreUnavailable { .. })));
    assert_eq!(*state.borrow(), ConnectionState::Failed);
    assert!(!tracker.view().synced);
}

#[tokio::test]
async fn test_feed_error_marks_view_stale() {
    let tracker = tracker(json!({"B1": {}}), true);
    tracker.connect().await.unwrap();

    tracker.store().fail_subscriptions("listener revoked");
    let view = wait_for_view(&tracker, RegistryView::is_stale).await;
    assert_eq!(ids(&view), vec!["B1"]);

    tracker.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_releases_subscription() {
    let tracker = tracker(Value::Null, true);
    tracker.connect().await.unwrap();
    assert_eq!(tracker.store().subscriber_count(), 1);

    tracker.disconnect().await;
    assert_eq!(tracker.store().subscriber_count(), 0);
    assert_eq!(*tracker.connection_state().borrow(), ConnectionState::Disconnected);
    assert!(!tracker.view().synced);

    // Reconnect opens a fresh feed.
    tracker.connect().await.unwrap();
    assert_eq!(tracker.store().subscriber_count(), 1);
    tracker.disconnect().await;
}

#[tokio::test]
async fn test_dropping_tracker_releases_subscription() {
    let tracker = tracker(json!({"B1": {}}), true);
    tracker.connect().await.unwrap();
    let store = Arc::clone(tracker.store());
    assert_eq!(store.subscriber_count(), 1);

    drop(tracker);
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.subscriber_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("feed still subscribed after the last tracker handle was dropped");
}

// ── Authentication gate ─────────────────────────────────────────────

#[tokio::test]
async fn test_commands_need_connection_and_session() {
    let tracker = tracker(Value::Null, false);
    let result = tracker.remove_device(id("B1")).await;
    assert!(matches!(result, Err(CoreError::Disconnected)));

    tracker.connect().await.unwrap();
    let result = tracker.remove_device(id("B1")).await;
    assert!(matches!(result, Err(CoreError::NotSignedIn)));
}

#[tokio::test]
async fn test_sign_in_without_api_key_is_a_config_error() {
    let tracker = tracker(Value::Null, false);
    let result = tracker
        .sign_in("ops@example.com", &SecretString::from("x".to_owned()))
        .await;
    assert!(matches!(result, Err(CoreError::Config { .. })));
    assert!(tracker.current_user().await.is_none());
}

#[tokio::test]
async fn test_sign_in_and_out() {
    let (_server, tracker) = admin_tracker(Value::Null, false).await;
    let user = tracker.current_user().await.unwrap();
    assert_eq!(user.email, "ops@example.com");
    assert_eq!(user.local_id, "uid-1");

    tracker.sign_out().await.unwrap();
    assert!(!tracker.is_signed_in().await);
    let result = tracker.remove_device(id("B1")).await;
    assert!(matches!(result, Err(CoreError::NotSignedIn)));
}

#[tokio::test]
async fn test_rejected_sign_in_surfaces_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:signInWithPassword"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"code": 400, "message": "INVALID_PASSWORD"}
        })))
        .mount(&server)
        .await;
    let identity = IdentityClient::with_client(
        reqwest::Client::new(),
        Url::parse(&format!("{}/v1/", server.uri())).unwrap(),
        SecretString::from("web-key".to_owned()),
    );
    let tracker = Tracker::with_store(config(false), MemoryStore::new(), Some(identity));

    let result = tracker
        .sign_in("ops@example.com", &SecretString::from("nope".to_owned()))
        .await;
    match result {
        Err(CoreError::AuthenticationFailed { message }) => {
            assert_eq!(message, "wrong email or password");
        }
        other => panic!("expected AuthenticationFailed, got: {other:?}"),
    }
}

// ── Admin writes ────────────────────────────────────────────────────

#[tokio::test]
async fn test_add_writes_canonical_record() {
    let (_server, tracker) = admin_tracker(Value::Null, false).await;

    let record = tracker
        .add_device(DeviceForm {
            id: " B1 ".into(),
            name: "Abuela".into(),
            latitude: "0".into(),
            longitude: "-99.1332".into(),
            battery: "0%".into(),
        })
        .await
        .unwrap();
    assert_eq!(record.id, id("B1"));
    assert_eq!(record.battery_percent, Some(0));

    let raw = tracker.store().raw();
    assert_eq!(raw["B1"]["name"], "Abuela");
    assert_eq!(raw["B1"]["latitude"], 0.0);
    assert_eq!(raw["B1"]["batteryPercent"], 0);
    assert_eq!(raw["B1"]["schemaVersion"], 2);

    tracker.refresh().await.unwrap();
    assert_eq!(tracker.selected().unwrap(), record);
}

#[tokio::test]
async fn test_invalid_form_never_reaches_store() {
    let (_server, tracker) = admin_tracker(Value::Null, false).await;

    let result = tracker
        .add_device(DeviceForm {
            id: "B1".into(),
            latitude: "91".into(),
            longitude: "0".into(),
            ..DeviceForm::default()
        })
        .await;
    assert!(matches!(result, Err(CoreError::Validation { .. })));
    assert_eq!(tracker.store().raw(), Value::Null);
}

#[tokio::test]
async fn test_rejected_write_is_reported() {
    let (_server, tracker) = admin_tracker(Value::Null, false).await;
    tracker.store().set_rejecting_writes(Some("Permission denied"));

    let result = tracker
        .add_device(DeviceForm {
            id: "B1".into(),
            ..DeviceForm::default()
        })
        .await;
    assert!(matches!(result, Err(CoreError::WriteRejected { .. })));
}

#[tokio::test]
async fn test_update_merges_into_stored_record() {
    let (_server, tracker) = admin_tracker(
        json!({"B1": {"nombre": "Abuela", "latitud": 19.4, "longitud": -99.1, "bateria": 40}}),
        false,
    )
    .await;

    let merged = tracker
        .update_device(
            id("B1"),
            UpdateDeviceRequest {
                battery_percent: Some(35),
                ..UpdateDeviceRequest::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(merged.name.as_deref(), Some("Abuela"));
    assert_eq!(merged.battery_percent, Some(35));
    assert_eq!(merged.latitude, Some(19.4));

    let raw = tracker.store().raw();
    assert_eq!(raw["B1"]["name"], "Abuela");
    assert_eq!(raw["B1"]["batteryPercent"], 35);
    assert!(raw["B1"].get("bateria").is_none());
}

#[tokio::test]
async fn test_update_missing_device_fails() {
    let (_server, tracker) = admin_tracker(Value::Null, false).await;
    let result = tracker
        .update_device(
            id("B1"),
            UpdateDeviceRequest {
                battery_percent: Some(35),
                ..UpdateDeviceRequest::default()
            },
        )
        .await;
    assert!(matches!(result, Err(CoreError::DeviceNotFound { .. })));
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let (_server, tracker) = admin_tracker(json!({"B1": {}}), false).await;
    tracker.remove_device(id("B1")).await.unwrap();
    tracker.remove_device(id("B1")).await.unwrap();
    assert_eq!(tracker.store().raw(), Value::Null);
}

#[tokio::test]
async fn test_migrate_dry_run_then_apply() {
    let (_server, tracker) = admin_tracker(
        json!({
            "B1": {"nombre": "Abuela", "bateria": 40},
            "B2": {"name": "Tio", "batteryPercent": 70, "schemaVersion": 2},
            "B3": "garbage",
        }),
        false,
    )
    .await;

    let report = tracker.migrate_legacy(true).await.unwrap();
    assert!(!report.applied);
    assert_eq!(report.up_to_date, 1);
    assert_eq!(report.outdated.len(), 1);
    assert_eq!(report.outdated[0].id, id("B1"));
    assert_eq!(report.outdated[0].from, SchemaVersion::Legacy);
    assert_eq!(report.skipped, vec!["B3".to_owned()]);
    assert_eq!(tracker.store().raw()["B1"]["bateria"], 40);

    let report = tracker.migrate_legacy(false).await.unwrap();
    assert!(report.applied);
    let raw = tracker.store().raw();
    assert_eq!(raw["B1"]["name"], "Abuela");
    assert_eq!(raw["B1"]["schemaVersion"], 2);
    assert_eq!(raw["B3"], "garbage");

    let report = tracker.migrate_legacy(true).await.unwrap();
    assert!(report.outdated.is_empty());
    assert_eq!(report.up_to_date, 2);
}
