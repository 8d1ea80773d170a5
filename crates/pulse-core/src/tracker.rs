// ── Tracker session ──
//
// Full lifecycle of one operator session: sign-in, initial fetch, the live
// feed bridge, command routing, and the observable registry view. The
// store is injected, so the same session logic runs against the Realtime
// Database or an in-memory collection.

use std::sync::{Arc, Weak};

use pulse_api::{IdentityClient, TransportConfig};
use secrecy::SecretString;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{
    Command, CommandEnvelope, CommandResult, DeviceForm, MigratedRecord, MigrationReport,
    UpdateDeviceRequest,
};
use crate::config::TrackerConfig;
use crate::display::now_epoch_ms;
use crate::error::CoreError;
use crate::model::{DeviceId, DeviceMap, DeviceRecord};
use crate::registry::{LowBatteryAlert, Registry, RegistryView, SelectionOutcome};
use crate::store::{DeviceStore, RtdbStore, Subscription, SubscriptionEvent};

const COMMAND_CHANNEL_SIZE: usize = 32;
const ALERT_CHANNEL_SIZE: usize = 64;

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// The signed-in operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub email: String,
    pub local_id: String,
}

// ── Tracker ──────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<TrackerInner>`. Owns the registry for its
/// session; the registry is never shared between trackers.
pub struct Tracker<S: DeviceStore = RtdbStore> {
    inner: Arc<TrackerInner<S>>,
}

impl<S: DeviceStore> Clone for Tracker<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct TrackerInner<S: DeviceStore> {
    config: TrackerConfig,
    store: Arc<S>,
    identity: Option<IdentityClient>,
    registry: Mutex<Registry>,
    view: watch::Sender<Arc<RegistryView>>,
    alert_tx: broadcast::Sender<LowBatteryAlert>,
    connection_state: watch::Sender<ConnectionState>,
    session: Mutex<Option<UserSession>>,
    command_tx: Mutex<mpsc::Sender<CommandEnvelope>>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    cancel: CancellationToken,
    /// Child token for the current connection -- cancelled on disconnect,
    /// replaced on reconnect.
    cancel_child: Mutex<CancellationToken>,
    /// Token of the running feed bridge, replaced when the feed restarts.
    feed_cancel: Mutex<Option<CancellationToken>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: DeviceStore> Drop for TrackerInner<S> {
    // Background tasks only hold weak handles, so this runs once the last
    // `Tracker` is gone, connected or not.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Tracker<RtdbStore> {
    /// Create a tracker backed by the Realtime Database. Does NOT connect --
    /// call [`connect()`](Self::connect) to sign in and start syncing.
    pub fn new(config: TrackerConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let store = RtdbStore::new(&config)?;

        let identity = match &config.api_key {
            Some(key) => {
                let transport = TransportConfig {
                    timeout: config.timeout,
                    ..TransportConfig::default()
                };
                Some(IdentityClient::new(
                    config.identity_url.clone(),
                    key.clone(),
                    &transport,
                )?)
            }
            None => None,
        };

        Ok(Self::with_store(config, store, identity))
    }

    // ── One-shot convenience ─────────────────────────────────────

    /// One-shot: connect, run closure, disconnect.
    ///
    /// Optimized for CLI: no live feed, a single fetch on connect.
    pub async fn oneshot<F, Fut, T>(config: TrackerConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Tracker) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.live_updates = false;

        let tracker = Tracker::new(cfg)?;
        tracker.connect().await?;
        let result = f(tracker.clone()).await;
        tracker.disconnect().await;
        result
    }
}

impl<S: DeviceStore> Tracker<S> {
    /// Create a tracker around an existing store and optional identity client.
    pub fn with_store(config: TrackerConfig, store: S, identity: Option<IdentityClient>) -> Self {
        let registry = Registry::new(config.low_battery_threshold);
        let (view, _) = watch::channel(Arc::new(registry.view()));
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_SIZE);
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Self {
            inner: Arc::new(TrackerInner {
                config,
                store: Arc::new(store),
                identity,
                registry: Mutex::new(registry),
                view,
                alert_tx,
                connection_state,
                session: Mutex::new(None),
                command_tx: Mutex::new(command_tx),
                command_rx: Mutex::new(Some(command_rx)),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                feed_cancel: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Start the session.
    ///
    /// Signs in if credentials are configured, fetches the collection once,
    /// then spawns the command processor and (unless disabled) the live
    /// feed bridge.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Connecting);

        // Fresh child token for this connection (supports reconnect).
        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        if let Some(creds) = self.inner.config.credentials.clone() {
            if let Err(e) = self.sign_in(&creds.email, &creds.password).await {
                let _ = self.inner.connection_state.send(ConnectionState::Failed);
                return Err(e);
            }
        }

        if let Err(e) = self.refresh().await {
            let _ = self.inner.connection_state.send(ConnectionState::Failed);
            return Err(e);
        }

        {
            let mut handles = self.inner.task_handles.lock().await;
            if let Some(rx) = self.inner.command_rx.lock().await.take() {
                let inner = Arc::downgrade(&self.inner);
                let cancel = child.clone();
                handles.push(tokio::spawn(command_processor_task(inner, rx, cancel)));
            }
        }

        if self.inner.config.live_updates {
            self.start_feed(&child).await?;
        }

        let _ = self.inner.connection_state.send(ConnectionState::Connected);
        info!(
            collection = %self.inner.config.collection,
            live = self.inner.config.live_updates,
            "tracker connected"
        );
        Ok(())
    }

    /// End the session.
    ///
    /// Cancels the feed and command processor, waits for them, and resets
    /// the registry to empty. The signed-in session is kept.
    pub async fn disconnect(&self) {
        // Cancel the child token (not the parent -- allows reconnect).
        self.inner.cancel_child.lock().await.cancel();
        *self.inner.feed_cancel.lock().await = None;

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        // Recreate command channel so reconnects can spawn a fresh receiver.
        {
            let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
            *self.inner.command_tx.lock().await = tx;
            *self.inner.command_rx.lock().await = Some(rx);
        }

        {
            let mut registry = self.inner.registry.lock().await;
            *registry = Registry::new(self.inner.config.low_battery_threshold);
            self.publish(&registry);
        }

        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Disconnected);
        debug!("tracker disconnected");
    }

    /// One-shot read of the whole collection into the registry.
    ///
    /// On failure the registry keeps its devices and selection, the view is
    /// flagged with the error, and the error is returned.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        match self.inner.store.fetch_all().await {
            Ok(devices) => {
                debug!(count = devices.len(), "fetched device collection");
                self.apply_snapshot(devices).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "device fetch failed, keeping last known devices");
                let mut registry = self.inner.registry.lock().await;
                registry.mark_error(e.to_string());
                self.publish(&registry);
                Err(e)
            }
        }
    }

    /// Subscribe to the store and spawn the bridge that feeds the registry.
    /// Any previous feed is cancelled first.
    async fn start_feed(&self, parent: &CancellationToken) -> Result<(), CoreError> {
        let subscription = self.inner.store.subscribe_all()?;
        let token = parent.child_token();

        if let Some(previous) = self.inner.feed_cancel.lock().await.replace(token.clone()) {
            previous.cancel();
        }

        let inner = Arc::downgrade(&self.inner);
        self.inner
            .task_handles
            .lock()
            .await
            .push(tokio::spawn(feed_bridge_task(inner, subscription, token)));
        debug!("live device feed started");
        Ok(())
    }

    /// Reopen the live feed so it picks up a changed auth token.
    async fn restart_feed_if_running(&self) -> Result<(), CoreError> {
        let running = self
            .inner
            .feed_cancel
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_cancelled());
        if running {
            let parent = self.inner.cancel_child.lock().await.clone();
            self.start_feed(&parent).await?;
        }
        Ok(())
    }

    async fn apply_snapshot(&self, devices: DeviceMap) {
        let mut registry = self.inner.registry.lock().await;
        let alert = registry.apply_snapshot(devices);
        self.publish(&registry);
        drop(registry);
        if let Some(alert) = alert {
            self.emit_alert(alert);
        }
    }

    async fn apply_feed_error(&self, err: &CoreError) {
        warn!(error = %err, "live device feed error, showing last known devices");
        let mut registry = self.inner.registry.lock().await;
        registry.mark_error(err.to_string());
        self.publish(&registry);
    }

    fn publish(&self, registry: &Registry) {
        self.inner.view.send_replace(Arc::new(registry.view()));
    }

    fn emit_alert(&self, alert: LowBatteryAlert) {
        info!(
            id = %alert.id,
            battery = alert.battery_percent,
            threshold = alert.threshold,
            "low battery on selected device"
        );
        let _ = self.inner.alert_tx.send(alert);
    }

    // ── Selection ────────────────────────────────────────────────

    /// Rotate the selection to the next device.
    pub async fn select_next(&self) -> SelectionOutcome {
        let mut registry = self.inner.registry.lock().await;
        let outcome = registry.select_next();
        self.publish(&registry);
        drop(registry);
        if let Some(alert) = outcome.alert.clone() {
            self.emit_alert(alert);
        }
        outcome
    }

    /// Select `id`. Unknown ids leave the selection unchanged.
    pub async fn select_by_id(&self, id: &DeviceId) -> Result<SelectionOutcome, CoreError> {
        let mut registry = self.inner.registry.lock().await;
        let outcome = registry.select_by_id(id)?;
        self.publish(&registry);
        drop(registry);
        if let Some(alert) = outcome.alert.clone() {
            self.emit_alert(alert);
        }
        Ok(outcome)
    }

    fn upgrade(inner: &Weak<TrackerInner<S>>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    // ── State observation ────────────────────────────────────────

    /// The latest registry view.
    pub fn view(&self) -> Arc<RegistryView> {
        self.inner.view.borrow().clone()
    }

    /// Subscribe to registry view changes.
    pub fn subscribe_view(&self) -> watch::Receiver<Arc<RegistryView>> {
        self.inner.view.subscribe()
    }

    /// Registry views as a `Stream`: the current view first, then each change.
    pub fn view_stream(&self) -> WatchStream<Arc<RegistryView>> {
        WatchStream::new(self.inner.view.subscribe())
    }

    /// Subscribe to low-battery alerts.
    pub fn alerts(&self) -> broadcast::Receiver<LowBatteryAlert> {
        self.inner.alert_tx.subscribe()
    }

    /// Subscribe to connection state changes.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn current_devices(&self) -> Arc<Vec<DeviceRecord>> {
        Arc::clone(&self.view().devices)
    }

    pub fn selected(&self) -> Option<DeviceRecord> {
        self.view().selected_record().cloned()
    }

    // ── Authentication gate ──────────────────────────────────────

    /// Sign in with email and password. Subsequent store requests carry the
    /// session token; a running live feed is reopened with it.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<UserSession, CoreError> {
        let identity = self.inner.identity.as_ref().ok_or_else(|| CoreError::Config {
            message: "sign-in needs the project's web API key".into(),
        })?;

        let auth = identity.sign_in_with_password(email, password).await?;
        let session = UserSession {
            email: auth.email,
            local_id: auth.local_id,
        };

        self.inner.store.set_auth_token(Some(auth.id_token));
        *self.inner.session.lock().await = Some(session.clone());
        info!(email = %session.email, "signed in");

        self.restart_feed_if_running().await?;
        Ok(session)
    }

    /// Forget the session locally. Store requests go out unauthenticated.
    pub async fn sign_out(&self) -> Result<(), CoreError> {
        let previous = self.inner.session.lock().await.take();
        self.inner.store.set_auth_token(None);
        if let Some(session) = previous {
            info!(email = %session.email, "signed out");
            self.restart_feed_if_running().await?;
        }
        Ok(())
    }

    pub async fn current_user(&self) -> Option<UserSession> {
        self.inner.session.lock().await.clone()
    }

    pub async fn is_signed_in(&self) -> bool {
        self.inner.session.lock().await.is_some()
    }

    // ── Command execution ────────────────────────────────────────

    /// Execute an administrative command.
    ///
    /// Requires a connected tracker and a signed-in session. Sends the
    /// command to the processor task and awaits the result.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        if *self.inner.connection_state.borrow() != ConnectionState::Connected {
            return Err(CoreError::Disconnected);
        }
        if !self.is_signed_in().await {
            return Err(CoreError::NotSignedIn);
        }

        let (tx, rx) = tokio::sync::oneshot::channel();
        let command_tx = self.inner.command_tx.lock().await.clone();

        command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::Disconnected)?;

        rx.await.map_err(|_| CoreError::Disconnected)?
    }

    /// Create or fully replace a device from form input.
    pub async fn add_device(&self, form: DeviceForm) -> Result<DeviceRecord, CoreError> {
        match self.execute(Command::AddDevice(form)).await? {
            CommandResult::Written(record) => Ok(record),
            other => Err(unexpected_result(&other)),
        }
    }

    /// Change some fields of an existing device (read-merge-write).
    pub async fn update_device(
        &self,
        id: DeviceId,
        update: UpdateDeviceRequest,
    ) -> Result<DeviceRecord, CoreError> {
        match self.execute(Command::UpdateDevice { id, update }).await? {
            CommandResult::Written(record) => Ok(record),
            other => Err(unexpected_result(&other)),
        }
    }

    /// Delete a device. Deleting a missing id succeeds.
    pub async fn remove_device(&self, id: DeviceId) -> Result<(), CoreError> {
        match self.execute(Command::RemoveDevice { id }).await? {
            CommandResult::Removed(_) => Ok(()),
            other => Err(unexpected_result(&other)),
        }
    }

    /// Rewrite outdated records into the canonical schema.
    pub async fn migrate_legacy(&self, dry_run: bool) -> Result<MigrationReport, CoreError> {
        match self.execute(Command::MigrateLegacy { dry_run }).await? {
            CommandResult::Migrated(report) => Ok(report),
            other => Err(unexpected_result(&other)),
        }
    }
}

fn unexpected_result(result: &CommandResult) -> CoreError {
    CoreError::Internal(format!("unexpected command result: {result:?}"))
}

// ── Background tasks ─────────────────────────────────────────────

/// Apply feed events to the registry, one at a time, in delivery order.
/// Owns the subscription, so every exit path releases it.
async fn feed_bridge_task<S: DeviceStore>(
    inner: Weak<TrackerInner<S>>,
    mut subscription: Subscription,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = subscription.next() => event,
        };

        let Some(tracker) = Tracker::upgrade(&inner) else {
            break;
        };
        match event {
            Some(SubscriptionEvent::Snapshot(devices)) => tracker.apply_snapshot(devices).await,
            Some(SubscriptionEvent::Error(e)) => tracker.apply_feed_error(&e).await,
            None => {
                warn!("live device feed ended");
                break;
            }
        }
    }
    subscription.cancel();
    debug!("feed bridge exiting");
}

/// Process commands from the mpsc channel, one at a time.
async fn command_processor_task<S: DeviceStore>(
    inner: Weak<TrackerInner<S>>,
    mut rx: mpsc::Receiver<CommandEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let Some(tracker) = Tracker::upgrade(&inner) else { break };
                let result = route_command(&tracker, envelope.command).await;
                let _ = envelope.response_tx.send(result);
            }
        }
    }
}

// ── Command routing ──────────────────────────────────────────────

async fn route_command<S: DeviceStore>(
    tracker: &Tracker<S>,
    cmd: Command,
) -> Result<CommandResult, CoreError> {
    let store = &tracker.inner.store;

    match cmd {
        Command::AddDevice(form) => {
            let record = form.validate(now_epoch_ms())?;
            store.upsert(&record).await?;
            info!(id = %record.id, "device written");
            Ok(CommandResult::Written(record))
        }
        Command::UpdateDevice { id, update } => {
            update.validate()?;
            let current = store
                .fetch_all()
                .await?
                .shift_remove(&id)
                .ok_or_else(|| CoreError::DeviceNotFound { id: id.to_string() })?;
            let merged = update.apply(&current, now_epoch_ms());
            store.upsert(&merged).await?;
            info!(%id, "device updated");
            Ok(CommandResult::Written(merged))
        }
        Command::RemoveDevice { id } => {
            store.remove(&id).await?;
            info!(%id, "device removed");
            Ok(CommandResult::Removed(id))
        }
        Command::MigrateLegacy { dry_run } => migrate(store.as_ref(), dry_run).await,
    }
}

async fn migrate<S: DeviceStore>(store: &S, dry_run: bool) -> Result<CommandResult, CoreError> {
    let decoded = store.fetch_decoded().await?;

    let mut report = MigrationReport {
        up_to_date: decoded.devices.len().saturating_sub(decoded.outdated.len()),
        skipped: decoded.skipped.iter().map(|s| s.key.clone()).collect(),
        applied: !dry_run,
        ..MigrationReport::default()
    };

    for (id, from) in decoded.outdated {
        if !dry_run {
            if let Some(record) = decoded.devices.get(&id) {
                store.upsert(record).await?;
                debug!(%id, ?from, "record migrated");
            }
        }
        report.outdated.push(MigratedRecord { id, from });
    }

    info!(
        outdated = report.outdated.len(),
        up_to_date = report.up_to_date,
        dry_run,
        "schema migration finished"
    );
    Ok(CommandResult::Migrated(report))
}
