//! Server-sent event stream with auto-reconnect.
//!
//! Opens the database's streaming endpoint for one node (`Accept:
//! text/event-stream`), mirrors the `put`/`patch` events into a local JSON
//! tree, and delivers the full tree after every change through an ordered
//! [`tokio::sync::mpsc`] channel. Handles reconnection with exponential
//! backoff + jitter automatically.
//!
//! Consumers only ever see whole snapshots: intermediate patches are folded
//! into the mirror, so the contract is last-snapshot-wins.
//!
//! # Example
//!
//! ```rust,ignore
//! use pulse_api::realtime::{ReconnectConfig, StreamHandle, StreamMessage};
//! use tokio_util::sync::CancellationToken;
//!
//! let url = db.json_url("pulseras")?;
//! let mut handle = StreamHandle::connect(http, url, ReconnectConfig::default(), CancellationToken::new());
//!
//! while let Some(msg) = handle.recv().await {
//!     match msg {
//!         StreamMessage::Snapshot(value) => println!("{value}"),
//!         StreamMessage::Error(reason) => eprintln!("stream error: {reason}"),
//!     }
//! }
//! ```

use std::time::Duration;

use bytes::BytesMut;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;

// ── Channel capacity ─────────────────────────────────────────────────

const MESSAGE_CHANNEL_CAPACITY: usize = 64;

// ── StreamMessage ────────────────────────────────────────────────────

/// What a stream subscriber receives.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Full content of the watched node after a change.
    /// `Value::Null` means the node does not exist.
    Snapshot(Value),
    /// The stream failed. Transient failures are followed by a reconnect;
    /// after a terminal one (revoked token, permission change) the channel closes.
    Error(String),
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── StreamHandle ─────────────────────────────────────────────────────

/// Handle to a running event stream.
///
/// Dropping the handle cancels the background task, so a handle held in a
/// scope is released on every exit path. [`shutdown`](Self::shutdown) may
/// be called any number of times.
pub struct StreamHandle {
    rx: mpsc::Receiver<StreamMessage>,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Spawn the streaming loop for `url` (a `.json` node URL, auth included).
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background and its initial snapshot arrives through [`recv`](Self::recv).
    pub fn connect(
        http: reqwest::Client,
        url: Url,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            stream_loop(http, url, tx, reconnect, task_cancel).await;
        });

        Self { rx, cancel }
    }

    /// Build a handle around an existing channel. Used by alternative
    /// backends that produce snapshots without a network stream.
    pub fn from_channel(rx: mpsc::Receiver<StreamMessage>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Wait for the next message. `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<StreamMessage> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            msg = self.rx.recv() => msg,
        }
    }

    /// Signal the background task to stop. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on error, backoff → reconnect.
async fn stream_loop(
    http: reqwest::Client,
    url: Url,
    tx: mpsc::Sender<StreamMessage>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    let mut mirror = JsonMirror::default();

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&http, &url, &mut mirror, &tx, &cancel) => result,
        };

        match result {
            // Clean end of stream. Reconnect immediately; the server
            // re-sends the full node as the first event.
            Ok(()) => {
                if cancel.is_cancelled() || tx.is_closed() {
                    break;
                }
                tracing::info!("event stream ended, reconnecting");
                attempt = 0;

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(reconnect.initial_delay) => {}
                }
            }
            Err(e) => {
                let terminal = is_terminal(&e);
                tracing::warn!(error = %e, attempt, terminal, "event stream error");

                if tx.send(StreamMessage::Error(e.to_string())).await.is_err() {
                    break;
                }
                if terminal {
                    break;
                }

                if let Some(max) = reconnect.max_retries {
                    if attempt >= max {
                        tracing::error!(
                            max_retries = max,
                            "event stream reconnection limit reached, giving up"
                        );
                        break;
                    }
                }

                let delay = calculate_backoff(attempt, &reconnect);
                tracing::info!(
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    attempt,
                    "waiting before reconnect"
                );

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }

                attempt = attempt.saturating_add(1);
            }
        }
    }

    tracing::debug!("event stream loop exiting");
}

/// Errors after which reconnecting with the same URL cannot succeed.
fn is_terminal(err: &Error) -> bool {
    err.is_auth_expired() || matches!(err, Error::StreamCancelled { .. })
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Open one streaming connection and apply its events until it drops.
async fn connect_and_read(
    http: &reqwest::Client,
    url: &Url,
    mirror: &mut JsonMirror,
    tx: &mpsc::Sender<StreamMessage>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(host = url.host_str().unwrap_or(""), path = url.path(), "opening event stream");

    let resp = http
        .get(url.clone())
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| Error::StreamConnect(e.to_string()))?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::PermissionDenied {
            message: format!("stream rejected (HTTP {status})"),
        });
    }
    if !status.is_success() {
        return Err(Error::Database {
            status: status.as_u16(),
            message: "stream request failed".into(),
        });
    }

    tracing::info!("event stream connected");

    let events = event_stream(resp);
    futures_util::pin_mut!(events);

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            () = tx.closed() => return Ok(()),
            next = events.next() => next,
        };

        let Some(event) = next else {
            tracing::info!("event stream closed by server");
            return Ok(());
        };

        match event? {
            StreamEvent::Put { path, data } => {
                mirror.apply_put(&path, data);
                send_snapshot(mirror, tx).await;
            }
            StreamEvent::Patch { path, data } => {
                mirror.apply_patch(&path, data);
                send_snapshot(mirror, tx).await;
            }
            StreamEvent::KeepAlive => tracing::trace!("event stream keep-alive"),
            StreamEvent::Cancel { reason } => return Err(Error::StreamCancelled { reason }),
            StreamEvent::AuthRevoked => return Err(Error::AuthRevoked),
            StreamEvent::Unknown { event } => {
                tracing::debug!(event, "ignoring unknown stream event");
            }
        }
    }
}

async fn send_snapshot(mirror: &JsonMirror, tx: &mpsc::Sender<StreamMessage>) {
    // Receiver gone: the read loop notices through `tx.closed()`.
    if tx.send(StreamMessage::Snapshot(mirror.snapshot())).await.is_err() {
        tracing::debug!("snapshot receiver dropped");
    }
}

/// Turn a streaming response body into decoded events.
fn event_stream(resp: reqwest::Response) -> impl Stream<Item = Result<StreamEvent, Error>> {
    async_stream::try_stream! {
        let mut body = resp.bytes_stream();
        let mut parser = SseParser::default();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Error::StreamConnect(e.to_string()))?;
            for frame in parser.feed(&chunk) {
                yield decode_event(&frame)?;
            }
        }
    }
}

// ── SSE framing ──────────────────────────────────────────────────────

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere; only complete
/// lines are interpreted.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_owned()),
                "data" => self.data.push(value.to_owned()),
                _ => {}
            }
        }

        frames
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if event.is_none() && self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event.unwrap_or_else(|| "message".into()),
            data,
        })
    }
}

// ── Event decoding ───────────────────────────────────────────────────

/// Events the database sends on a streaming connection.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum StreamEvent {
    Put { path: String, data: Value },
    Patch { path: String, data: Value },
    KeepAlive,
    Cancel { reason: String },
    AuthRevoked,
    Unknown { event: String },
}

#[derive(Deserialize)]
struct PathPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

pub(crate) fn decode_event(frame: &SseFrame) -> Result<StreamEvent, Error> {
    let payload = || {
        serde_json::from_str::<PathPayload>(&frame.data).map_err(|e| Error::Deserialization {
            message: format!("bad {} payload: {e}", frame.event),
            body: frame.data.clone(),
        })
    };

    Ok(match frame.event.as_str() {
        "put" => {
            let p = payload()?;
            StreamEvent::Put {
                path: p.path,
                data: p.data,
            }
        }
        "patch" => {
            let p = payload()?;
            StreamEvent::Patch {
                path: p.path,
                data: p.data,
            }
        }
        "keep-alive" => StreamEvent::KeepAlive,
        "cancel" => StreamEvent::Cancel {
            reason: serde_json::from_str::<String>(&frame.data)
                .unwrap_or_else(|_| frame.data.clone()),
        },
        "auth_revoked" => StreamEvent::AuthRevoked,
        other => StreamEvent::Unknown {
            event: other.to_owned(),
        },
    })
}

// ── Local mirror ─────────────────────────────────────────────────────

/// Local copy of the watched node, kept current by `put`/`patch` events.
///
/// Follows the database's storage rules: writing `null` deletes a key and
/// objects left empty by a delete disappear.
#[derive(Debug, Default)]
pub(crate) struct JsonMirror {
    root: Value,
}

impl JsonMirror {
    /// Replace the value at `path` (`"/"` is the watched node itself).
    pub(crate) fn apply_put(&mut self, path: &str, data: Value) {
        let segments = split_path(path);
        set_at(&mut self.root, &segments, data);
    }

    /// Replace each top-level key of `data` beneath `path`.
    pub(crate) fn apply_patch(&mut self, path: &str, data: Value) {
        let Value::Object(children) = data else {
            tracing::debug!(path, "patch payload is not an object, ignoring");
            return;
        };
        let base = split_path(path);
        for (key, value) in children {
            let mut segments = base.clone();
            segments.extend(key.split('/').filter(|s| !s.is_empty()));
            set_at(&mut self.root, &segments, value);
        }
    }

    pub(crate) fn snapshot(&self) -> Value {
        self.root.clone()
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn set_at(node: &mut Value, segments: &[&str], data: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = prune(data);
        return;
    };

    // Index-keyed nodes arrive as arrays; children are addressed by index.
    if let Value::Array(items) = node {
        let keyed = index_keyed(std::mem::take(items));
        *node = Value::Object(keyed);
    }
    if !node.is_object() {
        if data.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else { return };

    if rest.is_empty() {
        let data = prune(data);
        if data.is_null() {
            map.shift_remove(*first);
        } else {
            map.insert((*first).to_owned(), data);
        }
    } else {
        let child = map.entry((*first).to_owned()).or_insert(Value::Null);
        set_at(child, rest, data);
        if child.is_null() {
            map.shift_remove(*first);
        }
    }

    if map.is_empty() {
        *node = Value::Null;
    }
}

/// An array node as the object it stands for. Null slots are absent keys.
fn index_keyed(items: Vec<Value>) -> Map<String, Value> {
    items
        .into_iter()
        .enumerate()
        .filter(|(_, v)| !v.is_null())
        .map(|(i, v)| (i.to_string(), v))
        .collect()
}

/// Empty objects do not exist in the database; collapse them to null.
fn prune(value: Value) -> Value {
    match value {
        Value::Object(map) if map.is_empty() => Value::Null,
        other => other,
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`
///
/// Jitter is +-25% to spread out reconnection storms from multiple clients.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic "jitter" seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
