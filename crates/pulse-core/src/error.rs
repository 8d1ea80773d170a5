// ── Core error types ──
//
// User-facing errors from pulse-core. Consumers never see HTTP status
// codes or JSON parse failures directly. The `From<pulse_api::Error>` impl
// handles the failures that mean the same thing everywhere (credentials,
// configuration); whether a store failure is a read or a write is decided
// at the call site, see `CoreError::read_failed` / `CoreError::write_failed`.

use thiserror::Error;

/// Unified error type for the core crate.
///
/// None of these are fatal: the registry keeps its last good snapshot and
/// callers re-render with an explanatory message.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Store errors ─────────────────────────────────────────────────
    /// A one-shot read could not complete. The state is unknown, not empty.
    #[error("Device store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// The live subscription reported an error. Data shown may be stale.
    #[error("Live device feed failed: {reason}")]
    StoreSubscription { reason: String },

    /// An upsert or remove failed. Not retried automatically.
    #[error("Write to device '{id}' rejected: {reason}")]
    WriteRejected { id: String, reason: String },

    // ── Input errors ─────────────────────────────────────────────────
    /// Caller-supplied fields failed shape checks. Nothing was written.
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Device not found: {id}")]
    DeviceNotFound { id: String },

    // ── Session errors ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Not signed in -- run `pulse login` or configure credentials")]
    NotSignedIn,

    #[error("Tracker not connected")]
    Disconnected,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }

    /// Map an API failure that happened during a read.
    pub(crate) fn read_failed(err: pulse_api::Error) -> Self {
        match Self::from(err) {
            Self::Internal(reason) => Self::StoreUnavailable { reason },
            other => other,
        }
    }

    /// Map an API failure that happened while writing device `id`.
    pub(crate) fn write_failed(id: &str, err: pulse_api::Error) -> Self {
        match Self::from(err) {
            Self::Internal(reason) | Self::StoreUnavailable { reason } => Self::WriteRejected {
                id: id.to_owned(),
                reason,
            },
            other => other,
        }
    }

    /// Returns `true` if retrying the same action later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::StoreSubscription { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<pulse_api::Error> for CoreError {
    fn from(err: pulse_api::Error) -> Self {
        match err {
            pulse_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            pulse_api::Error::PermissionDenied { message } => CoreError::AuthenticationFailed {
                message: format!("{message} -- sign in with an account allowed to access the devices"),
            },
            pulse_api::Error::AuthRevoked => CoreError::AuthenticationFailed {
                message: "Session revoked -- sign in again".into(),
            },
            pulse_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            pulse_api::Error::Transport(ref e) if e.is_builder() => CoreError::Config {
                message: e.to_string(),
            },
            pulse_api::Error::Transport(e) => CoreError::StoreUnavailable {
                reason: e.to_string(),
            },
            pulse_api::Error::Timeout { timeout_secs } => CoreError::StoreUnavailable {
                reason: format!("request timed out after {timeout_secs}s"),
            },
            pulse_api::Error::StreamConnect(reason) => CoreError::StoreSubscription { reason },
            pulse_api::Error::StreamCancelled { reason } => CoreError::StoreSubscription {
                reason: format!("cancelled by server: {reason}"),
            },
            pulse_api::Error::Database { status, message } => {
                CoreError::Internal(format!("HTTP {status}: {message}"))
            }
            pulse_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
