use thiserror::Error;

/// Top-level error type for the `pulse-api` crate.
///
/// Covers every failure mode across the three surfaces:
/// sign-in, REST database access, and the event stream.
/// `pulse-core` maps these into registry-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Sign-in failed (wrong password, unknown email, disabled account, etc.)
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The database rejected the request's credentials.
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    /// The server revoked the token the stream was opened with.
    #[error("Auth token revoked -- sign in again")]
    AuthRevoked,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Database ────────────────────────────────────────────────────
    /// Error envelope from the database (`{"error": "..."}`).
    #[error("Database error (HTTP {status}): {message}")]
    Database { status: u16, message: String },

    // ── Streaming ───────────────────────────────────────────────────
    /// Opening the event stream failed.
    #[error("Event stream connection failed: {0}")]
    StreamConnect(String),

    /// The server cancelled the stream (usually a rules change).
    #[error("Event stream cancelled by server: {reason}")]
    StreamCancelled { reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates the credentials are no
    /// longer accepted and signing in again might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::AuthRevoked | Self::PermissionDenied { .. } | Self::Database { status: 401, .. }
        )
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Self::Timeout { .. } | Self::StreamConnect(_) => true,
            Self::Database { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Database {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());
        assert!(!err.is_auth_expired());
    }

    #[test]
    fn permission_denied_is_auth_expired_not_transient() {
        let err = Error::PermissionDenied {
            message: "Permission denied".into(),
        };
        assert!(err.is_auth_expired());
        assert!(!err.is_transient());
    }
}
