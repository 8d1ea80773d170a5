// ── Runtime tracker configuration ──
//
// These types describe *where* the device collection lives and *how* to
// authenticate. They carry credential data and tuning, but never touch
// disk. The CLI (via pulse-config) constructs a `TrackerConfig` and
// hands it in.

use std::time::Duration;

use pulse_api::ReconnectConfig;
use secrecy::SecretString;
use url::Url;

use crate::error::CoreError;

/// Default collection path holding the device records.
pub const DEFAULT_COLLECTION: &str = "pulseras";

/// Battery percentage strictly below which the selected device raises an alert.
pub const DEFAULT_LOW_BATTERY_THRESHOLD: u8 = 20;

/// Email/password credentials for the identity service.
#[derive(Debug, Clone)]
pub struct AuthCredentials {
    pub email: String,
    pub password: SecretString,
}

/// Configuration for one tracker session.
///
/// Built by the CLI, passed to `Tracker` -- core never reads config files.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Database root, e.g. `https://my-project-default-rtdb.firebaseio.com`.
    pub database_url: Url,
    /// Collection path under the root.
    pub collection: String,
    /// Web API key for the identity service. Sign-in is unavailable without it.
    pub api_key: Option<SecretString>,
    /// Identity toolkit root.
    pub identity_url: Url,
    /// Sign in with these on connect.
    pub credentials: Option<AuthCredentials>,
    /// Request timeout for one-shot reads and writes.
    pub timeout: Duration,
    /// Alert when the selected device's battery drops below this.
    pub low_battery_threshold: u8,
    /// Keep a live subscription open after the initial fetch.
    pub live_updates: bool,
    /// Backoff tuning for the live subscription.
    pub reconnect: ReconnectConfig,
}

impl TrackerConfig {
    /// Configuration with defaults for everything but the database root.
    pub fn new(database_url: Url) -> Result<Self, CoreError> {
        let identity_url =
            Url::parse(pulse_api::auth::DEFAULT_IDENTITY_URL).map_err(|e| CoreError::Config {
                message: format!("Invalid identity URL: {e}"),
            })?;

        Ok(Self {
            database_url,
            collection: DEFAULT_COLLECTION.into(),
            api_key: None,
            identity_url,
            credentials: None,
            timeout: Duration::from_secs(30),
            low_battery_threshold: DEFAULT_LOW_BATTERY_THRESHOLD,
            live_updates: true,
            reconnect: ReconnectConfig::default(),
        })
    }

    /// Check the invariants the rest of the crate relies on.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(1..=100).contains(&self.low_battery_threshold) {
            return Err(CoreError::Config {
                message: format!(
                    "low battery threshold must be between 1 and 100, got {}",
                    self.low_battery_threshold
                ),
            });
        }
        if self.collection.split('/').all(str::is_empty) {
            return Err(CoreError::Config {
                message: "collection path must not be empty".into(),
            });
        }
        if self.database_url.cannot_be_a_base() {
            return Err(CoreError::Config {
                message: format!("database URL '{}' cannot hold paths", self.database_url),
            });
        }
        Ok(())
    }
}
