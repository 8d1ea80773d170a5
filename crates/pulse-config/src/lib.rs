//! Shared configuration for PulseGPS tools.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext), and
//! translation to `pulse_core::TrackerConfig`. The CLI adds flag-aware
//! wrappers on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use pulse_core::config::{DEFAULT_COLLECTION, DEFAULT_LOW_BATTERY_THRESHOLD};
use pulse_core::{AuthCredentials, CoreError, TrackerConfig};

/// Keyring service name for stored secrets.
pub const KEYRING_SERVICE: &str = "pulse";

/// Env var holding the sign-in password.
pub const PASSWORD_ENV: &str = "PULSE_PASSWORD";

/// Env var holding the sign-in email.
pub const EMAIL_ENV: &str = "PULSE_EMAIL";

/// Env var holding the web API key.
pub const API_KEY_ENV: &str = "PULSE_API_KEY";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    UnknownProfile { name: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<keyring::Error> for ConfigError {
    fn from(err: keyring::Error) -> Self {
        Self::Keyring(err.to_string())
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named database profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Name of the profile to use when none is given.
    pub fn default_profile_name(&self) -> &str {
        self.default_profile.as_deref().unwrap_or("default")
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_threshold")]
    pub low_battery_threshold: u8,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            low_battery_threshold: default_threshold(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_threshold() -> u8 {
    DEFAULT_LOW_BATTERY_THRESHOLD
}

/// A named database profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Database root (e.g., "https://my-app-default-rtdb.firebaseio.com").
    pub database_url: String,

    /// Collection path holding the device records.
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Web API key (plaintext -- prefer keyring or env var).
    pub api_key: Option<String>,

    /// Environment variable name containing the web API key.
    pub api_key_env: Option<String>,

    /// Identity endpoint override, for emulators.
    pub identity_url: Option<String>,

    /// Operator email for sign-in.
    pub email: Option<String>,

    /// Password (plaintext -- prefer keyring).
    pub password: Option<String>,

    /// Override the low-battery threshold.
    pub low_battery_threshold: Option<u8>,

    /// Override timeout.
    pub timeout: Option<u64>,
}

fn default_collection() -> String {
    DEFAULT_COLLECTION.into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "pulsegps", "pulse").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("pulse");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path`, layering defaults < TOML < `PULSE_` env vars.
///
/// Nested keys use a double underscore: `PULSE_DEFAULTS__TIMEOUT=60`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("PULSE_").split("__"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), profiles = config.profiles.len(), "config loaded");
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Keyring ─────────────────────────────────────────────────────────

fn keyring_entry(profile_name: &str, kind: &str) -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(
        KEYRING_SERVICE,
        &format!("{profile_name}/{kind}"),
    )?)
}

fn keyring_get(profile_name: &str, kind: &str) -> Option<String> {
    keyring_entry(profile_name, kind)
        .ok()
        .and_then(|entry| entry.get_password().ok())
}

/// Store the sign-in password for `profile_name` in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name, "password")?.set_password(password)?;
    Ok(())
}

/// Store the web API key for `profile_name` in the system keyring.
pub fn store_api_key(profile_name: &str, api_key: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name, "api-key")?.set_password(api_key)?;
    Ok(())
}

/// Remove the stored password. A missing entry is not an error.
pub fn forget_password(profile_name: &str) -> Result<(), ConfigError> {
    match keyring_entry(profile_name, "password")?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ── Credential resolution (without CLI flags) ───────────────────────

/// First secret found: env value, then keyring, then plaintext config.
///
/// The keyring is only consulted when the env value is absent.
fn pick_secret(
    env_value: Option<String>,
    keyring: impl FnOnce() -> Option<String>,
    plaintext: Option<&String>,
) -> Option<SecretString> {
    env_value
        .or_else(keyring)
        .or_else(|| plaintext.cloned())
        .map(SecretString::from)
}

/// Resolve the web API key. `None` means sign-in is unavailable.
pub fn resolve_api_key(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    let env_value = profile
        .api_key_env
        .as_deref()
        .and_then(|name| std::env::var(name).ok())
        .or_else(|| std::env::var(API_KEY_ENV).ok());

    pick_secret(
        env_value,
        || keyring_get(profile_name, "api-key"),
        profile.api_key.as_ref(),
    )
}

/// Resolve sign-in credentials.
///
/// No configured email means "read only": `Ok(None)`. An email without any
/// password source is an error.
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<Option<AuthCredentials>, ConfigError> {
    let Some(email) = profile
        .email
        .clone()
        .or_else(|| std::env::var(EMAIL_ENV).ok())
    else {
        return Ok(None);
    };

    let password = pick_secret(
        std::env::var(PASSWORD_ENV).ok(),
        || keyring_get(profile_name, "password"),
        profile.password.as_ref(),
    )
    .ok_or_else(|| ConfigError::NoCredentials {
        profile: profile_name.into(),
    })?;

    Ok(Some(AuthCredentials { email, password }))
}

fn parse_url(field: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{value}': {e}"),
    })
}

fn core_validation(err: &CoreError) -> ConfigError {
    ConfigError::Validation {
        field: "profile".into(),
        reason: err.to_string(),
    }
}

/// Build a `TrackerConfig` from a profile with no credentials attached.
///
/// Secret resolution is left to the caller so this stays side-effect free.
pub fn profile_to_tracker_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<TrackerConfig, ConfigError> {
    let database_url = parse_url("database_url", &profile.database_url)?;
    let mut config = TrackerConfig::new(database_url).map_err(|e| core_validation(&e))?;

    config.collection.clone_from(&profile.collection);
    if let Some(ref identity) = profile.identity_url {
        config.identity_url = parse_url("identity_url", identity)?;
    }
    config.low_battery_threshold = profile
        .low_battery_threshold
        .unwrap_or(defaults.low_battery_threshold);
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));

    config.validate().map_err(|e| core_validation(&e))?;
    Ok(config)
}

/// Build a complete `TrackerConfig` from a profile, resolving secrets.
pub fn resolve_tracker_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<TrackerConfig, ConfigError> {
    let mut config = profile_to_tracker_config(profile, defaults)?;
    config.api_key = resolve_api_key(profile, profile_name);
    config.credentials = resolve_credentials(profile, profile_name)?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn profile() -> Profile {
        Profile {
            database_url: "https://demo-default-rtdb.firebaseio.com".into(),
            collection: default_collection(),
            ..Profile::default()
        }
    }

    #[test]
    fn loads_profiles_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "home"

[defaults]
timeout = 10

[profiles.home]
database_url = "https://demo-default-rtdb.firebaseio.com"
email = "ops@example.com"
low_battery_threshold = 25
"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.default_profile_name(), "home");
        assert_eq!(config.defaults.timeout, 10);
        assert_eq!(config.defaults.output, "table");

        let home = config.profile("home").unwrap();
        assert_eq!(home.collection, "pulseras");
        assert_eq!(home.email.as_deref(), Some("ops@example.com"));
        assert_eq!(home.low_battery_threshold, Some(25));
        assert!(matches!(
            config.profile("work"),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile_name(), "default");
        assert!(config.profiles.is_empty());
        assert_eq!(config.defaults.low_battery_threshold, 20);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.profiles.insert("default".into(), profile());

        save_config_to(&config, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(
            loaded.profile("default").unwrap().database_url,
            "https://demo-default-rtdb.firebaseio.com"
        );
    }

    #[test]
    fn secret_precedence() {
        let plaintext = "plain".to_owned();

        let s = pick_secret(Some("env".into()), || panic!("keyring consulted"), Some(&plaintext));
        assert_eq!(s.unwrap().expose_secret(), "env");

        let s = pick_secret(None, || Some("ring".into()), Some(&plaintext));
        assert_eq!(s.unwrap().expose_secret(), "ring");

        let s = pick_secret(None, || None, Some(&plaintext));
        assert_eq!(s.unwrap().expose_secret(), "plain");

        assert!(pick_secret(None, || None, None).is_none());
    }

    #[test]
    fn profile_translates_to_tracker_config() {
        let mut p = profile();
        p.collection = "fleet/pulseras".into();
        p.timeout = Some(5);

        let config = profile_to_tracker_config(&p, &Defaults::default()).unwrap();
        assert_eq!(config.collection, "fleet/pulseras");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.low_battery_threshold, 20);
        assert!(config.api_key.is_none());
        assert!(config.credentials.is_none());
    }

    #[test]
    fn rejects_bad_url_and_threshold() {
        let mut p = profile();
        p.database_url = "not a url".into();
        assert!(matches!(
            profile_to_tracker_config(&p, &Defaults::default()),
            Err(ConfigError::Validation { ref field, .. }) if field == "database_url"
        ));

        let mut p = profile();
        p.low_battery_threshold = Some(0);
        assert!(matches!(
            profile_to_tracker_config(&p, &Defaults::default()),
            Err(ConfigError::Validation { .. })
        ));
    }
}
