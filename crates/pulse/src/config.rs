//! CLI configuration -- thin wrapper around `pulse_config` shared types.
//!
//! Re-exports the shared types and adds CLI-specific resolution that
//! respects `GlobalOpts` flag overrides (--database-url, --api-key, etc.).

use secrecy::SecretString;

use pulse_core::TrackerConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use pulse_config::{Config, Profile, config_path, load_config_or_default, save_config};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .unwrap_or_else(|| config.default_profile_name().to_owned())
}

/// The active profile with CLI flag overrides applied.
///
/// Without a stored profile, `--database-url` alone is enough.
pub fn effective_profile(global: &GlobalOpts, cfg: &Config) -> Result<(String, Profile), CliError> {
    let name = active_profile_name(global, cfg);

    let mut profile = match cfg.profiles.get(&name) {
        Some(p) => p.clone(),
        None if global.database_url.is_some() => Profile {
            collection: pulse_core::config::DEFAULT_COLLECTION.into(),
            ..Profile::default()
        },
        None if global.profile.is_some() => {
            let mut available: Vec<_> = cfg.profiles.keys().cloned().collect();
            available.sort();
            return Err(CliError::ProfileNotFound {
                name,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            });
        }
        None => {
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }
    };

    if let Some(ref url) = global.database_url {
        profile.database_url.clone_from(url);
    }
    if let Some(ref collection) = global.collection {
        profile.collection.clone_from(collection);
    }
    if let Some(ref email) = global.email {
        profile.email = Some(email.clone());
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }

    Ok((name, profile))
}

/// Build a `TrackerConfig` from config file, profile, and CLI overrides.
pub fn resolve_tracker_config(global: &GlobalOpts) -> Result<TrackerConfig, CliError> {
    let cfg = load_config_or_default();
    let (name, profile) = effective_profile(global, &cfg)?;

    let mut tracker = pulse_config::resolve_tracker_config(&profile, &name, &cfg.defaults)?;

    // CLI flag takes priority
    if let Some(ref key) = global.api_key {
        tracker.api_key = Some(SecretString::from(key.clone()));
    }

    Ok(tracker)
}
