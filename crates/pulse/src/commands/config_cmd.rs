//! Config subcommand handlers.

use dialoguer::{Input, Select};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

use super::util::prompt_err;

const MASK: &str = "****";

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of the config with plaintext secrets masked.
fn redacted(cfg: &Config) -> Config {
    let mut out = cfg.clone();
    for profile in out.profiles.values_mut() {
        if profile.api_key.is_some() {
            profile.api_key = Some(MASK.into());
        }
        if profile.password.is_some() {
            profile.password = Some(MASK.into());
        }
    }
    out
}

/// Format config for display. Expects an already redacted config.
fn format_config(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);
    let _ = writeln!(
        out,
        "low_battery_threshold = {}",
        cfg.defaults.low_battery_threshold
    );

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "database_url = \"{}\"", p.database_url);
        let _ = writeln!(out, "collection = \"{}\"", p.collection);
        let optional = [
            ("api_key", p.api_key.as_ref()),
            ("api_key_env", p.api_key_env.as_ref()),
            ("identity_url", p.identity_url.as_ref()),
            ("email", p.email.as_ref()),
            ("password", p.password.as_ref()),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                let _ = writeln!(out, "{key} = \"{v}\"");
            }
        }
        if let Some(t) = p.low_battery_threshold {
            let _ = writeln!(out, "low_battery_threshold = {t}");
        }
        if let Some(t) = p.timeout {
            let _ = writeln!(out, "timeout = {t}");
        }
    }

    out
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str, hint: &str) -> Result<T, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: hint.into(),
    })
}

fn prompt_optional(prompt: &str) -> Result<Option<String>, CliError> {
    let value: String = Input::new()
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text()
        .map_err(prompt_err)?;
    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_owned()))
}

/// Offer to store a secret in the system keyring or return it for plaintext config.
///
/// Returns `Some(secret)` if the user chose plaintext, `None` if stored in keyring.
fn prompt_keyring_storage(
    secret: &str,
    label: &str,
    store: impl FnOnce(&str) -> Result<(), pulse_config::ConfigError>,
) -> Result<Option<String>, CliError> {
    let choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt(format!("Where to store the {label}?"))
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        store(secret)?;
        eprintln!("   ✓ {label} stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(secret.to_owned()))
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: interactive wizard ────────────────────────────────
        ConfigCommand::Init => {
            let config_path = config::config_path();
            eprintln!("PulseGPS CLI: configuration wizard");
            eprintln!("   Config path: {}\n", config_path.display());

            let profile_name: String = Input::new()
                .with_prompt("Profile name")
                .default("default".into())
                .interact_text()
                .map_err(prompt_err)?;

            let database_url: String = Input::new()
                .with_prompt("Realtime Database URL")
                .validate_with(|input: &String| {
                    url::Url::parse(input).map(|_| ()).map_err(|e| e.to_string())
                })
                .interact_text()
                .map_err(prompt_err)?;

            let collection: String = Input::new()
                .with_prompt("Collection path")
                .default(pulse_core::config::DEFAULT_COLLECTION.into())
                .interact_text()
                .map_err(prompt_err)?;

            let mut api_key = None;
            let mut email = None;
            let mut password = None;

            if let Some(key) = prompt_optional("Web API key (empty for read-only)")? {
                api_key = prompt_keyring_storage(&key, "API key", |k| {
                    pulse_config::store_api_key(&profile_name, k)
                })?;

                email = prompt_optional("Operator email (empty to skip sign-in)")?;
                if email.is_some() {
                    let pass = rpassword::prompt_password("Password: ").map_err(prompt_err)?;
                    if !pass.is_empty() {
                        password = prompt_keyring_storage(&pass, "password", |p| {
                            pulse_config::store_password(&profile_name, p)
                        })?;
                    }
                }
            }

            let profile = Profile {
                database_url,
                collection,
                api_key,
                email,
                password,
                ..Profile::default()
            };

            let mut cfg = config::load_config_or_default();
            cfg.profiles.insert(profile_name.clone(), profile);
            if cfg.profiles.len() == 1 || cfg.default_profile.is_none() {
                cfg.default_profile = Some(profile_name.clone());
            }
            config::save_config(&cfg)?;

            eprintln!("\n✓ Configuration written to {}", config_path.display());
            eprintln!("  Profile: {profile_name}");
            eprintln!("\n  Test it: pulse devices list --profile {profile_name}");
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = redacted(&config::load_config_or_default());
            let out = output::render_single(&global.output, &cfg, format_config, |_| {
                "config".into()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Set <key> <value> ───────────────────────────────────────
        ConfigCommand::Set { key, value } => {
            let mut cfg = config::load_config_or_default();
            let profile_name = config::active_profile_name(global, &cfg);

            let profile = cfg
                .profiles
                .entry(profile_name.clone())
                .or_insert_with(|| Profile {
                    collection: pulse_core::config::DEFAULT_COLLECTION.into(),
                    ..Profile::default()
                });

            match key.as_str() {
                "database_url" | "database-url" => {
                    url::Url::parse(&value).map_err(|e| CliError::Validation {
                        field: "database_url".into(),
                        reason: format!("invalid URL: {e}"),
                    })?;
                    profile.database_url = value;
                }
                "collection" => profile.collection = value,
                "api_key" | "api-key" => profile.api_key = Some(value),
                "api_key_env" | "api-key-env" => profile.api_key_env = Some(value),
                "identity_url" | "identity-url" => profile.identity_url = Some(value),
                "email" => profile.email = Some(value),
                "low_battery_threshold" | "low-battery-threshold" => {
                    let threshold: u8 =
                        parse_number("low_battery_threshold", &value, "must be 1-100")?;
                    if !(1..=100).contains(&threshold) {
                        return Err(CliError::Validation {
                            field: "low_battery_threshold".into(),
                            reason: "must be 1-100".into(),
                        });
                    }
                    profile.low_battery_threshold = Some(threshold);
                }
                "timeout" => {
                    profile.timeout =
                        Some(parse_number("timeout", &value, "must be a number (seconds)")?);
                }
                other => {
                    return Err(CliError::Validation {
                        field: other.into(),
                        reason: format!(
                            "unknown config key '{other}'. Valid keys: database_url, \
                             collection, api_key, api_key_env, identity_url, email, \
                             low_battery_threshold, timeout"
                        ),
                    });
                }
            }

            config::save_config(&cfg)?;
            eprintln!("✓ Set {key} on profile '{profile_name}'");
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile_name();
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: pulse config init");
            } else {
                let mut names: Vec<_> = cfg.profiles.keys().collect();
                names.sort();
                for name in names {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        // ── Use <name> ─────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();

            if !cfg.profiles.contains_key(&name) {
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

            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn show_masks_plaintext_secrets() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "home".into(),
            Profile {
                database_url: "https://demo.firebaseio.com".into(),
                collection: "pulseras".into(),
                api_key: Some("AIza-secret".into()),
                email: Some("ops@example.com".into()),
                password: Some("hunter2".into()),
                ..Profile::default()
            },
        );

        let text = format_config(&redacted(&cfg));
        assert!(text.contains("[profiles.home]"));
        assert!(text.contains("email = \"ops@example.com\""));
        assert!(text.contains("password = \"****\""));
        assert!(!text.contains("hunter2"));
        assert!(!text.contains("AIza-secret"));
    }
}
