//! Sign-in and sign-out handlers.

use dialoguer::Input;
use secrecy::SecretString;

use pulse_core::{CoreError, Tracker};

use crate::cli::{GlobalOpts, LoginArgs};
use crate::config;
use crate::error::CliError;

use super::util::prompt_err;

pub async fn login(args: LoginArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = config::load_config_or_default();
    let (name, mut profile) = config::effective_profile(global, &cfg)?;

    let email = match profile.email.clone() {
        Some(email) => email,
        None => Input::new()
            .with_prompt("Email")
            .interact_text()
            .map_err(prompt_err)?,
    };
    let password = rpassword::prompt_password(format!("Password for {email}: "))?;
    if password.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "password cannot be empty".into(),
        });
    }

    let mut tracker_config = pulse_config::profile_to_tracker_config(&profile, &cfg.defaults)?;
    tracker_config.api_key = global
        .api_key
        .clone()
        .map(SecretString::from)
        .or_else(|| pulse_config::resolve_api_key(&profile, &name));
    if tracker_config.api_key.is_none() {
        return Err(CliError::InvalidConfig {
            message: "sign-in needs the project's web API key; set api_key on the profile \
                      or pass --api-key"
                .into(),
        });
    }

    let tracker = Tracker::new(tracker_config)?;
    let user = tracker
        .sign_in(&email, &SecretString::from(password.clone()))
        .await
        .map_err(|e| match e {
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed {
                message,
                profile: name.clone(),
            },
            other => other.into(),
        })?;

    if !args.no_store {
        pulse_config::store_password(&name, &password)?;
        profile.email = Some(email);
        cfg.profiles.insert(name.clone(), profile);
        config::save_config(&cfg)?;
    }

    if !global.quiet {
        eprintln!("✓ Signed in as {} (profile '{name}')", user.email);
        if !args.no_store {
            eprintln!("  Password stored in system keyring");
        }
    }
    Ok(())
}

pub fn logout(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load_config_or_default();
    let name = config::active_profile_name(global, &cfg);
    pulse_config::forget_password(&name)?;
    if !global.quiet {
        eprintln!("✓ Stored password removed for profile '{name}'");
    }
    Ok(())
}
