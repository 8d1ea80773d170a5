//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use pulse_config::ConfigError;
use pulse_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const VALIDATION: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the device database")]
    #[diagnostic(
        code(pulse::unreachable),
        help(
            "{reason}\n\
             Check the database URL and your network connection.\n\
             Try: pulse config show"
        )
    )]
    Unreachable { reason: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Sign-in failed: {message}")]
    #[diagnostic(
        code(pulse::auth_failed),
        help("Check the email and password, then run: pulse login --profile {profile}")
    )]
    AuthFailed { message: String, profile: String },

    #[error("This command needs a signed-in operator")]
    #[diagnostic(
        code(pulse::not_signed_in),
        help(
            "Set an email on the profile and store a password with: pulse login\n\
             Or set PULSE_EMAIL and PULSE_PASSWORD."
        )
    )]
    NotSignedIn,

    #[error("No password configured for profile '{profile}'")]
    #[diagnostic(
        code(pulse::no_credentials),
        help("Store one with: pulse login --profile {profile}\nOr set PULSE_PASSWORD.")
    )]
    NoCredentials { profile: String },

    #[error("Write to '{id}' was rejected: {reason}")]
    #[diagnostic(
        code(pulse::rejected),
        help("The database rules refused the write. Check the signed-in account's access.")
    )]
    Rejected { id: String, reason: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(pulse::not_found),
        help("Run: pulse {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(pulse::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(pulse::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: pulse config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No database configured")]
    #[diagnostic(
        code(pulse::no_config),
        help(
            "Create a profile with: pulse config init\n\
             Or pass --database-url. Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(pulse::invalid_config))]
    InvalidConfig { message: String },

    #[error(transparent)]
    #[diagnostic(code(pulse::config))]
    Config(ConfigError),

    // ── Interactive ──────────────────────────────────────────────────

    #[error("Destructive operation '{action}' requires confirmation")]
    #[diagnostic(
        code(pulse::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    // ── Internal / IO ────────────────────────────────────────────────

    #[error("Unexpected error: {0}")]
    #[diagnostic(code(pulse::internal))]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. }
            | Self::NotSignedIn
            | Self::NoCredentials { .. }
            | Self::Rejected { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } => exit_code::VALIDATION,
            Self::ProfileNotFound { .. }
            | Self::NoConfig { .. }
            | Self::InvalidConfig { .. }
            | Self::NonInteractiveRequiresYes { .. } => exit_code::USAGE,
            Self::Config(_) | Self::Internal(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::StoreUnavailable { reason } | CoreError::StoreSubscription { reason } => {
                CliError::Unreachable { reason }
            }

            CoreError::Disconnected => CliError::Unreachable {
                reason: "the session was closed".into(),
            },

            CoreError::WriteRejected { id, reason } => CliError::Rejected { id, reason },

            CoreError::Validation { field, reason } => CliError::Validation { field, reason },

            CoreError::DeviceNotFound { id } => CliError::NotFound {
                resource_type: "device".into(),
                identifier: id,
                list_command: "devices list".into(),
            },

            CoreError::AuthenticationFailed { message } => CliError::AuthFailed {
                message,
                profile: "default".into(),
            },

            CoreError::NotSignedIn => CliError::NotSignedIn,

            CoreError::Config { message } => CliError::InvalidConfig { message },

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                available: "(see: pulse config profiles)".into(),
            },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(other),
        }
    }
}
