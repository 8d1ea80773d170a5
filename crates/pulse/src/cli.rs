//! Clap derive structures for the `pulse` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// pulse -- track PulseGPS bracelets from the command line
#[derive(Debug, Parser)]
#[command(
    name = "pulse",
    version,
    about = "Track PulseGPS bracelets from the command line",
    long_about = "Lists, watches, and administers the bracelet registry stored in a\n\
        Firebase Realtime Database. Reads work with the database rules alone;\n\
        writes need a signed-in operator (see `pulse login`).",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration profile to use
    #[arg(long, short = 'p', env = "PULSE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Realtime Database URL (overrides profile)
    #[arg(long, short = 'd', env = "PULSE_DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Collection path holding the device records
    #[arg(long, env = "PULSE_COLLECTION", global = true)]
    pub collection: Option<String>,

    /// Web API key used for sign-in
    #[arg(long, env = "PULSE_API_KEY", global = true, hide_env = true)]
    pub api_key: Option<String>,

    /// Operator email used for sign-in
    #[arg(long, env = "PULSE_EMAIL", global = true)]
    pub email: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "PULSE_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "PULSE_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List and administer bracelets
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Follow the registry live, one selected bracelet at a time
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Rewrite old-format records into the current schema
    Migrate(MigrateArgs),

    /// Sign in and remember the password in the system keyring
    Login(LoginArgs),

    /// Forget the stored password for a profile
    Logout,

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DEVICES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List all bracelets in store order
    #[command(alias = "ls")]
    List {
        /// Only bracelets whose battery is below the alert threshold
        #[arg(long)]
        low_battery: bool,
    },

    /// Show one bracelet
    Get {
        /// Bracelet id
        id: String,
    },

    /// Register a bracelet, replacing any record with the same id
    Add(DeviceFields),

    /// Change some fields of an existing bracelet
    Update {
        /// Bracelet id
        id: String,

        /// New display name
        #[arg(long, conflicts_with = "clear_name")]
        name: Option<String>,

        /// Remove the display name
        #[arg(long)]
        clear_name: bool,

        /// Latitude in degrees (-90..=90)
        #[arg(long, allow_hyphen_values = true, requires = "longitude")]
        latitude: Option<f64>,

        /// Longitude in degrees (-180..=180)
        #[arg(long, allow_hyphen_values = true, requires = "latitude")]
        longitude: Option<f64>,

        /// Battery level in percent (0..=100)
        #[arg(long)]
        battery: Option<u8>,
    },

    /// Delete a bracelet
    #[command(alias = "rm")]
    Remove {
        /// Bracelet id
        id: String,
    },
}

/// Form fields for a new bracelet. Empty values mean "unknown".
#[derive(Debug, Args)]
pub struct DeviceFields {
    /// Bracelet id (store key)
    pub id: String,

    /// Display name
    #[arg(long, default_value = "")]
    pub name: String,

    /// Latitude in degrees (-90..=90)
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub latitude: String,

    /// Longitude in degrees (-180..=180)
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub longitude: String,

    /// Battery level in percent, e.g. 85 or 85%
    #[arg(long, default_value = "")]
    pub battery: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  WATCH
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Start with this bracelet selected
    #[arg(long)]
    pub select: Option<String>,

    /// Rotate to the next bracelet every N seconds
    #[arg(long, value_name = "SECS")]
    pub rotate: Option<u64>,

    /// Low-battery alert threshold in percent (overrides profile)
    #[arg(long, value_name = "PERCENT")]
    pub threshold: Option<u8>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  MIGRATE / LOGIN
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Report what would change without writing
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Check the credentials but do not store the password
    #[arg(long)]
    pub no_store: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current configuration (secrets masked)
    Show,

    /// Set a value on the active profile
    Set {
        /// Config key (database_url, collection, api_key, api_key_env,
        /// identity_url, email, low_battery_threshold, timeout)
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Print the config file path
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
