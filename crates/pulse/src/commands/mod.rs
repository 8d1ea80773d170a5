//! Command dispatch: bridges CLI args -> tracker calls -> output formatting.

pub mod config_cmd;
pub mod devices;
pub mod login;
pub mod migrate;
pub mod util;
pub mod watch;

use pulse_core::TrackerConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a database-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: TrackerConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Devices(args) => devices::handle(config, args, global).await,
        Command::Watch(args) => watch::handle(config, args, global).await,
        Command::Migrate(args) => migrate::handle(config, args, global).await,
        // Handled before a tracker config is resolved
        Command::Login(_) | Command::Logout | Command::Config(_) | Command::Completions(_) => {
            Err(CliError::Internal("command dispatched without a handler".into()))
        }
    }
}
