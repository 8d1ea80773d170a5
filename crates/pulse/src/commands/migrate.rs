//! Schema migration handler.

use pulse_core::{MigrationReport, Tracker, TrackerConfig};

use crate::cli::{GlobalOpts, MigrateArgs};
use crate::error::CliError;
use crate::output;

fn detail(report: &MigrationReport) -> String {
    let verb = if report.applied {
        "Migrated"
    } else {
        "Would migrate"
    };
    let mut lines = vec![format!(
        "{verb} {} record(s), {} already current",
        report.outdated.len(),
        report.up_to_date
    )];
    for record in &report.outdated {
        let from = match record.from {
            pulse_core::SchemaVersion::Legacy => "legacy field names",
            pulse_core::SchemaVersion::Unversioned => "no schema version",
            pulse_core::SchemaVersion::Canonical => "current",
        };
        lines.push(format!("  {}  ({from})", record.id));
    }
    if !report.skipped.is_empty() {
        lines.push(format!(
            "Left alone (unreadable): {}",
            report.skipped.join(", ")
        ));
    }
    lines.join("\n")
}

pub async fn handle(
    config: TrackerConfig,
    args: MigrateArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let dry_run = args.dry_run;
    let report =
        Tracker::oneshot(config, |t| async move { t.migrate_legacy(dry_run).await }).await?;

    let out = output::render_single(&global.output, &report, detail, |r| {
        r.outdated
            .iter()
            .map(|m| m.id.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    });
    output::print_output(&out, global.quiet);
    Ok(())
}
