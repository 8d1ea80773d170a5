//! Device command handlers.

use tabled::Tabled;

use pulse_core::{DeviceForm, DeviceRecord, Tracker, TrackerConfig, UpdateDeviceRequest, display};

use crate::cli::{DeviceFields, DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Battery")]
    battery: String,
    #[tabled(rename = "Latitude")]
    latitude: String,
    #[tabled(rename = "Longitude")]
    longitude: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl DeviceRow {
    fn new(d: &DeviceRecord, threshold: u8, color: bool) -> Self {
        Self {
            id: d.id.to_string(),
            name: d.display_name(),
            battery: output::battery_text(
                &display::battery(d.battery_percent),
                d.is_low_battery(threshold),
                color,
            ),
            latitude: display::coordinate(d.latitude),
            longitude: display::coordinate(d.longitude),
            updated: display::updated_at(d.updated_at_ms),
        }
    }
}

fn detail(d: &DeviceRecord, threshold: u8) -> String {
    let low = if d.is_low_battery(threshold) {
        " (low)"
    } else {
        ""
    };
    let mut lines = vec![
        format!("ID:       {}", d.id),
        format!("Name:     {}", d.display_name()),
        format!("Position: {}", display::position(d)),
        format!("Battery:  {}{low}", display::battery(d.battery_percent)),
        format!("Updated:  {}", display::updated_at(d.updated_at_ms)),
    ];
    if let Some(stamp) = display::updated_at_rfc3339(d.updated_at_ms) {
        lines.push(format!("          {stamp}"));
    }
    lines.join("\n")
}

fn form(fields: DeviceFields) -> DeviceForm {
    DeviceForm {
        id: fields.id,
        name: fields.name,
        latitude: fields.latitude,
        longitude: fields.longitude,
        battery: fields.battery,
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    config: TrackerConfig,
    args: DevicesArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let threshold = config.low_battery_threshold;

    match args.command {
        DevicesCommand::List { low_battery } => {
            let devices =
                Tracker::oneshot(config, |t| async move { Ok(t.current_devices()) }).await?;
            let shown: Vec<DeviceRecord> = devices
                .iter()
                .filter(|d| !low_battery || d.is_low_battery(threshold))
                .cloned()
                .collect();

            if shown.is_empty() && matches!(global.output, crate::cli::OutputFormat::Table) {
                if !global.quiet {
                    eprintln!("No devices registered");
                }
                return Ok(());
            }

            let color = output::should_color(&global.color);
            let out = output::render_list(
                &global.output,
                &shown,
                |d| DeviceRow::new(d, threshold, color),
                |d| d.id.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Get { id } => {
            let id = util::parse_device_id(&id)?;
            let lookup = id.clone();
            let found = Tracker::oneshot(config, |t| async move {
                Ok(t.current_devices().iter().find(|d| d.id == lookup).cloned())
            })
            .await?;

            let device = found.ok_or_else(|| CliError::NotFound {
                resource_type: "device".into(),
                identifier: id.to_string(),
                list_command: "devices list".into(),
            })?;
            let out = output::render_single(
                &global.output,
                &device,
                |d| detail(d, threshold),
                |d| d.id.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Add(fields) => {
            let form = form(fields);
            let record =
                Tracker::oneshot(config, |t| async move { t.add_device(form).await }).await?;
            if !global.quiet {
                eprintln!("Device '{}' saved", record.id);
            }
            Ok(())
        }

        DevicesCommand::Update {
            id,
            name,
            clear_name,
            latitude,
            longitude,
            battery,
        } => {
            let id = util::parse_device_id(&id)?;
            let update = UpdateDeviceRequest {
                name,
                latitude,
                longitude,
                battery_percent: battery,
                clear_name,
            };
            update.validate()?;

            let record = Tracker::oneshot(config, |t| async move {
                t.update_device(id, update).await
            })
            .await?;
            let out = output::render_single(
                &global.output,
                &record,
                |d| detail(d, threshold),
                |d| d.id.to_string(),
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        DevicesCommand::Remove { id } => {
            let id = util::parse_device_id(&id)?;
            if !util::confirm(&format!("Remove device {id}?"), global.yes, "devices remove")? {
                return Ok(());
            }
            let removed = id.clone();
            Tracker::oneshot(config, |t| async move { t.remove_device(removed).await }).await?;
            if !global.quiet {
                eprintln!("Device '{id}' removed");
            }
            Ok(())
        }
    }
}
