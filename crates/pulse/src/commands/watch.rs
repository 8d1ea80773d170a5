//! Live view: follow the registry and report on the selected bracelet.
//!
//! Reads commands from stdin while watching: an empty line or `n` selects
//! the next bracelet, `q` quits, anything else selects that id.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, Interval};
use tracing::{debug, warn};

use pulse_core::{LowBatteryAlert, RegistryView, Tracker, TrackerConfig, display};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Status printer ──────────────────────────────────────────────────

/// Prints a line whenever what the operator would see changes.
struct StatusPrinter {
    json: bool,
    color: bool,
    quiet: bool,
    threshold: u8,
    last_line: Option<String>,
    stale: bool,
}

impl StatusPrinter {
    fn show(&mut self, view: &RegistryView) {
        if !view.synced {
            return;
        }

        match (&view.error, self.stale) {
            (Some(reason), false) => {
                self.stale = true;
                eprintln!(
                    "{}",
                    output::warning(
                        &format!("Offline, showing last known positions: {reason}"),
                        self.color
                    )
                );
            }
            (None, true) => {
                self.stale = false;
                eprintln!("Back online");
            }
            _ => {}
        }

        let line = self.render(view);
        if self.last_line.as_deref() != Some(line.as_str()) {
            if !self.quiet {
                println!("{line}");
            }
            self.last_line = Some(line);
        }
    }

    fn render(&self, view: &RegistryView) -> String {
        let Some(device) = view.selected_record() else {
            return if self.json {
                "null".into()
            } else {
                "No devices registered".into()
            };
        };

        if self.json {
            return output::render_json_compact(device);
        }

        let position = view
            .devices
            .iter()
            .position(|d| d.id == device.id)
            .map_or(0, |i| i + 1);
        let battery = output::battery_text(
            &display::battery(device.battery_percent),
            device.is_low_battery(self.threshold),
            self.color,
        );
        let updated = display::updated_at(device.updated_at_ms);

        let coords = display::position(device);
        let coords = if view.is_stale() {
            output::muted(&coords, self.color)
        } else {
            coords
        };

        format!(
            "[{position}/{total}] {name} ({id})  {coords}  battery {battery}  updated {updated}",
            total = view.devices.len(),
            name = device.display_name(),
            id = device.id,
        )
    }

    fn alert(&self, alert: &LowBatteryAlert) {
        eprintln!(
            "{}",
            output::warning(
                &format!(
                    "Low battery: {} at {}% (alert below {}%)",
                    alert.name, alert.battery_percent, alert.threshold
                ),
                self.color
            )
        );
    }
}

async fn select(tracker: &Tracker, raw: &str) -> Result<(), CliError> {
    tracker.select_by_id(&util::parse_device_id(raw)?).await?;
    Ok(())
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn connecting_spinner(quiet: bool) -> Option<ProgressBar> {
    if quiet || !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner());
    pb.set_message("Connecting...");
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(
    mut config: TrackerConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if let Some(threshold) = args.threshold {
        config.low_battery_threshold = threshold;
    }
    config.live_updates = true;

    let mut printer = StatusPrinter {
        json: matches!(global.output, OutputFormat::Json | OutputFormat::JsonCompact),
        color: output::should_color(&global.color),
        quiet: global.quiet,
        threshold: config.low_battery_threshold,
        last_line: None,
        stale: false,
    };

    let tracker = Tracker::new(config)?;
    // Subscribe before connecting so the first snapshot's alert is not missed.
    let mut alerts = tracker.alerts();

    let spinner = connecting_spinner(global.quiet);
    let connected = tracker.connect().await;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    connected?;

    let selected = match args.select {
        Some(ref id) => select(&tracker, id).await,
        None => Ok(()),
    };
    if let Err(e) = selected {
        tracker.disconnect().await;
        return Err(e);
    }

    let mut views = tracker.subscribe_view();
    let mut rotate = args.rotate.filter(|secs| *secs > 0).map(|secs| {
        let period = Duration::from_secs(secs);
        tokio::time::interval_at(Instant::now() + period, period)
    });
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    printer.show(&tracker.view());

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            changed = views.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let view = views.borrow_and_update().clone();
                printer.show(&view);
            }
            alert = alerts.recv() => match alert {
                Ok(alert) => printer.alert(&alert),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "low-battery alerts dropped"),
                Err(RecvError::Closed) => break Ok(()),
            },
            () = tick(&mut rotate) => {
                tracker.select_next().await;
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "" | "n" | "next" => {
                        tracker.select_next().await;
                    }
                    "q" | "quit" => break Ok(()),
                    other => {
                        if let Err(e) = select(&tracker, other).await {
                            eprintln!("{e}");
                        }
                    }
                },
                Ok(None) => {
                    debug!("stdin closed, rotation by keyboard disabled");
                    stdin_open = false;
                }
                Err(e) => break Err(CliError::Io(e)),
            },
        }
    };

    tracker.disconnect().await;
    result
}
