mod config;
mod daemon;
mod doctor;
mod gpio;
mod logger;
mod notify;
mod serial;
mod socket;

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use crate::config::{FileConfig, Settings};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE_EXAMPLES: &str = "\
Usage examples:
  # Run normally (printer connected over USB)
  filmon -p /dev/ttyACM0

  # Motion + runout inputs (BCM numbering)
  filmon -p /dev/ttyACM0 --motion-gpio 26 --runout-gpio 27 --runout-enabled --runout-active-high

  # Conservative jam tuning (marker-driven arming)
  filmon -p /dev/ttyACM0 --jam-timeout 8 --stall-thresholds 3,6 --verbose --json

  # Safe dry-run (does not send pause commands)
  filmon --self-test -p /dev/ttyACM0

  # Host/printer diagnostic
  filmon --doctor -p /dev/ttyACM0
";

/// Filament motion and runout monitor for Marlin-compatible printers.
///
/// Watches a filament-motion pulse input (and optionally a runout switch)
/// while a print runs, driven by `filmon:*` control markers embedded in
/// the printer's serial output. On a fault it drains the planner with
/// `M400` and sends the configured pause G-code.
#[derive(Debug, Parser)]
#[command(name = "filmon", version, after_help = USAGE_EXAMPLES)]
pub struct Args {
    /// Serial device for the printer connection (e.g., /dev/ttyACM0).
    #[arg(short, long)]
    pub port: Option<String>,

    /// Serial baud rate for the printer connection.
    #[arg(long)]
    pub baud: Option<u32>,

    /// BCM GPIO pin number for the filament motion pulse input.
    #[arg(long)]
    pub motion_gpio: Option<u8>,

    /// BCM GPIO pin number for the optional runout input.
    #[arg(long)]
    pub runout_gpio: Option<u8>,

    /// Enable runout monitoring (default: disabled).
    #[arg(long)]
    pub runout_enabled: bool,

    /// Debounce time (seconds) applied to the runout input to ignore
    /// short glitches.
    #[arg(long)]
    pub runout_debounce: Option<f64>,

    /// Treat the runout signal as active-high.
    #[arg(long)]
    pub runout_active_high: bool,

    /// Optional BCM GPIO pin for a physical rearm button (e.g., 25).
    #[arg(long)]
    pub rearm_button_gpio: Option<u8>,

    /// Debounce time for rearm button presses in seconds.
    #[arg(long)]
    pub rearm_button_debounce: Option<f64>,

    /// Long-press threshold in seconds. Short press resets; long press
    /// rearms.
    #[arg(long)]
    pub rearm_button_long_press: Option<f64>,

    /// Verbose logging (includes serial chatter).
    #[arg(long)]
    pub verbose: bool,

    /// Emit JSON log events.
    #[arg(long)]
    pub json: bool,

    /// Disable the startup banner.
    #[arg(long)]
    pub no_banner: bool,

    /// Run host/printer diagnostics (GPIO + serial checks) and exit.
    #[arg(long)]
    pub doctor: bool,

    /// Dry-run mode: exercise inputs and the echo path but send no pause
    /// commands.
    #[arg(long)]
    pub self_test: bool,

    /// G-code to send when a jam/runout is detected.
    #[arg(long)]
    pub pause_gcode: Option<String>,

    /// Seconds without motion pulses (after arming) before declaring a
    /// jam.
    #[arg(long)]
    pub jam_timeout: Option<f64>,

    /// (Legacy/unused) Jam detection is marker-driven via filmon:arm.
    #[arg(long)]
    pub arm_min_pulses: Option<u64>,

    /// Scale the jam timeout with the observed pulse rate.
    #[arg(long)]
    pub jam_timeout_adaptive: bool,

    /// Lower clamp for the adaptive jam timeout, in seconds.
    #[arg(long)]
    pub jam_timeout_min: Option<f64>,

    /// Upper clamp for the adaptive jam timeout, in seconds.
    #[arg(long)]
    pub jam_timeout_max: Option<f64>,

    /// Adaptive timeout constant K (seconds times pulses-per-second).
    #[arg(long)]
    pub jam_timeout_k: Option<f64>,

    /// Rate floor used when the pulse window is empty.
    #[arg(long)]
    pub jam_timeout_pps_floor: Option<f64>,

    /// Half-life (seconds) of the smoothed pulse rate; 0 disables
    /// smoothing.
    #[arg(long)]
    pub jam_timeout_ema_halflife: Option<f64>,

    /// Pulses required after arming before jam evaluation starts.
    #[arg(long)]
    pub arm_grace_pulses: Option<u64>,

    /// Seconds after arming during which jam evaluation is skipped.
    #[arg(long)]
    pub arm_grace_s: Option<f64>,

    /// Emit a low-volume heartbeat log every N seconds while enabled.
    /// Set 0 to disable.
    #[arg(long)]
    pub breadcrumb_interval: Option<f64>,

    /// Window (seconds) used to compute pulses-per-second (pps).
    #[arg(long)]
    pub pulse_window: Option<f64>,

    /// Comma-separated seconds-since-last-pulse thresholds for 'stall'
    /// breadcrumbs while armed.
    #[arg(long)]
    pub stall_thresholds: Option<String>,

    /// Path to a local UNIX control socket. Use to rearm without sharing
    /// the printer serial port.
    #[arg(long)]
    pub control_socket: Option<String>,

    /// Disable the local control socket.
    #[arg(long, conflicts_with = "control_socket")]
    pub no_control_socket: bool,

    /// Path to a TOML config file. CLI args override config values.
    #[arg(long)]
    pub config: Option<String>,

    /// Print the resolved configuration and exit.
    #[arg(long)]
    pub print_config: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<u8> {
    let file = match &args.config {
        Some(path) => FileConfig::load(Path::new(path))?,
        None => FileConfig::default(),
    };
    let (settings, ignored) = Settings::resolve(&args, &file);
    if !ignored.is_empty() {
        println!(
            "WARNING: runout monitoring is disabled; ignoring: {}",
            ignored.join(", ")
        );
    }

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&settings.resolved_json())?);
        return Ok(0);
    }

    settings.validate()?;
    daemon::install_signal_handlers();

    if args.doctor {
        doctor::run_doctor(&settings)?;
        return Ok(0);
    }
    if args.self_test {
        doctor::run_self_test(&settings)?;
        return Ok(0);
    }

    daemon::run(&settings).map(|code| code as u8)
}
