use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::{Value, json};

use filmon_core::MonitorConfig;

use crate::Args;

pub const DEFAULT_CONTROL_SOCKET: &str = "/run/filmon/filmon.sock";

/// On-disk TOML configuration. Every key is optional; unset CLI flags are
/// backfilled from here, and anything unset in both falls to the built-in
/// defaults. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub serial: SerialSection,
    pub gpio: GpioSection,
    pub detection: DetectionSection,
    pub logging: LoggingSection,
    pub control: ControlSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SerialSection {
    pub port: Option<String>,
    pub baud: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GpioSection {
    pub motion_gpio: Option<u8>,
    pub runout_gpio: Option<u8>,
    pub runout_enabled: Option<bool>,
    pub runout_active_high: Option<bool>,
    pub runout_debounce: Option<f64>,
    pub rearm_button_gpio: Option<u8>,
    pub rearm_button_active_high: Option<bool>,
    pub rearm_button_debounce: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DetectionSection {
    /// Legacy key; accepted but no longer used (arming is marker-driven).
    pub arm_min_pulses: Option<u64>,
    pub jam_timeout: Option<f64>,
    pub pause_gcode: Option<String>,
    pub jam_timeout_adaptive: Option<bool>,
    pub jam_timeout_min: Option<f64>,
    pub jam_timeout_max: Option<f64>,
    pub jam_timeout_k: Option<f64>,
    pub jam_timeout_pps_floor: Option<f64>,
    pub jam_timeout_ema_halflife: Option<f64>,
    pub arm_grace_pulses: Option<u64>,
    pub arm_grace_s: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub verbose: Option<bool>,
    pub no_banner: Option<bool>,
    pub json: Option<bool>,
    pub breadcrumb_interval: Option<f64>,
    pub pulse_window: Option<f64>,
    pub stall_thresholds: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ControlSection {
    pub socket: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<FileConfig> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Fully-resolved runtime configuration: defaults, overlaid by the config
/// file, overlaid by CLI flags.
#[derive(Clone, Debug)]
pub struct Settings {
    pub port: Option<String>,
    pub baud: u32,

    pub motion_gpio: u8,
    pub runout_enabled: bool,
    pub runout_gpio: Option<u8>,
    pub runout_active_high: bool,
    pub runout_debounce_s: f64,
    pub rearm_button_gpio: Option<u8>,
    pub rearm_button_active_high: bool,
    pub rearm_button_debounce_s: f64,
    pub rearm_button_long_press_s: f64,

    pub arm_min_pulses: u64,
    pub jam_timeout_s: f64,
    pub pause_gcode: String,
    pub jam_timeout_adaptive: bool,
    pub jam_timeout_min_s: f64,
    pub jam_timeout_max_s: f64,
    pub jam_timeout_k: f64,
    pub jam_timeout_pps_floor: f64,
    pub jam_timeout_ema_halflife_s: f64,
    pub arm_grace_pulses: u64,
    pub arm_grace_s: f64,

    pub verbose: bool,
    pub json: bool,
    pub no_banner: bool,
    pub breadcrumb_interval_s: f64,
    pub pulse_window_s: f64,
    pub stall_thresholds: Vec<f64>,

    pub control_socket: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            port: None,
            baud: 115200,
            motion_gpio: 26,
            runout_enabled: false,
            runout_gpio: Some(27),
            runout_active_high: false,
            runout_debounce_s: 0.05,
            rearm_button_gpio: None,
            rearm_button_active_high: true,
            rearm_button_debounce_s: 0.25,
            rearm_button_long_press_s: 1.5,
            arm_min_pulses: 12,
            jam_timeout_s: 8.0,
            pause_gcode: "M600".to_string(),
            jam_timeout_adaptive: false,
            jam_timeout_min_s: 6.0,
            jam_timeout_max_s: 18.0,
            jam_timeout_k: 16.0,
            jam_timeout_pps_floor: 0.3,
            jam_timeout_ema_halflife_s: 3.0,
            arm_grace_pulses: 0,
            arm_grace_s: 0.0,
            verbose: false,
            json: false,
            no_banner: false,
            breadcrumb_interval_s: 2.0,
            pulse_window_s: 2.0,
            stall_thresholds: vec![3.0, 6.0],
            control_socket: Some(PathBuf::from(DEFAULT_CONTROL_SOCKET)),
        }
    }
}

impl Settings {
    /// Merge CLI flags over the config file over the defaults, and apply
    /// the runout guardrails. Returns the settings plus the list of runout
    /// flags that were ignored because runout monitoring is disabled.
    pub fn resolve(args: &Args, file: &FileConfig) -> (Settings, Vec<&'static str>) {
        let defaults = Settings::default();
        let mut s = Settings {
            port: args.port.clone().or_else(|| file.serial.port.clone()),
            baud: args.baud.or(file.serial.baud).unwrap_or(defaults.baud),
            motion_gpio: args
                .motion_gpio
                .or(file.gpio.motion_gpio)
                .unwrap_or(defaults.motion_gpio),
            runout_enabled: args.runout_enabled
                || file.gpio.runout_enabled.unwrap_or(defaults.runout_enabled),
            runout_gpio: args.runout_gpio.or(file.gpio.runout_gpio).or(defaults.runout_gpio),
            runout_active_high: args.runout_active_high
                || file
                    .gpio
                    .runout_active_high
                    .unwrap_or(defaults.runout_active_high),
            runout_debounce_s: args
                .runout_debounce
                .or(file.gpio.runout_debounce)
                .unwrap_or(defaults.runout_debounce_s),
            rearm_button_gpio: args.rearm_button_gpio.or(file.gpio.rearm_button_gpio),
            rearm_button_active_high: file
                .gpio
                .rearm_button_active_high
                .unwrap_or(defaults.rearm_button_active_high),
            rearm_button_debounce_s: args
                .rearm_button_debounce
                .or(file.gpio.rearm_button_debounce)
                .unwrap_or(defaults.rearm_button_debounce_s),
            rearm_button_long_press_s: args
                .rearm_button_long_press
                .unwrap_or(defaults.rearm_button_long_press_s),
            arm_min_pulses: args
                .arm_min_pulses
                .or(file.detection.arm_min_pulses)
                .unwrap_or(defaults.arm_min_pulses),
            jam_timeout_s: args
                .jam_timeout
                .or(file.detection.jam_timeout)
                .unwrap_or(defaults.jam_timeout_s),
            pause_gcode: args
                .pause_gcode
                .clone()
                .or_else(|| file.detection.pause_gcode.clone())
                .unwrap_or_else(|| defaults.pause_gcode.clone()),
            jam_timeout_adaptive: args.jam_timeout_adaptive
                || file
                    .detection
                    .jam_timeout_adaptive
                    .unwrap_or(defaults.jam_timeout_adaptive),
            jam_timeout_min_s: args
                .jam_timeout_min
                .or(file.detection.jam_timeout_min)
                .unwrap_or(defaults.jam_timeout_min_s),
            jam_timeout_max_s: args
                .jam_timeout_max
                .or(file.detection.jam_timeout_max)
                .unwrap_or(defaults.jam_timeout_max_s),
            jam_timeout_k: args
                .jam_timeout_k
                .or(file.detection.jam_timeout_k)
                .unwrap_or(defaults.jam_timeout_k),
            jam_timeout_pps_floor: args
                .jam_timeout_pps_floor
                .or(file.detection.jam_timeout_pps_floor)
                .unwrap_or(defaults.jam_timeout_pps_floor),
            jam_timeout_ema_halflife_s: args
                .jam_timeout_ema_halflife
                .or(file.detection.jam_timeout_ema_halflife)
                .unwrap_or(defaults.jam_timeout_ema_halflife_s),
            arm_grace_pulses: args
                .arm_grace_pulses
                .or(file.detection.arm_grace_pulses)
                .unwrap_or(defaults.arm_grace_pulses),
            arm_grace_s: args
                .arm_grace_s
                .or(file.detection.arm_grace_s)
                .unwrap_or(defaults.arm_grace_s),
            verbose: args.verbose || file.logging.verbose.unwrap_or(defaults.verbose),
            json: args.json || file.logging.json.unwrap_or(defaults.json),
            no_banner: args.no_banner || file.logging.no_banner.unwrap_or(defaults.no_banner),
            breadcrumb_interval_s: args
                .breadcrumb_interval
                .or(file.logging.breadcrumb_interval)
                .unwrap_or(defaults.breadcrumb_interval_s),
            pulse_window_s: args
                .pulse_window
                .or(file.logging.pulse_window)
                .unwrap_or(defaults.pulse_window_s),
            stall_thresholds: parse_stall_thresholds(
                args.stall_thresholds
                    .as_deref()
                    .or(file.logging.stall_thresholds.as_deref())
                    .unwrap_or("3,6"),
            ),
            control_socket: if args.no_control_socket {
                None
            } else {
                args.control_socket
                    .clone()
                    .or_else(|| file.control.socket.clone())
                    .map(PathBuf::from)
                    .or_else(|| defaults.control_socket.clone())
            },
        };

        // Runout guardrails: runout settings are no-ops unless runout
        // monitoring is switched on.
        let mut ignored = Vec::new();
        if !s.runout_enabled {
            if args.runout_gpio.is_some() {
                ignored.push("--runout-gpio");
            }
            s.runout_gpio = None;
            if args.runout_debounce.is_some() {
                ignored.push("--runout-debounce");
                s.runout_debounce_s = defaults.runout_debounce_s;
            }
            if args.runout_active_high {
                ignored.push("--runout-active-high");
                s.runout_active_high = false;
            }
        }
        ignored.sort_unstable();
        ignored.dedup();

        (s, ignored)
    }

    pub fn validate(&self) -> Result<()> {
        if self.baud == 0 {
            bail!("baud rate must be positive");
        }
        if self.jam_timeout_adaptive && self.jam_timeout_min_s > self.jam_timeout_max_s {
            bail!(
                "jam_timeout_min ({}) exceeds jam_timeout_max ({})",
                self.jam_timeout_min_s,
                self.jam_timeout_max_s
            );
        }
        Ok(())
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            jam_timeout_s: self.jam_timeout_s,
            jam_timeout_adaptive: self.jam_timeout_adaptive,
            jam_timeout_min_s: self.jam_timeout_min_s,
            jam_timeout_max_s: self.jam_timeout_max_s,
            jam_timeout_k: self.jam_timeout_k,
            jam_timeout_pps_floor: self.jam_timeout_pps_floor,
            jam_timeout_ema_halflife_s: self.jam_timeout_ema_halflife_s,
            arm_grace_pulses: self.arm_grace_pulses,
            arm_grace_s: self.arm_grace_s,
            pause_gcode: self.pause_gcode.clone(),
            runout_debounce_s: self.runout_debounce_s,
            button_debounce_s: self.rearm_button_debounce_s,
            button_long_press_s: self.rearm_button_long_press_s,
            breadcrumb_interval_s: self.breadcrumb_interval_s,
            pulse_window_s: self.pulse_window_s,
            stall_thresholds_s: self.stall_thresholds.clone(),
        }
    }

    /// Resolved configuration as JSON, mirrored section-by-section after
    /// the config file layout (for `--print-config`).
    pub fn resolved_json(&self) -> Value {
        json!({
            "serial": { "port": self.port, "baud": self.baud },
            "gpio": {
                "motion_gpio": self.motion_gpio,
                "runout_enabled": self.runout_enabled,
                "runout_gpio": self.runout_gpio,
                "runout_active_high": self.runout_active_high,
                "runout_debounce": self.runout_debounce_s,
                "rearm_button_gpio": self.rearm_button_gpio,
                "rearm_button_active_high": self.rearm_button_active_high,
                "rearm_button_debounce": self.rearm_button_debounce_s,
            },
            "detection": {
                "arm_min_pulses": self.arm_min_pulses,
                "jam_timeout": self.jam_timeout_s,
                "pause_gcode": self.pause_gcode,
                "jam_timeout_adaptive": self.jam_timeout_adaptive,
                "jam_timeout_min": self.jam_timeout_min_s,
                "jam_timeout_max": self.jam_timeout_max_s,
                "jam_timeout_k": self.jam_timeout_k,
                "jam_timeout_pps_floor": self.jam_timeout_pps_floor,
                "jam_timeout_ema_halflife": self.jam_timeout_ema_halflife_s,
                "arm_grace_pulses": self.arm_grace_pulses,
                "arm_grace_s": self.arm_grace_s,
            },
            "logging": {
                "verbose": self.verbose,
                "no_banner": self.no_banner,
                "json": self.json,
                "breadcrumb_interval": self.breadcrumb_interval_s,
                "pulse_window": self.pulse_window_s,
                "stall_thresholds": self.stall_thresholds,
            },
            "control": {
                "socket": self.control_socket.as_ref().map(|p| p.display().to_string()),
            },
        })
    }
}

/// Parse a comma-separated threshold list like `"3,6"`. Any malformed
/// entry falls the whole list back to the built-in default.
pub fn parse_stall_thresholds(raw: &str) -> Vec<f64> {
    let mut out = Vec::new();
    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.parse::<f64>() {
            Ok(v) => out.push(v),
            Err(_) => return vec![3.0, 6.0],
        }
    }
    out.sort_by(f64::total_cmp);
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(argv: &[&str]) -> Args {
        let mut full = vec!["filmon"];
        full.extend_from_slice(argv);
        Args::parse_from(full)
    }

    #[test]
    fn stall_thresholds_parse_sorted_and_deduped() {
        assert_eq!(parse_stall_thresholds("6, 3,3"), vec![3.0, 6.0]);
        assert_eq!(parse_stall_thresholds(""), Vec::<f64>::new());
        assert_eq!(parse_stall_thresholds("2,banana"), vec![3.0, 6.0]);
    }

    #[test]
    fn defaults_apply_without_config_or_flags() {
        let (s, ignored) = Settings::resolve(&args(&[]), &FileConfig::default());
        assert_eq!(s.baud, 115200);
        assert_eq!(s.motion_gpio, 26);
        assert_eq!(s.jam_timeout_s, 8.0);
        assert_eq!(s.pause_gcode, "M600");
        assert!(!s.jam_timeout_adaptive);
        assert_eq!(
            s.control_socket.as_deref(),
            Some(Path::new(DEFAULT_CONTROL_SOCKET))
        );
        assert!(ignored.is_empty());
        // runout is disabled by default, so its pin is masked off
        assert_eq!(s.runout_gpio, None);
    }

    #[test]
    fn config_file_backfills_unset_flags() {
        let file: FileConfig = toml::from_str(
            r#"
            [serial]
            port = "/dev/ttyACM1"
            baud = 250000

            [detection]
            jam_timeout = 12.5
            jam_timeout_adaptive = true

            [logging]
            json = true
            stall_thresholds = "1,4"

            [control]
            socket = "/tmp/filmon-test.sock"
            "#,
        )
        .unwrap();

        let (s, _) = Settings::resolve(&args(&[]), &file);
        assert_eq!(s.port.as_deref(), Some("/dev/ttyACM1"));
        assert_eq!(s.baud, 250000);
        assert_eq!(s.jam_timeout_s, 12.5);
        assert!(s.jam_timeout_adaptive);
        assert!(s.json);
        assert_eq!(s.stall_thresholds, vec![1.0, 4.0]);
        assert_eq!(
            s.control_socket.as_deref(),
            Some(Path::new("/tmp/filmon-test.sock"))
        );
    }

    #[test]
    fn cli_flags_override_the_config_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [serial]
            port = "/dev/ttyACM1"

            [detection]
            jam_timeout = 12.5
            "#,
        )
        .unwrap();

        let (s, _) = Settings::resolve(&args(&["-p", "/dev/ttyUSB0", "--jam-timeout", "4"]), &file);
        assert_eq!(s.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(s.jam_timeout_s, 4.0);
    }

    #[test]
    fn unknown_config_keys_are_ignored() {
        let file: Result<FileConfig, _> = toml::from_str(
            r#"
            [detection]
            jam_timeout = 9.0
            brand_new_knob = true
            "#,
        );
        assert_eq!(file.unwrap().detection.jam_timeout, Some(9.0));
    }

    #[test]
    fn runout_guardrails_mask_flags_when_disabled() {
        let (s, ignored) = Settings::resolve(
            &args(&["--runout-gpio", "27", "--runout-active-high"]),
            &FileConfig::default(),
        );
        assert_eq!(s.runout_gpio, None);
        assert!(!s.runout_active_high);
        assert_eq!(ignored, vec!["--runout-active-high", "--runout-gpio"]);

        let (s, ignored) = Settings::resolve(
            &args(&["--runout-enabled", "--runout-gpio", "17", "--runout-active-high"]),
            &FileConfig::default(),
        );
        assert!(ignored.is_empty());
        assert_eq!(s.runout_gpio, Some(17));
        assert!(s.runout_active_high);
    }

    #[test]
    fn no_control_socket_disables_the_socket() {
        let (s, _) = Settings::resolve(&args(&["--no-control-socket"]), &FileConfig::default());
        assert_eq!(s.control_socket, None);
    }

    #[test]
    fn validate_rejects_inverted_adaptive_clamps() {
        let (mut s, _) = Settings::resolve(&args(&[]), &FileConfig::default());
        s.jam_timeout_adaptive = true;
        s.jam_timeout_min_s = 20.0;
        assert!(s.validate().is_err());
    }
}
