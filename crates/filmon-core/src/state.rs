use std::time::Duration;

use serde::Serialize;

/// Reason a pause was latched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Jam,
    Runout,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Jam => "jam",
            Trigger::Runout => "runout",
        }
    }
}

/// Mutable runtime state for the monitor.
///
/// Updated by GPIO edge callbacks, the serial reader and the main loop, so
/// every access goes through the owning [`crate::Monitor`]; the daemon
/// serializes that behind a single lock. Monotonic instants are measured on
/// the daemon's [`crate::Clock`]; wall-clock fields are epoch seconds and
/// only ever shown to the operator.
#[derive(Debug, Default)]
pub struct MonitorState {
    pub enabled: bool,
    pub armed: bool,
    pub latched: bool,

    pub last_trigger: Option<Trigger>,
    /// Epoch seconds of the latch; 0.0 until the first latch.
    pub last_trigger_ts: f64,
    /// Epoch seconds when the pause pair was queued for the serial link.
    pub pause_sent_ts: f64,

    pub motion_pulses_total: u64,
    pub motion_pulses_since_reset: u64,
    pub motion_pulses_since_arm: u64,

    /// Instant of the last `arm`; `None` if never armed.
    pub arm_ts: Option<Duration>,
    /// Instant of the most recent motion pulse. Reset to the arm instant on
    /// `arm` so a fresh arming never reads as an immediate jam.
    pub last_pulse_ts: Option<Duration>,

    /// Debounced reading of the runout switch (true = no filament).
    pub runout_asserted: bool,

    pub serial_connected: bool,
    pub serial_port: String,
    pub baud: u32,
}

/// Owned copy of [`MonitorState`] for `status` responses and logging.
#[derive(Clone, Debug, Serialize)]
pub struct StateSnapshot {
    pub enabled: bool,
    pub armed: bool,
    pub latched: bool,
    /// `""` until the first latch, then `"jam"` or `"runout"`.
    pub last_trigger: &'static str,
    pub last_trigger_ts: f64,
    pub pause_sent_ts: f64,
    pub motion_pulses_total: u64,
    pub motion_pulses_since_reset: u64,
    pub motion_pulses_since_arm: u64,
    /// Monotonic seconds; 0.0 if never armed / no pulse seen.
    pub arm_ts: f64,
    pub last_pulse_ts: f64,
    pub runout_asserted: bool,
    pub serial_connected: bool,
    pub serial_port: String,
    pub baud: u32,
}

impl MonitorState {
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            enabled: self.enabled,
            armed: self.armed,
            latched: self.latched,
            last_trigger: self.last_trigger.map_or("", Trigger::as_str),
            last_trigger_ts: self.last_trigger_ts,
            pause_sent_ts: self.pause_sent_ts,
            motion_pulses_total: self.motion_pulses_total,
            motion_pulses_since_reset: self.motion_pulses_since_reset,
            motion_pulses_since_arm: self.motion_pulses_since_arm,
            arm_ts: self.arm_ts.map_or(0.0, |t| t.as_secs_f64()),
            last_pulse_ts: self.last_pulse_ts.map_or(0.0, |t| t.as_secs_f64()),
            runout_asserted: self.runout_asserted,
            serial_connected: self.serial_connected,
            serial_port: self.serial_port.clone(),
            baud: self.baud,
        }
    }
}
