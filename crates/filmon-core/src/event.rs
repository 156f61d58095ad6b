use crate::state::Trigger;

/// Structured observability events produced by the core.
///
/// The daemon drains these after every state mutation and renders them as
/// one-line JSON or human-readable text; the core never does I/O itself.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Enabled,
    Disabled,
    Armed,
    Unarmed,
    Reset,
    Rearmed,
    /// First motion pulse after an `arm`, with seconds since the arm.
    FirstPulseAfterArm {
        dt: f64,
    },
    /// Periodic snapshot while enabled, for offline tuning.
    Heartbeat {
        enabled: bool,
        armed: bool,
        latched: bool,
        runout: bool,
        dt_since_pulse: Option<f64>,
        pps: f64,
        pulses_reset: u64,
        pulses_arm: u64,
    },
    /// Seconds-since-last-pulse crossed one of the configured stall
    /// thresholds while armed.
    Stall {
        dt_since_pulse: f64,
        threshold_s: f64,
        pps: f64,
        pulses_arm: u64,
    },
    RunoutAsserted,
    RunoutCleared,
    PauseTriggered {
        reason: Trigger,
        dt_since_pulse: Option<f64>,
        pps: f64,
        pulses_reset: u64,
        pulses_arm: u64,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Enabled => "enabled",
            Event::Disabled => "disabled",
            Event::Armed => "armed",
            Event::Unarmed => "unarmed",
            Event::Reset => "reset",
            Event::Rearmed => "rearmed",
            Event::FirstPulseAfterArm { .. } => "first_pulse_after_arm",
            Event::Heartbeat { .. } => "hb",
            Event::Stall { .. } => "stall",
            Event::RunoutAsserted => "runout_asserted",
            Event::RunoutCleared => "runout_cleared",
            Event::PauseTriggered { .. } => "pause_triggered",
        }
    }
}
