use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::command::Command;
use crate::event::Event;
use crate::rate::{PulseWindow, RateEma};
use crate::state::{MonitorState, StateSnapshot, Trigger};
use crate::timeout::JamTimeout;

/// Tuning parameters for the monitor. Durations are plain seconds to
/// mirror the configuration surface.
#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub jam_timeout_s: f64,
    pub jam_timeout_adaptive: bool,
    pub jam_timeout_min_s: f64,
    pub jam_timeout_max_s: f64,
    pub jam_timeout_k: f64,
    pub jam_timeout_pps_floor: f64,
    pub jam_timeout_ema_halflife_s: f64,
    /// Pulses that must arrive after an `arm` before jam evaluation starts.
    pub arm_grace_pulses: u64,
    /// Seconds after an `arm` during which jam evaluation is skipped.
    pub arm_grace_s: f64,
    pub pause_gcode: String,
    pub runout_debounce_s: f64,
    pub button_debounce_s: f64,
    pub button_long_press_s: f64,
    /// Heartbeat interval; 0 disables the heartbeat.
    pub breadcrumb_interval_s: f64,
    pub pulse_window_s: f64,
    /// Seconds-since-last-pulse thresholds for `stall` breadcrumbs.
    pub stall_thresholds_s: Vec<f64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            jam_timeout_s: 8.0,
            jam_timeout_adaptive: false,
            jam_timeout_min_s: 6.0,
            jam_timeout_max_s: 18.0,
            jam_timeout_k: 16.0,
            jam_timeout_pps_floor: 0.3,
            jam_timeout_ema_halflife_s: 3.0,
            arm_grace_pulses: 0,
            arm_grace_s: 0.0,
            pause_gcode: "M600".to_string(),
            runout_debounce_s: 0.05,
            button_debounce_s: 0.25,
            button_long_press_s: 1.5,
            breadcrumb_interval_s: 2.0,
            pulse_window_s: 2.0,
            stall_thresholds_s: vec![3.0, 6.0],
        }
    }
}

/// Push notification queued by a latch transition. At most one is pending
/// at a time; the embedder takes it after releasing the state lock.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub priority: i32,
}

/// The fault-detection state machine.
///
/// Owns [`MonitorState`] together with the derived pulse window and EMA.
/// All mutations come through a small set of methods that take an explicit
/// monotonic `now`, which keeps the whole machine deterministic under
/// test. Outputs are buffered: structured events, pause G-code lines and
/// the notification are drained by the embedder so that no I/O ever
/// happens while the daemon holds the state lock.
pub struct Monitor {
    cfg: MonitorConfig,
    timeout: JamTimeout,
    state: MonitorState,
    window: PulseWindow,
    ema: RateEma,
    stall_thresholds: Vec<f64>,
    stall_next_idx: usize,
    next_hb: Option<Duration>,
    last_runout_edge: Option<Duration>,
    button_last_edge: Option<Duration>,
    button_press_start: Option<Duration>,
    stopped: bool,
    events: Vec<Event>,
    gcode: Vec<String>,
    notification: Option<Notification>,
}

impl Monitor {
    pub fn new(cfg: MonitorConfig) -> Monitor {
        let timeout = JamTimeout {
            adaptive: cfg.jam_timeout_adaptive,
            fixed_s: cfg.jam_timeout_s,
            min_s: cfg.jam_timeout_min_s,
            max_s: cfg.jam_timeout_max_s,
            k: cfg.jam_timeout_k,
            pps_floor: cfg.jam_timeout_pps_floor,
        };
        let mut stall_thresholds = cfg.stall_thresholds_s.clone();
        stall_thresholds.sort_by(f64::total_cmp);
        stall_thresholds.dedup();
        let window = PulseWindow::new(cfg.pulse_window_s);
        let ema = RateEma::new(cfg.jam_timeout_ema_halflife_s);

        Monitor {
            cfg,
            timeout,
            state: MonitorState::default(),
            window,
            ema,
            stall_thresholds,
            stall_next_idx: 0,
            next_hb: None,
            last_runout_edge: None,
            button_last_edge: None,
            button_press_start: None,
            stopped: false,
            events: Vec::new(),
            gcode: Vec::new(),
            notification: None,
        }
    }

    pub fn state(&self) -> &MonitorState {
        &self.state
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    /// Record which serial device the daemon opened, for `status` output.
    pub fn note_serial(&mut self, port: &str, baud: u32) {
        self.state.serial_connected = true;
        self.state.serial_port = port.to_string();
        self.state.baud = baud;
    }

    /// Begin teardown: every edge entry point becomes a no-op so late
    /// hardware callbacks cannot mutate state during shutdown.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Handle one stripped serial line, applying the embedded control
    /// marker if present. Returns whether a marker was recognized.
    pub fn handle_line(&mut self, line: &str, now: Duration) -> bool {
        match Command::from_marker_line(line) {
            Some(cmd) => {
                self.apply(cmd, now);
                true
            }
            None => false,
        }
    }

    /// Apply a control command.
    ///
    /// `reset` always wins. While latched, everything except `disable`,
    /// `reset` and `rearm` is ignored.
    pub fn apply(&mut self, cmd: Command, now: Duration) {
        if cmd == Command::Reset {
            self.state.enabled = false;
            self.state.armed = false;
            self.state.latched = false;
            self.state.runout_asserted = false;
            self.state.motion_pulses_since_reset = 0;
            self.state.motion_pulses_since_arm = 0;
            self.state.arm_ts = None;
            self.state.last_pulse_ts = Some(now);
            self.reset_pulse_tracking();
            self.emit(Event::Reset);
            return;
        }

        if self.state.latched && !matches!(cmd, Command::Disable | Command::Rearm) {
            return;
        }

        match cmd {
            // Handled above.
            Command::Reset => {}
            Command::Disable => {
                self.state.enabled = false;
                self.state.armed = false;
                self.emit(Event::Disabled);
            }
            Command::Unarm => {
                // Idempotent; counters are preserved.
                self.state.enabled = true;
                self.state.armed = false;
                self.stall_next_idx = 0;
                self.emit(Event::Unarmed);
            }
            Command::Arm => {
                // Arm implies enabled. The timeout reference restarts at
                // the arm instant so arming never reads as an instant jam.
                self.state.enabled = true;
                self.state.armed = true;
                self.state.motion_pulses_since_arm = 0;
                self.state.arm_ts = Some(now);
                self.state.last_pulse_ts = Some(now);
                self.stall_next_idx = 0;
                self.emit(Event::Armed);
            }
            Command::Enable => {
                // Enable never arms and never resets counters.
                if self.state.enabled && !self.state.armed {
                    self.emit(Event::Enabled);
                    return;
                }
                self.state.enabled = true;
                self.state.armed = false;
                self.state.last_pulse_ts = Some(now);
                self.stall_next_idx = 0;
                self.emit(Event::Enabled);
            }
            Command::Rearm => {
                // Operator action after clearing a jam: drop the latch and
                // arm again with fresh counters and a fresh timeout base.
                self.state.latched = false;
                self.state.runout_asserted = false;
                self.state.motion_pulses_since_reset = 0;
                self.state.motion_pulses_since_arm = 0;
                self.state.arm_ts = Some(now);
                self.state.last_pulse_ts = Some(now);
                self.reset_pulse_tracking();
                self.state.enabled = true;
                self.state.armed = true;
                self.emit(Event::Rearmed);
            }
        }
    }

    /// Motion edge: one quantum of filament advance.
    pub fn on_motion_pulse(&mut self, now: Duration) {
        if self.stopped {
            return;
        }
        self.window.push(now);
        let pps = self.window.pps(now);
        self.ema.update(now, pps);

        self.state.motion_pulses_total += 1;
        self.state.motion_pulses_since_reset += 1;

        if self.state.armed {
            if self.state.motion_pulses_since_arm == 0 {
                if let Some(arm_ts) = self.state.arm_ts {
                    self.emit(Event::FirstPulseAfterArm {
                        dt: now.as_secs_f64() - arm_ts.as_secs_f64(),
                    });
                }
            }
            self.state.motion_pulses_since_arm += 1;
        }

        self.state.last_pulse_ts = Some(now);
        // A new pulse restarts the stall breadcrumb progression.
        self.stall_next_idx = 0;
    }

    /// Runout edge, already polarity-mapped (`asserted` = no filament).
    /// An edge is accepted only if `runout_debounce_s` has elapsed since
    /// the last accepted edge.
    pub fn on_runout_edge(&mut self, asserted: bool, now: Duration) {
        if self.stopped {
            return;
        }
        if let Some(last) = self.last_runout_edge {
            if now.as_secs_f64() - last.as_secs_f64() < self.cfg.runout_debounce_s {
                return;
            }
        }
        self.last_runout_edge = Some(now);

        // The debounced reading is always tracked; it only logs and acts
        // while armed.
        self.state.runout_asserted = asserted;
        if !self.state.armed {
            return;
        }
        if asserted {
            self.emit(Event::RunoutAsserted);
            if self.state.enabled && !self.state.latched {
                self.trigger_pause(Trigger::Runout, now);
            }
        } else {
            self.emit(Event::RunoutCleared);
        }
    }

    /// Button press edge. Debounced; the action is chosen on release.
    pub fn on_button_press(&mut self, now: Duration) {
        if self.stopped {
            return;
        }
        if let Some(last) = self.button_last_edge {
            if now.as_secs_f64() - last.as_secs_f64() < self.cfg.button_debounce_s {
                return;
            }
        }
        self.button_last_edge = Some(now);
        self.button_press_start = Some(now);
    }

    /// Button release edge. A hold of at least `button_long_press_s`
    /// rearms; anything shorter resets.
    pub fn on_button_release(&mut self, now: Duration) {
        if self.stopped {
            return;
        }
        let Some(start) = self.button_press_start.take() else {
            return;
        };
        let held = now.as_secs_f64() - start.as_secs_f64();
        if held >= self.cfg.button_long_press_s {
            self.apply(Command::Rearm, now);
        } else {
            self.apply(Command::Reset, now);
        }
    }

    /// Periodic evaluation, called from the main loop at a sub-250 ms
    /// cadence: jam check first, then heartbeat/stall breadcrumbs.
    pub fn tick(&mut self, now: Duration) {
        self.maybe_jam(now);
        self.maybe_breadcrumbs(now);
    }

    /// Current effective jam timeout in seconds. Updates the EMA from the
    /// instantaneous rate as a side effect.
    pub fn effective_jam_timeout_s(&mut self, now: Duration) -> f64 {
        let pps = self.window.pps(now);
        let ema = self.ema.update(now, pps);
        self.timeout.effective_s(ema)
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn drain_gcode(&mut self) -> Vec<String> {
        std::mem::take(&mut self.gcode)
    }

    pub fn take_notification(&mut self) -> Option<Notification> {
        self.notification.take()
    }

    fn maybe_jam(&mut self, now: Duration) {
        if !self.state.enabled || !self.state.armed || self.state.latched {
            return;
        }
        if self.cfg.arm_grace_pulses > 0
            && self.state.motion_pulses_since_arm < self.cfg.arm_grace_pulses
        {
            return;
        }
        if self.cfg.arm_grace_s > 0.0 {
            if let Some(arm_ts) = self.state.arm_ts {
                if now.as_secs_f64() - arm_ts.as_secs_f64() < self.cfg.arm_grace_s {
                    return;
                }
            }
        }
        let timeout_s = self.effective_jam_timeout_s(now);
        let Some(last_pulse) = self.state.last_pulse_ts else {
            return;
        };
        if now.as_secs_f64() - last_pulse.as_secs_f64() >= timeout_s {
            self.trigger_pause(Trigger::Jam, now);
        }
    }

    fn maybe_breadcrumbs(&mut self, now: Duration) {
        if self.cfg.breadcrumb_interval_s > 0.0 && self.state.enabled {
            match self.next_hb {
                None => {
                    self.next_hb = Some(now + secs(self.cfg.breadcrumb_interval_s));
                }
                Some(due) if now >= due => {
                    let dt = self
                        .state
                        .last_pulse_ts
                        .map(|t| now.as_secs_f64() - t.as_secs_f64());
                    let pps = self.window.pps(now);
                    self.emit(Event::Heartbeat {
                        enabled: self.state.enabled,
                        armed: self.state.armed,
                        latched: self.state.latched,
                        runout: self.state.runout_asserted,
                        dt_since_pulse: dt,
                        pps,
                        pulses_reset: self.state.motion_pulses_since_reset,
                        pulses_arm: self.state.motion_pulses_since_arm,
                    });
                    self.next_hb = Some(now + secs(self.cfg.breadcrumb_interval_s));
                }
                Some(_) => {}
            }
        }

        // Stall breadcrumbs only while detection is live.
        if !(self.state.enabled && self.state.armed) || self.state.latched {
            return;
        }
        let Some(last_pulse) = self.state.last_pulse_ts else {
            return;
        };
        let dt = now.as_secs_f64() - last_pulse.as_secs_f64();
        while self.stall_next_idx < self.stall_thresholds.len()
            && dt >= self.stall_thresholds[self.stall_next_idx]
        {
            let threshold_s = self.stall_thresholds[self.stall_next_idx];
            let pps = self.window.pps(now);
            self.emit(Event::Stall {
                dt_since_pulse: dt,
                threshold_s,
                pps,
                pulses_arm: self.state.motion_pulses_since_arm,
            });
            self.stall_next_idx += 1;
        }
    }

    /// Latch and queue the pause pair. Exactly one pair per latch
    /// transition: re-entry while latched is a no-op, which also keeps the
    /// notifier at one dispatch per latch.
    fn trigger_pause(&mut self, reason: Trigger, now: Duration) {
        if self.state.latched {
            return;
        }
        self.state.latched = true;
        let wall = wall_now();
        self.state.pause_sent_ts = wall;
        self.state.last_trigger = Some(reason);
        self.state.last_trigger_ts = wall;

        let dt = self
            .state
            .last_pulse_ts
            .map(|t| now.as_secs_f64() - t.as_secs_f64());
        let pps = self.window.pps(now);
        self.emit(Event::PauseTriggered {
            reason,
            dt_since_pulse: dt,
            pps,
            pulses_reset: self.state.motion_pulses_since_reset,
            pulses_arm: self.state.motion_pulses_since_arm,
        });

        // Drain the planner first so the pause lands at a clean instant.
        self.gcode.push("M400".to_string());
        self.gcode.push(self.cfg.pause_gcode.clone());

        let message = match reason {
            Trigger::Jam => format!(
                "Filament jam detected - print paused ({})",
                self.cfg.pause_gcode
            ),
            Trigger::Runout => "Filament runout detected - print paused".to_string(),
        };
        self.notification = Some(Notification {
            title: "Filament Monitor".to_string(),
            message,
            priority: 1,
        });
    }

    fn reset_pulse_tracking(&mut self) {
        self.window.clear();
        self.ema.reset();
        self.stall_next_idx = 0;
        self.next_hb = None;
    }

    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

fn wall_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
