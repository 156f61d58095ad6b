use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;

use filmon_core::{Clock, Command, Monitor, MonotonicClock, StateSnapshot};

use crate::VERSION;
use crate::config::Settings;
use crate::gpio::EdgeSources;
use crate::logger::JsonLogger;
use crate::notify::Notifier;
use crate::serial::{self, SerialWriter};
use crate::socket;

/// Main-loop cadence: serial lines are drained and the jam condition is
/// re-evaluated at least this often.
const TICK_INTERVAL: Duration = Duration::from_millis(200);

static STOP: AtomicBool = AtomicBool::new(false);

pub fn stop_requested() -> bool {
    STOP.load(Ordering::SeqCst)
}

pub fn request_stop() {
    STOP.store(true, Ordering::SeqCst);
}

extern "C" fn on_signal(_signum: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

pub fn install_signal_handlers() {
    let handler: extern "C" fn(libc::c_int) = on_signal;
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

/// Single owner of the shared monitor.
///
/// Every mutation goes through [`MonitorHandle::with`], which runs the
/// closure under the state lock, then performs the buffered outputs
/// (event lines, the pause pair, the notification) after the lock is
/// released. Edge callbacks, the control socket and the main loop all
/// share this handle, which is what serializes the multi-field state
/// transitions.
pub struct MonitorHandle {
    monitor: Mutex<Monitor>,
    clock: MonotonicClock,
    writer: Option<SerialWriter>,
    logger: JsonLogger,
    notifier: Notifier,
}

impl MonitorHandle {
    pub fn new(
        monitor: Monitor,
        writer: Option<SerialWriter>,
        logger: JsonLogger,
        notifier: Notifier,
    ) -> Self {
        Self {
            monitor: Mutex::new(monitor),
            clock: MonotonicClock::new(),
            writer,
            logger,
            notifier,
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Monitor, Duration) -> R) -> R {
        let now = self.clock.now();
        let (result, events, gcode, notification) = {
            let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
            let result = f(&mut monitor, now);
            (
                result,
                monitor.drain_events(),
                monitor.drain_gcode(),
                monitor.take_notification(),
            )
        };

        for event in &events {
            self.logger.emit_monitor(event);
        }
        for line in gcode {
            match self.writer.as_ref().map(|w| w.send_line(&line)) {
                Some(Ok(())) | None => self.logger.emit("gcode_sent", json!({ "gcode": line })),
                Some(Err(e)) => eprintln!("serial write failed ({line}): {e}"),
            }
        }
        if let Some(note) = notification {
            self.notifier.send(&note.title, &note.message, note.priority);
        }
        result
    }

    pub fn apply(&self, cmd: Command) {
        self.with(|m, now| m.apply(cmd, now));
    }

    pub fn handle_line(&self, line: &str) {
        self.with(|m, now| {
            m.handle_line(line, now);
        });
    }

    pub fn tick(&self) {
        self.with(|m, now| m.tick(now));
    }

    pub fn on_motion_pulse(&self) {
        self.with(|m, now| m.on_motion_pulse(now));
    }

    pub fn on_runout_edge(&self, asserted: bool) {
        self.with(|m, now| m.on_runout_edge(asserted, now));
    }

    pub fn on_button_press(&self) {
        self.with(|m, now| m.on_button_press(now));
    }

    pub fn on_button_release(&self) {
        self.with(|m, now| m.on_button_release(now));
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.with(|m, _| m.snapshot())
    }

    pub fn stop(&self) {
        self.with(|m, _| m.stop());
    }
}

/// Run the daemon until a signal arrives or the serial reader dies.
/// Returns the process exit code.
pub fn run(settings: &Settings) -> Result<i32> {
    let logger = JsonLogger::new(settings.json);
    let port_name = settings
        .port
        .as_deref()
        .context("normal mode requires -p/--port")?;

    let port = serial::open(port_name, settings.baud)
        .with_context(|| format!("opening serial port {port_name}"))?;
    let reader_port = port
        .try_clone()
        .context("cloning serial port for the reader")?;
    let writer = SerialWriter::new(port);

    let mut monitor = Monitor::new(settings.monitor_config());
    monitor.note_serial(port_name, settings.baud);
    let handle = Arc::new(MonitorHandle::new(
        monitor,
        Some(writer),
        logger.clone(),
        Notifier::from_env(),
    ));

    if !settings.no_banner {
        println!("filament-monitor {VERSION}");
        println!("For Generic Marlin-compatible printer");
        logger.emit(
            "startup",
            json!({
                "version": VERSION,
                "port": port_name,
                "baud": settings.baud,
                "motion_gpio": settings.motion_gpio,
                "runout_gpio": settings.runout_gpio,
                "runout_active_high": settings.runout_active_high,
                "arm_min_pulses": settings.arm_min_pulses,
                "jam_timeout_s": settings.jam_timeout_s,
                "jam_timeout_adaptive": settings.jam_timeout_adaptive,
                "jam_timeout_min_s": settings.jam_timeout_min_s,
                "jam_timeout_max_s": settings.jam_timeout_max_s,
                "jam_timeout_k": settings.jam_timeout_k,
                "jam_timeout_pps_floor": settings.jam_timeout_pps_floor,
                "jam_timeout_ema_halflife_s": settings.jam_timeout_ema_halflife_s,
                "arm_grace_pulses": settings.arm_grace_pulses,
                "arm_grace_s": settings.arm_grace_s,
                "pause_gcode": settings.pause_gcode,
                "verbose": settings.verbose,
                "control_socket": settings.control_socket.as_ref().map(|p| p.display().to_string()),
            }),
        );
    }

    // GPIO edges are the one piece of I/O the daemon cannot run without.
    let _edges = match EdgeSources::attach(settings, handle.clone()) {
        Ok(edges) => edges,
        Err(e) => {
            eprintln!("ERROR: GPIO support unavailable: {e}");
            return Ok(2);
        }
    };

    let stop_flag = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    let reader = serial::spawn_reader(reader_port, tx, stop_flag.clone(), logger.clone());

    let socket_thread = settings
        .control_socket
        .clone()
        .map(|path| socket::spawn(path, handle.clone(), logger.clone()));

    let mut exit_code = 0;
    while !stop_requested() {
        // Drain every queued serial line before evaluating the jam
        // condition, so a marker that raced a pulse is applied first.
        match rx.recv_timeout(TICK_INTERVAL) {
            Ok(line) => {
                handle_serial_line(&handle, &logger, settings.verbose, &line);
                while let Ok(line) = rx.try_recv() {
                    handle_serial_line(&handle, &logger, settings.verbose, &line);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {}
        }

        if reader.is_finished() && !stop_requested() {
            logger.emit("serial_thread_dead", json!({}));
            exit_code = 3;
            break;
        }

        handle.tick();
    }

    request_stop();
    handle.stop();
    stop_flag.store(true, Ordering::SeqCst);
    let _ = reader.join();
    if let Some(t) = socket_thread {
        let _ = t.join();
    }

    Ok(exit_code)
}

fn handle_serial_line(handle: &MonitorHandle, logger: &JsonLogger, verbose: bool, line: &str) {
    if verbose {
        logger.emit("serial", json!({ "line": line }));
    }
    handle.handle_line(line);
}
