use std::io::{BufReader, ErrorKind, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rppal::gpio::{Gpio, InputPin, Trigger};

use crate::config::Settings;
use crate::daemon;
use crate::serial;

const POLL: Duration = Duration::from_millis(10);

/// Interactive host/printer diagnostic: counts motion pulses, shows the
/// runout reading and optionally exercises the rearm button. Read-only;
/// never sends pause commands or changes monitor state.
pub fn run_doctor(settings: &Settings) -> Result<()> {
    println!("Doctor Mode (safe):");
    println!("  - No {} is sent.", settings.pause_gcode);
    println!("  - Move filament to generate motion pulses.");
    println!("  - Toggle runout to test runout.");
    println!("  Ctrl+C to exit.");
    println!();

    let gpio = Gpio::new().context("opening GPIO subsystem")?;

    let pulses = Arc::new(AtomicU64::new(0));
    let mut motion = gpio
        .get(settings.motion_gpio)
        .context("claiming motion GPIO")?
        .into_input_pullup();
    {
        let pulses = pulses.clone();
        motion.set_async_interrupt(Trigger::FallingEdge, move |_| {
            pulses.fetch_add(1, Ordering::Relaxed);
        })?;
    }

    let runout = match (settings.runout_enabled, settings.runout_gpio) {
        (true, Some(pin)) => Some(
            gpio.get(pin)
                .context("claiming runout GPIO")?
                .into_input_pullup(),
        ),
        _ => None,
    };

    if let Some(pin) = settings.rearm_button_gpio {
        let button = gpio
            .get(pin)
            .context("claiming rearm button GPIO")?
            .into_input_pullup();
        button_test(&button, settings);
    }

    let mut last_runout = None;
    let mut last_print = Instant::now();
    while !daemon::stop_requested() {
        if last_print.elapsed() >= Duration::from_millis(500) {
            let count = pulses.load(Ordering::Relaxed);
            match &runout {
                Some(pin) => {
                    let asserted = pin.is_low() == settings.runout_active_high;
                    if last_runout != Some(asserted) {
                        println!("  RUNOUT asserted={asserted}");
                        last_runout = Some(asserted);
                    }
                    println!("  motion_pulses={count} runout_asserted={asserted}");
                }
                None => println!("  motion_pulses={count} runout_asserted=N/A"),
            }
            last_print = Instant::now();
        }
        thread::sleep(POLL);
    }
    Ok(())
}

/// Guided short-press/long-press check for the optional rearm button.
/// Read-only like the rest of doctor mode.
fn button_test(button: &InputPin, settings: &Settings) {
    let active_high = settings.rearm_button_active_high;
    let long_s = settings.rearm_button_long_press_s;
    let debounce = Duration::from_secs_f64(settings.rearm_button_debounce_s);

    println!();
    println!("Rearm Button Test (optional)");
    println!(
        "  GPIO={} active_high={} long_press_s={:.2} debounce_s={:.2}",
        settings.rearm_button_gpio.unwrap_or_default(),
        active_high,
        long_s,
        settings.rearm_button_debounce_s,
    );
    println!("  This test is read-only: it does not change monitor state or send any G-code.");
    println!();

    // Pulled-up input: the active reading is the low raw level, and
    // active_high selects which reading counts as pressed.
    let pressed = |pin: &InputPin| pin.is_low() == active_high;

    if pressed(button) {
        println!("  WARN: button appears pressed at start. Please release it...");
        if !wait_for(button, &pressed, false, Duration::from_secs(10)) {
            println!("  WARN: button still appears pressed; skipping button test.");
            return;
        }
        thread::sleep(debounce);
    }

    // Idle stability check
    let idle_deadline = Instant::now() + Duration::from_secs(1);
    let mut unstable = false;
    while Instant::now() < idle_deadline {
        if pressed(button) {
            unstable = true;
            break;
        }
        thread::sleep(POLL);
    }
    if unstable {
        println!("  WARN: button input toggled/pressed during idle check. Wiring/pull-up may be incorrect.");
    } else {
        println!("  OK: idle state stable (not pressed)");
    }

    println!("  ACTION: short press (tap) the button now...");
    match observe_press(button, &pressed) {
        None => println!("  WARN: no button press detected (short press test skipped)"),
        Some(held) => {
            thread::sleep(debounce);
            if held.as_secs_f64() >= long_s {
                println!(
                    "  WARN: detected a long press ({:.2}s) during short-press test; try a quicker tap.",
                    held.as_secs_f64()
                );
            } else {
                println!(
                    "  OK: short press detected ({:.2}s) => would trigger reset",
                    held.as_secs_f64()
                );
            }
        }
    }

    println!("  ACTION: long press (hold) the button now, then release...");
    match observe_press(button, &pressed) {
        None => println!("  WARN: no button press detected (long press test skipped)"),
        Some(held) => {
            thread::sleep(debounce);
            if held.as_secs_f64() >= long_s {
                println!(
                    "  OK: long press detected ({:.2}s) => would trigger rearm",
                    held.as_secs_f64()
                );
            } else {
                println!(
                    "  WARN: press released before long-press threshold ({:.2}s < {:.2}s)",
                    held.as_secs_f64(),
                    long_s
                );
            }
        }
    }
    println!();
}

/// Wait for one full press-release gesture and return the hold duration.
fn observe_press(button: &InputPin, pressed: &dyn Fn(&InputPin) -> bool) -> Option<Duration> {
    if !wait_for(button, pressed, true, Duration::from_secs(10)) {
        return None;
    }
    let start = Instant::now();
    if !wait_for(button, pressed, false, Duration::from_secs(30)) {
        println!("  WARN: button press detected but no release observed");
        return None;
    }
    Some(start.elapsed())
}

fn wait_for(
    button: &InputPin,
    pressed: &dyn Fn(&InputPin) -> bool,
    want_pressed: bool,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if daemon::stop_requested() {
            return false;
        }
        if pressed(button) == want_pressed {
            return true;
        }
        thread::sleep(POLL);
    }
    false
}

/// Dry-run check of the serial echo path and the raw inputs. Sends an
/// `M118` echo token, never a pause command.
pub fn run_self_test(settings: &Settings) -> Result<()> {
    let port_name = settings
        .port
        .as_deref()
        .context("--self-test requires -p/--port")?;
    let mut port = serial::open(port_name, settings.baud)
        .with_context(|| format!("opening serial port {port_name}"))?;

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let token = format!("filmon:selftest {stamp}");
    port.write_all(format!("M118 A1 {token}\n").as_bytes())?;
    port.flush()?;

    println!("Self-Test");
    println!("  Sent: {token}");
    println!("  Waiting for echo...");

    let needle = token.to_ascii_lowercase();
    let mut reader = BufReader::new(port.try_clone().context("cloning serial port")?);
    let mut buf = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut echoed = false;
    while Instant::now() < deadline && !echoed {
        buf.clear();
        match read_line_lossy(&mut reader, &mut buf) {
            Ok(Some(line)) => echoed = line.to_ascii_lowercase().contains(&needle),
            Ok(None) => {}
            Err(_) => break,
        }
    }
    if echoed {
        println!("  OK: echo seen");
    } else {
        println!("  WARN: no echo observed");
    }

    let gpio = Gpio::new().context("opening GPIO subsystem")?;
    let pulses = Arc::new(AtomicU64::new(0));
    let mut motion = gpio
        .get(settings.motion_gpio)
        .context("claiming motion GPIO")?
        .into_input_pullup();
    {
        let pulses = pulses.clone();
        motion.set_async_interrupt(Trigger::FallingEdge, move |_| {
            pulses.fetch_add(1, Ordering::Relaxed);
        })?;
    }

    println!("  Roll filament for 3 seconds...");
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline && !daemon::stop_requested() {
        thread::sleep(POLL);
    }
    println!("  Motion pulses: {}", pulses.load(Ordering::Relaxed));

    match (settings.runout_enabled, settings.runout_gpio) {
        (true, Some(pin)) => {
            let runout = gpio
                .get(pin)
                .context("claiming runout GPIO")?
                .into_input_pullup();
            println!("  Toggle runout (insert/remove) for 5 seconds...");
            let mut last = None;
            let mut changes = 0u32;
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline && !daemon::stop_requested() {
                let asserted = runout.is_low() == settings.runout_active_high;
                match last {
                    None => last = Some(asserted),
                    Some(prev) if prev != asserted => {
                        println!("  RUNOUT asserted={asserted}");
                        last = Some(asserted);
                        changes += 1;
                    }
                    Some(_) => {}
                }
                thread::sleep(Duration::from_millis(20));
            }
            if changes == 0 {
                println!("  WARN: no runout transitions observed (check wiring/polarity).");
            } else {
                println!("  OK: runout transitions observed ({changes}).");
            }
        }
        _ => println!("  Runout test: skipped (runout disabled)"),
    }

    println!("Self-test complete.");
    Ok(())
}

/// One lenient serial line; `Ok(None)` on a read timeout.
fn read_line_lossy<R: std::io::BufRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    match reader.read_until(b'\n', buf) {
        Ok(0) => Ok(None),
        Ok(_) => Ok(Some(String::from_utf8_lossy(buf).trim().to_string())),
        Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
        Err(e) => Err(e),
    }
}
