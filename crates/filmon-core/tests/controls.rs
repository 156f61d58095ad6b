//! Control-plane behavior: markers, socket commands, button gestures and
//! the latched-state precedence rules.

use std::time::Duration;

use filmon_core::{Command, Event, Monitor, MonitorConfig};

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

fn monitor() -> Monitor {
    Monitor::new(MonitorConfig::default())
}

fn last_event(mon: &mut Monitor) -> Option<Event> {
    mon.drain_events().pop()
}

#[test]
fn marker_sequence_enable_arm_unarm_disable_reset() {
    let mut mon = monitor();

    assert!(mon.handle_line("M118 A1 filmon:enable", secs(1.0)));
    assert!(mon.state().enabled);
    assert!(!mon.state().armed);
    assert_eq!(last_event(&mut mon), Some(Event::Enabled));

    assert!(mon.handle_line("M118 A1 filmon:arm", secs(2.0)));
    assert!(mon.state().enabled);
    assert!(mon.state().armed);
    assert_eq!(last_event(&mut mon), Some(Event::Armed));

    assert!(mon.handle_line("M118 A1 filmon:unarm", secs(3.0)));
    assert!(mon.state().enabled);
    assert!(!mon.state().armed);
    assert_eq!(last_event(&mut mon), Some(Event::Unarmed));

    assert!(mon.handle_line("M118 A1 filmon:disable", secs(4.0)));
    assert!(!mon.state().enabled);
    assert!(!mon.state().armed);
    assert_eq!(last_event(&mut mon), Some(Event::Disabled));

    assert!(mon.handle_line("M118 A1 filmon:reset", secs(5.0)));
    assert!(!mon.state().enabled);
    assert!(!mon.state().armed);
    assert!(!mon.state().latched);
    assert_eq!(last_event(&mut mon), Some(Event::Reset));

    assert!(!mon.handle_line("ok T:210.2 /210.0", secs(6.0)));
}

#[test]
fn enable_is_idempotent_and_preserves_counters() {
    let mut mon = monitor();
    mon.apply(Command::Enable, secs(1.0));
    for i in 0..7 {
        mon.on_motion_pulse(secs(1.0 + i as f64 * 0.1));
    }
    let last_pulse = mon.state().last_pulse_ts;

    mon.apply(Command::Enable, secs(2.0));
    assert!(mon.state().enabled);
    assert_eq!(mon.state().motion_pulses_since_reset, 7);
    assert_eq!(mon.state().last_pulse_ts, last_pulse);
}

#[test]
fn enable_disarms_an_armed_monitor() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(1.0));
    assert!(mon.state().armed);

    mon.apply(Command::Enable, secs(2.0));
    assert!(mon.state().enabled);
    assert!(!mon.state().armed);
}

#[test]
fn unarm_keeps_enabled_and_counters() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(1.0));
    mon.on_motion_pulse(secs(1.5));
    mon.on_motion_pulse(secs(1.6));

    mon.apply(Command::Unarm, secs(2.0));
    assert!(mon.state().enabled);
    assert!(!mon.state().armed);
    assert_eq!(mon.state().motion_pulses_since_reset, 2);
    assert_eq!(mon.state().motion_pulses_since_arm, 2);
}

#[test]
fn reset_clears_flags_and_counters() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(1.0));
    mon.on_motion_pulse(secs(1.5));
    mon.apply(Command::Unarm, secs(1.8));
    mon.on_runout_edge(true, secs(2.0));
    assert!(mon.state().runout_asserted);

    mon.apply(Command::Reset, secs(3.0));
    let state = mon.state();
    assert!(!state.enabled);
    assert!(!state.armed);
    assert!(!state.latched);
    assert!(!state.runout_asserted);
    assert_eq!(state.motion_pulses_since_reset, 0);
    assert_eq!(state.motion_pulses_since_arm, 0);
    assert_eq!(state.arm_ts, None);
    // lifetime counter survives a reset
    assert_eq!(state.motion_pulses_total, 1);
    // the timeout reference restarts so a later arm cannot see a stale gap
    assert_eq!(state.last_pulse_ts, Some(secs(3.0)));
}

#[test]
fn latched_state_ignores_everything_but_disable_reset_rearm() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(0.0));
    mon.tick(secs(10.0));
    assert!(mon.state().latched);
    mon.drain_events();
    mon.drain_gcode();

    mon.apply(Command::Arm, secs(11.0));
    mon.apply(Command::Enable, secs(11.1));
    mon.apply(Command::Unarm, secs(11.2));
    assert!(mon.state().latched);
    assert!(mon.drain_events().is_empty());

    mon.apply(Command::Disable, secs(12.0));
    assert!(mon.state().latched);
    assert!(!mon.state().enabled);
    assert_eq!(last_event(&mut mon), Some(Event::Disabled));

    mon.apply(Command::Reset, secs(13.0));
    assert!(!mon.state().latched);
}

#[test]
fn rearm_clears_latch_and_arms() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(0.0));
    mon.tick(secs(10.0));
    assert!(mon.state().latched);
    mon.drain_gcode();

    mon.apply(Command::Rearm, secs(20.0));
    let state = mon.state();
    assert!(!state.latched);
    assert!(state.enabled);
    assert!(state.armed);
    assert!(!state.runout_asserted);
    assert_eq!(state.motion_pulses_since_reset, 0);
    assert_eq!(state.motion_pulses_since_arm, 0);
    assert_eq!(state.arm_ts, Some(secs(20.0)));
    assert_eq!(last_event(&mut mon), Some(Event::Rearmed));

    // immediately after a rearm the jam reference is fresh
    mon.tick(secs(20.1));
    assert!(!mon.state().latched);
}

#[test]
fn button_short_press_resets() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(0.0));
    mon.tick(secs(10.0));
    assert!(mon.state().latched);

    mon.on_button_press(secs(20.0));
    mon.on_button_release(secs(20.4));
    let state = mon.state();
    assert!(!state.enabled);
    assert!(!state.armed);
    assert!(!state.latched);
    assert_eq!(state.motion_pulses_since_reset, 0);
}

#[test]
fn button_long_press_rearms() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(0.0));
    mon.tick(secs(10.0));
    assert!(mon.state().latched);

    mon.on_button_press(secs(20.0));
    mon.on_button_release(secs(22.0));
    let state = mon.state();
    assert!(!state.latched);
    assert!(state.enabled);
    assert!(state.armed);
}

#[test]
fn button_press_inside_debounce_window_is_ignored() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(0.0));
    mon.on_motion_pulse(secs(0.1));

    // first gesture: short press, reset
    mon.on_button_press(secs(100.0));
    mon.on_button_release(secs(100.05));
    assert!(!mon.state().enabled);

    // re-arm, then press again inside the 0.25 s debounce window
    mon.apply(Command::Arm, secs(100.06));
    mon.on_button_press(secs(100.1));
    mon.on_button_release(secs(100.15));
    assert!(mon.state().armed, "debounced press must not reset");

    // after the debounce window the button works again
    mon.on_button_press(secs(101.0));
    mon.on_button_release(secs(101.1));
    assert!(!mon.state().enabled);
}

#[test]
fn button_release_without_press_is_a_no_op() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(0.0));
    mon.on_button_release(secs(1.0));
    assert!(mon.state().armed);
    assert!(mon.state().enabled);
}

#[test]
fn edges_after_stop_do_not_mutate_state() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(0.0));
    mon.on_motion_pulse(secs(0.5));
    let pulses = mon.state().motion_pulses_total;
    let last_pulse = mon.state().last_pulse_ts;

    mon.stop();
    mon.on_motion_pulse(secs(1.0));
    mon.on_runout_edge(true, secs(1.0));
    mon.on_button_press(secs(1.0));
    mon.on_button_release(secs(3.0));

    let state = mon.state();
    assert_eq!(state.motion_pulses_total, pulses);
    assert_eq!(state.last_pulse_ts, last_pulse);
    assert!(!state.runout_asserted);
    assert!(state.armed);
}
