//! Jam and runout fault paths: latching, pause emission, de-duplication,
//! post-arm grace and breadcrumbs.

use std::time::Duration;

use filmon_core::{Command, Event, Monitor, MonitorConfig, Trigger};

fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

fn monitor() -> Monitor {
    Monitor::new(MonitorConfig::default())
}

fn monitor_with(f: impl FnOnce(&mut MonitorConfig)) -> Monitor {
    let mut cfg = MonitorConfig::default();
    f(&mut cfg);
    Monitor::new(cfg)
}

#[test]
fn enable_only_never_jams() {
    let mut mon = monitor();
    mon.apply(Command::Enable, secs(0.0));

    for i in 1..=25 {
        mon.tick(secs(i as f64 * 0.2));
    }
    assert!(!mon.state().latched);
    assert!(mon.drain_gcode().is_empty());
}

#[test]
fn armed_with_no_pulses_latches_once() {
    let mut mon = monitor();
    mon.apply(Command::Enable, secs(0.0));
    mon.apply(Command::Arm, secs(0.5));

    // just under the 8 s timeout: nothing
    mon.tick(secs(8.4));
    assert!(!mon.state().latched);

    mon.tick(secs(8.6));
    assert!(mon.state().latched);
    assert_eq!(mon.state().last_trigger, Some(Trigger::Jam));
    assert_eq!(mon.drain_gcode(), vec!["M400", "M600"]);

    let events = mon.drain_events();
    let pause = events
        .iter()
        .find(|e| matches!(e, Event::PauseTriggered { .. }))
        .expect("pause_triggered emitted");
    match pause {
        Event::PauseTriggered {
            reason,
            dt_since_pulse,
            ..
        } => {
            assert_eq!(*reason, Trigger::Jam);
            assert!(dt_since_pulse.unwrap() >= 8.0);
        }
        _ => unreachable!(),
    }
}

#[test]
fn latch_blocks_retrigger_until_reset_and_rearm() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(0.0));
    mon.tick(secs(9.0));
    assert_eq!(mon.drain_gcode().len(), 2);

    // ten more seconds of evaluation: not a byte more
    for i in 0..50 {
        mon.tick(secs(9.0 + 0.2 * i as f64));
    }
    assert!(mon.drain_gcode().is_empty());

    // motion resuming does not clear the latch either
    mon.on_motion_pulse(secs(19.5));
    assert!(mon.state().latched);

    mon.apply(Command::Reset, secs(20.0));
    mon.apply(Command::Arm, secs(20.5));
    mon.tick(secs(29.0));
    assert!(mon.state().latched);
    assert_eq!(mon.drain_gcode(), vec!["M400", "M600"]);
}

#[test]
fn runout_while_unarmed_tracks_but_does_not_latch() {
    let mut mon = monitor();
    mon.apply(Command::Enable, secs(0.0));

    mon.on_runout_edge(true, secs(1.0));
    assert!(mon.state().runout_asserted);
    assert!(!mon.state().latched);
    assert!(mon.drain_gcode().is_empty());
    // no runout event while unarmed
    assert!(
        !mon.drain_events()
            .iter()
            .any(|e| matches!(e, Event::RunoutAsserted))
    );
}

#[test]
fn runout_while_armed_latches_with_runout_reason() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(0.0));

    mon.on_runout_edge(true, secs(1.0));
    assert!(mon.state().latched);
    assert_eq!(mon.state().last_trigger, Some(Trigger::Runout));
    assert_eq!(mon.drain_gcode(), vec!["M400", "M600"]);

    let events = mon.drain_events();
    assert!(events.iter().any(|e| matches!(e, Event::RunoutAsserted)));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::PauseTriggered { reason: Trigger::Runout, .. }))
    );
}

#[test]
fn runout_cleared_logs_recovery_but_does_not_unlatch() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(0.0));
    mon.on_runout_edge(true, secs(1.0));
    assert!(mon.state().latched);
    mon.drain_events();

    mon.on_runout_edge(false, secs(5.0));
    assert!(mon.state().latched);
    assert!(!mon.state().runout_asserted);
    assert_eq!(mon.drain_events(), vec![Event::RunoutCleared]);
}

#[test]
fn runout_edges_inside_debounce_window_are_dropped() {
    let mut mon = monitor_with(|cfg| cfg.runout_debounce_s = 0.5);
    mon.apply(Command::Enable, secs(0.0));

    mon.on_runout_edge(true, secs(1.0));
    assert!(mon.state().runout_asserted);
    // bounce back within the window: ignored
    mon.on_runout_edge(false, secs(1.2));
    assert!(mon.state().runout_asserted);
    // accepted once the window has passed
    mon.on_runout_edge(false, secs(1.6));
    assert!(!mon.state().runout_asserted);
}

#[test]
fn at_most_one_notification_per_latch() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(0.0));
    mon.tick(secs(9.0));

    let note = mon.take_notification().expect("latch queues a notification");
    assert_eq!(note.title, "Filament Monitor");
    assert_eq!(note.priority, 1);

    for i in 0..50 {
        mon.tick(secs(9.0 + 0.2 * i as f64));
    }
    assert_eq!(mon.take_notification(), None);

    // a fresh latch after rearm queues exactly one more
    mon.apply(Command::Rearm, secs(30.0));
    mon.tick(secs(39.0));
    assert!(mon.take_notification().is_some());
    assert_eq!(mon.take_notification(), None);
}

#[test]
fn arm_grace_seconds_defers_jam_evaluation() {
    let mut mon = monitor_with(|cfg| {
        cfg.jam_timeout_s = 1.0;
        cfg.arm_grace_s = 3.0;
    });
    mon.apply(Command::Arm, secs(0.0));

    // well past the jam timeout but still inside the grace window
    mon.tick(secs(2.5));
    assert!(!mon.state().latched);

    mon.tick(secs(3.5));
    assert!(mon.state().latched);
}

#[test]
fn arm_grace_pulses_defers_jam_evaluation() {
    let mut mon = monitor_with(|cfg| {
        cfg.jam_timeout_s = 1.0;
        cfg.arm_grace_pulses = 2;
    });
    mon.apply(Command::Arm, secs(0.0));

    mon.on_motion_pulse(secs(0.5));
    mon.tick(secs(5.0));
    assert!(!mon.state().latched, "one pulse is under the grace count");

    mon.on_motion_pulse(secs(5.5));
    mon.tick(secs(10.0));
    assert!(mon.state().latched);
}

#[test]
fn first_pulse_after_arm_is_reported_once() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(2.0));
    mon.on_motion_pulse(secs(2.75));
    mon.on_motion_pulse(secs(3.0));

    let events = mon.drain_events();
    let firsts: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::FirstPulseAfterArm { dt } => Some(*dt),
            _ => None,
        })
        .collect();
    assert_eq!(firsts.len(), 1);
    assert!((firsts[0] - 0.75).abs() < 1e-9);
}

#[test]
fn stall_breadcrumbs_fire_once_per_threshold() {
    let mut mon = monitor();
    mon.apply(Command::Arm, secs(0.0));

    mon.tick(secs(3.5));
    mon.tick(secs(3.7));
    let stalls: Vec<_> = mon
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::Stall { .. }))
        .collect();
    assert_eq!(stalls.len(), 1, "3 s threshold crossed once");

    mon.tick(secs(6.5));
    let stalls = mon
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::Stall { threshold_s, .. } if *threshold_s == 6.0))
        .count();
    assert_eq!(stalls, 1, "6 s threshold crossed once");

    // a pulse restarts the progression from the first threshold
    mon.on_motion_pulse(secs(7.0));
    mon.tick(secs(10.5));
    let stalls = mon
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, Event::Stall { threshold_s, .. } if *threshold_s == 3.0))
        .count();
    assert_eq!(stalls, 1);
}

#[test]
fn heartbeat_fires_on_interval_while_enabled() {
    let mut mon = monitor();
    // disabled: no heartbeat ever
    mon.tick(secs(0.1));
    mon.tick(secs(5.0));
    assert!(mon.drain_events().is_empty());

    mon.apply(Command::Enable, secs(5.0));
    mon.drain_events();
    mon.tick(secs(5.1)); // schedules the first heartbeat
    mon.tick(secs(6.0));
    assert!(mon.drain_events().is_empty());

    mon.tick(secs(7.2));
    let events = mon.drain_events();
    match events.as_slice() {
        [Event::Heartbeat {
            enabled,
            armed,
            latched,
            ..
        }] => {
            assert!(*enabled);
            assert!(!*armed);
            assert!(!*latched);
        }
        other => panic!("expected one heartbeat, got {other:?}"),
    }
}
