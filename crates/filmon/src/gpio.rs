use std::sync::Arc;

use rppal::gpio::{Gpio, InputPin, Level, Trigger};

use crate::config::Settings;
use crate::daemon::{self, MonitorHandle};

/// Registered edge inputs.
///
/// The pins must stay alive for their interrupts to keep firing; dropping
/// this struct clears every callback, which is how teardown guarantees no
/// further edges are delivered.
pub struct EdgeSources {
    _pins: Vec<InputPin>,
}

impl EdgeSources {
    /// Claim the configured pins and wire their edges into the monitor.
    /// Callbacks arrive on the GPIO interrupt thread and are dropped once
    /// shutdown begins.
    pub fn attach(
        settings: &Settings,
        handle: Arc<MonitorHandle>,
    ) -> Result<EdgeSources, rppal::gpio::Error> {
        let gpio = Gpio::new()?;
        let mut pins = Vec::new();

        // The filament encoder ticks as falling edges on a pulled-up line.
        let mut motion = gpio.get(settings.motion_gpio)?.into_input_pullup();
        {
            let handle = handle.clone();
            motion.set_async_interrupt(Trigger::FallingEdge, move |_| {
                if !daemon::stop_requested() {
                    handle.on_motion_pulse();
                }
            })?;
        }
        pins.push(motion);

        if settings.runout_enabled {
            if let Some(pin) = settings.runout_gpio {
                let active_high = settings.runout_active_high;
                let mut runout = gpio.get(pin)?.into_input_pullup();
                let handle = handle.clone();
                runout.set_async_interrupt(Trigger::Both, move |level| {
                    if daemon::stop_requested() {
                        return;
                    }
                    // Pulled-up input: the active reading is the low raw
                    // level, and active_high selects which reading means
                    // "no filament".
                    let asserted = (level == Level::Low) == active_high;
                    handle.on_runout_edge(asserted);
                })?;
                pins.push(runout);
            }
        }

        if let Some(pin) = settings.rearm_button_gpio {
            // Active-low wiring (recommended) gets the internal pull-up;
            // active-high gets the pull-down.
            let active_high = settings.rearm_button_active_high;
            let pin = gpio.get(pin)?;
            let mut button = if active_high {
                pin.into_input_pulldown()
            } else {
                pin.into_input_pullup()
            };
            let handle = handle.clone();
            button.set_async_interrupt(Trigger::Both, move |level| {
                if daemon::stop_requested() {
                    return;
                }
                let pressed = (level == Level::High) == active_high;
                if pressed {
                    handle.on_button_press();
                } else {
                    handle.on_button_release();
                }
            })?;
            pins.push(button);
        }

        Ok(EdgeSources { _pins: pins })
    }
}
