use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value, json};

use filmon_core::Event;

/// Minimal structured event logger.
///
/// One line per event on stdout: a sorted-key JSON object in `--json`
/// mode, otherwise a bracketed human-readable line. Every event carries a
/// float epoch `ts` plus a local-time `ts_iso` with millisecond
/// resolution, so log scrapers and humans get the same stream.
#[derive(Clone)]
pub struct JsonLogger {
    json: bool,
}

impl JsonLogger {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn emit(&self, event: &str, fields: Value) {
        let (ts, ts_iso) = timestamp();
        if self.json {
            let mut payload = Map::new();
            payload.insert("ts".to_string(), json!(ts));
            payload.insert("ts_iso".to_string(), json!(ts_iso));
            payload.insert("event".to_string(), json!(event));
            if let Value::Object(extra) = fields {
                payload.extend(extra);
            }
            println!("{}", Value::Object(payload));
        } else {
            let mut line = format!("[{ts_iso}] {event}");
            if let Value::Object(extra) = fields {
                for (key, value) in extra {
                    match value {
                        Value::String(s) => line.push_str(&format!(" {key}={s}")),
                        other => line.push_str(&format!(" {key}={other}")),
                    }
                }
            }
            println!("{line}");
        }
    }

    /// Render a core event with the field layout log consumers expect.
    pub fn emit_monitor(&self, event: &Event) {
        let fields = match event {
            Event::Enabled
            | Event::Disabled
            | Event::Armed
            | Event::Unarmed
            | Event::Reset
            | Event::Rearmed
            | Event::RunoutAsserted
            | Event::RunoutCleared => json!({}),
            Event::FirstPulseAfterArm { dt } => json!({ "dt": round3(*dt) }),
            Event::Heartbeat {
                enabled,
                armed,
                latched,
                runout,
                dt_since_pulse,
                pps,
                pulses_reset,
                pulses_arm,
            } => json!({
                "enabled": *enabled as u8,
                "armed": *armed as u8,
                "latched": *latched as u8,
                "runout": *runout as u8,
                "dt_since_pulse": dt_since_pulse.map(round3),
                "pps": round3(*pps),
                "pulses_reset": pulses_reset,
                "pulses_arm": pulses_arm,
            }),
            Event::Stall {
                dt_since_pulse,
                threshold_s,
                pps,
                pulses_arm,
            } => json!({
                "dt_since_pulse": round3(*dt_since_pulse),
                "threshold_s": threshold_s,
                "pps": round3(*pps),
                "pulses_arm": pulses_arm,
            }),
            Event::PauseTriggered {
                reason,
                dt_since_pulse,
                pps,
                pulses_reset,
                pulses_arm,
            } => json!({
                "reason": reason.as_str(),
                "dt_since_pulse": dt_since_pulse.map(round3),
                "pps": round3(*pps),
                "pulses_reset": pulses_reset,
                "pulses_arm": pulses_arm,
            }),
        };
        self.emit(event.name(), fields);
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn timestamp() -> (f64, String) {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    let now = jiff::Zoned::now();
    let ts_iso = format!(
        "{}.{:03}",
        now.strftime("%Y-%m-%d %H:%M:%S"),
        now.subsec_nanosecond() / 1_000_000
    );
    (ts, ts_iso)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round3_trims_noise() {
        assert_eq!(round3(1.23456), 1.235);
        assert_eq!(round3(0.1 + 0.2), 0.3);
    }

    #[test]
    fn timestamp_has_millisecond_iso_form() {
        let (ts, iso) = timestamp();
        assert!(ts > 0.0);
        // "YYYY-mm-dd HH:MM:SS.mmm"
        assert_eq!(iso.len(), 23);
        assert_eq!(&iso[4..5], "-");
        assert_eq!(&iso[19..20], ".");
    }
}
