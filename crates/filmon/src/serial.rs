use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;
use serialport::SerialPort;

use crate::logger::JsonLogger;

/// Read timeout on the printer link. Bounds both the reader's shutdown
/// latency and the granularity of partial-line accumulation.
pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

pub fn open(port: &str, baud: u32) -> serialport::Result<Box<dyn SerialPort>> {
    serialport::new(port, baud).timeout(READ_TIMEOUT).open()
}

/// Write half of the printer link.
///
/// All writes funnel through one lock so the pause pair and any future
/// sender can never interleave mid-line. This lock is deliberately
/// separate from the monitor state lock: a slow write must not stall
/// edge-driven state updates.
pub struct SerialWriter {
    port: Mutex<Box<dyn SerialPort>>,
}

impl SerialWriter {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port: Mutex::new(port),
        }
    }

    /// Write one line atomically (terminator added here) and flush.
    pub fn send_line(&self, line: &str) -> std::io::Result<()> {
        let mut port = self.port.lock().unwrap_or_else(PoisonError::into_inner);
        port.write_all(line.as_bytes())?;
        port.write_all(b"\n")?;
        port.flush()
    }
}

/// Background serial reader.
///
/// Forwards each stripped, leniently-decoded line to the main loop. On a
/// fatal read error it emits `serial_read_error` once and exits; the
/// supervisor notices the dead thread and shuts the daemon down with a
/// distinct exit code.
pub fn spawn_reader(
    port: Box<dyn SerialPort>,
    lines: Sender<String>,
    stop: Arc<AtomicBool>,
    logger: JsonLogger,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(port);
        let mut buf: Vec<u8> = Vec::new();
        while !stop.load(Ordering::Relaxed) {
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => continue,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&buf).trim().to_string();
                    buf.clear();
                    if !text.is_empty() && lines.send(text).is_err() {
                        break;
                    }
                }
                // timeouts keep any partial line buffered and try again
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    logger.emit("serial_read_error", json!({ "error": e.to_string() }));
                    break;
                }
            }
        }
    })
}
