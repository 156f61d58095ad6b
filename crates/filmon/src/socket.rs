use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{Value, json};

use filmon_core::Command;

use crate::VERSION;
use crate::daemon::{self, MonitorHandle};
use crate::logger::JsonLogger;

/// Commands are single lines; anything longer is a protocol violation.
const MAX_COMMAND_BYTES: u64 = 4096;
/// Bound on the accept wait so shutdown is never stuck in `accept`.
const ACCEPT_POLL: Duration = Duration::from_millis(500);
/// Per-connection read/write timeout.
const CONN_TIMEOUT: Duration = Duration::from_secs(2);

/// Serve the local control socket on its own thread.
///
/// The monitor owns the printer serial port for the process lifetime, so
/// external consoles cannot send G-code. This socket is the safe control
/// plane: one command per connection, one JSON line back.
pub fn spawn(path: PathBuf, handle: Arc<MonitorHandle>, logger: JsonLogger) -> JoinHandle<()> {
    thread::spawn(move || serve(&path, &handle, &logger))
}

fn serve(path: &Path, handle: &MonitorHandle, logger: &JsonLogger) {
    let listener = match bind(path) {
        Ok(listener) => listener,
        Err(e) => {
            logger.emit(
                "control_socket_error",
                json!({ "error": e.to_string(), "path": path.display().to_string() }),
            );
            return;
        }
    };
    logger.emit(
        "control_socket_started",
        json!({ "path": path.display().to_string() }),
    );

    while !daemon::stop_requested() {
        match listener.accept() {
            Ok((stream, _)) => {
                // per-connection failures must not kill the server
                let _ = handle_connection(stream, handle);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(_) => break,
        }
    }
    let _ = fs::remove_file(path);
}

fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    // Remove a stale socket left behind by an unclean shutdown.
    if path.exists() {
        fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    // Local users only; systemd can narrow this further.
    fs::set_permissions(path, fs::Permissions::from_mode(0o660))?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn handle_connection(stream: UnixStream, handle: &MonitorHandle) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CONN_TIMEOUT))?;
    stream.set_write_timeout(Some(CONN_TIMEOUT))?;

    let mut raw = Vec::new();
    BufReader::new(&stream)
        .take(MAX_COMMAND_BYTES)
        .read_until(b'\n', &mut raw)?;
    let command = String::from_utf8_lossy(&raw);

    let response = dispatch(command.trim(), handle);
    let mut line =
        serde_json::to_string(&response).unwrap_or_else(|_| r#"{"ok":false}"#.to_string());
    line.push('\n');
    (&stream).write_all(line.as_bytes())
}

/// Resolve one socket command to its JSON response. Shared with tests;
/// the wire framing lives in `handle_connection`.
pub fn dispatch(command: &str, handle: &MonitorHandle) -> Value {
    let command = command.trim().to_ascii_lowercase();
    if command.is_empty() {
        return json!({ "ok": false, "error": "empty command" });
    }
    if command == "status" || command == "state" {
        return json!({ "ok": true, "state": handle.snapshot(), "version": VERSION });
    }
    match Command::parse(&command) {
        Some(cmd) => {
            handle.apply(cmd);
            json!({ "ok": true })
        }
        None => json!({ "ok": false, "error": format!("unknown command: {command}") }),
    }
}
