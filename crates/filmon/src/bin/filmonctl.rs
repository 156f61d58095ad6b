//! Local control client for the filament monitor daemon.
//!
//! The daemon holds the printer serial port, so external consoles cannot
//! safely share the device; filmonctl talks to it over the local UNIX
//! control socket instead.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde_json::Value;

const DEFAULT_SOCKET: &str = "/run/filmon/filmon.sock";
const IO_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Cmd {
    Status,
    Rearm,
    Reset,
    Enable,
    Arm,
    Unarm,
    Disable,
    /// Send a test push notification directly (bypasses the daemon).
    TestNotify,
}

impl Cmd {
    fn wire_name(self) -> &'static str {
        match self {
            Cmd::Status => "status",
            Cmd::Rearm => "rearm",
            Cmd::Reset => "reset",
            Cmd::Enable => "enable",
            Cmd::Arm => "arm",
            Cmd::Unarm => "unarm",
            Cmd::Disable => "disable",
            Cmd::TestNotify => "test-notify",
        }
    }
}

/// Control the filament monitor daemon via its local UNIX socket.
#[derive(Debug, Parser)]
#[command(name = "filmonctl", version)]
struct Args {
    /// Command to send to the daemon.
    #[arg(value_enum)]
    command: Cmd,

    /// Control socket path. Falls back to FILMON_SOCKET, then the
    /// built-in default.
    #[arg(long)]
    socket: Option<String>,

    /// Print the raw JSON response.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.command == Cmd::TestNotify {
        return test_notify();
    }

    let socket_path = args
        .socket
        .or_else(|| std::env::var("FILMON_SOCKET").ok())
        .unwrap_or_else(|| DEFAULT_SOCKET.to_string());
    let response = match send(&socket_path, args.command.wire_name()) {
        Ok(resp) => resp,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&response) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{response}"),
        }
        return ExitCode::SUCCESS;
    }

    if response["ok"] == Value::Bool(true) {
        if args.command == Cmd::Status {
            let state = &response["state"];
            println!(
                "ok  version={} enabled={} armed={} latched={} pulses_reset={}",
                response["version"].as_str().unwrap_or(""),
                state["enabled"],
                state["armed"],
                state["latched"],
                state["motion_pulses_since_reset"],
            );
        } else {
            println!("ok");
        }
        ExitCode::SUCCESS
    } else {
        eprintln!(
            "error: {}",
            response["error"].as_str().unwrap_or("unknown error")
        );
        ExitCode::from(2)
    }
}

fn send(socket_path: &str, command: &str) -> std::io::Result<Value> {
    let mut stream = UnixStream::connect(socket_path)?;
    stream.set_read_timeout(Some(IO_TIMEOUT))?;
    stream.set_write_timeout(Some(IO_TIMEOUT))?;
    stream.write_all(command.as_bytes())?;
    stream.write_all(b"\n")?;

    let mut line = Vec::new();
    BufReader::new(&stream).read_until(b'\n', &mut line)?;
    let text = String::from_utf8_lossy(&line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(serde_json::json!({ "ok": false, "error": "empty response" }));
    }
    Ok(serde_json::from_str(text).unwrap_or_else(
        |_| serde_json::json!({ "ok": false, "error": "non-json response", "raw": text }),
    ))
}

fn test_notify() -> ExitCode {
    let token = std::env::var("PUSHOVER_TOKEN").unwrap_or_default();
    let user = std::env::var("PUSHOVER_USER").unwrap_or_default();
    if token.is_empty() || user.is_empty() {
        eprintln!("error: PUSHOVER_TOKEN and PUSHOVER_USER must be set");
        return ExitCode::from(2);
    }
    match post_test_notification(&token, &user) {
        Ok(()) => {
            println!("ok");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

fn post_test_notification(token: &str, user: &str) -> Result<(), ureq::Error> {
    ureq::post("https://api.pushover.net/1/messages.json").send_form([
        ("token", token),
        ("user", user),
        ("title", "Filament Monitor"),
        ("message", "Test notification from filmonctl"),
    ])?;
    Ok(())
}
