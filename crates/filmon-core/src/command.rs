/// Control markers recognized on the printer's serial stream.
pub const MARKER_ENABLE: &str = "filmon:enable";
pub const MARKER_DISABLE: &str = "filmon:disable";
pub const MARKER_RESET: &str = "filmon:reset";
pub const MARKER_ARM: &str = "filmon:arm";
pub const MARKER_UNARM: &str = "filmon:unarm";

/// Unified control vocabulary. Serial markers, control-socket commands and
/// button gestures all funnel into this set before touching the state
/// machine, so the transition table stays total.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Reset,
    Disable,
    Enable,
    Arm,
    Unarm,
    Rearm,
}

impl Command {
    /// Match a control marker embedded anywhere in a serial line.
    ///
    /// Matching is substring-based and case-insensitive for compatibility
    /// with start/end G-code that wraps markers in `M118` echoes. When a
    /// line somehow carries several markers, precedence is
    /// `reset > disable > unarm > arm > enable`.
    pub fn from_marker_line(line: &str) -> Option<Command> {
        let low = line.to_ascii_lowercase();
        if low.contains(MARKER_RESET) {
            Some(Command::Reset)
        } else if low.contains(MARKER_DISABLE) {
            Some(Command::Disable)
        } else if low.contains(MARKER_UNARM) {
            Some(Command::Unarm)
        } else if low.contains(MARKER_ARM) {
            Some(Command::Arm)
        } else if low.contains(MARKER_ENABLE) {
            Some(Command::Enable)
        } else {
            None
        }
    }

    /// Parse an exact command word as received on the control socket.
    /// `rearm` has no serial-marker form; it exists only here and on the
    /// physical button.
    pub fn parse(word: &str) -> Option<Command> {
        match word.trim().to_ascii_lowercase().as_str() {
            "reset" => Some(Command::Reset),
            "disable" => Some(Command::Disable),
            "enable" => Some(Command::Enable),
            "arm" => Some(Command::Arm),
            "unarm" => Some(Command::Unarm),
            "rearm" => Some(Command::Rearm),
            _ => None,
        }
    }
}
