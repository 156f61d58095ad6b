use std::time::{Duration, Instant};

/// Source of monotonic "now" for every timeout decision.
///
/// Wall-clock time appears only in operator-facing event timestamps; all
/// jam/debounce/gesture math runs on instants from this clock so that a
/// host clock step cannot trigger or suppress a pause.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;
}

pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}
