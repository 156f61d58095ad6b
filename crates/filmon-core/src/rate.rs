use std::collections::VecDeque;
use std::time::Duration;

/// Sliding window of recent pulse instants.
///
/// The instantaneous rate is `|W| / T` where `W` is the set of pulses seen
/// within the last `T = window_s` seconds. Stale entries are pruned lazily
/// on every push and query.
pub struct PulseWindow {
    window_s: f64,
    times: VecDeque<Duration>,
}

impl PulseWindow {
    pub fn new(window_s: f64) -> Self {
        Self {
            window_s,
            times: VecDeque::new(),
        }
    }

    pub fn push(&mut self, now: Duration) {
        self.times.push_back(now);
        self.prune(now);
    }

    pub fn clear(&mut self) {
        self.times.clear();
    }

    /// Pulses per second over the window. A window of zero or less always
    /// reads 0.0.
    pub fn pps(&mut self, now: Duration) -> f64 {
        self.prune(now);
        if self.window_s <= 0.0 {
            return 0.0;
        }
        self.times.len() as f64 / self.window_s
    }

    fn prune(&mut self, now: Duration) {
        if self.window_s <= 0.0 {
            self.times.clear();
            return;
        }
        let cutoff = now.as_secs_f64() - self.window_s;
        while self
            .times
            .front()
            .is_some_and(|t| t.as_secs_f64() < cutoff)
        {
            self.times.pop_front();
        }
    }
}

/// Exponentially-smoothed pulse rate.
///
/// The smoothing constant derives from a half-life `H`: `tau = H / ln 2`,
/// `alpha = 1 - exp(-dt / tau)` for `dt` seconds since the previous update.
/// `H <= 0` disables smoothing entirely (`alpha = 1`), which makes the EMA
/// track the instantaneous rate exactly.
pub struct RateEma {
    halflife_s: f64,
    value: f64,
    last_update: Option<Duration>,
}

impl RateEma {
    pub fn new(halflife_s: f64) -> Self {
        Self {
            halflife_s,
            value: 0.0,
            last_update: None,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn update(&mut self, now: Duration, instant: f64) -> f64 {
        let alpha = match self.last_update {
            Some(last) if self.halflife_s > 0.0 => {
                let dt = now.as_secs_f64() - last.as_secs_f64();
                let tau = self.halflife_s / std::f64::consts::LN_2;
                1.0 - (-dt / tau).exp()
            }
            _ => 1.0,
        };
        self.value = (1.0 - alpha) * self.value + alpha * instant;
        self.last_update = Some(now);
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
        self.last_update = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn window_counts_only_recent_pulses() {
        let mut w = PulseWindow::new(2.0);
        w.push(secs(10.0));
        w.push(secs(10.5));
        w.push(secs(11.0));
        w.push(secs(11.5));
        assert_eq!(w.pps(secs(11.5)), 2.0);
        // 10.0 and 10.5 fall out of the window at t = 12.6
        assert_eq!(w.pps(secs(12.6)), 1.0);
        assert_eq!(w.pps(secs(20.0)), 0.0);
    }

    #[test]
    fn zero_window_reads_zero() {
        let mut w = PulseWindow::new(0.0);
        w.push(secs(1.0));
        assert_eq!(w.pps(secs(1.0)), 0.0);
    }

    #[test]
    fn ema_without_halflife_tracks_instant() {
        let mut ema = RateEma::new(0.0);
        assert_eq!(ema.update(secs(1.0), 4.0), 4.0);
        assert_eq!(ema.update(secs(1.1), 0.5), 0.5);
    }

    #[test]
    fn ema_first_update_seeds_value() {
        let mut ema = RateEma::new(3.0);
        assert_eq!(ema.update(secs(5.0), 2.0), 2.0);
    }

    #[test]
    fn ema_moves_halfway_per_halflife() {
        let mut ema = RateEma::new(3.0);
        ema.update(secs(0.0), 2.0);
        let v = ema.update(secs(3.0), 0.0);
        assert!((v - 1.0).abs() < 1e-9, "one half-life from 2.0 toward 0.0: {v}");
    }
}
