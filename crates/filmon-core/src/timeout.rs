/// Derives the effective jam timeout from the smoothed pulse rate.
///
/// Brisk extrusion (high `pps_ema`) makes a pause in pulses suspicious, so
/// the timeout shrinks; sparse-extrusion regions grow it. The result is
/// clamped to `[min_s, max_s]`, and the rate itself is floored at
/// `pps_floor` so an empty window cannot divide by zero. With `adaptive`
/// off the timeout is the fixed `fixed_s` regardless of rate.
#[derive(Clone, Debug)]
pub struct JamTimeout {
    pub adaptive: bool,
    pub fixed_s: f64,
    pub min_s: f64,
    pub max_s: f64,
    pub k: f64,
    pub pps_floor: f64,
}

impl JamTimeout {
    pub fn effective_s(&self, pps_ema: f64) -> f64 {
        if !self.adaptive {
            return self.fixed_s;
        }
        (self.k / pps_ema.max(self.pps_floor)).clamp(self.min_s, self.max_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adaptive() -> JamTimeout {
        JamTimeout {
            adaptive: true,
            fixed_s: 8.0,
            min_s: 6.0,
            max_s: 18.0,
            k: 16.0,
            pps_floor: 0.3,
        }
    }

    #[test]
    fn fixed_mode_ignores_rate() {
        let t = JamTimeout {
            adaptive: false,
            ..adaptive()
        };
        assert_eq!(t.effective_s(0.01), 8.0);
        assert_eq!(t.effective_s(100.0), 8.0);
    }

    #[test]
    fn adaptive_stays_within_clamps() {
        let t = adaptive();
        for pps in [0.0, 0.001, 0.3, 1.0, 2.0, 50.0, 1e6] {
            let eff = t.effective_s(pps);
            assert!((6.0..=18.0).contains(&eff), "pps={pps} eff={eff}");
        }
    }

    #[test]
    fn adaptive_scales_inversely_with_rate() {
        let t = adaptive();
        assert_eq!(t.effective_s(2.0), 8.0);
        // empty window: rate floored at 0.3, K/0.3 > max, clamps to max
        assert_eq!(t.effective_s(0.0), 18.0);
        // very fast extrusion clamps to min
        assert_eq!(t.effective_s(10.0), 6.0);
    }
}
