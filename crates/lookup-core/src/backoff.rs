use std::time::Duration;

use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Lower bound of the random extra wait added to a rate-limit demand.
    pub jitter_min: Duration,
    /// Upper bound (inclusive) of that extra wait.
    pub jitter_max: Duration,
    /// Fixed pause before retrying after a timeout or transport failure.
    pub retry_pause: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            jitter_min: Duration::from_secs(5),
            jitter_max: Duration::from_secs(15),
            retry_pause: Duration::from_secs(1),
        }
    }
}

/// Turns upstream rate-limit demands into sleep durations.
///
/// The jitter desynchronizes concurrent resolutions that hit the same limit,
/// so they do not all retry in the same instant.
#[derive(Clone, Copy, Debug, Default)]
pub struct BackoffController {
    cfg: BackoffConfig,
}

impl BackoffController {
    pub fn new(cfg: BackoffConfig) -> Self {
        Self { cfg }
    }

    /// `wait + jitter`, jitter drawn uniformly from `[jitter_min, jitter_max]`.
    pub fn decide(&self, wait: Duration) -> Duration {
        self.decide_with(wait, &mut rand::thread_rng())
    }

    pub fn decide_with<R: Rng + ?Sized>(&self, wait: Duration, rng: &mut R) -> Duration {
        let lo = self.cfg.jitter_min.min(self.cfg.jitter_max).as_millis() as u64;
        let hi = self.cfg.jitter_min.max(self.cfg.jitter_max).as_millis() as u64;
        let jitter = Duration::from_millis(rng.gen_range(lo..=hi));
        wait.saturating_add(jitter)
    }

    pub fn retry_pause(&self) -> Duration {
        self.cfg.retry_pause
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn sleep_is_wait_plus_bounded_jitter() {
        let ctl = BackoffController::default();
        let mut rng = StdRng::seed_from_u64(7);
        let wait = Duration::from_secs(10);

        for _ in 0..200 {
            let d = ctl.decide_with(wait, &mut rng);
            assert!(d >= Duration::from_secs(15), "{d:?}");
            assert!(d <= Duration::from_secs(25), "{d:?}");
        }
    }

    #[test]
    fn zero_jitter_returns_exact_wait() {
        let ctl = BackoffController::new(BackoffConfig {
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
            retry_pause: Duration::ZERO,
        });
        assert_eq!(ctl.decide(Duration::from_secs(3)), Duration::from_secs(3));
    }

    #[test]
    fn inverted_bounds_are_tolerated() {
        let ctl = BackoffController::new(BackoffConfig {
            jitter_min: Duration::from_secs(2),
            jitter_max: Duration::from_secs(1),
            retry_pause: Duration::ZERO,
        });
        let d = ctl.decide(Duration::ZERO);
        assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(2));
    }
}
