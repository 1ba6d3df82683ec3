use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Multiplicative jitter in [0, 1]; the computed delay is scaled by a
    /// random factor in [1 - jitter, 1 + jitter].
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5 * 60),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Exponential backoff with jitter. Owns its RNG so tests can seed it.
pub struct BackoffCalculator {
    config: BackoffConfig,
    rng: Mutex<StdRng>,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(config: BackoffConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Delay for the given 0-indexed attempt.
    pub fn calculate(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay.as_secs_f64()
            * self.config.multiplier.powi(attempt as i32);
        let capped = base.min(self.config.max_delay.as_secs_f64());

        let jittered = if self.config.jitter_factor > 0.0 {
            let jitter: f64 = self.rng.lock().gen_range(-1.0..1.0) * self.config.jitter_factor;
            capped * (1.0 + jitter)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter_factor: 0.0,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn doubles_each_attempt_without_jitter() {
        let calc = BackoffCalculator::new(no_jitter());
        assert_eq!(calc.calculate(0), Duration::from_secs(1));
        assert_eq!(calc.calculate(1), Duration::from_secs(2));
        assert_eq!(calc.calculate(2), Duration::from_secs(4));
        assert_eq!(calc.calculate(3), Duration::from_secs(8));
    }

    #[test]
    fn caps_at_max_delay() {
        let calc = BackoffCalculator::new(no_jitter());
        assert_eq!(calc.calculate(20), Duration::from_secs(5 * 60));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let calc = BackoffCalculator::with_seed(BackoffConfig::default(), 7);
        for attempt in 0..6 {
            let base = 2f64.powi(attempt as i32).min(300.0);
            let delay = calc.calculate(attempt).as_secs_f64();
            assert!(delay >= base * 0.8 - f64::EPSILON, "attempt {attempt}: {delay}");
            assert!(delay <= base * 1.2 + f64::EPSILON, "attempt {attempt}: {delay}");
        }
    }

    #[test]
    fn seeded_calculator_is_deterministic() {
        let a = BackoffCalculator::with_seed(BackoffConfig::default(), 42);
        let b = BackoffCalculator::with_seed(BackoffConfig::default(), 42);
        for attempt in 0..5 {
            assert_eq!(a.calculate(attempt), b.calculate(attempt));
        }
    }
}
