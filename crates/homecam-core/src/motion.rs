//! Synthetic motion indicator.
//!
//! The dashboard shows a "motion detected" badge that is not derived from
//! the video. Each tick has a fixed chance of reporting motion.

use rand::Rng;
use std::time::Duration;

/// Tick-driven motion simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSimulator {
    interval: Duration,
    probability: f64,
}

impl Default for MotionSimulator {
    /// 30 % chance every 8 seconds.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(8),
            probability: 0.3,
        }
    }
}

impl MotionSimulator {
    /// Simulator with a custom cadence; `probability` is clamped to `0..=1`.
    pub fn new(interval: Duration, probability: f64) -> Self {
        Self {
            interval,
            probability: probability.clamp(0.0, 1.0),
        }
    }

    /// Time between ticks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Chance of motion per tick.
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Roll once; true means motion was "detected" on this tick.
    pub fn tick<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.gen_bool(self.probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn extremes_are_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        let never = MotionSimulator::new(Duration::from_secs(1), 0.0);
        let always = MotionSimulator::new(Duration::from_secs(1), 4.0);
        assert!((0..50).all(|_| !never.tick(&mut rng)));
        assert!((0..50).all(|_| always.tick(&mut rng)));
        assert_eq!(always.probability(), 1.0);
    }

    #[test]
    fn default_rate_is_roughly_thirty_percent() {
        let mut rng = StdRng::seed_from_u64(42);
        let sim = MotionSimulator::default();
        let hits = (0..10_000).filter(|_| sim.tick(&mut rng)).count();
        assert!((2_500..3_500).contains(&hits), "hits = {}", hits);
        assert_eq!(sim.interval(), Duration::from_secs(8));
    }
}
