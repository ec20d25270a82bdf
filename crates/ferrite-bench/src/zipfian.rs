//! Zipfian-distributed random values.
//!
//! The standard rejection-free Zipfian generator (Gray et al.): item 0 is
//! the most popular, and popularity decays with the skew parameter
//! `theta`. The generator holds only precomputed constants; the uniform
//! source is passed per draw, so callers can snapshot and restore their
//! RNG for deterministic replay without touching the generator.

use rand::Rng;

/// Zipfian generator over `0..items`.
#[derive(Debug, Clone)]
pub struct ZipfianRandom {
    items: u64,
    theta: f64,
    alpha: f64,
    zeta_n: f64,
    eta: f64,
}

impl ZipfianRandom {
    /// Creates a generator over `0..items` with skew `theta`.
    ///
    /// `theta` must be in `[0, 1)`; 0 degenerates to (nearly) uniform,
    /// 0.99 is the customary "heavily skewed" setting.
    ///
    /// # Panics
    ///
    /// Panics if `items` is zero or `theta` is out of range.
    #[must_use]
    pub fn new(items: u64, theta: f64) -> Self {
        assert!(items > 0, "zipfian needs at least one item");
        assert!((0.0..1.0).contains(&theta), "theta must be in [0, 1)");

        let zeta_n = zeta(items, theta);
        let zeta_two = zeta(items.min(2), theta);
        let alpha = 1.0 / (1.0 - theta);
        let eta = if items > 1 {
            (1.0 - (2.0 / items as f64).powf(1.0 - theta)) / (1.0 - zeta_two / zeta_n)
        } else {
            0.0
        };
        Self {
            items,
            theta,
            alpha,
            zeta_n,
            eta,
        }
    }

    /// Number of items in the distribution.
    #[inline]
    #[must_use]
    pub const fn items(&self) -> u64 {
        self.items
    }

    /// Draws the next value in `0..items` using `rng` as the uniform
    /// source.
    pub fn next(&self, rng: &mut impl Rng) -> u64 {
        if self.items == 1 {
            return 0;
        }
        let u: f64 = rng.gen();
        let uz = u * self.zeta_n;
        if uz < 1.0 {
            return 0;
        }
        if uz < 1.0 + 0.5f64.powf(self.theta) {
            return 1;
        }
        let value = (self.items as f64 * (self.eta * u - self.eta + 1.0).powf(self.alpha)) as u64;
        value.min(self.items - 1)
    }
}

/// Partial harmonic sum `sum(1 / i^theta, i = 1..=n)`.
fn zeta(n: u64, theta: f64) -> f64 {
    (1..=n).map(|i| 1.0 / (i as f64).powf(theta)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_values_stay_in_range() {
        let zipf = ZipfianRandom::new(100, 0.99);
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..10_000 {
            assert!(zipf.next(&mut rng) < 100);
        }
    }

    #[test]
    fn test_single_item() {
        let zipf = ZipfianRandom::new(1, 0.5);
        let mut rng = SmallRng::seed_from_u64(7);
        assert_eq!(zipf.next(&mut rng), 0);
    }

    #[test]
    fn test_skew_favors_low_items() {
        let zipf = ZipfianRandom::new(1000, 0.99);
        let mut rng = SmallRng::seed_from_u64(7);
        let mut head = 0u64;
        const DRAWS: u64 = 20_000;
        for _ in 0..DRAWS {
            if zipf.next(&mut rng) < 10 {
                head += 1;
            }
        }
        // With theta = 0.99 the top 1% of items dominates.
        assert!(head > DRAWS / 2, "head hits: {}/{}", head, DRAWS);
    }

    #[test]
    fn test_replay_with_cloned_rng_is_identical() {
        let zipf = ZipfianRandom::new(500, 0.9);
        let mut rng = SmallRng::seed_from_u64(42);
        let saved = rng.clone();
        let first: Vec<u64> = (0..100).map(|_| zipf.next(&mut rng)).collect();
        let mut rng = saved;
        let second: Vec<u64> = (0..100).map(|_| zipf.next(&mut rng)).collect();
        assert_eq!(first, second);
    }
}
