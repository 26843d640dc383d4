//! Weighted sampling without replacement.
//!
//! Two interchangeable algorithms are provided. [`WeightedReplacer`] scans
//! the weight list linearly and removes picked entries, which wins on small
//! populations. [`WeightedResample`] binary-searches a CDF and redraws on
//! duplicates, which wins on large ones. [`BestWeighted`] times both at
//! initialization and keeps the faster for the current population.
//!
//! Sampling is deterministic given the caller's RNG state.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Errors raised by the samplers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SamplerError {
    /// Fewer positive-weight elements than the requested sample size.
    #[error("cannot sample {requested} of {available} elements")]
    OutOfRange { requested: usize, available: usize },

    /// The sampler was not initialized.
    #[error("sampler not initialized")]
    Uninitialized,
}

/// A weighted without-replacement sampler over element indices.
pub trait WeightedSampler: Send {
    /// Sets the weights. Zero-weight elements are never drawn.
    fn initialize(&mut self, weights: &[u64]);

    /// Draws `count` distinct indices, weight-proportionally, without
    /// replacement.
    fn sample(&mut self, rng: &mut StdRng, count: usize) -> Result<Vec<usize>, SamplerError>;
}

/// Linear-scan sampler: each draw scans the remaining weights and removes
/// the picked element.
#[derive(Debug, Default)]
pub struct WeightedReplacer {
    weights: Vec<(usize, u64)>,
}

impl WeightedSampler for WeightedReplacer {
    fn initialize(&mut self, weights: &[u64]) {
        self.weights = weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0)
            .map(|(i, w)| (i, *w))
            .collect();
    }

    fn sample(&mut self, rng: &mut StdRng, count: usize) -> Result<Vec<usize>, SamplerError> {
        if count > self.weights.len() {
            return Err(SamplerError::OutOfRange {
                requested: count,
                available: self.weights.len(),
            });
        }

        let mut remaining = self.weights.clone();
        let mut total: u64 = remaining.iter().map(|(_, w)| w).sum();
        let mut picked = Vec::with_capacity(count);

        for _ in 0..count {
            let mut target = rng.gen_range(0..total);
            let mut chosen = remaining.len() - 1;
            for (pos, (_, weight)) in remaining.iter().enumerate() {
                if target < *weight {
                    chosen = pos;
                    break;
                }
                target -= weight;
            }
            let (index, weight) = remaining.swap_remove(chosen);
            picked.push(index);
            total -= weight;
        }
        Ok(picked)
    }
}

/// CDF sampler: binary-searches cumulative weights and redraws duplicates.
#[derive(Debug, Default)]
pub struct WeightedResample {
    indices: Vec<usize>,
    cdf: Vec<u64>,
    total: u64,
}

impl WeightedSampler for WeightedResample {
    fn initialize(&mut self, weights: &[u64]) {
        self.indices.clear();
        self.cdf.clear();
        let mut running = 0u64;
        for (i, w) in weights.iter().enumerate() {
            if *w == 0 {
                continue;
            }
            running += w;
            self.indices.push(i);
            self.cdf.push(running);
        }
        self.total = running;
    }

    fn sample(&mut self, rng: &mut StdRng, count: usize) -> Result<Vec<usize>, SamplerError> {
        if count > self.indices.len() {
            return Err(SamplerError::OutOfRange {
                requested: count,
                available: self.indices.len(),
            });
        }

        let mut picked = Vec::with_capacity(count);
        let mut seen = vec![false; self.indices.len()];
        while picked.len() < count {
            let target = rng.gen_range(0..self.total);
            let pos = self.cdf.partition_point(|cum| *cum <= target);
            if seen[pos] {
                continue;
            }
            seen[pos] = true;
            picked.push(self.indices[pos]);
        }
        Ok(picked)
    }
}

const BENCHMARK_ITERATIONS: usize = 100;

/// Picks the faster of the two samplers for the current population.
pub struct BestWeighted {
    expected_sample_size: usize,
    inner: Box<dyn WeightedSampler>,
}

impl BestWeighted {
    /// Creates an uninitialized best-of sampler tuned for samples of
    /// `expected_sample_size`.
    #[must_use]
    pub fn new(expected_sample_size: usize) -> Self {
        Self {
            expected_sample_size,
            inner: Box::new(WeightedReplacer::default()),
        }
    }
}

impl WeightedSampler for BestWeighted {
    fn initialize(&mut self, weights: &[u64]) {
        let mut candidates: Vec<Box<dyn WeightedSampler>> = vec![
            Box::new(WeightedReplacer::default()),
            Box::new(WeightedResample::default()),
        ];

        let positive = weights.iter().filter(|w| **w > 0).count();
        let size = self.expected_sample_size.min(positive);

        let mut best: Option<(std::time::Duration, usize)> = None;
        for (pos, sampler) in candidates.iter_mut().enumerate() {
            sampler.initialize(weights);
            let mut rng = StdRng::seed_from_u64(pos as u64);
            let start = Instant::now();
            let mut ok = true;
            for _ in 0..BENCHMARK_ITERATIONS {
                if sampler.sample(&mut rng, size).is_err() {
                    ok = false;
                    break;
                }
            }
            if !ok {
                continue;
            }
            let elapsed = start.elapsed();
            if best.map_or(true, |(t, _)| elapsed < t) {
                best = Some((elapsed, pos));
            }
        }

        let chosen = best.map_or(0, |(_, pos)| pos);
        self.inner = candidates.swap_remove(chosen);
    }

    fn sample(&mut self, rng: &mut StdRng, count: usize) -> Result<Vec<usize>, SamplerError> {
        self.inner.sample(rng, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    fn check_sampler(sampler: &mut dyn WeightedSampler) {
        sampler.initialize(&[1, 2, 3, 4, 5]);
        let mut rng = rng();
        let picked = sampler.sample(&mut rng, 3).unwrap();
        assert_eq!(picked.len(), 3);
        let mut unique = picked.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 3, "sampled with replacement: {picked:?}");
        assert!(picked.iter().all(|i| *i < 5));
    }

    #[test]
    fn replacer_samples_distinct() {
        check_sampler(&mut WeightedReplacer::default());
    }

    #[test]
    fn resample_samples_distinct() {
        check_sampler(&mut WeightedResample::default());
    }

    #[test]
    fn best_samples_distinct() {
        let mut best = BestWeighted::new(3);
        check_sampler(&mut best);
    }

    #[test]
    fn oversample_fails() {
        let mut sampler = WeightedReplacer::default();
        sampler.initialize(&[1, 1]);
        assert_eq!(
            sampler.sample(&mut rng(), 3),
            Err(SamplerError::OutOfRange {
                requested: 3,
                available: 2
            })
        );
    }

    #[test]
    fn zero_weights_are_never_drawn() {
        let mut sampler = WeightedResample::default();
        sampler.initialize(&[0, 7, 0, 7]);
        let mut rng = rng();
        for _ in 0..50 {
            for index in sampler.sample(&mut rng, 2).unwrap() {
                assert!(index == 1 || index == 3);
            }
        }
    }

    #[test]
    fn sampling_is_deterministic_for_a_seed() {
        let mut a = WeightedReplacer::default();
        let mut b = WeightedReplacer::default();
        a.initialize(&[3, 1, 4, 1, 5]);
        b.initialize(&[3, 1, 4, 1, 5]);

        let mut rng_a = StdRng::seed_from_u64(7);
        let mut rng_b = StdRng::seed_from_u64(7);
        assert_eq!(
            a.sample(&mut rng_a, 3).unwrap(),
            b.sample(&mut rng_b, 3).unwrap()
        );
    }

    #[test]
    fn heavier_weights_win_more_often() {
        let mut sampler = WeightedReplacer::default();
        sampler.initialize(&[1, 100]);
        let mut rng = rng();
        let mut heavy_first = 0;
        for _ in 0..200 {
            if sampler.sample(&mut rng, 1).unwrap()[0] == 1 {
                heavy_first += 1;
            }
        }
        assert!(heavy_first > 150, "heavy element drawn {heavy_first}/200");
    }
}
