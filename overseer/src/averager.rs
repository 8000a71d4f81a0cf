/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Running mean of thread-count estimates.

use serde::Serialize;

/// Unweighted running mean plus the most recent raw sample.
///
/// Owned by exactly one scheduler loop.  Reset whenever the scheduler changes
/// its tuning parameters, because samples taken under the old parameters no
/// longer describe the new steady state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RollingAverage {
    mean: f64,
    last_sample: f64,
    sample_count: u64,
}

impl RollingAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `sample` into the mean and return the new mean.
    ///
    /// `mean' = (sample + n·mean) / (n + 1)`
    pub fn update(&mut self, sample: f64) -> f64 {
        self.last_sample = sample;
        let n = self.sample_count as f64;
        self.mean = (sample + n * self.mean) / (n + 1.0);
        self.sample_count += 1;
        self.mean
    }

    /// Zero the mean, the sample count and the last sample.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn last_sample(&self) -> f64 {
        self.last_sample
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// The mean rounded up to whole threads, as used for launches.
    pub fn ceil_threads(&self) -> u64 {
        crate::job::whole_threads(self.mean)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_average_is_zeroed() {
        let avg = RollingAverage::new();
        assert_eq!(avg.mean(), 0.0);
        assert_eq!(avg.last_sample(), 0.0);
        assert_eq!(avg.sample_count(), 0);
    }

    #[test]
    fn mean_equals_arithmetic_mean_of_samples() {
        let samples = [3.0, 9.0, 4.0, 12.0, 7.5, 0.0, 21.0];
        let mut avg = RollingAverage::new();
        for s in samples {
            avg.update(s);
        }

        let expected = samples.iter().sum::<f64>() / samples.len() as f64;
        assert!(
            (avg.mean() - expected).abs() < 1e-9,
            "expected {expected}, got {}",
            avg.mean()
        );
        assert_eq!(avg.last_sample(), 21.0);
        assert_eq!(avg.sample_count(), samples.len() as u64);
    }

    #[test]
    fn update_returns_new_mean() {
        let mut avg = RollingAverage::new();
        assert_eq!(avg.update(10.0), 10.0);
        assert_eq!(avg.update(20.0), 15.0);
    }

    #[test]
    fn last_sample_tracks_raw_input_not_mean() {
        let mut avg = RollingAverage::new();
        avg.update(100.0);
        avg.update(0.0);
        assert_eq!(avg.last_sample(), 0.0);
        assert_eq!(avg.mean(), 50.0);
    }

    #[test]
    fn reset_clears_all_fields() {
        let mut avg = RollingAverage::new();
        avg.update(5.0);
        avg.update(7.0);
        avg.reset();
        assert_eq!(avg, RollingAverage::default());

        // Fresh samples after reset are not diluted by old ones
        avg.update(2.0);
        assert_eq!(avg.mean(), 2.0);
    }

    #[test]
    fn ceil_threads_rounds_up() {
        let mut avg = RollingAverage::new();
        avg.update(3.0);
        avg.update(4.0);
        assert_eq!(avg.ceil_threads(), 4);
    }
}
