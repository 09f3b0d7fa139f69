//! Rolling baselines
//!
//! Trailing-window statistics used to interpret a day's value relative to
//! its recent history: mean, population standard deviation, z-scores and
//! least-squares slopes.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default trailing window in days
pub const DEFAULT_BASELINE_WINDOW: usize = 14;

/// Fixed-capacity trailing window of observations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingBaseline {
    values: VecDeque<f64>,
    window_size: usize,
}

impl Default for RollingBaseline {
    fn default() -> Self {
        Self::new(DEFAULT_BASELINE_WINDOW)
    }
}

impl RollingBaseline {
    /// Create a baseline holding at most `window_size` values
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            values: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Push a value, evicting the oldest when full. Non-finite values are ignored.
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.values.push_back(value);
        while self.values.len() > self.window_size {
            self.values.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        mean(self.values.iter().copied())
    }

    pub fn std_dev(&self) -> Option<f64> {
        population_std(self.values.iter().copied())
    }

    /// Standardized deviation of `value` from this baseline.
    ///
    /// The denominator is floored at `min_std` so a near-constant baseline
    /// cannot produce an unbounded score.
    pub fn z_score(&self, value: f64, min_std: f64) -> Option<f64> {
        let mean = self.mean()?;
        let std = self.std_dev()?.max(min_std);
        if std > 0.0 {
            Some((value - mean) / std)
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Arithmetic mean, `None` for an empty input
pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count > 0 {
        Some(sum / count as f64)
    } else {
        None
    }
}

/// Population standard deviation (ddof = 0), `None` for an empty input
pub fn population_std(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let values: Vec<f64> = values.into_iter().collect();
    let mu = mean(values.iter().copied())?;
    let variance = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.max(0.0).sqrt())
}

/// Least-squares slope of `values` against their position (units per step).
///
/// Returns 0.0 for fewer than two values.
pub fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n as f64 - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (y - y_mean);
        denominator += dx * dx;
    }
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}
