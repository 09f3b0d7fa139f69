//! Forecast confidence and drift
//!
//! Confidence blends three signals:
//! - completeness: share of harmonized cells backed by real observations
//! - stability: inverse of recent day-over-day volatility
//! - accuracy: backtest error over the most recent held-out days
//!
//! Drift is the exponentially weighted mean of realized minus predicted
//! values in that backtest.

use crate::baseline::population_std;
use crate::config::ConfidenceConfig;
use crate::forecast::Forecaster;
use crate::harmonizer::HarmonizedTable;
use crate::types::{clip_unit, BehaviorIndexSeries, ConfidenceReport};

/// Result of holding out the tail of the index
#[derive(Debug, Clone, PartialEq)]
pub struct Backtest {
    /// Realized minus predicted, oldest first
    pub residuals: Vec<f64>,
    pub mean_absolute_error: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceMonitor {
    config: ConfidenceConfig,
}

impl ConfidenceMonitor {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    /// Evaluate confidence for a forecast built on `index`.
    ///
    /// History shorter than `min_history` yields the neutral report.
    pub fn evaluate(
        &self,
        table: &HarmonizedTable,
        index: &BehaviorIndexSeries,
        forecaster: &Forecaster,
    ) -> ConfidenceReport {
        let completeness = table.completeness();
        let values = index.values();
        if values.len() < self.config.min_history {
            return ConfidenceReport::neutral(completeness);
        }

        let stability = self.stability(&values);
        let backtest = self.backtest(&values, forecaster);
        let accuracy = backtest.as_ref().map(|b| {
            if self.config.error_scale > 0.0 {
                clip_unit(1.0 - b.mean_absolute_error / self.config.error_scale)
            } else {
                0.0
            }
        });
        let drift = backtest
            .as_ref()
            .map(|b| self.ewma(&b.residuals))
            .unwrap_or(0.0);

        let mut weighted = self.config.completeness_weight * completeness
            + self.config.stability_weight * stability;
        let mut total = self.config.completeness_weight + self.config.stability_weight;
        if let Some(accuracy) = accuracy {
            weighted += self.config.accuracy_weight * accuracy;
            total += self.config.accuracy_weight;
        }
        let confidence = if total > 0.0 {
            clip_unit(weighted / total)
        } else {
            0.5
        };

        ConfidenceReport {
            confidence,
            drift,
            completeness,
            stability,
            accuracy,
        }
    }

    /// 1 minus the day-over-day volatility relative to the cap, clipped
    pub fn stability(&self, values: &[f64]) -> f64 {
        let start = values.len().saturating_sub(self.config.stability_window.max(2));
        let changes: Vec<f64> = values[start..].windows(2).map(|w| w[1] - w[0]).collect();
        match population_std(changes) {
            Some(volatility) if self.config.volatility_cap > 0.0 => {
                clip_unit(1.0 - volatility / self.config.volatility_cap)
            }
            _ => 0.5,
        }
    }

    /// Forecast the held-out tail from the preceding history.
    ///
    /// `None` when there are no held-out days or fewer than two training points.
    pub fn backtest(&self, values: &[f64], forecaster: &Forecaster) -> Option<Backtest> {
        let holdout = self.config.backtest_days;
        if holdout == 0 || values.len() < holdout + 2 {
            return None;
        }
        let split = values.len() - holdout;
        let output = forecaster.project(&values[..split], holdout);

        let residuals: Vec<f64> = values[split..]
            .iter()
            .zip(&output.projections)
            .map(|(actual, predicted)| actual - clip_unit(predicted.point))
            .collect();
        if residuals.is_empty() {
            return None;
        }
        let mean_absolute_error =
            residuals.iter().map(|r| r.abs()).sum::<f64>() / residuals.len() as f64;

        Some(Backtest {
            residuals,
            mean_absolute_error,
        })
    }

    fn ewma(&self, residuals: &[f64]) -> f64 {
        let alpha = self.config.drift_alpha;
        let mut iter = residuals.iter().filter(|r| r.is_finite());
        let Some(first) = iter.next() else {
            return 0.0;
        };
        iter.fold(*first, |acc, r| alpha * r + (1.0 - alpha) * acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonizer::{HarmonizedColumn, SourceReport, SourceStatus};
    use crate::types::IndexPoint;
    use chrono::{Duration, NaiveDate};

    fn index(values: &[f64]) -> BehaviorIndexSeries {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        BehaviorIndexSeries {
            points: values
                .iter()
                .enumerate()
                .map(|(i, v)| IndexPoint {
                    date: start + Duration::days(i as i64),
                    value: *v,
                })
                .collect(),
        }
    }

    fn table(n: usize, observed: usize) -> HarmonizedTable {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        HarmonizedTable {
            dates: (0..n as i64).map(|i| start + Duration::days(i)).collect(),
            columns: vec![HarmonizedColumn {
                component: "a".to_string(),
                values: vec![0.5; n],
            }],
            composite: vec![0.5; n],
            sources: vec![SourceReport {
                component: "a".to_string(),
                status: SourceStatus::Available,
                observed_days: observed,
                filled_days: 0,
                neutral_days: n - observed,
                coverage: observed as f64 / n as f64,
            }],
        }
    }

    #[test]
    fn test_short_history_is_neutral() {
        let monitor = ConfidenceMonitor::default();
        let report = monitor.evaluate(&table(5, 5), &index(&[0.4; 5]), &Forecaster::default());
        assert_eq!(report.confidence, 0.5);
        assert_eq!(report.drift, 0.0);
        assert_eq!(report.accuracy, None);
        assert_eq!(report.completeness, 1.0);
    }

    #[test]
    fn test_steady_complete_history_is_confident() {
        let monitor = ConfidenceMonitor::default();
        let report = monitor.evaluate(&table(30, 30), &index(&[0.4; 30]), &Forecaster::default());

        assert_eq!(report.completeness, 1.0);
        assert_eq!(report.stability, 1.0);
        assert!((report.accuracy.unwrap() - 1.0).abs() < 1e-9);
        assert!(report.drift.abs() < 1e-9);
        assert!((report.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_volatile_history_lowers_stability() {
        let monitor = ConfidenceMonitor::default();
        let values: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 0.2 } else { 0.8 }).collect();
        assert_eq!(monitor.stability(&values), 0.0);
    }

    #[test]
    fn test_drift_tracks_underprediction() {
        let monitor = ConfidenceMonitor::default();
        // Flat history followed by a jump the backtest cannot anticipate
        let mut values = vec![0.3; 23];
        values.extend([0.6; 7]);
        let report = monitor.evaluate(&table(30, 15), &index(&values), &Forecaster::default());

        assert!(report.drift > 0.2);
        assert!(report.accuracy.unwrap() < 0.5);
        assert_eq!(report.completeness, 0.5);
        assert!(report.confidence < 0.8);
    }
}
