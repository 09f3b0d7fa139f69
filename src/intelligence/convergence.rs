//! Convergence analysis
//!
//! Measures whether correlated components are pushing the index the same
//! way. Correlations and slopes are taken on the stress scale, so an
//! inverted component rising counts as stress falling.

use crate::baseline::linear_slope;
use crate::config::ConvergenceConfig;
use crate::harmonizer::HarmonizedTable;
use crate::index::ComponentCatalog;
use crate::types::{
    BehaviorIndexSeries, ConvergenceResult, CorrelationMatrix, Polarity, SignalPair, TrendDirection,
};

#[derive(Debug, Clone, Default)]
pub struct ConvergenceEngine {
    config: ConvergenceConfig,
    catalog: ComponentCatalog,
}

impl ConvergenceEngine {
    pub fn new(config: ConvergenceConfig, catalog: ComponentCatalog) -> Self {
        Self { config, catalog }
    }

    /// Score convergence of the matrix's component pairs.
    ///
    /// A pair with `|r|` at or above the configured minimum is reinforcing
    /// when it correlates positively and both components trend with the
    /// index; otherwise it is conflicting. Weaker pairs are ignored.
    pub fn score(
        &self,
        matrix: &CorrelationMatrix,
        table: &HarmonizedTable,
        index: &BehaviorIndexSeries,
    ) -> ConvergenceResult {
        if matrix.size() < 2 || index.len() < 2 {
            return ConvergenceResult::none();
        }

        let window = self.config.trend_window.max(2);
        let index_tail: Vec<f64> = index.tail(window).iter().map(|p| p.value).collect();
        let trend =
            TrendDirection::from_slope(linear_slope(&index_tail), self.config.slope_dead_band);

        let directions: Vec<Option<TrendDirection>> = matrix
            .components
            .iter()
            .map(|name| self.stress_direction(table, name, window))
            .collect();

        let mut reinforcing = Vec::new();
        let mut conflicting = Vec::new();
        let k = matrix.size();
        for i in 0..k {
            for j in (i + 1)..k {
                let Some(raw) = matrix.get(i, j) else {
                    continue;
                };
                let first = &matrix.components[i];
                let second = &matrix.components[j];
                let r = raw * self.sign(first) * self.sign(second);
                if !r.is_finite() || r.abs() < self.config.min_abs_correlation {
                    continue;
                }

                let aligned = directions[i] == Some(trend) && directions[j] == Some(trend);
                let pair = SignalPair {
                    first: first.clone(),
                    second: second.clone(),
                    correlation: r,
                };
                if r > 0.0 && aligned {
                    reinforcing.push(pair);
                } else {
                    conflicting.push(pair);
                }
            }
        }

        let pairs = reinforcing.len() + conflicting.len();
        let score = if pairs > 0 {
            100.0 * reinforcing.len() as f64 / pairs as f64
        } else {
            0.0
        };

        ConvergenceResult {
            score,
            reinforcing,
            conflicting,
            trend,
        }
    }

    fn sign(&self, component: &str) -> f64 {
        match self.catalog.polarity(component) {
            Polarity::Direct => 1.0,
            Polarity::Inverted => -1.0,
        }
    }

    fn stress_direction(
        &self,
        table: &HarmonizedTable,
        component: &str,
        window: usize,
    ) -> Option<TrendDirection> {
        let column = table.column(component)?;
        let start = column.values.len().saturating_sub(window);
        let polarity = self.catalog.polarity(component);
        let tail: Vec<f64> = column.values[start..]
            .iter()
            .map(|v| polarity.stress_value(*v))
            .collect();
        Some(TrendDirection::from_slope(linear_slope(&tail), self.config.slope_dead_band))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonizer::HarmonizedColumn;
    use crate::intelligence::CorrelationEngine;
    use crate::types::IndexPoint;
    use chrono::{Duration, NaiveDate};

    fn table(columns: Vec<(&str, Vec<f64>)>) -> HarmonizedTable {
        let n = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let start = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        HarmonizedTable {
            dates: (0..n as i64).map(|i| start + Duration::days(i)).collect(),
            columns: columns
                .into_iter()
                .map(|(name, values)| HarmonizedColumn {
                    component: name.to_string(),
                    values,
                })
                .collect(),
            composite: vec![0.5; n],
            sources: Vec::new(),
        }
    }

    fn index(values: &[f64]) -> BehaviorIndexSeries {
        let start = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
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

    fn rising(n: usize, from: f64) -> Vec<f64> {
        (0..n).map(|i| from + 0.02 * i as f64).collect()
    }

    fn falling(n: usize, from: f64) -> Vec<f64> {
        (0..n).map(|i| from - 0.02 * i as f64).collect()
    }

    #[test]
    fn test_all_reinforcing() {
        let t = table(vec![("a", rising(10, 0.2)), ("b", rising(10, 0.3))]);
        let matrix = CorrelationEngine::default().compute(&t);
        let result = ConvergenceEngine::default().score(&matrix, &t, &index(&rising(10, 0.25)));

        assert_eq!(result.score, 100.0);
        assert_eq!(result.reinforcing.len(), 1);
        assert_eq!(result.trend, TrendDirection::Increasing);
    }

    #[test]
    fn test_anticorrelated_pair_conflicts() {
        let t = table(vec![("a", rising(10, 0.2)), ("b", falling(10, 0.8))]);
        let matrix = CorrelationEngine::default().compute(&t);
        let result = ConvergenceEngine::default().score(&matrix, &t, &index(&rising(10, 0.25)));

        assert_eq!(result.score, 0.0);
        assert_eq!(result.conflicting.len(), 1);
        assert!(result.conflicting[0].correlation < 0.0);
    }

    #[test]
    fn test_inverted_component_reinforces() {
        // Mobility falling means stress rising
        let t = table(vec![("economic", rising(10, 0.2)), ("mobility", falling(10, 0.8))]);
        let matrix = CorrelationEngine::default().compute(&t);
        let engine = ConvergenceEngine::new(
            ConvergenceConfig::default(),
            ComponentCatalog::new(["mobility"]),
        );
        let result = engine.score(&matrix, &t, &index(&rising(10, 0.25)));

        assert_eq!(result.score, 100.0);
        assert!(result.reinforcing[0].correlation > 0.0);
    }

    #[test]
    fn test_empty_inputs_are_none() {
        let t = table(vec![("a", rising(10, 0.2))]);
        let matrix = CorrelationEngine::default().compute(&t);
        let result = ConvergenceEngine::default().score(&matrix, &t, &index(&rising(10, 0.2)));
        assert_eq!(result, ConvergenceResult::none());

        let result = ConvergenceEngine::default().score(
            &CorrelationMatrix::empty(),
            &t,
            &BehaviorIndexSeries::default(),
        );
        assert_eq!(result, ConvergenceResult::none());
    }
}
