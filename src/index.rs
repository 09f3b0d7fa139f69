//! Composite index calculation
//!
//! Combines harmonized component columns into the behavior stress index:
//! `index[t] = clip(Σ w_i · stress_i[t], 0, 1)` where `stress_i` applies
//! the component's polarity to its harmonized value.

use crate::config::{IndexConfig, DEFAULT_WEIGHTS};
use crate::error::{IndexError, IndexResult};
use crate::harmonizer::HarmonizedTable;
use crate::types::{
    clip_unit, BehaviorIndexSeries, Contribution, IndexPoint, Polarity, DEFAULT_INDEX_VALUE,
    NEUTRAL_VALUE,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Tolerance for the weight-sum invariant
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// One active component and its normalized weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentWeight {
    pub component: String,
    pub weight: f64,
}

/// Normalized set of component weights.
///
/// Construction derives the active component list once: every active weight
/// is positive and the weights sum to 1.0. Ratios between raw weights are
/// preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSet {
    active: Vec<ComponentWeight>,
}

impl Default for WeightSet {
    fn default() -> Self {
        Self::default_set()
    }
}

impl WeightSet {
    /// Normalize raw weights.
    ///
    /// Negative or non-finite weights are rejected. Zero weights are
    /// excluded from the active list. A set whose total is not positive is
    /// replaced by [`DEFAULT_WEIGHTS`].
    pub fn from_raw<I, S>(raw: I) -> IndexResult<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut positive: BTreeMap<String, f64> = BTreeMap::new();
        for (component, value) in raw {
            let component = component.into();
            if !value.is_finite() || value < 0.0 {
                return Err(IndexError::InvalidWeight { component, value });
            }
            if value > 0.0 {
                positive.insert(component, value);
            }
        }

        // Scale by the largest weight first so finite inputs cannot overflow the sum
        let max = positive.values().copied().fold(0.0, f64::max);
        if max <= 0.0 {
            return Ok(Self::default_set());
        }
        for weight in positive.values_mut() {
            *weight /= max;
        }

        let total: f64 = positive.values().sum();
        Ok(Self::normalized(positive, total))
    }

    /// The documented default weight set
    pub fn default_set() -> Self {
        let raw: BTreeMap<String, f64> = DEFAULT_WEIGHTS
            .iter()
            .map(|(name, weight)| (name.to_string(), *weight))
            .collect();
        let total = raw.values().sum();
        Self::normalized(raw, total)
    }

    fn normalized(raw: BTreeMap<String, f64>, total: f64) -> Self {
        let active = raw
            .into_iter()
            .map(|(component, weight)| ComponentWeight {
                component,
                weight: weight / total,
            })
            .collect();
        Self { active }
    }

    /// Active components, sorted by name
    pub fn active(&self) -> &[ComponentWeight] {
        &self.active
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(|w| w.component.as_str())
    }

    pub fn weight(&self, component: &str) -> Option<f64> {
        self.active
            .iter()
            .find(|w| w.component == component)
            .map(|w| w.weight)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.active.iter().map(|w| w.weight).sum()
    }

    /// Renormalize over the active components accepted by `keep`.
    ///
    /// Returns `None` when no active component remains.
    pub fn restricted_to(&self, keep: impl Fn(&str) -> bool) -> Option<WeightSet> {
        let remaining: BTreeMap<String, f64> = self
            .active
            .iter()
            .filter(|w| keep(&w.component))
            .map(|w| (w.component.clone(), w.weight))
            .collect();
        let total: f64 = remaining.values().sum();
        if total > 0.0 {
            Some(Self::normalized(remaining, total))
        } else {
            None
        }
    }
}

/// Per-component polarity catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentCatalog {
    inverted: BTreeSet<String>,
}

impl ComponentCatalog {
    pub fn new<I, S>(inverted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inverted: inverted.into_iter().map(Into::into).collect(),
        }
    }

    pub fn polarity(&self, component: &str) -> Polarity {
        if self.inverted.contains(component) {
            Polarity::Inverted
        } else {
            Polarity::Direct
        }
    }
}

/// Calculator for the weighted composite index
#[derive(Debug, Clone, Default)]
pub struct IndexCalculator {
    catalog: ComponentCatalog,
}

impl IndexCalculator {
    pub fn new(catalog: ComponentCatalog) -> Self {
        Self { catalog }
    }

    /// Build the calculator and weight set from configuration
    pub fn from_config(config: &IndexConfig) -> IndexResult<(Self, WeightSet)> {
        let weights = WeightSet::from_raw(
            config
                .weights
                .iter()
                .map(|(name, weight)| (name.clone(), *weight)),
        )?;
        let catalog = ComponentCatalog::new(config.inverted_components.iter().cloned());
        Ok((Self::new(catalog), weights))
    }

    pub fn catalog(&self) -> &ComponentCatalog {
        &self.catalog
    }

    /// Compute the index for every day of `table`.
    ///
    /// Active components missing from the table are skipped and the rest
    /// renormalized. With no active component present every value is
    /// [`DEFAULT_INDEX_VALUE`].
    pub fn compute(&self, table: &HarmonizedTable, weights: &WeightSet) -> BehaviorIndexSeries {
        let effective = weights.restricted_to(|c| table.column(c).is_some());

        let points = table
            .dates
            .iter()
            .enumerate()
            .map(|(row, date)| {
                let value = match &effective {
                    Some(effective) => clip_unit(
                        self.row_contributions(table, effective, row)
                            .iter()
                            .map(|c| c.contribution)
                            .sum(),
                    ),
                    None => DEFAULT_INDEX_VALUE,
                };
                IndexPoint { date: *date, value }
            })
            .collect();

        BehaviorIndexSeries { points }
    }

    /// Per-component contributions on `date`, active components only.
    ///
    /// Empty when the date is outside the table or no active component is
    /// present.
    pub fn contribution(
        &self,
        table: &HarmonizedTable,
        weights: &WeightSet,
        date: NaiveDate,
    ) -> Vec<Contribution> {
        let Some(row) = table.position(date) else {
            return Vec::new();
        };
        match weights.restricted_to(|c| table.column(c).is_some()) {
            Some(effective) => self.row_contributions(table, &effective, row),
            None => Vec::new(),
        }
    }

    fn row_contributions(
        &self,
        table: &HarmonizedTable,
        weights: &WeightSet,
        row: usize,
    ) -> Vec<Contribution> {
        weights
            .active()
            .iter()
            .filter_map(|w| {
                let column = table.column(&w.component)?;
                let raw = column.values.get(row).copied().unwrap_or(NEUTRAL_VALUE);
                let value = if raw.is_finite() { raw } else { NEUTRAL_VALUE };
                let stress = self.catalog.polarity(&w.component).stress_value(value);
                Some(Contribution {
                    component: w.component.clone(),
                    value,
                    weight: w.weight,
                    contribution: stress * w.weight,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonizer::{HarmonizedColumn, SourceReport, SourceStatus};
    use proptest::prelude::*;

    fn table(columns: Vec<(&str, Vec<f64>)>) -> HarmonizedTable {
        let n = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let dates: Vec<NaiveDate> = (0..n as i64)
            .map(|i| start + chrono::Duration::days(i))
            .collect();
        let sources = columns
            .iter()
            .map(|(name, _)| SourceReport {
                component: name.to_string(),
                status: SourceStatus::Available,
                observed_days: n,
                filled_days: 0,
                neutral_days: 0,
                coverage: 1.0,
            })
            .collect();
        let columns: Vec<HarmonizedColumn> = columns
            .into_iter()
            .map(|(name, values)| HarmonizedColumn {
                component: name.to_string(),
                values,
            })
            .collect();
        let composite = vec![NEUTRAL_VALUE; n];
        HarmonizedTable {
            dates,
            columns,
            composite,
            sources,
        }
    }

    #[test]
    fn test_weights_normalized() {
        let weights = WeightSet::from_raw([("a", 2.0), ("b", 1.0), ("c", 1.0)]).unwrap();
        assert!((weights.total() - 1.0).abs() < WEIGHT_SUM_TOLERANCE);
        assert_eq!(weights.weight("a"), Some(0.5));
        assert_eq!(weights.weight("b"), Some(0.25));
    }

    #[test]
    fn test_zero_weight_excluded() {
        let weights = WeightSet::from_raw([("a", 1.0), ("b", 0.0)]).unwrap();
        assert_eq!(weights.len(), 1);
        assert_eq!(weights.weight("b"), None);
    }

    #[test]
    fn test_negative_weight_rejected() {
        let result = WeightSet::from_raw([("a", 1.0), ("b", -0.5)]);
        assert!(matches!(result, Err(IndexError::InvalidWeight { .. })));
        let result = WeightSet::from_raw([("a", f64::NAN)]);
        assert!(matches!(result, Err(IndexError::InvalidWeight { .. })));
    }

    #[test]
    fn test_overflowing_total_still_normalizes() {
        let weights = WeightSet::from_raw([("a", f64::MAX), ("b", f64::MAX)]).unwrap();
        assert_eq!(weights.weight("a"), Some(0.5));
        assert_eq!(weights.weight("b"), Some(0.5));

        let t = table(vec![("a", vec![0.2]), ("b", vec![0.6])]);
        let index = IndexCalculator::default().compute(&t, &weights);
        assert!((index.values()[0] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_zero_total_uses_default_set() {
        let weights = WeightSet::from_raw([("a", 0.0), ("b", 0.0)]).unwrap();
        assert_eq!(weights, WeightSet::default_set());
        assert_eq!(weights.len(), DEFAULT_WEIGHTS.len());
    }

    #[test]
    fn test_all_zero_weights_yield_default_index() {
        // The default set names none of these columns
        let t = table(vec![("a", vec![0.4, 0.6]), ("b", vec![0.8, 0.2])]);
        let weights = WeightSet::from_raw([("a", 0.0), ("b", 0.0)]).unwrap();
        let index = IndexCalculator::default().compute(&t, &weights);
        assert_eq!(index.values(), vec![DEFAULT_INDEX_VALUE; 2]);
    }

    #[test]
    fn test_inverted_polarity() {
        let t = table(vec![("economic", vec![0.8]), ("mobility", vec![0.2])]);
        let weights = WeightSet::from_raw([("economic", 1.0), ("mobility", 1.0)]).unwrap();
        let calc = IndexCalculator::new(ComponentCatalog::new(["mobility"]));

        let index = calc.compute(&t, &weights);
        // 0.5 * 0.8 + 0.5 * (1 - 0.2)
        assert!((index.values()[0] - 0.8).abs() < 1e-12);

        let contributions = calc.contribution(&t, &weights, t.dates[0]);
        let mobility = contributions
            .iter()
            .find(|c| c.component == "mobility")
            .unwrap();
        assert_eq!(mobility.value, 0.2);
        assert!((mobility.contribution - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_missing_active_component_renormalizes() {
        let t = table(vec![("a", vec![0.6])]);
        let weights = WeightSet::from_raw([("a", 1.0), ("b", 3.0)]).unwrap();
        let calc = IndexCalculator::default();
        assert!((calc.compute(&t, &weights).values()[0] - 0.6).abs() < 1e-12);

        let contributions = calc.contribution(&t, &weights, t.dates[0]);
        assert_eq!(contributions.len(), 1);
        assert_eq!(contributions[0].weight, 1.0);
    }

    #[test]
    fn test_non_finite_values_are_neutral() {
        let t = table(vec![("a", vec![f64::NAN]), ("b", vec![f64::INFINITY])]);
        let weights = WeightSet::from_raw([("a", 1.0), ("b", 1.0)]).unwrap();
        let index = IndexCalculator::default().compute(&t, &weights);
        assert_eq!(index.values(), vec![NEUTRAL_VALUE]);
    }

    #[test]
    fn test_contribution_outside_table_is_empty() {
        let t = table(vec![("a", vec![0.6])]);
        let weights = WeightSet::from_raw([("a", 1.0)]).unwrap();
        let date = NaiveDate::from_ymd_opt(1999, 1, 1).unwrap();
        assert!(IndexCalculator::default()
            .contribution(&t, &weights, date)
            .is_empty());
    }

    #[test]
    fn test_from_config_default() {
        let (calc, weights) = IndexCalculator::from_config(&IndexConfig::default()).unwrap();
        assert_eq!(weights, WeightSet::default_set());
        assert_eq!(
            calc.catalog().polarity(crate::config::MOBILITY_ACTIVITY),
            Polarity::Inverted
        );
        assert_eq!(
            calc.catalog().polarity(crate::config::ECONOMIC_STRESS),
            Polarity::Direct
        );
    }

    proptest! {
        #[test]
        fn prop_weights_sum_to_one_and_keep_ratios(
            raw in proptest::collection::vec(0.0f64..100.0, 1..8)
        ) {
            let named: Vec<(String, f64)> = raw
                .iter()
                .enumerate()
                .map(|(i, w)| (format!("c{}", i), *w))
                .collect();
            let weights = WeightSet::from_raw(named.clone()).unwrap();

            prop_assert!((weights.total() - 1.0).abs() < WEIGHT_SUM_TOLERANCE);
            prop_assert!(weights.active().iter().all(|w| w.weight > 0.0));

            let positive: Vec<&(String, f64)> = named.iter().filter(|(_, w)| *w > 0.0).collect();
            if positive.len() >= 2 {
                let (a, wa) = positive[0];
                let (b, wb) = positive[1];
                let ratio = weights.weight(a).unwrap() / weights.weight(b).unwrap();
                prop_assert!((ratio - wa / wb).abs() <= 1e-9 * (wa / wb).max(1.0));
            }
        }

        #[test]
        fn prop_huge_weights_still_sum_to_one(
            raw in proptest::collection::vec(1e300f64..f64::MAX, 2..8)
        ) {
            let named: Vec<(String, f64)> = raw
                .iter()
                .enumerate()
                .map(|(i, w)| (format!("c{}", i), *w))
                .collect();
            let weights = WeightSet::from_raw(named).unwrap();

            prop_assert_eq!(weights.len(), raw.len());
            prop_assert!((weights.total() - 1.0).abs() < WEIGHT_SUM_TOLERANCE);
            let ratio = weights.weight("c0").unwrap() / weights.weight("c1").unwrap();
            prop_assert!((ratio - raw[0] / raw[1]).abs() <= 1e-9 * (raw[0] / raw[1]).max(1.0));
        }

        #[test]
        fn prop_index_within_unit_interval(
            values in proptest::collection::vec(-1.0f64..2.0, 1..30),
            wa in 0.0f64..10.0,
            wb in 0.0f64..10.0,
        ) {
            let other: Vec<f64> = values.iter().rev().copied().collect();
            let t = table(vec![("a", values), ("b", other)]);
            let weights = WeightSet::from_raw([("a", wa), ("b", wb)]).unwrap();
            let calc = IndexCalculator::new(ComponentCatalog::new(["b"]));
            for v in calc.compute(&t, &weights).values() {
                prop_assert!((0.0..=1.0).contains(&v));
            }
        }
    }
}
