//! Data harmonization
//!
//! Aligns independently sourced raw series onto one daily calendar:
//! - observations bucketed per day (daily mean, non-finite values dropped)
//! - values scaled and clipped to [0,1]
//! - short gaps filled by forward-fill or interpolation
//! - anything still missing replaced by the neutral value
//!
//! A missing or failing source never aborts harmonization; it becomes a
//! neutral column and is recorded in the per-source report.

use crate::config::{FillPolicy, HarmonizerConfig, Scaling};
use crate::error::SourceError;
use crate::types::{clip_unit, DateRange, RawSeries, NEUTRAL_VALUE};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Availability of one source in a harmonized table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SourceStatus {
    /// At least one observation fell inside the range
    Available,
    /// Source answered but had nothing for the range
    Missing,
    /// Source failed; the column is entirely neutral
    Failed { reason: String },
}

/// Per-source harmonization metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub component: String,
    pub status: SourceStatus,
    /// Days with at least one real observation
    pub observed_days: usize,
    /// Days filled from neighbouring observations
    pub filled_days: usize,
    /// Days set to the neutral value
    pub neutral_days: usize,
    /// observed_days / total days
    pub coverage: f64,
}

impl SourceReport {
    pub fn is_available(&self) -> bool {
        self.status == SourceStatus::Available
    }
}

/// One harmonized component: a [0,1] value per calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonizedColumn {
    pub component: String,
    pub values: Vec<f64>,
}

/// Aligned table: one row per day, one column per source plus a composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonizedTable {
    pub dates: Vec<NaiveDate>,
    pub columns: Vec<HarmonizedColumn>,
    /// Unweighted mean of the columns for each day
    pub composite: Vec<f64>,
    pub sources: Vec<SourceReport>,
}

impl HarmonizedTable {
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn column(&self, component: &str) -> Option<&HarmonizedColumn> {
        self.columns.iter().find(|c| c.component == component)
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.component.as_str())
    }

    /// Row position of `date`, if inside the table
    pub fn position(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// Fraction of (component, day) cells backed by a real observation
    pub fn completeness(&self) -> f64 {
        let total: usize = self.sources.len() * self.len();
        if total == 0 {
            return 0.0;
        }
        let observed: usize = self.sources.iter().map(|s| s.observed_days).sum();
        (observed as f64 / total as f64).clamp(0.0, 1.0)
    }

    /// Names of sources that contributed at least one observation
    pub fn sources_used(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| s.is_available())
            .map(|s| s.component.clone())
            .collect()
    }
}

/// Outcome of one adapter fetch, handed to the harmonizer
#[derive(Debug, Clone)]
pub struct SourceInput {
    pub component: String,
    pub result: Result<RawSeries, SourceError>,
}

impl SourceInput {
    pub fn new(component: impl Into<String>, result: Result<RawSeries, SourceError>) -> Self {
        Self {
            component: component.into(),
            result,
        }
    }
}

/// Harmonizer for aligning source series
#[derive(Debug, Clone, Default)]
pub struct DataHarmonizer {
    config: HarmonizerConfig,
}

impl DataHarmonizer {
    pub fn new(config: HarmonizerConfig) -> Self {
        Self { config }
    }

    /// Harmonize the inputs over `range`.
    ///
    /// Column order follows input order; a repeated component keeps its
    /// first occurrence.
    pub fn harmonize(&self, inputs: Vec<SourceInput>, range: DateRange) -> HarmonizedTable {
        let dates: Vec<NaiveDate> = range.days().collect();
        let mut columns: Vec<HarmonizedColumn> = Vec::with_capacity(inputs.len());
        let mut sources: Vec<SourceReport> = Vec::with_capacity(inputs.len());

        for input in inputs {
            if columns.iter().any(|c| c.component == input.component) {
                warn!(component = %input.component, "Duplicate source ignored");
                continue;
            }

            let (column, report) = self.harmonize_source(input, &dates, range);
            columns.push(column);
            sources.push(report);
        }

        let composite = (0..dates.len())
            .map(|row| {
                if columns.is_empty() {
                    NEUTRAL_VALUE
                } else {
                    columns.iter().map(|c| c.values[row]).sum::<f64>() / columns.len() as f64
                }
            })
            .collect();

        HarmonizedTable {
            dates,
            columns,
            composite,
            sources,
        }
    }

    fn harmonize_source(
        &self,
        input: SourceInput,
        dates: &[NaiveDate],
        range: DateRange,
    ) -> (HarmonizedColumn, SourceReport) {
        let n = dates.len();
        let component = input.component;

        let series = match input.result {
            Ok(series) => series,
            Err(e) => {
                warn!(
                    component = %component,
                    error = %e,
                    "Source failed, substituting neutral value"
                );
                return neutral_column(component, n, SourceStatus::Failed { reason: e.to_string() });
            }
        };

        let settings = self.config.source(&component);
        let mut slots = bucket_daily(&series, range, n);
        for value in slots.iter_mut().flatten() {
            *value = scale(*value, settings.scaling);
        }

        let observed_days = slots.iter().filter(|v| v.is_some()).count();
        if observed_days == 0 {
            debug!(component = %component, "Source returned no data in range");
            return neutral_column(component, n, SourceStatus::Missing);
        }

        let filled_days = fill_gaps(&mut slots, settings.fill);
        let neutral_days = slots.iter().filter(|v| v.is_none()).count();
        let values: Vec<f64> = slots
            .into_iter()
            .map(|v| v.map(clip_unit).unwrap_or(NEUTRAL_VALUE))
            .collect();

        let report = SourceReport {
            component: component.clone(),
            status: SourceStatus::Available,
            observed_days,
            filled_days,
            neutral_days,
            coverage: ratio(observed_days, n),
        };

        (HarmonizedColumn { component, values }, report)
    }
}

fn neutral_column(
    component: String,
    n: usize,
    status: SourceStatus,
) -> (HarmonizedColumn, SourceReport) {
    let report = SourceReport {
        component: component.clone(),
        status,
        observed_days: 0,
        filled_days: 0,
        neutral_days: n,
        coverage: 0.0,
    };
    (
        HarmonizedColumn {
            component,
            values: vec![NEUTRAL_VALUE; n],
        },
        report,
    )
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64
    } else {
        0.0
    }
}

/// Average observations per calendar day inside `range`
fn bucket_daily(series: &RawSeries, range: DateRange, n: usize) -> Vec<Option<f64>> {
    let mut sums: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
    for obs in &series.observations {
        if !obs.value.is_finite() {
            continue;
        }
        let date = obs.timestamp.date_naive();
        if !range.contains(date) {
            continue;
        }
        let row = (date - range.start).num_days() as usize;
        let entry = sums.entry(row).or_insert((0.0, 0));
        entry.0 += obs.value;
        entry.1 += 1;
    }

    let mut slots = vec![None; n];
    for (row, (sum, count)) in sums {
        if row < n && count > 0 {
            slots[row] = Some(sum / count as f64);
        }
    }
    slots
}

fn scale(value: f64, scaling: Scaling) -> f64 {
    match scaling {
        Scaling::Clip => clip_unit(value),
        Scaling::Bounds { min, max } => {
            let span = max - min;
            if span > 0.0 && span.is_finite() {
                clip_unit((value - min) / span)
            } else {
                NEUTRAL_VALUE
            }
        }
    }
}

/// Fill gaps in place and return the number of filled slots.
///
/// Forward fill carries the last observation for at most `max_gap`
/// consecutive days. Interpolation fills interior runs no longer than
/// `max_gap` linearly and carries a trailing run of at most `max_gap` days.
/// Leading gaps are never filled.
fn fill_gaps(slots: &mut [Option<f64>], policy: FillPolicy) -> usize {
    match policy {
        FillPolicy::ForwardFill { max_gap } => forward_fill(slots, max_gap),
        FillPolicy::Interpolate { max_gap } => interpolate(slots, max_gap),
    }
}

fn forward_fill(slots: &mut [Option<f64>], max_gap: usize) -> usize {
    let mut filled = 0;
    let mut last: Option<f64> = None;
    let mut run = 0;
    for slot in slots.iter_mut() {
        match slot {
            Some(v) => {
                last = Some(*v);
                run = 0;
            }
            None => {
                run += 1;
                if let Some(v) = last {
                    if run <= max_gap {
                        *slot = Some(v);
                        filled += 1;
                    }
                }
            }
        }
    }
    filled
}

fn interpolate(slots: &mut [Option<f64>], max_gap: usize) -> usize {
    let mut filled = 0;
    let mut prev: Option<(usize, f64)> = None;
    let mut i = 0;
    while i < slots.len() {
        let Some(current) = slots[i] else {
            i += 1;
            continue;
        };
        if let Some((p, pv)) = prev {
            let gap = i - p - 1;
            if gap > 0 && gap <= max_gap {
                let step = (current - pv) / (i - p) as f64;
                for (k, slot) in slots.iter_mut().enumerate().take(i).skip(p + 1) {
                    *slot = Some(pv + step * (k - p) as f64);
                    filled += 1;
                }
            }
        }
        prev = Some((i, current));
        i += 1;
    }

    if let Some((p, pv)) = prev {
        let trailing = slots.len() - p - 1;
        if trailing > 0 && trailing <= max_gap {
            for slot in slots.iter_mut().skip(p + 1) {
                *slot = Some(pv);
                filled += 1;
            }
        }
    }
    filled
}
