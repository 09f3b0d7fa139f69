//! Core types for the behavior index engine
//!
//! These structures flow between the pipeline stages: raw source series,
//! the harmonized daily table, the composite index, forecast points and the
//! intelligence outputs attached to a forecast.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Neutral value substituted for missing or non-finite observations
pub const NEUTRAL_VALUE: f64 = 0.5;

/// Index value produced when no active component is available
pub const DEFAULT_INDEX_VALUE: f64 = 0.0;

/// Clip a value to the unit interval, mapping NaN to the neutral value.
pub fn clip_unit(value: f64) -> f64 {
    if value.is_nan() {
        NEUTRAL_VALUE
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Inclusive calendar range of days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a range; `start` and `end` are swapped if given out of order.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Range of `days` days ending on `end` (inclusive).
    pub fn ending_on(end: NaiveDate, days: u32) -> Self {
        let span = i64::from(days.max(1)) - 1;
        Self {
            start: end
                .checked_sub_signed(Duration::days(span))
                .unwrap_or(NaiveDate::MIN),
            end,
        }
    }

    /// Number of days in the range
    pub fn len_days(&self) -> usize {
        ((self.end - self.start).num_days() + 1) as usize
    }

    /// Iterate every day in the range in ascending order
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let start = self.start;
        (0..self.len_days() as i64).map(move |offset| start + Duration::days(offset))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// A single raw observation returned by a source adapter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Raw, irregularly sampled series returned by a source adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    pub observations: Vec<RawObservation>,
}

impl RawSeries {
    pub fn new(observations: Vec<RawObservation>) -> Self {
        Self { observations }
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }
}

/// How a source's contribution moves the stress index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Higher raw value means higher stress
    Direct,
    /// Higher raw value means lower stress (e.g. mobility)
    Inverted,
}

impl Polarity {
    /// Map a normalized raw value onto the stress scale
    pub fn stress_value(&self, value: f64) -> f64 {
        match self {
            Polarity::Direct => value,
            Polarity::Inverted => 1.0 - value,
        }
    }
}

/// One point of the composite behavior index
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Time-indexed composite index, one point per day, ascending
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorIndexSeries {
    pub points: Vec<IndexPoint>,
}

impl BehaviorIndexSeries {
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value).collect()
    }

    pub fn latest(&self) -> Option<IndexPoint> {
        self.points.last().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Trailing `n` points (or fewer when the series is shorter)
    pub fn tail(&self, n: usize) -> Vec<IndexPoint> {
        let start = self.points.len().saturating_sub(n);
        self.points[start..].to_vec()
    }
}

/// Per-component contribution to the index on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub component: String,
    /// Harmonized raw value (before polarity)
    pub value: f64,
    /// Normalized active weight
    pub weight: f64,
    /// Stress-oriented value times weight
    pub contribution: f64,
}

/// A single projected day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ForecastPoint {
    /// Build a point with every value clipped to [0,1] and the bounds
    /// ordered around the point estimate.
    pub fn bounded(date: NaiveDate, point: f64, lower: f64, upper: f64) -> Self {
        let point = clip_unit(point);
        let lower = clip_unit(lower).min(point);
        let upper = clip_unit(upper).max(point);
        Self {
            date,
            point,
            lower,
            upper,
        }
    }
}

/// Shock severity tiers, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShockSeverity {
    Mild,
    Moderate,
    High,
    Severe,
}

impl ShockSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShockSeverity::Mild => "mild",
            ShockSeverity::Moderate => "moderate",
            ShockSeverity::High => "high",
            ShockSeverity::Severe => "severe",
        }
    }

    /// Severity mapped onto [0,1] for risk scoring
    pub fn weight(&self) -> f64 {
        match self {
            ShockSeverity::Mild => 0.25,
            ShockSeverity::Moderate => 0.5,
            ShockSeverity::High => 0.75,
            ShockSeverity::Severe => 1.0,
        }
    }
}

/// Statistically significant deviation of one component on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShockEvent {
    pub date: NaiveDate,
    pub component: String,
    pub severity: ShockSeverity,
    /// Value minus trailing mean
    pub delta: f64,
    pub z_score: f64,
}

/// Direction of a recent movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Flat,
}

impl TrendDirection {
    /// Classify a per-day slope against a dead band
    pub fn from_slope(slope: f64, dead_band: f64) -> Self {
        if !slope.is_finite() || slope.abs() <= dead_band {
            TrendDirection::Flat
        } else if slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        }
    }

    pub fn sign(&self) -> i8 {
        match self {
            TrendDirection::Increasing => 1,
            TrendDirection::Decreasing => -1,
            TrendDirection::Flat => 0,
        }
    }
}

/// Two components whose co-movement was classified by the convergence engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPair {
    pub first: String,
    pub second: String,
    pub correlation: f64,
}

/// Degree to which components move in a mutually reinforcing direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceResult {
    /// 0 (no convergence) to 100 (all pairs reinforcing)
    pub score: f64,
    pub reinforcing: Vec<SignalPair>,
    pub conflicting: Vec<SignalPair>,
    /// Recent direction of the composite index
    pub trend: TrendDirection,
}

impl ConvergenceResult {
    /// Defined result for inputs too small to analyze
    pub fn none() -> Self {
        Self {
            score: 0.0,
            reinforcing: Vec::new(),
            conflicting: Vec::new(),
            trend: TrendDirection::Flat,
        }
    }
}

/// Discrete current-risk classification, totally ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Stable,
    Watchlist,
    Elevated,
    High,
    Critical,
}

impl RiskTier {
    pub const ALL: [RiskTier; 5] = [
        RiskTier::Stable,
        RiskTier::Watchlist,
        RiskTier::Elevated,
        RiskTier::High,
        RiskTier::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Stable => "stable",
            RiskTier::Watchlist => "watchlist",
            RiskTier::Elevated => "elevated",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk score with its tier and the inputs that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub tier: RiskTier,
    pub score: f64,
    pub index_component: f64,
    pub shock_component: f64,
    pub divergence_component: f64,
}

/// Symmetric pairwise correlation matrix over named components
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub components: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    /// Explicitly empty matrix for degenerate input
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn size(&self) -> usize {
        self.components.len()
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        self.values.get(i).and_then(|row| row.get(j)).copied()
    }

    /// Look up a correlation by component names
    pub fn between(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.components.iter().position(|c| c == a)?;
        let j = self.components.iter().position(|c| c == b)?;
        self.get(i, j)
    }
}

/// Confidence in the forecast and drift of the model against reality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    /// 0-1, 0.5 when history is insufficient
    pub confidence: f64,
    /// Smoothed realized-minus-predicted residual, 0.0 when unknown
    pub drift: f64,
    pub completeness: f64,
    pub stability: f64,
    /// Backtest accuracy when enough history was available
    pub accuracy: Option<f64>,
}

impl ConfidenceReport {
    pub fn neutral(completeness: f64) -> Self {
        Self {
            confidence: 0.5,
            drift: 0.0,
            completeness,
            stability: 0.5,
            accuracy: None,
        }
    }
}
