//! Index forecasting
//!
//! Projects the composite index forward through an ordered capability
//! ladder: additive exponential smoothing when history is long enough, a
//! trend-clamped moving average below that, and a flat line that always
//! succeeds. A method that cannot run, or produces non-finite output, hands
//! over to the next rung and the reason is recorded on the result.

use crate::baseline::{linear_slope, mean, population_std};
use crate::config::ForecastConfig;
use crate::types::{BehaviorIndexSeries, ForecastPoint, TrendDirection, NEUTRAL_VALUE};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Forecast days covered by the trend summary
pub const TREND_SUMMARY_DAYS: usize = 7;

const ALPHA_GRID: [f64; 5] = [0.1, 0.3, 0.5, 0.7, 0.9];
const BETA_GRID: [f64; 4] = [0.01, 0.05, 0.1, 0.2];
const GAMMA_GRID: [f64; 3] = [0.05, 0.1, 0.3];

/// Model that produced a forecast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastModel {
    Smoothing,
    MovingAverage,
    FlatLine,
}

impl ForecastModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastModel::Smoothing => "smoothing",
            ForecastModel::MovingAverage => "moving_average",
            ForecastModel::FlatLine => "flat_line",
        }
    }
}

/// Why a ladder rung was skipped
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ForecastFailure {
    #[error("needs at least {needed} points, got {got}")]
    InsufficientHistory { needed: usize, got: usize },

    #[error("non-finite output: {0}")]
    NonFinite(&'static str),
}

/// A skipped rung and the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackNote {
    pub model: ForecastModel,
    pub reason: String,
}

/// Direction and slope over the first forecast days
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub direction: TrendDirection,
    pub slope_per_day: f64,
}

/// One projected step before dating and clipping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub point: f64,
    /// Half-width of the confidence band
    pub band: f64,
}

/// Output of the forecast ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub points: Vec<ForecastPoint>,
    pub model: ForecastModel,
    pub fallbacks: Vec<FallbackNote>,
    pub trend: TrendSummary,
}

/// A single rung of the forecast ladder
pub trait ForecastMethod: Send + Sync {
    fn model(&self) -> ForecastModel;

    /// Whether a history of `len` points is enough for this method
    fn supports(&self, len: usize) -> Result<(), ForecastFailure>;

    /// Project `horizon` steps past the end of `history`
    fn project(&self, history: &[f64], horizon: usize) -> Result<Vec<Projection>, ForecastFailure>;
}

/// Additive Holt-Winters smoothing with trend.
///
/// A seasonal term with period `min(max_season_period, len / 4)` is added
/// when the history spans at least two periods. Smoothing factors come from
/// a fixed grid, keeping the fit with the lowest one-step squared error.
#[derive(Debug, Clone)]
pub struct Smoothing {
    config: ForecastConfig,
}

#[derive(Debug, Clone)]
struct SmoothingFit {
    level: f64,
    trend: f64,
    seasonal: Vec<f64>,
    sse: f64,
    steps: usize,
}

impl Smoothing {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }

    fn season_period(&self, len: usize) -> Option<usize> {
        let period = self.config.max_season_period.min(len / 4);
        if period >= 2 && len >= 2 * period {
            Some(period)
        } else {
            None
        }
    }

    fn fit(
        history: &[f64],
        period: Option<usize>,
        alpha: f64,
        beta: f64,
        gamma: f64,
    ) -> SmoothingFit {
        let (mut level, mut trend, mut seasonal, start) = match period {
            Some(m) => {
                let first = mean(history[..m].iter().copied()).unwrap_or(NEUTRAL_VALUE);
                let second = mean(history[m..2 * m].iter().copied()).unwrap_or(first);
                let trend = (second - first) / m as f64;
                let center = (m as f64 - 1.0) / 2.0;
                let seasonal = (0..m)
                    .map(|i| history[i] - (first + trend * (i as f64 - center)))
                    .collect();
                (first + trend * center, trend, seasonal, m)
            }
            None => (history[0], history[1] - history[0], vec![0.0], 1),
        };

        let m = seasonal.len();
        let mut sse = 0.0;
        for (t, y) in history.iter().enumerate().skip(start) {
            let s = seasonal[t % m];
            let predicted = level + trend + s;
            sse += (y - predicted).powi(2);

            let previous_level = level;
            level = alpha * (y - s) + (1.0 - alpha) * (level + trend);
            trend = beta * (level - previous_level) + (1.0 - beta) * trend;
            if period.is_some() {
                seasonal[t % m] = gamma * (y - level) + (1.0 - gamma) * s;
            }
        }

        SmoothingFit {
            level,
            trend,
            seasonal,
            sse,
            steps: history.len() - start,
        }
    }
}

impl ForecastMethod for Smoothing {
    fn model(&self) -> ForecastModel {
        ForecastModel::Smoothing
    }

    fn supports(&self, len: usize) -> Result<(), ForecastFailure> {
        let needed = self.config.min_smoothing_history.max(3);
        if len >= needed {
            Ok(())
        } else {
            Err(ForecastFailure::InsufficientHistory { needed, got: len })
        }
    }

    fn project(&self, history: &[f64], horizon: usize) -> Result<Vec<Projection>, ForecastFailure> {
        self.supports(history.len())?;
        let period = self.season_period(history.len());
        let gammas: &[f64] = if period.is_some() { &GAMMA_GRID } else { &[0.0] };

        let mut best: Option<SmoothingFit> = None;
        for alpha in ALPHA_GRID {
            for beta in BETA_GRID {
                for gamma in gammas {
                    let fit = Self::fit(history, period, alpha, beta, *gamma);
                    if !fit.sse.is_finite() {
                        continue;
                    }
                    if best.as_ref().map_or(true, |b| fit.sse < b.sse) {
                        best = Some(fit);
                    }
                }
            }
        }
        let fit = best.ok_or(ForecastFailure::NonFinite("smoothing fit"))?;

        let residual_std = if fit.steps > 0 {
            (fit.sse / fit.steps as f64).sqrt()
        } else {
            0.0
        };
        let se = residual_std.clamp(self.config.min_std_error, self.config.max_std_error);

        let n = history.len();
        let m = fit.seasonal.len();
        let projections: Vec<Projection> = (1..=horizon)
            .map(|h| Projection {
                point: fit.level + h as f64 * fit.trend + fit.seasonal[(n - 1 + h) % m],
                band: self.config.z_value * se * (h as f64).sqrt(),
            })
            .collect();

        if projections.iter().all(|p| p.point.is_finite() && p.band.is_finite()) {
            Ok(projections)
        } else {
            Err(ForecastFailure::NonFinite("smoothing projection"))
        }
    }
}

/// Mean of the trailing window plus a clamped linear trend
#[derive(Debug, Clone)]
pub struct MovingAverage {
    config: ForecastConfig,
}

impl MovingAverage {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }
}

impl ForecastMethod for MovingAverage {
    fn model(&self) -> ForecastModel {
        ForecastModel::MovingAverage
    }

    fn supports(&self, len: usize) -> Result<(), ForecastFailure> {
        let needed = self.config.min_moving_average_history.max(2);
        if len >= needed {
            Ok(())
        } else {
            Err(ForecastFailure::InsufficientHistory { needed, got: len })
        }
    }

    fn project(&self, history: &[f64], horizon: usize) -> Result<Vec<Projection>, ForecastFailure> {
        self.supports(history.len())?;
        let window = self.config.moving_average_window.min(history.len()).max(1);
        let recent = &history[history.len() - window..];

        let center = mean(recent.iter().copied()).ok_or(ForecastFailure::NonFinite("window mean"))?;
        let cap = self.config.max_daily_trend;
        let slope = linear_slope(recent).clamp(-cap, cap);
        let se = population_std(recent.iter().copied())
            .unwrap_or(0.0)
            .clamp(self.config.min_std_error, self.config.max_std_error);

        // `center` sits at the middle of the window
        let offset = (window as f64 - 1.0) / 2.0;
        let projections: Vec<Projection> = (1..=horizon)
            .map(|h| Projection {
                point: center + slope * (offset + h as f64),
                band: self.config.z_value * se * (h as f64).sqrt(),
            })
            .collect();

        if projections.iter().all(|p| p.point.is_finite()) {
            Ok(projections)
        } else {
            Err(ForecastFailure::NonFinite("moving average projection"))
        }
    }
}

/// Last observed value carried forward
#[derive(Debug, Clone)]
pub struct FlatLine {
    config: ForecastConfig,
}

impl FlatLine {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }
}

impl ForecastMethod for FlatLine {
    fn model(&self) -> ForecastModel {
        ForecastModel::FlatLine
    }

    fn supports(&self, _len: usize) -> Result<(), ForecastFailure> {
        Ok(())
    }

    fn project(&self, history: &[f64], horizon: usize) -> Result<Vec<Projection>, ForecastFailure> {
        let last = history
            .last()
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(NEUTRAL_VALUE);
        let band = self.config.min_std_error * self.config.z_value;
        Ok(vec![Projection { point: last, band }; horizon])
    }
}

/// Projection produced by the ladder, before dating
#[derive(Debug, Clone)]
pub struct LadderOutput {
    pub projections: Vec<Projection>,
    pub model: ForecastModel,
    pub fallbacks: Vec<FallbackNote>,
}

/// Forecast ladder
pub struct Forecaster {
    config: ForecastConfig,
    methods: Vec<Box<dyn ForecastMethod>>,
}

impl Default for Forecaster {
    fn default() -> Self {
        Self::new(ForecastConfig::default())
    }
}

impl std::fmt::Debug for Forecaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let models: Vec<ForecastModel> = self.methods.iter().map(|m| m.model()).collect();
        f.debug_struct("Forecaster").field("methods", &models).finish()
    }
}

impl Forecaster {
    /// Standard ladder: smoothing, moving average, flat line
    pub fn new(config: ForecastConfig) -> Self {
        let methods: Vec<Box<dyn ForecastMethod>> = vec![
            Box::new(Smoothing::new(config.clone())),
            Box::new(MovingAverage::new(config.clone())),
            Box::new(FlatLine::new(config.clone())),
        ];
        Self { config, methods }
    }

    /// Custom ladder. A flat line is appended so the ladder always succeeds.
    pub fn with_methods(config: ForecastConfig, mut methods: Vec<Box<dyn ForecastMethod>>) -> Self {
        if methods.last().map(|m| m.model()) != Some(ForecastModel::FlatLine) {
            methods.push(Box::new(FlatLine::new(config.clone())));
        }
        Self { config, methods }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Run the ladder over raw values
    pub fn project(&self, history: &[f64], horizon: usize) -> LadderOutput {
        let cleaned: Vec<f64> = history
            .iter()
            .map(|v| if v.is_finite() { *v } else { NEUTRAL_VALUE })
            .collect();

        let mut fallbacks = Vec::new();
        for method in &self.methods {
            let attempt = method
                .supports(cleaned.len())
                .and_then(|_| method.project(&cleaned, horizon));
            match attempt {
                Ok(projections) if projections.len() == horizon => {
                    return LadderOutput {
                        projections,
                        model: method.model(),
                        fallbacks,
                    };
                }
                Ok(projections) => {
                    fallbacks.push(FallbackNote {
                        model: method.model(),
                        reason: format!("returned {} of {} steps", projections.len(), horizon),
                    });
                }
                Err(failure) => {
                    debug!(
                        model = method.model().as_str(),
                        reason = %failure,
                        "Forecast method skipped"
                    );
                    fallbacks.push(FallbackNote {
                        model: method.model(),
                        reason: failure.to_string(),
                    });
                }
            }
        }

        // Only reachable with a custom ladder whose flat line misbehaves
        let projections = FlatLine::new(self.config.clone())
            .project(&cleaned, horizon)
            .unwrap_or_default();
        LadderOutput {
            projections,
            model: ForecastModel::FlatLine,
            fallbacks,
        }
    }

    /// Forecast `horizon` days following the last point of `history`.
    ///
    /// An empty history is projected from the neutral value starting on the
    /// day after 1970-01-01.
    pub fn forecast(&self, history: &BehaviorIndexSeries, horizon: usize) -> ForecastResult {
        let values = history.values();
        let first_day = next_day(history.latest().map(|p| p.date).unwrap_or_default());
        let output = self.project(&values, horizon);

        let points: Vec<ForecastPoint> = output
            .projections
            .iter()
            .enumerate()
            .map(|(i, p)| {
                ForecastPoint::bounded(
                    first_day + Duration::days(i as i64),
                    p.point,
                    p.point - p.band,
                    p.point + p.band,
                )
            })
            .collect();

        let anchor = values.last().copied().filter(|v| v.is_finite());
        let trend = self.summarize(anchor, &points);

        ForecastResult {
            points,
            model: output.model,
            fallbacks: output.fallbacks,
            trend,
        }
    }

    fn summarize(&self, anchor: Option<f64>, points: &[ForecastPoint]) -> TrendSummary {
        let mut path: Vec<f64> = anchor.into_iter().collect();
        path.extend(points.iter().take(TREND_SUMMARY_DAYS).map(|p| p.point));
        let slope = linear_slope(&path);
        TrendSummary {
            direction: TrendDirection::from_slope(slope, self.config.trend_dead_band),
            slope_per_day: slope,
        }
    }
}

/// First day of a forecast that follows `last`
pub fn next_day(last: NaiveDate) -> NaiveDate {
    last + Duration::days(1)
}
