//! Engine configuration
//!
//! Every tuned policy constant (weights, fill policies, shock and risk
//! thresholds, cache and monitor sizing) lives here so it can be
//! recalibrated without touching the algorithms. Sections load from TOML;
//! missing sections and fields fall back to the defaults below.

use crate::error::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Component names of the default catalog
pub const ECONOMIC_STRESS: &str = "economic_stress";
pub const ENVIRONMENTAL_STRESS: &str = "environmental_stress";
pub const MOBILITY_ACTIVITY: &str = "mobility_activity";
pub const DIGITAL_ATTENTION: &str = "digital_attention";
pub const PUBLIC_HEALTH_STRESS: &str = "public_health_stress";

/// Documented default weight set, used when a configured set sums to zero
pub const DEFAULT_WEIGHTS: [(&str, f64); 5] = [
    (ECONOMIC_STRESS, 0.25),
    (ENVIRONMENTAL_STRESS, 0.25),
    (MOBILITY_ACTIVITY, 0.20),
    (DIGITAL_ATTENTION, 0.15),
    (PUBLIC_HEALTH_STRESS, 0.15),
];

/// Upper bound accepted for `limits.max_days_back` (about 100 years)
pub const MAX_DAYS_BACK: u32 = 36_500;

/// Upper bound accepted for `limits.max_horizon`
pub const MAX_HORIZON: u32 = 3_650;

/// Upper bound accepted for `monitor.refresh_interval_secs` (one year)
pub const MAX_REFRESH_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Upper bound accepted for `monitor.stale_after_factor`
pub const MAX_STALE_AFTER_FACTOR: f64 = 1_000.0;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub index: IndexConfig,
    pub harmonizer: HarmonizerConfig,
    pub forecast: ForecastConfig,
    pub shock: ShockConfig,
    pub correlation: CorrelationConfig,
    pub convergence: ConvergenceConfig,
    pub risk: RiskConfig,
    pub confidence: ConfidenceConfig,
    pub cache: CacheConfig,
    pub monitor: MonitorConfig,
    pub limits: LimitsConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(raw: &str) -> IndexResult<Self> {
        let config: EngineConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: &Path) -> IndexResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> IndexResult<String> {
        toml::to_string_pretty(self).map_err(|e| IndexError::Config(e.to_string()))
    }

    /// Reject configurations whose thresholds are out of order or out of range
    pub fn validate(&self) -> IndexResult<()> {
        for (component, weight) in &self.index.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(IndexError::InvalidWeight {
                    component: component.clone(),
                    value: *weight,
                });
            }
        }

        self.shock.thresholds.validate()?;
        self.risk.thresholds.validate()?;

        let f = &self.forecast;
        if f.min_std_error <= 0.0 || f.max_std_error < f.min_std_error {
            return Err(IndexError::Config(format!(
                "forecast std error bounds must satisfy 0 < min <= max (got {} / {})",
                f.min_std_error, f.max_std_error
            )));
        }
        if f.max_daily_trend < 0.0 || f.z_value <= 0.0 {
            return Err(IndexError::Config(
                "forecast max_daily_trend must be >= 0 and z_value > 0".to_string(),
            ));
        }
        if f.moving_average_window == 0 || f.max_season_period < 2 {
            return Err(IndexError::Config(
                "forecast moving_average_window must be > 0 and max_season_period >= 2"
                    .to_string(),
            ));
        }

        if self.shock.window < 2 || self.shock.min_periods < 2 {
            return Err(IndexError::Config(
                "shock window and min_periods must be at least 2".to_string(),
            ));
        }
        if self.shock.min_std <= 0.0 {
            return Err(IndexError::Config("shock min_std must be > 0".to_string()));
        }

        let r = &self.risk;
        if [r.index_weight, r.shock_weight, r.divergence_weight]
            .iter()
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(IndexError::Config(
                "risk combination weights must be non-negative".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.confidence.drift_alpha) || self.confidence.drift_alpha == 0.0
        {
            return Err(IndexError::Config(
                "confidence drift_alpha must be in (0, 1]".to_string(),
            ));
        }

        if self.cache.capacity == 0 {
            return Err(IndexError::Config("cache capacity must be > 0".to_string()));
        }

        self.monitor.validate()?;

        let l = &self.limits;
        if l.min_days_back == 0 || l.min_days_back > l.max_days_back {
            return Err(IndexError::Config(
                "limits: 0 < min_days_back <= max_days_back".to_string(),
            ));
        }
        if l.max_days_back > MAX_DAYS_BACK {
            return Err(IndexError::Config(format!(
                "limits: max_days_back must be <= {MAX_DAYS_BACK} (got {})",
                l.max_days_back
            )));
        }
        if l.min_horizon == 0 || l.min_horizon > l.max_horizon {
            return Err(IndexError::Config(
                "limits: 0 < min_horizon <= max_horizon".to_string(),
            ));
        }
        if l.max_horizon > MAX_HORIZON {
            return Err(IndexError::Config(format!(
                "limits: max_horizon must be <= {MAX_HORIZON} (got {})",
                l.max_horizon
            )));
        }

        Ok(())
    }
}

/// Weights and polarity of the index components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Raw (unnormalized) weight per component
    pub weights: BTreeMap<String, f64>,
    /// Components where a higher raw value means lower stress
    pub inverted_components: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            weights: DEFAULT_WEIGHTS
                .iter()
                .map(|(name, weight)| (name.to_string(), *weight))
                .collect(),
            inverted_components: vec![MOBILITY_ACTIVITY.to_string()],
        }
    }
}

/// Gap-filling strategy for a source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FillPolicy {
    /// Carry the last observation forward, for sources that publish with lag
    ForwardFill { max_gap: usize },
    /// Linear interpolation between neighbouring observations
    Interpolate { max_gap: usize },
}

impl Default for FillPolicy {
    fn default() -> Self {
        FillPolicy::Interpolate { max_gap: 3 }
    }
}

/// How raw source values are brought onto [0,1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Scaling {
    /// Values already normalized by the adapter; clip only
    #[default]
    Clip,
    /// Fixed min-max rescale, then clip
    Bounds { min: f64, max: f64 },
}

/// Per-source harmonization settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub fill: FillPolicy,
    pub scaling: Scaling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmonizerConfig {
    /// Policy for sources without an explicit entry
    pub default_fill: FillPolicy,
    /// Overrides keyed by component name
    pub sources: BTreeMap<String, SourceConfig>,
}

impl Default for HarmonizerConfig {
    fn default() -> Self {
        let mut sources = BTreeMap::new();
        // Economic indicators publish with a lag; carry them forward.
        sources.insert(
            ECONOMIC_STRESS.to_string(),
            SourceConfig {
                fill: FillPolicy::ForwardFill { max_gap: 7 },
                scaling: Scaling::Clip,
            },
        );
        sources.insert(
            PUBLIC_HEALTH_STRESS.to_string(),
            SourceConfig {
                fill: FillPolicy::ForwardFill { max_gap: 7 },
                scaling: Scaling::Clip,
            },
        );
        Self {
            default_fill: FillPolicy::default(),
            sources,
        }
    }
}

impl HarmonizerConfig {
    pub fn source(&self, component: &str) -> SourceConfig {
        self.sources
            .get(component)
            .copied()
            .unwrap_or(SourceConfig {
                fill: self.default_fill,
                scaling: Scaling::Clip,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Minimum history for exponential smoothing
    pub min_smoothing_history: usize,
    /// Upper bound on the seasonal period
    pub max_season_period: usize,
    /// Minimum history for moving-average extrapolation
    pub min_moving_average_history: usize,
    pub moving_average_window: usize,
    /// Clamp on the moving-average trend, per day
    pub max_daily_trend: f64,
    pub min_std_error: f64,
    pub max_std_error: f64,
    /// Normal quantile for the confidence band
    pub z_value: f64,
    /// Slopes within this band are reported as flat
    pub trend_dead_band: f64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            min_smoothing_history: 14,
            max_season_period: 7,
            min_moving_average_history: 3,
            moving_average_window: 7,
            max_daily_trend: 0.02,
            min_std_error: 0.02,
            max_std_error: 0.25,
            z_value: 1.96,
            trend_dead_band: 0.001,
        }
    }
}

/// Z-score tier thresholds for shocks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShockThresholds {
    pub mild: f64,
    pub moderate: f64,
    pub high: f64,
    pub severe: f64,
}

impl Default for ShockThresholds {
    fn default() -> Self {
        Self {
            mild: 2.0,
            moderate: 2.5,
            high: 3.0,
            severe: 4.0,
        }
    }
}

impl ShockThresholds {
    fn validate(&self) -> IndexResult<()> {
        let ordered = self.mild > 0.0
            && self.mild < self.moderate
            && self.moderate < self.high
            && self.high < self.severe;
        if ordered {
            Ok(())
        } else {
            Err(IndexError::Config(format!(
                "shock thresholds must be positive and strictly ascending: {:?}",
                self
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShockConfig {
    /// Trailing window length in days
    pub window: usize,
    /// Minimum trailing observations before a day can be scored
    pub min_periods: usize,
    /// Floor on the trailing standard deviation
    pub min_std: f64,
    pub thresholds: ShockThresholds,
}

impl Default for ShockConfig {
    fn default() -> Self {
        Self {
            window: 14,
            min_periods: 5,
            min_std: 0.01,
            thresholds: ShockThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Trailing rows considered; 0 means the whole table
    pub window: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self { window: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Days used for the recent-slope comparison
    pub trend_window: usize,
    /// Pairs weaker than this are neither reinforcing nor conflicting
    pub min_abs_correlation: f64,
    pub slope_dead_band: f64,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            trend_window: 7,
            min_abs_correlation: 0.3,
            slope_dead_band: 0.001,
        }
    }
}

/// Lower bounds of each tier above `stable`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub watchlist: f64,
    pub elevated: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            watchlist: 0.30,
            elevated: 0.50,
            high: 0.70,
            critical: 0.85,
        }
    }
}

impl TierThresholds {
    fn validate(&self) -> IndexResult<()> {
        let ordered = 0.0 < self.watchlist
            && self.watchlist < self.elevated
            && self.elevated < self.high
            && self.high < self.critical
            && self.critical <= 1.0;
        if ordered {
            Ok(())
        } else {
            Err(IndexError::Config(format!(
                "risk tier thresholds must be strictly ascending within (0, 1]: {:?}",
                self
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub index_weight: f64,
    pub shock_weight: f64,
    pub divergence_weight: f64,
    /// Shocks older than this many days before the latest day are ignored
    pub recent_shock_days: i64,
    pub thresholds: TierThresholds,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            index_weight: 0.6,
            shock_weight: 0.25,
            divergence_weight: 0.15,
            recent_shock_days: 7,
            thresholds: TierThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// History below this length yields the neutral report
    pub min_history: usize,
    pub backtest_days: usize,
    pub stability_window: usize,
    /// Day-over-day volatility at which stability reaches zero
    pub volatility_cap: f64,
    /// Mean absolute error at which accuracy reaches zero
    pub error_scale: f64,
    pub completeness_weight: f64,
    pub stability_weight: f64,
    pub accuracy_weight: f64,
    /// EWMA factor for drift smoothing
    pub drift_alpha: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            min_history: 14,
            backtest_days: 7,
            stability_window: 14,
            volatility_cap: 0.1,
            error_scale: 0.25,
            completeness_weight: 0.4,
            stability_weight: 0.3,
            accuracy_weight: 0.3,
            drift_alpha: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            capacity: 256,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub refresh_interval_secs: u64,
    /// Snapshots retained per region
    pub history_capacity: usize,
    /// A snapshot older than `interval * stale_after_factor` is stale
    pub stale_after_factor: f64,
    pub days_back: u32,
    pub horizon: u32,
    /// Regions tracked from startup
    pub regions: Vec<String>,
    /// Index change within the summary window that raises `index_jump`
    pub index_jump_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
            history_capacity: 48,
            stale_after_factor: 2.0,
            days_back: 60,
            horizon: 7,
            regions: Vec::new(),
            index_jump_threshold: 0.1,
        }
    }
}

impl MonitorConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Age past which a snapshot is stale; saturates instead of overflowing
    pub fn stale_after(&self) -> Duration {
        let secs = self.refresh_interval().as_secs_f64() * self.stale_after_factor.max(1.0);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> IndexResult<()> {
        if self.refresh_interval_secs == 0 || self.history_capacity == 0 {
            return Err(IndexError::Config(
                "monitor refresh_interval_secs and history_capacity must be > 0".to_string(),
            ));
        }
        if self.refresh_interval_secs > MAX_REFRESH_INTERVAL_SECS {
            return Err(IndexError::Config(format!(
                "monitor refresh_interval_secs must be <= {MAX_REFRESH_INTERVAL_SECS} (got {})",
                self.refresh_interval_secs
            )));
        }
        if !self.stale_after_factor.is_finite()
            || !(1.0..=MAX_STALE_AFTER_FACTOR).contains(&self.stale_after_factor)
        {
            return Err(IndexError::Config(format!(
                "monitor stale_after_factor must be in [1, {MAX_STALE_AFTER_FACTOR}] (got {})",
                self.stale_after_factor
            )));
        }
        if !self.index_jump_threshold.is_finite() || self.index_jump_threshold < 0.0 {
            return Err(IndexError::Config(format!(
                "monitor index_jump_threshold must be finite and >= 0 (got {})",
                self.index_jump_threshold
            )));
        }
        Ok(())
    }
}

/// Request validation bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub min_days_back: u32,
    pub max_days_back: u32,
    pub min_horizon: u32,
    pub max_horizon: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_days_back: 7,
            max_days_back: 730,
            min_horizon: 1,
            max_horizon: 30,
        }
    }
}
