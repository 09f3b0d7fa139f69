//! Forecast pipeline
//!
//! This module provides the public request API. It orchestrates one
//! forecast from source adapters to the assembled response.
//!
//! Pipeline stages:
//! 1. SourceAdapter - fetch raw series for the region
//! 2. DataHarmonizer - align, fill and normalize onto a daily calendar
//! 3. IndexCalculator - weighted composite index and contributions
//! 4. Forecaster - project the index with the fallback ladder
//! 5. Intelligence layer - shocks, correlations, convergence, risk, confidence

use crate::adapters::SourceAdapter;
use crate::cache::{CacheStats, ResultCache};
use crate::config::EngineConfig;
use crate::error::{IndexError, IndexResult};
use crate::forecast::{FallbackNote, ForecastModel, Forecaster, TrendSummary};
use crate::harmonizer::{DataHarmonizer, SourceInput, SourceReport};
use crate::index::{IndexCalculator, WeightSet};
use crate::intelligence::{
    ConfidenceMonitor, ConvergenceEngine, CorrelationEngine, RiskClassifier, ShockDetector,
};
use crate::region::RegionRegistry;
use crate::types::{
    ConfidenceReport, Contribution, ConvergenceResult, CorrelationMatrix, DateRange, ForecastPoint,
    IndexPoint, RiskAssessment, ShockEvent,
};
use crate::{ENGINE_NAME, ENGINE_VERSION};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Producer metadata embedded in every response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub name: String,
    pub version: String,
}

impl Default for EngineInfo {
    fn default() -> Self {
        Self {
            name: ENGINE_NAME.to_string(),
            version: ENGINE_VERSION.to_string(),
        }
    }
}

/// Validated forecast parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForecastRequest {
    pub region: String,
    pub days_back: u32,
    pub horizon: u32,
    /// Last day of history (inclusive)
    pub end: NaiveDate,
}

/// Full forecast for one region.
///
/// Contains no wall-clock fields, so identical inputs serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub region: String,
    pub as_of: NaiveDate,
    pub history: Vec<IndexPoint>,
    pub forecast: Vec<ForecastPoint>,
    pub model: ForecastModel,
    pub fallbacks: Vec<FallbackNote>,
    pub trend: TrendSummary,
    /// Component contributions on the last history day
    pub contributions: Vec<Contribution>,
    pub shocks: Vec<ShockEvent>,
    pub convergence: ConvergenceResult,
    pub risk: RiskAssessment,
    pub confidence: ConfidenceReport,
    pub drift: f64,
    pub correlations: CorrelationMatrix,
    pub sources_used: Vec<String>,
    pub sources: Vec<SourceReport>,
    pub engine: EngineInfo,
}

impl ForecastResponse {
    pub fn latest_index(&self) -> Option<f64> {
        self.history.last().map(|p| p.value)
    }

    pub fn to_json(&self) -> IndexResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> IndexResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Stateless-per-request forecast engine with a shared result cache
pub struct ForecastEngine {
    config: EngineConfig,
    registry: RegionRegistry,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    harmonizer: DataHarmonizer,
    calculator: IndexCalculator,
    weights: WeightSet,
    forecaster: Forecaster,
    shocks: ShockDetector,
    correlation: CorrelationEngine,
    convergence: ConvergenceEngine,
    risk: RiskClassifier,
    confidence: ConfidenceMonitor,
    cache: ResultCache<ForecastRequest, ForecastResponse>,
}

impl std::fmt::Debug for ForecastEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sources: Vec<&str> = self.adapters.iter().map(|a| a.component()).collect();
        f.debug_struct("ForecastEngine")
            .field("regions", &self.registry)
            .field("sources", &sources)
            .field("weights", &self.weights)
            .field("cache", &self.cache)
            .finish()
    }
}

impl ForecastEngine {
    /// Build an engine from a validated configuration
    pub fn new(
        config: EngineConfig,
        registry: RegionRegistry,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> IndexResult<Self> {
        config.validate()?;
        let (calculator, weights) = IndexCalculator::from_config(&config.index)?;

        Ok(Self {
            harmonizer: DataHarmonizer::new(config.harmonizer.clone()),
            forecaster: Forecaster::new(config.forecast.clone()),
            shocks: ShockDetector::new(config.shock.clone()),
            correlation: CorrelationEngine::new(config.correlation.clone()),
            convergence: ConvergenceEngine::new(
                config.convergence.clone(),
                calculator.catalog().clone(),
            ),
            risk: RiskClassifier::new(config.risk.clone()),
            confidence: ConfidenceMonitor::new(config.confidence.clone()),
            cache: ResultCache::new(config.cache.ttl(), config.cache.capacity),
            calculator,
            weights,
            config,
            registry,
            adapters,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    pub fn weights(&self) -> &WeightSet {
        &self.weights
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Check `days_back` and `horizon` against the configured limits
    pub fn validate_parameters(&self, days_back: u32, horizon: u32) -> IndexResult<()> {
        let limits = &self.config.limits;
        if days_back < limits.min_days_back || days_back > limits.max_days_back {
            return Err(IndexError::InvalidParameter(format!(
                "days_back must be between {} and {} (got {})",
                limits.min_days_back, limits.max_days_back, days_back
            )));
        }
        if horizon < limits.min_horizon || horizon > limits.max_horizon {
            return Err(IndexError::InvalidParameter(format!(
                "horizon must be between {} and {} (got {})",
                limits.min_horizon, limits.max_horizon, horizon
            )));
        }
        Ok(())
    }

    /// Validate parameters and resolve the region, before any computation
    pub fn request(
        &self,
        region: &str,
        days_back: u32,
        horizon: u32,
        end: NaiveDate,
    ) -> IndexResult<ForecastRequest> {
        self.validate_parameters(days_back, horizon)?;
        let region = self.registry.resolve(region)?;

        Ok(ForecastRequest {
            region,
            days_back,
            horizon,
            end,
        })
    }

    /// Cached forecast with history ending today (UTC)
    pub fn get_forecast(
        &self,
        region: &str,
        days_back: u32,
        horizon: u32,
    ) -> IndexResult<Arc<ForecastResponse>> {
        self.get_forecast_as_of(region, days_back, horizon, Utc::now().date_naive())
    }

    /// Cached forecast with history ending on `end`
    pub fn get_forecast_as_of(
        &self,
        region: &str,
        days_back: u32,
        horizon: u32,
        end: NaiveDate,
    ) -> IndexResult<Arc<ForecastResponse>> {
        let request = self.request(region, days_back, horizon, end)?;
        self.cache
            .get_or_compute(request.clone(), || self.analyze(&request))
    }

    /// Run the full pipeline without consulting the cache
    pub fn analyze(&self, request: &ForecastRequest) -> IndexResult<ForecastResponse> {
        let range = DateRange::ending_on(request.end, request.days_back);
        debug!(
            region = %request.region,
            start = %range.start,
            end = %range.end,
            "Analyzing region"
        );

        // Stage 1: fetch every source; failures become neutral columns
        let inputs: Vec<SourceInput> = self
            .adapters
            .iter()
            .map(|adapter| {
                SourceInput::new(adapter.component(), adapter.fetch(&request.region, range))
            })
            .collect();

        // Stage 2: harmonize
        let table = self.harmonizer.harmonize(inputs, range);

        // Stage 3: composite index
        let index = self.calculator.compute(&table, &self.weights);
        let latest = index
            .latest()
            .ok_or_else(|| IndexError::Computation("empty history".to_string()))?;
        let contributions = self.calculator.contribution(&table, &self.weights, latest.date);

        // Stage 4: forecast
        let forecast = self.forecaster.forecast(&index, request.horizon as usize);

        // Stage 5: intelligence
        let shocks = self.shocks.detect(&table);
        let active: Vec<&str> = self.weights.components().collect();
        let correlations = self.correlation.compute_for(&table, &active);
        let convergence = self.convergence.score(&correlations, &table, &index);
        let risk = self
            .risk
            .assess(latest.value, latest.date, &shocks, &convergence);
        let confidence = self.confidence.evaluate(&table, &index, &self.forecaster);

        info!(
            region = %request.region,
            model = forecast.model.as_str(),
            tier = risk.tier.as_str(),
            sources = table.sources_used().len(),
            "Forecast computed"
        );

        Ok(ForecastResponse {
            region: request.region.clone(),
            as_of: latest.date,
            history: index.points,
            forecast: forecast.points,
            model: forecast.model,
            fallbacks: forecast.fallbacks,
            trend: forecast.trend,
            contributions,
            shocks,
            convergence,
            risk,
            drift: confidence.drift,
            confidence,
            correlations,
            sources_used: table.sources_used(),
            sources: table.sources,
            engine: EngineInfo::default(),
        })
    }
}
