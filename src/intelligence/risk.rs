//! Risk tiering
//!
//! Formula:
//! score = w_index * index + w_shock * shock_factor + w_divergence * (1 - convergence / 100)
//!
//! `shock_factor` is the heaviest severity among shocks in the recent
//! window. Tiers partition [0,1] by ascending lower bounds; the score is
//! clipped first so every input maps to exactly one tier.

use crate::config::{RiskConfig, TierThresholds};
use crate::types::{ConvergenceResult, RiskAssessment, RiskTier, ShockEvent};
use chrono::{Duration, NaiveDate};

#[derive(Debug, Clone, Default)]
pub struct RiskClassifier {
    config: RiskConfig,
}

impl RiskClassifier {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Combine the latest index value, recent shocks and convergence into a tier.
    ///
    /// Shocks dated more than `recent_shock_days` before `as_of` are ignored.
    pub fn assess(
        &self,
        latest_index: f64,
        as_of: NaiveDate,
        shocks: &[ShockEvent],
        convergence: &ConvergenceResult,
    ) -> RiskAssessment {
        let cutoff = as_of - Duration::days(self.config.recent_shock_days.max(0));
        let shock_factor = shocks
            .iter()
            .filter(|s| s.date > cutoff && s.date <= as_of)
            .map(|s| s.severity.weight())
            .fold(0.0, f64::max);

        let index_component = finite_unit(latest_index);
        let divergence_component = finite_unit(1.0 - convergence.score / 100.0);

        let score = finite_unit(
            self.config.index_weight * index_component
                + self.config.shock_weight * shock_factor
                + self.config.divergence_weight * divergence_component,
        );

        RiskAssessment {
            tier: self.tier_for(score),
            score,
            index_component,
            shock_component: shock_factor,
            divergence_component,
        }
    }

    /// Tier for a score; total over all f64 inputs
    pub fn tier_for(&self, score: f64) -> RiskTier {
        tier_for(finite_unit(score), &self.config.thresholds)
    }
}

fn tier_for(score: f64, thresholds: &TierThresholds) -> RiskTier {
    if score >= thresholds.critical {
        RiskTier::Critical
    } else if score >= thresholds.high {
        RiskTier::High
    } else if score >= thresholds.elevated {
        RiskTier::Elevated
    } else if score >= thresholds.watchlist {
        RiskTier::Watchlist
    } else {
        RiskTier::Stable
    }
}

/// Clip to [0,1]; NaN maps to 0.0
fn finite_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
