//! Shock detection
//!
//! Flags days where a component deviates sharply from its trailing window.
//! Each day is scored against the window that precedes it, so a day never
//! contributes to its own baseline.

use crate::baseline::RollingBaseline;
use crate::config::{ShockConfig, ShockThresholds};
use crate::harmonizer::HarmonizedTable;
use crate::types::{ShockEvent, ShockSeverity};
use chrono::NaiveDate;

#[derive(Debug, Clone, Default)]
pub struct ShockDetector {
    config: ShockConfig,
}

impl ShockDetector {
    pub fn new(config: ShockConfig) -> Self {
        Self { config }
    }

    /// Severity tier for a z-score, `None` below the mild threshold
    pub fn classify(&self, z_score: f64) -> Option<ShockSeverity> {
        classify(z_score, &self.config.thresholds)
    }

    /// Detect shocks across every column of the table, ordered by date then component
    pub fn detect(&self, table: &HarmonizedTable) -> Vec<ShockEvent> {
        let mut events: Vec<ShockEvent> = table
            .columns
            .iter()
            .flat_map(|column| self.detect_series(&column.component, &table.dates, &column.values))
            .collect();
        events.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.component.cmp(&b.component)));
        events
    }

    /// Detect shocks in one aligned series
    pub fn detect_series(
        &self,
        component: &str,
        dates: &[NaiveDate],
        values: &[f64],
    ) -> Vec<ShockEvent> {
        let mut baseline = RollingBaseline::new(self.config.window);
        let mut events = Vec::new();

        for (date, value) in dates.iter().zip(values) {
            if baseline.len() >= self.config.min_periods && value.is_finite() {
                let mean = baseline.mean().unwrap_or(*value);
                if let Some(z) = baseline.z_score(*value, self.config.min_std) {
                    if let Some(severity) = self.classify(z) {
                        events.push(ShockEvent {
                            date: *date,
                            component: component.to_string(),
                            severity,
                            delta: value - mean,
                            z_score: z,
                        });
                    }
                }
            }
            baseline.push(*value);
        }

        events
    }
}

fn classify(z_score: f64, thresholds: &ShockThresholds) -> Option<ShockSeverity> {
    let magnitude = z_score.abs();
    if !magnitude.is_finite() {
        return None;
    }
    if magnitude >= thresholds.severe {
        Some(ShockSeverity::Severe)
    } else if magnitude >= thresholds.high {
        Some(ShockSeverity::High)
    } else if magnitude >= thresholds.moderate {
        Some(ShockSeverity::Moderate)
    } else if magnitude >= thresholds.mild {
        Some(ShockSeverity::Mild)
    } else {
        None
    }
}
