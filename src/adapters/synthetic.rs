//! Deterministic synthetic adapter
//!
//! Generates a plausible daily series per (region, component): a base
//! level, a weekly cycle and a slow drift, plus hash-derived noise. The same
//! inputs always produce the same values, so forecasts built on it are
//! reproducible.

use crate::error::SourceError;
use crate::types::{clip_unit, DateRange, RawObservation, RawSeries};
use chrono::{Datelike, NaiveDate};
use std::f64::consts::PI;

use super::SourceAdapter;

/// Synthetic source for demos and tests
#[derive(Debug, Clone)]
pub struct SyntheticAdapter {
    component: String,
    /// Probability-like fraction of days left empty (0 disables gaps)
    gap_rate: f64,
    seed: u64,
}

impl SyntheticAdapter {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            gap_rate: 0.0,
            seed: 0x5eed,
        }
    }

    /// Leave roughly `rate` of the days without an observation
    pub fn with_gap_rate(mut self, rate: f64) -> Self {
        self.gap_rate = rate.clamp(0.0, 0.9);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn value_on(&self, region_hash: u64, date: NaiveDate) -> Option<f64> {
        let day = i64::from(date.num_days_from_ce());
        let noise_bits = splitmix64(region_hash ^ (day as u64).wrapping_mul(0x9e37_79b9));
        if unit(noise_bits) < self.gap_rate {
            return None;
        }

        let phase = unit(region_hash) * 2.0 * PI;
        let base = 0.3 + 0.4 * unit(region_hash.rotate_left(17));
        let weekly = 0.08 * ((2.0 * PI * day as f64 / 7.0) + phase).sin();
        let drift = 0.1 * ((day as f64 / 90.0) + phase).sin();
        let noise = (unit(splitmix64(noise_bits)) - 0.5) * 0.04;

        Some(clip_unit(base + weekly + drift + noise))
    }
}

impl SourceAdapter for SyntheticAdapter {
    fn component(&self) -> &str {
        &self.component
    }

    fn fetch(&self, region: &str, range: DateRange) -> Result<RawSeries, SourceError> {
        let region_hash = fnv1a(region.to_ascii_lowercase().as_bytes())
            ^ fnv1a(self.component.as_bytes()).rotate_left(29)
            ^ self.seed;

        let observations = range
            .days()
            .filter_map(|date| {
                let value = self.value_on(region_hash, date)?;
                let timestamp = date.and_hms_opt(12, 0, 0)?.and_utc();
                Some(RawObservation { timestamp, value })
            })
            .collect();

        Ok(RawSeries::new(observations))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Map the top 53 bits onto [0,1)
fn unit(bits: u64) -> f64 {
    (bits >> 11) as f64 / (1u64 << 53) as f64
}
