//! In-memory adapter
//!
//! Serves pre-loaded observations keyed by region. Used for tests, the CLI
//! JSON input and embedding callers that already hold their data.

use crate::error::SourceError;
use crate::types::{DateRange, RawObservation, RawSeries};
use std::collections::HashMap;

use super::SourceAdapter;

/// Adapter over a fixed table of observations
#[derive(Debug, Clone)]
pub struct StaticAdapter {
    component: String,
    series: HashMap<String, Vec<RawObservation>>,
}

impl StaticAdapter {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            series: HashMap::new(),
        }
    }

    /// Builder-style insert of a region's observations
    pub fn with_region(
        mut self,
        region: impl Into<String>,
        observations: Vec<RawObservation>,
    ) -> Self {
        self.insert(region, observations);
        self
    }

    pub fn insert(&mut self, region: impl Into<String>, mut observations: Vec<RawObservation>) {
        observations.sort_by_key(|o| o.timestamp);
        self.series.insert(region.into().to_ascii_lowercase(), observations);
    }

    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(|k| k.as_str())
    }
}

impl SourceAdapter for StaticAdapter {
    fn component(&self) -> &str {
        &self.component
    }

    fn fetch(&self, region: &str, range: DateRange) -> Result<RawSeries, SourceError> {
        let observations = self
            .series
            .get(&region.to_ascii_lowercase())
            .ok_or_else(|| SourceError::UnknownRegion(region.to_string()))?;

        Ok(RawSeries::new(
            observations
                .iter()
                .filter(|o| range.contains(o.timestamp.date_naive()))
                .copied()
                .collect(),
        ))
    }
}
