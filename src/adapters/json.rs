//! JSON dataset adapter
//!
//! Parses a dataset of the form
//!
//! ```json
//! {
//!   "regions": {
//!     "us-ca": {
//!       "economic_stress": [{ "timestamp": "2024-01-15T00:00:00Z", "value": 0.42 }]
//!     }
//!   }
//! }
//! ```
//!
//! and splits it into one [`StaticAdapter`] per component.

use crate::error::SourceError;
use crate::types::RawObservation;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::StaticAdapter;

#[derive(Debug, Deserialize)]
struct DatasetPayload {
    regions: BTreeMap<String, BTreeMap<String, Vec<ObservationPayload>>>,
}

#[derive(Debug, Deserialize)]
struct ObservationPayload {
    timestamp: String,
    value: Option<f64>,
}

/// Parsed multi-region, multi-component dataset
#[derive(Debug, Clone, Default)]
pub struct JsonSeriesDataset {
    adapters: BTreeMap<String, StaticAdapter>,
    regions: Vec<String>,
}

impl JsonSeriesDataset {
    /// Parse a dataset document.
    ///
    /// Observations with a null value are skipped; an unparseable timestamp
    /// rejects the whole document.
    pub fn parse(raw_json: &str) -> Result<Self, SourceError> {
        let payload: DatasetPayload =
            serde_json::from_str(raw_json).map_err(|e| SourceError::Parse(e.to_string()))?;

        let mut adapters: BTreeMap<String, StaticAdapter> = BTreeMap::new();
        let mut regions = Vec::with_capacity(payload.regions.len());

        for (region, components) in payload.regions {
            let region = region.to_ascii_lowercase();
            for (component, records) in components {
                let mut observations = Vec::with_capacity(records.len());
                for record in records {
                    let Some(value) = record.value else {
                        continue;
                    };
                    observations.push(RawObservation {
                        timestamp: parse_timestamp(&record.timestamp)?,
                        value,
                    });
                }
                adapters
                    .entry(component.clone())
                    .or_insert_with(|| StaticAdapter::new(component))
                    .insert(region.clone(), observations);
            }
            regions.push(region);
        }

        Ok(Self { adapters, regions })
    }

    /// Regions present in the dataset, sorted
    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    /// Components present in the dataset, sorted
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(|k| k.as_str())
    }

    /// Consume the dataset into one adapter per component
    pub fn into_adapters(self) -> Vec<StaticAdapter> {
        self.adapters.into_values().collect()
    }
}

/// Accept RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC)
fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, SourceError> {
    if let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| SourceError::Parse(format!("invalid timestamp: {}", raw)))
}
