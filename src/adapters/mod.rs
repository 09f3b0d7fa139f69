//! Source adapters
//!
//! Adapters fetch one component's raw series for a region and date range.
//! Network connectors live outside this crate; the adapters here serve
//! in-memory data, JSON datasets and deterministic synthetic data.

mod json;
mod memory;
mod synthetic;

pub use json::JsonSeriesDataset;
pub use memory::StaticAdapter;
pub use synthetic::SyntheticAdapter;

use crate::error::SourceError;
use crate::types::{DateRange, RawSeries};

/// Trait for component source adapters.
///
/// Implementations must fail closed: any problem is reported as an `Err`
/// or an empty series, never a panic. The harmonizer substitutes the
/// neutral value for either outcome.
pub trait SourceAdapter: Send + Sync {
    /// Component name this adapter feeds (e.g. `economic_stress`)
    fn component(&self) -> &str;

    /// Fetch the raw series for `region` covering `range`
    fn fetch(&self, region: &str, range: DateRange) -> Result<RawSeries, SourceError>;
}
