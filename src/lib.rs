//! Behavior Index - regional behavior stress index and forecast engine
//!
//! Fuses heterogeneous public data streams into a composite stress index per
//! region through a deterministic pipeline: source adaptation → daily
//! harmonization → weighted index → forecast ladder → intelligence layer.
//!
//! ## Modules
//!
//! - **Request pipeline**: [`ForecastEngine`] answers forecast requests with a
//!   shared TTL/LRU result cache
//! - **Live monitor**: [`LiveMonitor`] keeps per-region snapshots fresh on a
//!   background worker and summarizes recent changes

pub mod adapters;
pub mod baseline;
pub mod cache;
pub mod config;
pub mod error;
pub mod forecast;
pub mod harmonizer;
pub mod index;
pub mod intelligence;
pub mod monitor;
pub mod pipeline;
pub mod region;
pub mod types;

pub use adapters::{JsonSeriesDataset, SourceAdapter, StaticAdapter, SyntheticAdapter};
pub use cache::ResultCache;
pub use config::EngineConfig;
pub use error::{IndexError, IndexResult, SourceError};
pub use forecast::{ForecastModel, ForecastResult, Forecaster};
pub use harmonizer::{DataHarmonizer, HarmonizedTable};
pub use index::{IndexCalculator, WeightSet};
pub use monitor::{LiveMonitor, LiveSummary, RefreshAck};
pub use pipeline::{ForecastEngine, ForecastRequest, ForecastResponse};
pub use region::RegionRegistry;

/// Engine version embedded in every response
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name embedded in every response
pub const ENGINE_NAME: &str = "behavior-index";
