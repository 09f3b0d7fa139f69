//! Intelligence layer
//!
//! Interpretive analysis attached to every forecast: shocks in the
//! harmonized history, pairwise correlations, convergence of the correlated
//! components, a risk tier and a confidence/drift report.

pub mod confidence;
pub mod convergence;
pub mod correlation;
pub mod risk;
pub mod shock;

pub use confidence::{Backtest, ConfidenceMonitor};
pub use convergence::ConvergenceEngine;
pub use correlation::{pearson, CorrelationEngine};
pub use risk::RiskClassifier;
pub use shock::ShockDetector;
