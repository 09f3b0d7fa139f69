//! End-to-end tests of the request pipeline

use behavior_index::config::{DEFAULT_WEIGHTS, ECONOMIC_STRESS, MOBILITY_ACTIVITY};
use behavior_index::types::{RawObservation, RiskTier, TrendDirection, DEFAULT_INDEX_VALUE};
use behavior_index::{
    EngineConfig, ForecastEngine, IndexError, JsonSeriesDataset, RegionRegistry, SourceAdapter,
    StaticAdapter, SyntheticAdapter,
};
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
}

fn synthetic_adapters() -> Vec<Arc<dyn SourceAdapter>> {
    DEFAULT_WEIGHTS
        .iter()
        .map(|(name, _)| {
            Arc::new(SyntheticAdapter::new(*name).with_gap_rate(0.1)) as Arc<dyn SourceAdapter>
        })
        .collect()
}

fn synthetic_engine() -> ForecastEngine {
    ForecastEngine::new(
        EngineConfig::default(),
        RegionRegistry::from_ids(["us-ca", "us-tx"]).unwrap(),
        synthetic_adapters(),
    )
    .unwrap()
}

fn daily(days: i64, f: impl Fn(i64) -> f64) -> Vec<RawObservation> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    (0..days)
        .map(|d| RawObservation {
            timestamp: start + Duration::days(d),
            value: f(d),
        })
        .collect()
}

#[test]
fn test_identical_inputs_serialize_identically() {
    let first = synthetic_engine()
        .get_forecast_as_of("us-ca", 60, 7, end())
        .unwrap();
    let second = synthetic_engine()
        .get_forecast_as_of("us-ca", 60, 7, end())
        .unwrap();

    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
}

#[test]
fn test_response_invariants() {
    let engine = synthetic_engine();
    let response = engine.get_forecast_as_of("US-TX", 90, 14, end()).unwrap();

    assert_eq!(response.as_of, end());
    assert_eq!(response.history.len(), 90);
    assert_eq!(response.forecast.len(), 14);
    assert!(response
        .history
        .iter()
        .all(|p| (0.0..=1.0).contains(&p.value)));
    for point in &response.forecast {
        assert!(point.date > end());
        assert!(0.0 <= point.lower && point.lower <= point.point);
        assert!(point.point <= point.upper && point.upper <= 1.0);
    }
    assert!((0.0..=1.0).contains(&response.risk.score));
    assert!((0.0..=1.0).contains(&response.confidence.confidence));
    assert!((0.0..=100.0).contains(&response.convergence.score));

    let total: f64 = response.contributions.iter().map(|c| c.weight).sum();
    assert!((total - 1.0).abs() < 1e-6);
}

#[test]
fn test_invalid_requests_rejected() {
    let engine = synthetic_engine();
    assert!(matches!(
        engine.get_forecast_as_of("us-ny", 60, 7, end()),
        Err(IndexError::InvalidRegion(_))
    ));
    assert!(matches!(
        engine.get_forecast_as_of("us-ca", 0, 7, end()),
        Err(IndexError::InvalidParameter(_))
    ));
    assert!(matches!(
        engine.get_forecast_as_of("us-ca", 60, 365, end()),
        Err(IndexError::InvalidParameter(_))
    ));
}

#[test]
fn test_all_zero_weights_yield_default_index() {
    let a = StaticAdapter::new("a").with_region("r1", daily(91, |_| 0.3));
    let b = StaticAdapter::new("b").with_region("r1", daily(91, |_| 0.8));

    let mut config = EngineConfig::default();
    config.index.weights = [("a".to_string(), 0.0), ("b".to_string(), 0.0)]
        .into_iter()
        .collect();

    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(a), Arc::new(b)];
    let engine = ForecastEngine::new(config, RegionRegistry::from_ids(["r1"]).unwrap(), adapters)
        .unwrap();
    let response = engine.get_forecast_as_of("r1", 60, 7, end()).unwrap();

    assert!(response
        .history
        .iter()
        .all(|p| p.value == DEFAULT_INDEX_VALUE));
    assert!(response.contributions.is_empty());
    assert_eq!(response.risk.tier, RiskTier::Stable);
}

#[test]
fn test_single_weighted_source_drives_index() {
    let economic = StaticAdapter::new(ECONOMIC_STRESS).with_region("r1", daily(91, |_| 0.7));
    let mobility = StaticAdapter::new(MOBILITY_ACTIVITY).with_region("r1", daily(91, |_| 0.9));

    let mut config = EngineConfig::default();
    config.index.weights = [
        (ECONOMIC_STRESS.to_string(), 3.0),
        (MOBILITY_ACTIVITY.to_string(), 1.0),
    ]
    .into_iter()
    .collect();

    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(economic), Arc::new(mobility)];
    let engine = ForecastEngine::new(config, RegionRegistry::from_ids(["r1"]).unwrap(), adapters)
        .unwrap();
    let response = engine.get_forecast_as_of("r1", 30, 3, end()).unwrap();

    // 0.75 * 0.7 + 0.25 * (1 - 0.9)
    let expected = 0.75 * 0.7 + 0.25 * 0.1;
    assert!((response.latest_index().unwrap() - expected).abs() < 1e-9);
    assert_eq!(
        response.sources_used,
        vec![ECONOMIC_STRESS.to_string(), MOBILITY_ACTIVITY.to_string()]
    );
}

#[test]
fn test_json_dataset_end_to_end() {
    let raw = r#"{
        "regions": {
            "metro-1": {
                "economic_stress": [
                    { "timestamp": "2024-03-01", "value": 0.4 },
                    { "timestamp": "2024-03-15T08:00:00Z", "value": 0.5 },
                    { "timestamp": "2024-03-31", "value": 0.6 }
                ],
                "environmental_stress": [
                    { "timestamp": "2024-03-20", "value": null }
                ]
            }
        }
    }"#;
    let dataset = JsonSeriesDataset::parse(raw).unwrap();
    let registry = RegionRegistry::from_ids(dataset.regions()).unwrap();
    let adapters: Vec<Arc<dyn SourceAdapter>> = dataset
        .into_adapters()
        .into_iter()
        .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>)
        .collect();

    let engine = ForecastEngine::new(EngineConfig::default(), registry, adapters).unwrap();
    let response = engine.get_forecast_as_of("metro-1", 31, 5, end()).unwrap();

    assert_eq!(response.history.len(), 31);
    assert_eq!(response.forecast.len(), 5);
    assert!(response.sources_used.contains(&ECONOMIC_STRESS.to_string()));
    assert!(!response
        .sources_used
        .contains(&"environmental_stress".to_string()));
}

#[test]
fn test_rising_single_component_drives_index_and_trend() {
    // A climbs linearly from 0.1 to 0.9 over 30 days; the rest sit at 0.5
    let rising = |d: i64| 0.1 + 0.8 * d as f64 / 29.0;
    let a = StaticAdapter::new("a").with_region("r1", daily(30, rising));
    let b = StaticAdapter::new("b").with_region("r1", daily(30, |_| 0.5));
    let c = StaticAdapter::new("c").with_region("r1", daily(30, |_| 0.5));

    let mut config = EngineConfig::default();
    config.index.weights = [
        ("a".to_string(), 1.0),
        ("b".to_string(), 0.0),
        ("c".to_string(), 0.0),
    ]
    .into_iter()
    .collect();

    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(a), Arc::new(b), Arc::new(c)];
    let engine = ForecastEngine::new(config, RegionRegistry::from_ids(["r1"]).unwrap(), adapters)
        .unwrap();
    let last_day = NaiveDate::from_ymd_opt(2024, 1, 30).unwrap();
    let response = engine.get_forecast_as_of("r1", 30, 7, last_day).unwrap();

    assert_eq!(response.history.len(), 30);
    for (d, point) in response.history.iter().enumerate() {
        assert!((point.value - rising(d as i64)).abs() < 1e-12);
    }
    assert_eq!(response.trend.direction, TrendDirection::Increasing);
    assert!(response.trend.slope_per_day > 0.0);
}
