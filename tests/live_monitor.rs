//! Live monitor behavior under concurrent use

use behavior_index::config::{MonitorConfig, DEFAULT_WEIGHTS, ECONOMIC_STRESS};
use behavior_index::error::SourceError;
use behavior_index::monitor::RegionState;
use behavior_index::types::{DateRange, RawObservation, RawSeries, RiskTier, ShockSeverity};
use behavior_index::{
    EngineConfig, ForecastEngine, IndexError, LiveMonitor, RegionRegistry, SourceAdapter,
    SyntheticAdapter,
};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Synthetic economic source that counts fetches and takes a while
struct SlowCountingAdapter {
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl SourceAdapter for SlowCountingAdapter {
    fn component(&self) -> &str {
        ECONOMIC_STRESS
    }

    fn fetch(&self, region: &str, range: DateRange) -> Result<RawSeries, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        SyntheticAdapter::new(ECONOMIC_STRESS).fetch(region, range)
    }
}

/// Source whose fetch panics for one region
struct PanickingAdapter {
    bad_region: &'static str,
}

impl SourceAdapter for PanickingAdapter {
    fn component(&self) -> &str {
        "digital_attention"
    }

    fn fetch(&self, region: &str, range: DateRange) -> Result<RawSeries, SourceError> {
        if region == self.bad_region {
            panic!("connector crashed");
        }
        SyntheticAdapter::new("digital_attention").fetch(region, range)
    }
}

/// Economic source that answers once, then panics on every later fetch
struct FailAfterFirstAdapter {
    calls: Arc<AtomicUsize>,
}

impl SourceAdapter for FailAfterFirstAdapter {
    fn component(&self) -> &str {
        ECONOMIC_STRESS
    }

    fn fetch(&self, region: &str, range: DateRange) -> Result<RawSeries, SourceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            panic!("upstream went away");
        }
        SyntheticAdapter::new(ECONOMIC_STRESS).fetch(region, range)
    }
}

/// Flat economic stress that spikes on the last day from the second fetch on
struct SpikingAdapter {
    calls: AtomicUsize,
}

impl SourceAdapter for SpikingAdapter {
    fn component(&self) -> &str {
        ECONOMIC_STRESS
    }

    fn fetch(&self, _region: &str, range: DateRange) -> Result<RawSeries, SourceError> {
        let spike = self.calls.fetch_add(1, Ordering::SeqCst) > 0;
        let observations = range
            .days()
            .map(|day| RawObservation {
                timestamp: day.and_hms_opt(12, 0, 0).unwrap().and_utc(),
                value: if spike && day == range.end { 1.0 } else { 0.2 },
            })
            .collect();
        Ok(RawSeries::new(observations))
    }
}

/// Poll until `done` holds or the deadline passes
fn wait_for(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    done()
}

fn monitor_config(regions: &[&str]) -> MonitorConfig {
    MonitorConfig {
        refresh_interval_secs: 3600,
        days_back: 30,
        horizon: 3,
        regions: regions.iter().map(|r| r.to_string()).collect(),
        ..MonitorConfig::default()
    }
}

fn engine_with(adapters: Vec<Arc<dyn SourceAdapter>>, regions: &[&str]) -> Arc<ForecastEngine> {
    Arc::new(
        ForecastEngine::new(
            EngineConfig::default(),
            RegionRegistry::from_ids(regions).unwrap(),
            adapters,
        )
        .unwrap(),
    )
}

fn synthetic_engine(regions: &[&str]) -> Arc<ForecastEngine> {
    engine_with(
        DEFAULT_WEIGHTS
            .iter()
            .map(|(name, _)| Arc::new(SyntheticAdapter::new(*name)) as Arc<dyn SourceAdapter>)
            .collect(),
        regions,
    )
}

#[test]
fn test_summary_before_first_refresh_is_uninitialized() {
    let monitor =
        LiveMonitor::start(synthetic_engine(&["us-ca"]), monitor_config(&["us-ca"])).unwrap();

    let summary = monitor.summary(None, 60).unwrap();
    assert_eq!(summary.regions.len(), 1);
    let region = &summary.regions[0];
    assert_eq!(region.region, "us-ca");
    assert_eq!(region.state, RegionState::Uninitialized);
    assert_eq!(region.snapshot_id, None);
    assert_eq!(region.age_seconds, None);
    assert!(region.forecast.is_empty());
    assert_eq!(region.snapshots_in_window, 0);
}

#[test]
fn test_concurrent_refreshes_recompute_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let adapter = SlowCountingAdapter {
        calls: calls.clone(),
        delay: Duration::from_millis(300),
    };
    let engine = engine_with(vec![Arc::new(adapter)], &["us-ca"]);
    let monitor = LiveMonitor::start(engine, monitor_config(&["us-ca"])).unwrap();

    let barrier = Barrier::new(2);
    let acks: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    monitor.refresh(Some(&["us-ca"])).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(acks[0].refreshed.len(), 1);
    assert_eq!(acks[0], acks[1]);

    let snapshot = monitor.snapshot("us-ca").unwrap();
    assert_eq!(snapshot.id, acks[0].refreshed[0].snapshot_id);
}

#[test]
fn test_refresh_publishes_snapshots() {
    let monitor = LiveMonitor::start(
        synthetic_engine(&["us-ca", "us-ny"]),
        monitor_config(&["us-ca"]),
    )
    .unwrap();

    let first = monitor.refresh(None).unwrap();
    assert_eq!(first.refreshed.len(), 1);
    assert!(first.failures.is_empty());

    // Explicitly requested regions start being tracked
    let second = monitor.refresh(Some(&["US-NY", "us-ca"])).unwrap();
    assert_eq!(second.refreshed.len(), 2);
    assert_eq!(monitor.tracked(), vec!["us-ca".to_string(), "us-ny".to_string()]);

    let summary = monitor.summary(Some(&["us-ca"]), 60).unwrap();
    let region = &summary.regions[0];
    assert_eq!(region.state, RegionState::Fresh);
    assert!(region.age_seconds.is_some_and(|age| (0..60).contains(&age)));
    assert_eq!(region.snapshots_in_window, 2);
    assert_eq!(region.forecast.len(), 3);
    assert!(region.latest_index.is_some());
    assert!(region.last_failure.is_none());
    // Same inputs on the same day give the same index
    assert!(!region.flags.index_jump);
}

#[test]
fn test_failing_region_is_isolated() {
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(SyntheticAdapter::new(ECONOMIC_STRESS)),
        Arc::new(PanickingAdapter { bad_region: "bad" }),
    ];
    let engine = engine_with(adapters, &["good", "bad"]);
    let monitor = LiveMonitor::start(engine, monitor_config(&["good", "bad"])).unwrap();

    let ack = monitor.refresh(None).unwrap();
    assert_eq!(ack.refreshed.len(), 1);
    assert_eq!(ack.refreshed[0].region, "good");
    assert_eq!(ack.failures.len(), 1);
    assert_eq!(ack.failures[0].region, "bad");

    let summary = monitor.summary(None, 60).unwrap();
    let bad = summary.regions.iter().find(|r| r.region == "bad").unwrap();
    assert_eq!(bad.state, RegionState::Uninitialized);
    assert!(bad.last_failure.is_some());
    let good = summary.regions.iter().find(|r| r.region == "good").unwrap();
    assert_eq!(good.state, RegionState::Fresh);
    assert!(monitor.is_running());
}

#[test]
fn test_unknown_region_and_shutdown() {
    let monitor = LiveMonitor::start(synthetic_engine(&["us-ca"]), monitor_config(&[])).unwrap();

    assert!(matches!(
        monitor.summary(Some(&["atlantis"]), 60),
        Err(IndexError::InvalidRegion(_))
    ));
    assert!(matches!(
        monitor.refresh(Some(&["atlantis"])),
        Err(IndexError::InvalidRegion(_))
    ));

    monitor.shutdown();
    monitor.shutdown();
    assert!(!monitor.is_running());
    assert!(matches!(
        monitor.refresh(Some(&["us-ca"])),
        Err(IndexError::MonitorUnavailable(_))
    ));
}

#[test]
fn test_start_rejects_invalid_monitor_parameters() {
    let mut config = monitor_config(&["us-ca"]);
    config.horizon = 0;
    assert!(matches!(
        LiveMonitor::start(synthetic_engine(&["us-ca"]), config),
        Err(IndexError::InvalidParameter(_))
    ));
}

#[test]
fn test_history_capacity_evicts_oldest() {
    let mut config = monitor_config(&["us-ca"]);
    config.history_capacity = 2;
    let monitor = LiveMonitor::start(synthetic_engine(&["us-ca"]), config).unwrap();

    let ids: Vec<_> = (0..3)
        .map(|_| monitor.refresh(None).unwrap().refreshed[0].snapshot_id)
        .collect();

    let retained: Vec<_> = monitor.history("us-ca").iter().map(|s| s.id).collect();
    assert_eq!(retained, vec![ids[1], ids[2]]);
    assert_eq!(monitor.summary(None, 60).unwrap().regions[0].snapshots_in_window, 2);
}

#[test]
fn test_timer_cycle_refreshes_tracked_regions() {
    let mut config = monitor_config(&["us-ca"]);
    config.refresh_interval_secs = 1;
    let monitor = LiveMonitor::start(synthetic_engine(&["us-ca"]), config).unwrap();

    assert!(wait_for(Duration::from_secs(5), || monitor
        .snapshot("us-ca")
        .is_some()));
    let summary = monitor.summary(None, 60).unwrap();
    assert_eq!(summary.regions[0].state, RegionState::Fresh);
}

#[test]
fn test_snapshot_goes_stale_when_cycles_fail() {
    let calls = Arc::new(AtomicUsize::new(0));
    let adapter = FailAfterFirstAdapter {
        calls: calls.clone(),
    };
    let mut config = monitor_config(&["us-ca"]);
    config.refresh_interval_secs = 1;
    config.stale_after_factor = 1.0;
    let engine = engine_with(vec![Arc::new(adapter)], &["us-ca"]);
    let monitor = LiveMonitor::start(engine, config).unwrap();

    let ack = monitor.refresh(None).unwrap();
    let first_id = ack.refreshed[0].snapshot_id;
    assert_eq!(monitor.summary(None, 60).unwrap().regions[0].state, RegionState::Fresh);

    // Scheduled cycles keep failing, so the published snapshot only ages
    assert!(wait_for(Duration::from_secs(6), || {
        monitor.summary(None, 60).unwrap().regions[0].state == RegionState::Stale
    }));
    let summary = monitor.summary(None, 60).unwrap();
    let region = &summary.regions[0];
    assert_eq!(region.snapshot_id, Some(first_id));
    assert!(region.age_seconds.is_some_and(|age| age >= 1));
    assert!(region.last_failure.is_some());
    assert!(calls.load(Ordering::SeqCst) >= 2);
}

#[test]
fn test_summary_flags_new_shocks_and_escalation() {
    let adapter = SpikingAdapter {
        calls: AtomicUsize::new(0),
    };
    let engine = engine_with(vec![Arc::new(adapter)], &["us-ca"]);
    let monitor = LiveMonitor::start(engine, monitor_config(&["us-ca"])).unwrap();

    monitor.refresh(None).unwrap();
    let calm = monitor.summary(None, 60).unwrap();
    assert_eq!(calm.regions[0].risk_tier, Some(RiskTier::Stable));
    assert!(!calm.regions[0].flags.new_shocks);

    monitor.refresh(None).unwrap();
    let summary = monitor.summary(None, 60).unwrap();
    let region = &summary.regions[0];
    assert!(region.flags.new_shocks);
    assert!(region.flags.risk_escalated);
    assert!(region.flags.index_jump);
    assert_eq!(region.risk_tier, Some(RiskTier::Critical));
    assert_eq!(region.new_shock_events.len(), 1);
    assert_eq!(region.new_shock_events[0].component, ECONOMIC_STRESS);
    assert_eq!(region.new_shock_events[0].severity, ShockSeverity::Severe);
}

#[test]
fn test_untrack_during_refresh_discards_result() {
    let calls = Arc::new(AtomicUsize::new(0));
    let adapter = SlowCountingAdapter {
        calls: calls.clone(),
        delay: Duration::from_millis(300),
    };
    let engine = engine_with(vec![Arc::new(adapter)], &["us-ca"]);
    let monitor = LiveMonitor::start(engine, monitor_config(&[])).unwrap();

    let ack = thread::scope(|s| {
        let refresh = s.spawn(|| monitor.refresh(Some(&["us-ca"])).unwrap());
        assert!(wait_for(Duration::from_secs(5), || calls.load(Ordering::SeqCst) == 1));
        assert!(monitor.untrack("us-ca").unwrap());
        refresh.join().unwrap()
    });

    assert!(ack.refreshed.is_empty());
    assert_eq!(ack.failures.len(), 1);
    assert!(monitor.tracked().is_empty());
    assert!(monitor.snapshot("us-ca").is_none());
}
