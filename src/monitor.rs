//! Live monitor
//!
//! A dedicated worker thread recomputes every tracked region on a fixed
//! interval and publishes immutable snapshots. Readers take a short read
//! lock and clone `Arc`s; only the worker writes snapshots.
//!
//! Explicit refreshes are sent to the worker and block until it finishes.
//! Each region has at most one refresh in flight: a caller asking for a
//! region that is already being recomputed waits on the existing ticket.

use crate::config::MonitorConfig;
use crate::error::{IndexError, IndexResult};
use crate::pipeline::{ForecastEngine, ForecastResponse};
use crate::types::{ForecastPoint, RiskTier, ShockEvent};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often a waiting caller re-checks that the worker is alive
const LIVENESS_POLL: Duration = Duration::from_millis(100);

const COMMAND_CHANNEL_BOUND: usize = 64;

/// Summary windows are capped at roughly ten years
const MAX_WINDOW_MINUTES: u64 = 60 * 24 * 365 * 10;

/// Freshness of a region's latest snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionState {
    Uninitialized,
    Fresh,
    Stale,
}

/// Immutable result of one region recomputation
#[derive(Debug, Clone)]
pub struct RegionSnapshot {
    pub id: Uuid,
    pub region: String,
    pub computed_at: DateTime<Utc>,
    pub response: Arc<ForecastResponse>,
}

impl RegionSnapshot {
    pub fn latest_index(&self) -> Option<f64> {
        self.response.latest_index()
    }

    pub fn tier(&self) -> RiskTier {
        self.response.risk.tier
    }
}

/// A recomputation that failed; the previous snapshot stays in place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshFailure {
    pub region: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Notable changes within the summary window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFlags {
    pub new_shocks: bool,
    pub risk_escalated: bool,
    pub index_jump: bool,
}

/// Per-region view returned by [`LiveMonitor::summary`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSummary {
    pub region: String,
    pub state: RegionState,
    pub snapshot_id: Option<Uuid>,
    pub computed_at: Option<DateTime<Utc>>,
    /// Seconds since the newest snapshot was computed
    pub age_seconds: Option<i64>,
    pub latest_index: Option<f64>,
    pub risk_tier: Option<RiskTier>,
    pub risk_score: Option<f64>,
    pub confidence: Option<f64>,
    pub forecast: Vec<ForecastPoint>,
    pub flags: EventFlags,
    /// Shocks present in the newest snapshot but not in the baseline one
    pub new_shock_events: Vec<ShockEvent>,
    pub snapshots_in_window: usize,
    pub last_failure: Option<RefreshFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSummary {
    pub generated_at: DateTime<Utc>,
    pub window_minutes: u64,
    pub regions: Vec<RegionSummary>,
}

/// Region refreshed by an explicit request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRefresh {
    pub region: String,
    pub snapshot_id: Uuid,
}

/// Completion report of [`LiveMonitor::refresh`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshAck {
    pub refreshed: Vec<RegionRefresh>,
    pub failures: Vec<RefreshFailure>,
}

type TicketOutcome = Result<Uuid, String>;

/// One in-flight recomputation of a region
struct RefreshTicket {
    outcome: Mutex<Option<TicketOutcome>>,
    ready: Condvar,
}

impl RefreshTicket {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, outcome: TicketOutcome) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(outcome);
        self.ready.notify_all();
    }

    /// Block until completed, or until the worker is gone
    fn wait(&self, running: &AtomicBool) -> TicketOutcome {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            if !running.load(Ordering::SeqCst) {
                return Err("live monitor stopped".to_string());
            }
            slot = self
                .ready
                .wait_timeout(slot, LIVENESS_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

#[derive(Default)]
struct RegionEntry {
    history: VecDeque<Arc<RegionSnapshot>>,
    last_failure: Option<RefreshFailure>,
}

struct Shared {
    regions: RwLock<BTreeMap<String, RegionEntry>>,
    tickets: Mutex<HashMap<String, Arc<RefreshTicket>>>,
    running: AtomicBool,
}

struct Job {
    region: String,
    ticket: Arc<RefreshTicket>,
}

enum Command {
    Refresh(Vec<Job>),
    Shutdown,
}

/// Background monitor over a shared engine
pub struct LiveMonitor {
    engine: Arc<ForecastEngine>,
    config: MonitorConfig,
    shared: Arc<Shared>,
    tx: Sender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LiveMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveMonitor")
            .field("config", &self.config)
            .field("running", &self.shared.running.load(Ordering::SeqCst))
            .finish()
    }
}

impl LiveMonitor {
    /// Start the worker thread.
    ///
    /// Regions listed in the config are tracked immediately. The first
    /// automatic cycle runs one interval after start; until then every
    /// region is `Uninitialized` unless refreshed explicitly.
    pub fn start(engine: Arc<ForecastEngine>, config: MonitorConfig) -> IndexResult<Self> {
        config.validate()?;
        engine.validate_parameters(config.days_back, config.horizon)?;

        let mut regions = BTreeMap::new();
        for raw in &config.regions {
            let id = engine.registry().resolve(raw)?;
            regions.insert(id, RegionEntry::default());
        }

        let shared = Arc::new(Shared {
            regions: RwLock::new(regions),
            tickets: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        });

        let (tx, rx) = bounded(COMMAND_CHANNEL_BOUND);
        let worker = Worker {
            engine: engine.clone(),
            config: config.clone(),
            shared: shared.clone(),
        };
        let handle = thread::Builder::new()
            .name("bindex-live-monitor".to_string())
            .spawn(move || worker.run(rx))?;

        info!(
            interval_secs = config.refresh_interval_secs,
            regions = config.regions.len(),
            "Live monitor started"
        );

        Ok(Self {
            engine,
            config,
            shared,
            tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Start tracking a registered region
    pub fn track(&self, region: &str) -> IndexResult<String> {
        let id = self.engine.registry().resolve(region)?;
        self.write_regions().entry(id.clone()).or_default();
        Ok(id)
    }

    /// Stop tracking a region and drop its snapshots
    pub fn untrack(&self, region: &str) -> IndexResult<bool> {
        let id = self.engine.registry().resolve(region)?;
        Ok(self.write_regions().remove(&id).is_some())
    }

    /// Tracked region ids, sorted
    pub fn tracked(&self) -> Vec<String> {
        self.read_regions().keys().cloned().collect()
    }

    /// Newest snapshot for a region
    pub fn snapshot(&self, region: &str) -> Option<Arc<RegionSnapshot>> {
        let id = self.engine.registry().resolve(region).ok()?;
        self.read_regions()
            .get(&id)
            .and_then(|entry| entry.history.back().cloned())
    }

    /// Retained snapshots for a region, oldest first
    pub fn history(&self, region: &str) -> Vec<Arc<RegionSnapshot>> {
        let Ok(id) = self.engine.registry().resolve(region) else {
            return Vec::new();
        };
        self.read_regions()
            .get(&id)
            .map(|entry| entry.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Recompute the given regions (all tracked when `None`) and wait.
    ///
    /// Requested regions that are not yet tracked start being tracked.
    /// Per-region failures are reported in the ack, not as an error.
    pub fn refresh(&self, regions: Option<&[&str]>) -> IndexResult<RefreshAck> {
        if !self.is_running() {
            return Err(IndexError::MonitorUnavailable("live monitor stopped".to_string()));
        }
        let targets = match regions {
            Some(list) => {
                let mut ids = Vec::with_capacity(list.len());
                for raw in list {
                    ids.push(self.track(raw)?);
                }
                ids
            }
            None => self.tracked(),
        };

        let mut jobs = Vec::new();
        let mut waits = Vec::with_capacity(targets.len());
        {
            let mut tickets = self.shared.tickets.lock().unwrap_or_else(PoisonError::into_inner);
            let mut seen = HashSet::new();
            for region in targets {
                if !seen.insert(region.clone()) {
                    continue;
                }
                let ticket = match tickets.get(&region) {
                    Some(existing) => {
                        debug!(region = %region, "Joining in-flight refresh");
                        existing.clone()
                    }
                    None => {
                        let ticket = Arc::new(RefreshTicket::new());
                        tickets.insert(region.clone(), ticket.clone());
                        jobs.push(Job {
                            region: region.clone(),
                            ticket: ticket.clone(),
                        });
                        ticket
                    }
                };
                waits.push((region, ticket));
            }
        }

        if !jobs.is_empty() {
            if let Err(err) = self.tx.send(Command::Refresh(jobs)) {
                if let Command::Refresh(jobs) = err.into_inner() {
                    abandon(&self.shared, jobs, "live monitor stopped");
                }
                return Err(IndexError::MonitorUnavailable(
                    "live monitor channel disconnected".to_string(),
                ));
            }
        }

        let mut ack = RefreshAck::default();
        for (region, ticket) in waits {
            match ticket.wait(&self.shared.running) {
                Ok(snapshot_id) => ack.refreshed.push(RegionRefresh {
                    region,
                    snapshot_id,
                }),
                Err(error) => ack.failures.push(RefreshFailure {
                    region,
                    error,
                    at: Utc::now(),
                }),
            }
        }
        Ok(ack)
    }

    /// Summarize regions (all tracked when `None`) over the last
    /// `window_minutes`. Never triggers recomputation.
    pub fn summary(
        &self,
        regions: Option<&[&str]>,
        window_minutes: u64,
    ) -> IndexResult<LiveSummary> {
        let ids: Vec<String> = match regions {
            Some(list) => list
                .iter()
                .map(|raw| self.engine.registry().resolve(raw))
                .collect::<IndexResult<_>>()?,
            None => self.tracked(),
        };

        let now = Utc::now();
        let window_start =
            now - ChronoDuration::minutes(window_minutes.min(MAX_WINDOW_MINUTES) as i64);
        let stale_after = ChronoDuration::from_std(self.config.stale_after())
            .unwrap_or_else(|_| ChronoDuration::seconds(i64::from(u32::MAX)));

        let guard = self.read_regions();
        let summaries = ids
            .into_iter()
            .map(|id| {
                let empty = RegionEntry::default();
                let entry = guard.get(&id).unwrap_or(&empty);
                summarize_region(
                    id,
                    entry,
                    now,
                    window_start,
                    stale_after,
                    self.config.index_jump_threshold,
                )
            })
            .collect();

        Ok(LiveSummary {
            generated_at: now,
            window_minutes,
            regions: summaries,
        })
    }

    /// Stop the worker and wait for it to exit. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Live monitor worker panicked");
            }
        }
        self.shared.running.store(false, Ordering::SeqCst);
    }

    fn read_regions(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, RegionEntry>> {
        self.shared.regions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_regions(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, RegionEntry>> {
        self.shared.regions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LiveMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State of a snapshot of the given age
pub fn region_state(age: Option<ChronoDuration>, stale_after: ChronoDuration) -> RegionState {
    match age {
        None => RegionState::Uninitialized,
        Some(age) if age > stale_after => RegionState::Stale,
        Some(_) => RegionState::Fresh,
    }
}

/// Compare the newest snapshot against the baseline for the window: the
/// last snapshot taken before the window, or the oldest one inside it.
fn event_flags(
    history: &VecDeque<Arc<RegionSnapshot>>,
    window_start: DateTime<Utc>,
    index_jump_threshold: f64,
) -> (EventFlags, Vec<ShockEvent>, usize) {
    let in_window = history
        .iter()
        .filter(|s| s.computed_at >= window_start)
        .count();
    let Some(newest) = history.back() else {
        return (EventFlags::default(), Vec::new(), 0);
    };
    if in_window == 0 {
        return (EventFlags::default(), Vec::new(), 0);
    }

    let baseline = history
        .iter()
        .rev()
        .find(|s| s.computed_at < window_start)
        .or_else(|| history.iter().find(|s| s.computed_at >= window_start));
    let Some(baseline) = baseline.filter(|b| !Arc::ptr_eq(b, newest)) else {
        return (EventFlags::default(), Vec::new(), in_window);
    };

    let known: HashSet<(chrono::NaiveDate, &str)> = baseline
        .response
        .shocks
        .iter()
        .map(|s| (s.date, s.component.as_str()))
        .collect();
    let new_shocks: Vec<ShockEvent> = newest
        .response
        .shocks
        .iter()
        .filter(|s| !known.contains(&(s.date, s.component.as_str())))
        .cloned()
        .collect();

    let index_jump = match (newest.latest_index(), baseline.latest_index()) {
        (Some(a), Some(b)) => (a - b).abs() >= index_jump_threshold,
        _ => false,
    };

    let flags = EventFlags {
        new_shocks: !new_shocks.is_empty(),
        risk_escalated: newest.tier() > baseline.tier(),
        index_jump,
    };
    (flags, new_shocks, in_window)
}

fn summarize_region(
    region: String,
    entry: &RegionEntry,
    now: DateTime<Utc>,
    window_start: DateTime<Utc>,
    stale_after: ChronoDuration,
    index_jump_threshold: f64,
) -> RegionSummary {
    let newest = entry.history.back();
    let age = newest.map(|s| now - s.computed_at);
    let state = region_state(age, stale_after);
    let (flags, new_shock_events, snapshots_in_window) =
        event_flags(&entry.history, window_start, index_jump_threshold);

    RegionSummary {
        region,
        state,
        snapshot_id: newest.map(|s| s.id),
        computed_at: newest.map(|s| s.computed_at),
        age_seconds: age.map(|a| a.num_seconds().max(0)),
        latest_index: newest.and_then(|s| s.latest_index()),
        risk_tier: newest.map(|s| s.tier()),
        risk_score: newest.map(|s| s.response.risk.score),
        confidence: newest.map(|s| s.response.confidence.confidence),
        forecast: newest
            .map(|s| s.response.forecast.clone())
            .unwrap_or_default(),
        flags,
        new_shock_events,
        snapshots_in_window,
        last_failure: entry.last_failure.clone(),
    }
}

/// Release tickets whose jobs will never run
fn abandon(shared: &Shared, jobs: Vec<Job>, reason: &str) {
    let mut tickets = shared.tickets.lock().unwrap_or_else(PoisonError::into_inner);
    for job in jobs {
        if tickets
            .get(&job.region)
            .is_some_and(|t| Arc::ptr_eq(t, &job.ticket))
        {
            tickets.remove(&job.region);
        }
        job.ticket.complete(Err(reason.to_string()));
    }
}

struct Worker {
    engine: Arc<ForecastEngine>,
    config: MonitorConfig,
    shared: Arc<Shared>,
}

impl Worker {
    fn run(self, rx: Receiver<Command>) {
        let interval = self.config.refresh_interval();
        let mut next_cycle = Instant::now() + interval;

        loop {
            let wait = next_cycle.saturating_duration_since(Instant::now());
            match rx.recv_timeout(wait) {
                Ok(Command::Refresh(jobs)) => {
                    for job in jobs {
                        self.execute(job);
                    }
                }
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    self.cycle();
                    next_cycle = Instant::now() + interval;
                }
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);
        while let Ok(command) = rx.try_recv() {
            if let Command::Refresh(jobs) = command {
                abandon(&self.shared, jobs, "live monitor stopped");
            }
        }
        info!("Live monitor stopped");
    }

    /// Scheduled refresh of every tracked region
    fn cycle(&self) {
        let started = Instant::now();
        let regions: Vec<String> = self
            .shared
            .regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();

        let mut jobs = Vec::with_capacity(regions.len());
        {
            let mut tickets = self.shared.tickets.lock().unwrap_or_else(PoisonError::into_inner);
            // A region with a queued explicit refresh is handled by that job
            let pending: Vec<String> = regions
                .into_iter()
                .filter(|region| !tickets.contains_key(region))
                .collect();
            for region in pending {
                let ticket = Arc::new(RefreshTicket::new());
                tickets.insert(region.clone(), ticket.clone());
                jobs.push(Job { region, ticket });
            }
        }

        let count = jobs.len();
        for job in jobs {
            self.execute(job);
        }
        info!(
            regions = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Live monitor cycle complete"
        );
    }

    fn execute(&self, job: Job) {
        let mut outcome = self.recompute(&job.region);

        let tracked = {
            let mut regions = self
                .shared
                .regions
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match regions.get_mut(&job.region) {
                Some(entry) => {
                    match &outcome {
                        Ok(snapshot) => {
                            entry.history.push_back(snapshot.clone());
                            while entry.history.len() > self.config.history_capacity.max(1) {
                                entry.history.pop_front();
                            }
                            entry.last_failure = None;
                        }
                        Err(error) => {
                            entry.last_failure = Some(RefreshFailure {
                                region: job.region.clone(),
                                error: error.clone(),
                                at: Utc::now(),
                            });
                        }
                    }
                    true
                }
                None => false,
            }
        };
        // Untracked while recomputing; the result is discarded
        if !tracked {
            debug!(region = %job.region, "Dropping result for untracked region");
            outcome = Err("region no longer tracked".to_string());
        }

        {
            let mut tickets = self.shared.tickets.lock().unwrap_or_else(PoisonError::into_inner);
            if tickets
                .get(&job.region)
                .is_some_and(|t| Arc::ptr_eq(t, &job.ticket))
            {
                tickets.remove(&job.region);
            }
        }
        job.ticket.complete(outcome.map(|snapshot| snapshot.id));
    }

    /// Run the pipeline for one region, isolating errors and panics
    fn recompute(&self, region: &str) -> Result<Arc<RegionSnapshot>, String> {
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            let request = self.engine.request(
                region,
                self.config.days_back,
                self.config.horizon,
                Utc::now().date_naive(),
            )?;
            self.engine.analyze(&request)
        }));

        let result = match attempt {
            Ok(Ok(response)) => Ok(Arc::new(RegionSnapshot {
                id: Uuid::new_v4(),
                region: region.to_string(),
                computed_at: Utc::now(),
                response: Arc::new(response),
            })),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("region computation panicked".to_string()),
        };

        match &result {
            Ok(snapshot) => debug!(region = %region, snapshot = %snapshot.id, "Region refreshed"),
            Err(error) => warn!(region = %region, error = %error, "Region refresh failed"),
        }
        result
    }
}
