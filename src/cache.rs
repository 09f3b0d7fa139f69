//! Result cache
//!
//! Memoizes computed results per key with TTL expiry and LRU eviction.
//! A single mutex guards the entry map, the recency queue and the in-flight
//! table; computation always runs outside it. Concurrent callers for a key
//! that is already being computed wait for that computation instead of
//! starting their own.

use crate::error::{IndexError, IndexResult};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Counters since the cache was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct Entry<V> {
    value: Arc<V>,
    inserted: Instant,
    /// Recency stamp; queue items carrying an older stamp are stale
    tick: u64,
}

type Outcome<V> = Result<Arc<V>, String>;

struct InFlight<V> {
    outcome: Mutex<Option<Outcome<V>>>,
    ready: Condvar,
}

impl<V> InFlight<V> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, outcome: Outcome<V>) {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(outcome);
        self.ready.notify_all();
    }

    fn wait(&self) -> IndexResult<Arc<V>> {
        let mut slot = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone().map_err(IndexError::Computation);
            }
            slot = self.ready.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct CacheState<K, V> {
    entries: HashMap<K, Entry<V>>,
    recency: VecDeque<(K, u64)>,
    in_flight: HashMap<K, Arc<InFlight<V>>>,
    tick: u64,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V> CacheState<K, V> {
    fn touch(&mut self, key: &K) -> u64 {
        self.tick += 1;
        self.recency.push_back((key.clone(), self.tick));
        self.tick
    }

    fn lookup(&mut self, key: &K, ttl: Duration) -> Option<Arc<V>> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.inserted.elapsed() >= ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(key);
            self.stats.expirations += 1;
            return None;
        }
        let tick = self.touch(key);
        let entry = self.entries.get_mut(key)?;
        entry.tick = tick;
        let value = entry.value.clone();
        self.maybe_compact();
        Some(value)
    }

    fn store(&mut self, key: K, value: Arc<V>, capacity: usize) {
        let tick = self.touch(&key);
        self.entries.insert(
            key,
            Entry {
                value,
                inserted: Instant::now(),
                tick,
            },
        );

        while self.entries.len() > capacity {
            let Some((candidate, stamp)) = self.recency.pop_front() else {
                break;
            };
            let current = self.entries.get(&candidate).map(|e| e.tick);
            if current == Some(stamp) {
                self.entries.remove(&candidate);
                self.stats.evictions += 1;
            }
        }

        self.maybe_compact();
    }

    /// Drop stale queue items once they outnumber live entries, keeping one
    /// item per live entry in recency order
    fn maybe_compact(&mut self) {
        if self.recency.len() <= self.entries.len().saturating_mul(4).max(16) {
            return;
        }
        let entries = &self.entries;
        self.recency
            .retain(|(key, stamp)| entries.get(key).map(|e| e.tick) == Some(*stamp));
    }
}

/// Thread-safe TTL + LRU cache with single-flight computation
pub struct ResultCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    ttl: Duration,
    capacity: usize,
}

impl<K, V> fmt::Debug for ResultCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}

enum Role<V> {
    Leader(Arc<InFlight<V>>),
    Waiter(Arc<InFlight<V>>),
}

impl<K, V> ResultCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: VecDeque::new(),
                in_flight: HashMap::new(),
                tick: 0,
                stats: CacheStats::default(),
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh cached value for `key`, refreshing its recency
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut state = self.lock();
        let value = state.lookup(key, self.ttl);
        if value.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        value
    }

    /// Store a value, evicting the least recently used entry past capacity
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.lock().store(key, value.clone(), self.capacity);
        value
    }

    /// Return the cached value or compute it.
    ///
    /// At most one computation per key runs at a time; callers arriving
    /// meanwhile block until it finishes and share its result. Failures are
    /// not cached.
    pub fn get_or_compute<F>(&self, key: K, compute: F) -> IndexResult<Arc<V>>
    where
        F: FnOnce() -> IndexResult<V>,
    {
        let role = {
            let mut state = self.lock();
            if let Some(value) = state.lookup(&key, self.ttl) {
                state.stats.hits += 1;
                debug!(key = ?key, "Cache hit");
                return Ok(value);
            }
            state.stats.misses += 1;
            match state.in_flight.get(&key) {
                Some(flight) => Role::Waiter(flight.clone()),
                None => {
                    let flight = Arc::new(InFlight::new());
                    state.in_flight.insert(key.clone(), flight.clone());
                    Role::Leader(flight)
                }
            }
        };

        let flight = match role {
            Role::Waiter(flight) => {
                debug!(key = ?key, "Joining in-flight computation");
                return flight.wait();
            }
            Role::Leader(flight) => flight,
        };

        debug!(key = ?key, "Cache miss, computing");
        let mut guard = FlightGuard {
            cache: self,
            key: Some(key),
            flight,
        };
        let result = compute().map(Arc::new);
        let outcome = match &result {
            Ok(value) => Ok(value.clone()),
            Err(e) => Err(e.to_string()),
        };
        guard.finish(outcome);
        result
    }

    /// Drop a single entry
    pub fn invalidate(&self, key: &K) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Publishes the leader's outcome; on unwind, releases waiters with an error
struct FlightGuard<'a, K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    cache: &'a ResultCache<K, V>,
    key: Option<K>,
    flight: Arc<InFlight<V>>,
}

impl<K, V> FlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn finish(&mut self, outcome: Outcome<V>) {
        let Some(key) = self.key.take() else {
            return;
        };
        {
            let mut state = self.cache.lock();
            if let Ok(value) = &outcome {
                state.store(key.clone(), value.clone(), self.cache.capacity);
            }
            state.in_flight.remove(&key);
        }
        self.flight.complete(outcome);
    }
}

impl<K, V> Drop for FlightGuard<'_, K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn drop(&mut self) {
        if self.key.is_some() {
            self.finish(Err("computation aborted".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_get_and_insert() {
        let cache: ResultCache<String, u32> = ResultCache::new(Duration::from_secs(60), 4);
        assert!(cache.get(&"a".to_string()).is_none());
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()).as_deref(), Some(&1));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_lru_eviction() {
        let cache: ResultCache<u32, u32> = ResultCache::new(Duration::from_secs(60), 2);
        cache.insert(1, 10);
        cache.insert(2, 20);
        // Touch 1 so 2 becomes least recently used
        assert!(cache.get(&1).is_some());
        cache.insert(3, 30);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&2).is_none());
        assert!(cache.get(&1).is_some());
        assert!(cache.get(&3).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache: ResultCache<u32, u32> = ResultCache::new(Duration::from_millis(20), 4);
        cache.insert(1, 10);
        thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.stats().expirations, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_recency_queue_stays_bounded() {
        let cache: ResultCache<u32, u32> = ResultCache::new(Duration::from_secs(60), 2);
        cache.insert(1, 10);
        cache.insert(2, 20);
        for _ in 0..1000 {
            cache.get(&1);
            cache.insert(2, 20);
        }
        for _ in 0..1000 {
            cache.get(&2);
        }
        assert!(cache.lock().recency.len() <= 16);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_single_flight() {
        let cache: ResultCache<String, usize> = ResultCache::new(Duration::from_secs(60), 8);
        let computations = AtomicUsize::new(0);

        let results: Vec<Arc<usize>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        cache
                            .get_or_compute("us-ca".to_string(), || {
                                thread::sleep(Duration::from_millis(50));
                                Ok(computations.fetch_add(1, Ordering::SeqCst) + 100)
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| **r == 100));
    }

    #[test]
    fn test_failures_not_cached() {
        let cache: ResultCache<u32, u32> = ResultCache::new(Duration::from_secs(60), 4);
        let result = cache.get_or_compute(1, || Err(IndexError::Computation("boom".into())));
        assert!(result.is_err());
        assert!(cache.is_empty());

        let value = cache.get_or_compute(1, || Ok(7)).unwrap();
        assert_eq!(*value, 7);
    }

    #[test]
    fn test_panicking_leader_releases_waiters() {
        let cache: ResultCache<u32, u32> = ResultCache::new(Duration::from_secs(60), 4);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = cache.get_or_compute(1, || panic!("compute failed"));
        }));
        assert!(outcome.is_err());
        assert!(cache.lock().in_flight.is_empty());
        assert_eq!(*cache.get_or_compute(1, || Ok(3)).unwrap(), 3);
    }
}
