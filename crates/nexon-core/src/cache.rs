//! Model session cache
//!
//! A bounded map from model name to a loaded [`ModelSession`], with LRU and
//! idle-TTL eviction. The cache is the only owner of sessions: callers get a
//! [`SessionLease`] that keeps the entry's reference count up and releases it
//! on drop. An entry with outstanding leases is never closed; eviction and
//! invalidation mark it pending instead, and the last release closes it.
//!
//! Misses go through a [`Singleflight`] so concurrent callers for the same
//! cold model share one load. Session close always happens after the entry
//! has left the index and outside the state lock.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::CacheConfig;
use crate::loader::{LoadError, SessionLoader};
use crate::runtime::{ModelSession, SessionSignature};
use crate::singleflight::Singleflight;

/// Bound on lease attempts when a freshly loaded entry is evicted before
/// the waiter could lease it
const MAX_ACQUIRE_ATTEMPTS: usize = 8;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Failed to load model session: {0}")]
    LoadFailed(#[from] LoadError),

    #[error("Session cache unavailable: {0}")]
    Unavailable(String),
}

impl CacheError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::LoadFailed(_) => "CACHE_LOAD_FAILED",
            Self::Unavailable(_) => "CACHE_UNAVAILABLE",
        }
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::LoadFailed(LoadError::from(err))
    }
}

/// Cache statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Resident entries, including ones pending eviction
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub deferred_evictions: u64,
    pub invalidations: u64,
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub evicted: usize,
    pub deferred: usize,
}

struct SessionSlot {
    seq: u64,
    key: String,
    session: Box<dyn ModelSession>,
}

struct Entry {
    slot: Arc<SessionSlot>,
    created_at: Instant,
    last_access: Instant,
    ref_count: usize,
    pending_eviction: bool,
}

#[derive(Default)]
struct CacheState {
    index: HashMap<String, u64>,
    entries: HashMap<u64, Entry>,
    next_seq: u64,
    /// Generation of each in-flight load; invalidation bumps it so the
    /// finished load knows its bytes may be stale
    loading: HashMap<String, u64>,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    deferred_evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        if by > 0 {
            counter.fetch_add(by, Ordering::Relaxed);
        }
    }
}

/// Pick the least recently used candidate, oldest insertion first on ties
fn select_victim<I>(candidates: I) -> Option<u64>
where
    I: IntoIterator<Item = (u64, Instant)>,
{
    candidates
        .into_iter()
        .min_by_key(|&(seq, last_access)| (last_access, seq))
        .map(|(seq, _)| seq)
}

impl CacheState {
    fn live_count(&self) -> usize {
        self.index.len()
    }

    /// Remove `seq` if idle, otherwise mark it pending. Returns the slot to
    /// close, if any. The entry leaves the index either way.
    fn retire(&mut self, seq: u64) -> Retired {
        let Some(entry) = self.entries.get_mut(&seq) else {
            return Retired::Gone;
        };
        if self.index.get(&entry.slot.key) == Some(&seq) {
            self.index.remove(&entry.slot.key);
        }
        if entry.ref_count > 0 {
            let already = entry.pending_eviction;
            entry.pending_eviction = true;
            return if already { Retired::Gone } else { Retired::Deferred };
        }
        match self.entries.remove(&seq) {
            Some(entry) => Retired::Closed(entry.slot),
            None => Retired::Gone,
        }
    }

    /// Evict least recently used live entries until the live count fits
    fn enforce_capacity(&mut self, capacity: usize, keep: Option<u64>, out: &mut Evictions) {
        while self.live_count() > capacity {
            let candidates = self
                .entries
                .values()
                .filter(|e| !e.pending_eviction && Some(e.slot.seq) != keep)
                .map(|e| (e.slot.seq, e.last_access));
            let Some(victim) = select_victim(candidates) else {
                break;
            };
            match self.retire(victim) {
                Retired::Closed(slot) => out.closed.push(slot),
                Retired::Deferred => out.deferred += 1,
                Retired::Gone => {}
            }
        }
    }
}

enum Retired {
    Closed(Arc<SessionSlot>),
    Deferred,
    Gone,
}

#[derive(Default)]
struct Evictions {
    closed: Vec<Arc<SessionSlot>>,
    deferred: usize,
}

struct CacheInner {
    config: CacheConfig,
    loader: Arc<dyn SessionLoader>,
    state: Mutex<CacheState>,
    flights: Singleflight<String, u64, CacheError>,
    counters: Counters,
    shutting_down: AtomicBool,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheInner {
    fn close_slots(&self, slots: Vec<Arc<SessionSlot>>, reason: &str) {
        for slot in slots {
            info!(model = %slot.key, reason, "Closing model session");
            slot.session.close();
        }
    }

    fn lease(self: &Arc<Self>, seq: u64) -> Option<SessionLease> {
        let mut state = self.state.lock();
        self.lease_locked(&mut state, seq)
    }

    fn lookup(self: &Arc<Self>, key: &str) -> Option<SessionLease> {
        let mut state = self.state.lock();
        let seq = *state.index.get(key)?;
        self.lease_locked(&mut state, seq)
    }

    fn lease_locked(self: &Arc<Self>, state: &mut CacheState, seq: u64) -> Option<SessionLease> {
        let entry = state.entries.get_mut(&seq)?;
        if entry.pending_eviction {
            return None;
        }
        entry.ref_count += 1;
        entry.last_access = Instant::now();
        Some(SessionLease {
            cache: Arc::clone(self),
            slot: Arc::clone(&entry.slot),
        })
    }

    fn release(&self, seq: u64) {
        let closed = {
            let mut state = self.state.lock();
            let Some(entry) = state.entries.get_mut(&seq) else {
                return;
            };
            entry.ref_count = entry.ref_count.saturating_sub(1);
            entry.last_access = Instant::now();
            if entry.ref_count == 0 && entry.pending_eviction {
                state.entries.remove(&seq).map(|e| e.slot)
            } else {
                None
            }
        };
        if let Some(slot) = closed {
            debug!(model = %slot.key, "Last lease released on retired session");
            self.close_slots(vec![slot], "deferred");
        }
    }

    async fn load_and_insert(self: Arc<Self>, key: String) -> Result<u64, CacheError> {
        for attempt in 0..MAX_ACQUIRE_ATTEMPTS {
            let generation = {
                let mut state = self.state.lock();
                // Inserted by a load that finished between our lookup and joining the flight
                if let Some(seq) = state.index.get(&key).copied() {
                    return Ok(seq);
                }
                *state.loading.entry(key.clone()).or_insert(0)
            };

            Counters::bump(&self.counters.loads, 1);
            debug!(model = %key, attempt, "Loading model session");
            let started = Instant::now();

            let session = match self.loader.load(&key).await {
                Ok(session) => session,
                Err(e) => {
                    self.state.lock().loading.remove(&key);
                    Counters::bump(&self.counters.load_failures, 1);
                    warn!(model = %key, code = e.code(), error = %e, "Model session load failed");
                    return Err(e.into());
                }
            };

            let mut evictions = Evictions::default();
            let mut state = self.state.lock();
            let current = state.loading.remove(&key);

            // Checked under the lock so a concurrent clear() cannot miss the insert
            if self.shutting_down.load(Ordering::Acquire) {
                drop(state);
                session.close();
                return Err(CacheError::Unavailable("cache is shutting down".to_string()));
            }
            if current != Some(generation) {
                drop(state);
                debug!(model = %key, attempt, "Model invalidated while loading, discarding session");
                session.close();
                continue;
            }

            if let Some(previous) = state.index.get(&key).copied() {
                match state.retire(previous) {
                    Retired::Closed(slot) => evictions.closed.push(slot),
                    Retired::Deferred => evictions.deferred += 1,
                    Retired::Gone => {}
                }
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let now = Instant::now();
            let slot = Arc::new(SessionSlot {
                seq,
                key: key.clone(),
                session,
            });
            state.entries.insert(
                seq,
                Entry {
                    slot,
                    created_at: now,
                    last_access: now,
                    ref_count: 0,
                    pending_eviction: false,
                },
            );
            state.index.insert(key.clone(), seq);
            state.enforce_capacity(self.config.capacity, Some(seq), &mut evictions);
            drop(state);

            info!(
                model = %key,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Model session loaded"
            );
            self.record_evictions(evictions, "capacity");
            return Ok(seq);
        }

        Err(CacheError::Unavailable(format!(
            "model '{}' was invalidated repeatedly while loading",
            key
        )))
    }

    fn record_evictions(&self, evictions: Evictions, reason: &str) {
        Counters::bump(&self.counters.evictions, evictions.closed.len() as u64);
        Counters::bump(&self.counters.deferred_evictions, evictions.deferred as u64);
        if evictions.deferred > 0 {
            debug!(deferred = evictions.deferred, reason, "Eviction deferred until release");
        }
        self.close_slots(evictions.closed, reason);
    }

    fn sweep(&self) -> SweepReport {
        let ttl = self.config.ttl();
        let mut expired = Vec::new();
        let mut evictions = Evictions::default();
        {
            let mut state = self.state.lock();
            let now = Instant::now();

            if let Some(ttl) = ttl {
                let idle: Vec<u64> = state
                    .entries
                    .values()
                    .filter(|e| e.ref_count == 0 && now.duration_since(e.last_access) >= ttl)
                    .map(|e| e.slot.seq)
                    .collect();
                for seq in idle {
                    if let Retired::Closed(slot) = state.retire(seq) {
                        expired.push(slot);
                    }
                }
            }

            state.enforce_capacity(self.config.capacity, None, &mut evictions);
        }

        let report = SweepReport {
            expired: expired.len(),
            evicted: evictions.closed.len(),
            deferred: evictions.deferred,
        };
        Counters::bump(&self.counters.evictions, expired.len() as u64);
        self.close_slots(expired, "ttl");
        self.record_evictions(evictions, "capacity");
        debug!(
            expired = report.expired,
            evicted = report.evicted,
            deferred = report.deferred,
            "Cache sweep finished"
        );
        report
    }

    /// Retire the live entry for `key` and mark any in-flight load of it stale
    fn invalidate(&self, key: &str) -> bool {
        let (retired, interrupted) = {
            let mut state = self.state.lock();
            let interrupted = match state.loading.get_mut(key) {
                Some(generation) => {
                    *generation += 1;
                    true
                }
                None => false,
            };
            let retired = state.index.get(key).copied().map(|seq| state.retire(seq));
            (retired, interrupted)
        };
        if retired.is_none() && !interrupted {
            return false;
        }

        Counters::bump(&self.counters.invalidations, 1);
        match retired {
            Some(Retired::Closed(slot)) => self.close_slots(vec![slot], "invalidated"),
            Some(Retired::Deferred) => debug!(model = %key, "Invalidated session still leased"),
            Some(Retired::Gone) | None => {}
        }
        if interrupted {
            debug!(model = %key, "Invalidated model session while it was loading");
        }
        info!(model = %key, "Invalidated model session");
        true
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
        for (_, entry) in self.state.get_mut().entries.drain() {
            entry.slot.session.close();
        }
    }
}

/// Bounded cache of loaded model sessions
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<CacheInner>,
}

impl SessionCache {
    pub fn new(config: CacheConfig, loader: Arc<dyn SessionLoader>) -> Self {
        info!(
            capacity = config.capacity,
            ttl_secs = config.ttl_secs,
            "Creating model session cache"
        );
        Self {
            inner: Arc::new(CacheInner {
                config,
                loader,
                state: Mutex::new(CacheState::default()),
                flights: Singleflight::new(),
                counters: Counters::default(),
                shutting_down: AtomicBool::new(false),
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Lease the session for `key`, loading it on a miss. Waits at most the
    /// configured load timeout.
    pub async fn acquire(&self, key: &str) -> Result<SessionLease, CacheError> {
        match self.inner.config.load_timeout() {
            Some(deadline) => self.acquire_with_timeout(key, deadline).await,
            None => self.acquire_inner(key).await,
        }
    }

    /// Like [`acquire`](Self::acquire) with an explicit deadline. On timeout
    /// the shared load keeps running for the remaining waiters.
    pub async fn acquire_with_timeout(&self, key: &str, deadline: Duration) -> Result<SessionLease, CacheError> {
        match tokio::time::timeout(deadline, self.acquire_inner(key)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(model = %key, timeout_ms = deadline.as_millis() as u64, "Timed out waiting for model session");
                Err(CacheError::Unavailable(format!(
                    "timed out after {:?} waiting for model '{}'",
                    deadline, key
                )))
            }
        }
    }

    async fn acquire_inner(&self, key: &str) -> Result<SessionLease, CacheError> {
        for attempt in 0..MAX_ACQUIRE_ATTEMPTS {
            if self.is_shutting_down() {
                return Err(CacheError::Unavailable("cache is shutting down".to_string()));
            }

            if let Some(lease) = self.inner.lookup(key) {
                Counters::bump(&self.inner.counters.hits, 1);
                trace!(model = %key, "Session cache hit");
                return Ok(lease);
            }
            if attempt == 0 {
                Counters::bump(&self.inner.counters.misses, 1);
            }

            let inner = Arc::clone(&self.inner);
            let owned = key.to_string();
            let seq = self
                .inner
                .flights
                .run(key.to_string(), move || inner.load_and_insert(owned))
                .await?;

            if let Some(lease) = self.inner.lease(seq) {
                return Ok(lease);
            }
            debug!(model = %key, attempt, "Loaded session retired before lease, retrying");
        }

        Err(CacheError::Unavailable(format!(
            "model '{}' was evicted repeatedly before it could be leased",
            key
        )))
    }

    /// Retire the entry for `key`. New acquires miss; outstanding leases keep
    /// working and the session closes on the last release. A load of `key`
    /// already in flight is discarded when it finishes and loaded again.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.invalidate(key)
    }

    /// Invalidate every entry and every in-flight load, returns the number
    /// of entries retired
    pub fn clear(&self) -> usize {
        let keys: Vec<String> = {
            let mut state = self.inner.state.lock();
            for generation in state.loading.values_mut() {
                *generation += 1;
            }
            state.index.keys().cloned().collect()
        };
        keys.iter().filter(|key| self.inner.invalidate(key)).count()
    }

    /// Run one eviction pass: idle entries past the TTL, then capacity
    pub fn sweep(&self) -> SweepReport {
        self.inner.sweep()
    }

    /// Spawn the periodic sweep on the current tokio runtime. Calling it
    /// again replaces the previous sweeper.
    pub fn start_sweeper(&self) {
        let interval = self.inner.config.sweep_interval();
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            info!("Starting session cache sweeper with interval: {:?}", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.shutting_down.load(Ordering::Acquire) {
                    break;
                }
                inner.sweep();
            }
            debug!("Session cache sweeper stopped");
        });

        if let Some(previous) = self.inner.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Refuse new acquires, stop the sweeper and retire every entry
    pub fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down model session cache");
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
        let cleared = self.clear();
        debug!(cleared, "Retired cached sessions on shutdown");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.state.lock().index.contains_key(key)
    }

    /// Resident entries, including ones pending eviction
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outstanding leases on the live entry for `key`
    pub fn ref_count(&self, key: &str) -> Option<usize> {
        let state = self.inner.state.lock();
        let seq = state.index.get(key)?;
        state.entries.get(seq).map(|e| e.ref_count)
    }

    /// Age of the live entry for `key`
    pub fn entry_age(&self, key: &str) -> Option<Duration> {
        let state = self.inner.state.lock();
        let seq = state.index.get(key)?;
        state.entries.get(seq).map(|e| e.created_at.elapsed())
    }

    pub fn stats(&self) -> CacheStats {
        let size = self.len();
        let c = &self.inner.counters;
        CacheStats {
            size,
            capacity: self.inner.config.capacity,
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            loads: c.loads.load(Ordering::Relaxed),
            load_failures: c.load_failures.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            deferred_evictions: c.deferred_evictions.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Scoped right to use a cached session. Dropping it releases the entry.
pub struct SessionLease {
    cache: Arc<CacheInner>,
    slot: Arc<SessionSlot>,
}

impl SessionLease {
    pub fn model(&self) -> &str {
        &self.slot.key
    }

    pub fn session(&self) -> &dyn ModelSession {
        self.slot.session.as_ref()
    }

    pub fn signature(&self) -> &SessionSignature {
        self.slot.session.signature()
    }
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("model", &self.slot.key)
            .field("seq", &self.slot.seq)
            .finish()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.cache.release(self.slot.seq);
    }
}
