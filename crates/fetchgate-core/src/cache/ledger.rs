//! Cache/tag ledger
//!
//! Maps query keys to cached results and the tags each result provides.
//! Concurrent reads of the same key share one fetch; invalidating a tag marks
//! every entry providing it stale, refetches the ones somebody is watching
//! and drops the rest.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::key::QueryKey;
use crate::error::{ErrorKind, FetchError, FetchResult};

/// How long an entry survives after its last subscriber leaves
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// How long a fetched result counts as fresh
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60);

const EVENT_CAPACITY: usize = 64;

/// Produces the data for one query key
pub type Fetcher = Arc<dyn Fn() -> BoxFuture<'static, FetchResult<Value>> + Send + Sync>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult<Value>>>;

/// Lifecycle of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Uninitialized,
    Fetching,
    Fresh,
    Stale,
    Refetching,
    Error,
    /// No subscribers left; removed once the grace period runs out
    Evicting,
    /// Removed; a later read starts over
    Evicted,
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheStatus::Uninitialized => "uninitialized",
            CacheStatus::Fetching => "fetching",
            CacheStatus::Fresh => "fresh",
            CacheStatus::Stale => "stale",
            CacheStatus::Refetching => "refetching",
            CacheStatus::Error => "error",
            CacheStatus::Evicting => "evicting",
            CacheStatus::Evicted => "evicted",
        };
        write!(f, "{}", name)
    }
}

/// Change notifications published by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// New data was stored (fetch, patch, undo or page merge)
    Updated(QueryKey),
    /// Entry was marked stale by a tag invalidation
    Invalidated(QueryKey),
    /// A fetch failed; previous data, if any, is kept
    Failed(QueryKey),
    /// Entry was removed
    Evicted(QueryKey),
    /// Every entry was dropped
    Cleared,
}

/// Snapshot taken before an optimistic patch
#[must_use = "an optimistic patch must be undone or committed"]
#[derive(Debug)]
pub struct UndoToken {
    key: QueryKey,
    previous: Value,
}

impl UndoToken {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

struct Entry {
    data: Option<Value>,
    tags: BTreeSet<String>,
    fetched_at: Option<Instant>,
    max_age: Duration,
    stale: bool,
    failed: bool,
    /// Bumped by every invalidation touching this entry
    generation: u64,
    subscribers: usize,
    /// Ticket of the pending eviction timer
    eviction: Option<u64>,
    fetcher: Option<Fetcher>,
}

impl Entry {
    fn new() -> Self {
        Self {
            data: None,
            tags: BTreeSet::new(),
            fetched_at: None,
            max_age: DEFAULT_MAX_AGE,
            stale: false,
            failed: false,
            generation: 0,
            subscribers: 0,
            eviction: None,
            fetcher: None,
        }
    }

    fn is_fresh(&self, max_age: Duration) -> bool {
        !self.stale
            && self.data.is_some()
            && self
                .fetched_at
                .is_some_and(|fetched| fetched.elapsed() < max_age)
    }
}

/// A fetch outstanding for one key
struct InFlight {
    id: u64,
    /// Entry generation when the fetch started
    generation: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct LedgerState {
    entries: HashMap<QueryKey, Entry>,
    inflight: HashMap<QueryKey, InFlight>,
    /// Keys dropped since they were last cached
    evicted: HashSet<QueryKey>,
    /// Bumped by `clear`; subscriptions taken before a clear no longer count
    epoch: u64,
    next_ticket: u64,
    next_fetch: u64,
}

impl LedgerState {
    fn entry_mut(&mut self, key: &QueryKey) -> &mut Entry {
        self.evicted.remove(key);
        self.entries.entry(key.clone()).or_insert_with(Entry::new)
    }

    fn evict(&mut self, key: &QueryKey) -> bool {
        // A fetch for a dropped entry has nowhere to land
        self.inflight.remove(key);
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.evicted.insert(key.clone());
        }
        removed
    }
}

struct Inner {
    state: Mutex<LedgerState>,
    grace_period: Duration,
    events: broadcast::Sender<CacheEvent>,
}

/// Shared handle to the query cache
#[derive(Clone)]
pub struct CacheLedger {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`CacheLedger`]
#[derive(Clone)]
pub struct WeakCacheLedger {
    inner: Weak<Inner>,
}

impl WeakCacheLedger {
    pub fn upgrade(&self) -> Option<CacheLedger> {
        self.inner.upgrade().map(|inner| CacheLedger { inner })
    }
}

impl Default for CacheLedger {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl CacheLedger {
    pub fn new(grace_period: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LedgerState::default()),
                grace_period,
                events,
            }),
        }
    }

    pub fn grace_period(&self) -> Duration {
        self.inner.grace_period
    }

    pub fn downgrade(&self) -> WeakCacheLedger {
        WeakCacheLedger {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Return the cached value for `key`, fetching it if missing or stale
    ///
    /// Callers asking for the same key while a fetch is outstanding share
    /// that fetch and its result, errors included. A fetch that started
    /// before the entry was last invalidated is not joined: its data predates
    /// the invalidating write, so a new fetch starts instead. The fetch runs
    /// on its own task, so it completes and populates the cache even if every
    /// caller goes away.
    pub async fn get_or_fetch<I, T>(
        &self,
        key: QueryKey,
        tags: I,
        fetcher: Fetcher,
        max_age: Duration,
    ) -> FetchResult<Value>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let pending = {
            let mut guard = self.lock();
            let state = &mut *guard;

            if let Some(entry) = state.entries.get(&key) {
                if entry.is_fresh(max_age) {
                    trace!(%key, "Cache hit");
                    return Ok(entry.data.clone().unwrap_or(Value::Null));
                }
            }

            let generation = state.entries.get(&key).map(|entry| entry.generation);
            match state.inflight.get(&key) {
                Some(flight) if Some(flight.generation) == generation => {
                    debug!(%key, "Joining in-flight fetch");
                    flight.fetch.clone()
                }
                _ => {
                    let tags = tags.into_iter().map(Into::into).collect();
                    self.start_fetch(state, key, tags, fetcher, max_age)
                }
            }
        };

        pending.await
    }

    /// Mark every entry providing one of `tags` stale
    ///
    /// Entries with subscribers are refetched (joining a fetch already in
    /// flight rather than starting another); entries without are dropped.
    /// Staleness is recorded before this returns.
    pub fn invalidate<I, T>(&self, tags: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        let mut events = Vec::new();
        {
            let mut guard = self.lock();
            let state = &mut *guard;

            let matching: Vec<QueryKey> = state
                .entries
                .iter()
                .filter(|(_, entry)| !entry.tags.is_disjoint(&tags))
                .map(|(key, _)| key.clone())
                .collect();

            if matching.is_empty() {
                trace!(?tags, "Invalidation matched no entries");
                return;
            }
            debug!(?tags, count = matching.len(), "Invalidating cache entries");

            for key in matching {
                let refetch = match state.entries.get_mut(&key) {
                    Some(entry) => {
                        entry.generation += 1;
                        if entry.subscribers == 0 {
                            None
                        } else {
                            entry.stale = true;
                            Some((entry.fetcher.clone(), entry.tags.clone(), entry.max_age))
                        }
                    }
                    None => continue,
                };

                match refetch {
                    None => {
                        state.evict(&key);
                        events.push(CacheEvent::Evicted(key));
                    }
                    Some((fetcher, tags, max_age)) => {
                        events.push(CacheEvent::Invalidated(key.clone()));
                        if state.inflight.contains_key(&key) {
                            debug!(%key, "Invalidated entry already refetching");
                            continue;
                        }
                        match fetcher {
                            Some(fetcher) => {
                                // The caller doesn't wait on the refetch
                                drop(self.start_fetch(state, key, tags, fetcher, max_age));
                            }
                            None => trace!(%key, "No fetcher recorded; refetch on next read"),
                        }
                    }
                }
            }
        }
        self.publish_all(events);
    }

    /// Apply `mutate` to the cached value for `key`
    ///
    /// Returns `None` when there is nothing cached to patch.
    pub fn patch(&self, key: &QueryKey, mutate: impl FnOnce(&mut Value)) -> Option<UndoToken> {
        let previous = {
            let mut state = self.lock();
            let data = state.entries.get_mut(key)?.data.as_mut()?;
            let previous = data.clone();
            mutate(data);
            previous
        };
        debug!(%key, "Applied optimistic patch");
        self.publish(CacheEvent::Updated(key.clone()));
        Some(UndoToken {
            key: key.clone(),
            previous,
        })
    }

    /// Restore the value captured by `token`
    pub fn undo(&self, token: UndoToken) {
        let restored = {
            let mut state = self.lock();
            match state.entries.get_mut(&token.key) {
                Some(entry) => {
                    entry.data = Some(token.previous);
                    true
                }
                None => false,
            }
        };
        if restored {
            debug!(key = %token.key, "Rolled back optimistic patch");
            self.publish(CacheEvent::Updated(token.key));
        }
    }

    /// Keep a patch; the snapshot is dropped
    pub fn commit(&self, token: UndoToken) {
        trace!(key = %token.key, "Committed optimistic patch");
    }

    /// Fold a freshly fetched page into the entry for `key`
    ///
    /// The first page (or a page landing on a stale entry) replaces the data
    /// outright; later pages go through `merge`.
    pub fn merge<I, T>(
        &self,
        key: &QueryKey,
        tags: I,
        page: Value,
        merge: impl FnOnce(&mut Value, Value),
    ) -> Value
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let merged = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let entry = state.entry_mut(key);

            match entry.data.as_mut() {
                Some(existing) if !entry.stale => merge(existing, page),
                _ => entry.data = Some(page),
            }
            entry.tags.extend(tags.into_iter().map(Into::into));
            entry.fetched_at = Some(Instant::now());
            entry.stale = false;
            entry.failed = false;

            let merged = entry.data.clone().unwrap_or(Value::Null);
            if entry.subscribers == 0 && entry.eviction.is_none() {
                self.schedule_eviction(state, key);
            }
            merged
        };
        self.publish(CacheEvent::Updated(key.clone()));
        merged
    }

    /// Cached value regardless of freshness
    pub fn peek(&self, key: &QueryKey) -> Option<Value> {
        self.lock().entries.get(key).and_then(|e| e.data.clone())
    }

    pub fn status(&self, key: &QueryKey) -> CacheStatus {
        let state = self.lock();
        let Some(entry) = state.entries.get(key) else {
            return if state.evicted.contains(key) {
                CacheStatus::Evicted
            } else {
                CacheStatus::Uninitialized
            };
        };

        if state.inflight.contains_key(key) {
            if entry.data.is_some() {
                CacheStatus::Refetching
            } else {
                CacheStatus::Fetching
            }
        } else if entry.eviction.is_some() {
            CacheStatus::Evicting
        } else if entry.failed {
            CacheStatus::Error
        } else if entry.data.is_none() {
            CacheStatus::Uninitialized
        } else if entry.is_fresh(entry.max_age) {
            CacheStatus::Fresh
        } else {
            CacheStatus::Stale
        }
    }

    /// Tags provided by the entry for `key`
    pub fn tags(&self, key: &QueryKey) -> BTreeSet<String> {
        self.lock()
            .entries
            .get(key)
            .map(|e| e.tags.clone())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.lock().entries.get(key).map_or(0, |e| e.subscribers)
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drop one entry immediately
    pub fn remove(&self, key: &QueryKey) -> bool {
        let removed = self.lock().evict(key);
        if removed {
            self.publish(CacheEvent::Evicted(key.clone()));
        }
        removed
    }

    /// Drop everything, including results of fetches still in flight
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.epoch += 1;
            state.entries.clear();
            state.inflight.clear();
            state.evicted.clear();
        }
        debug!("Cache cleared");
        self.publish(CacheEvent::Cleared);
    }

    /// Receive change notifications
    pub fn subscribe_events(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Count a subscriber for `key`, cancelling any pending eviction
    ///
    /// Returns the subscriber count and the epoch the subscription belongs
    /// to, which must be handed back to [`release`](Self::release).
    pub(crate) fn acquire(&self, key: &QueryKey) -> (usize, u64) {
        let mut guard = self.lock();
        let state = &mut *guard;
        let epoch = state.epoch;
        let entry = state.entry_mut(key);
        entry.subscribers += 1;
        if entry.eviction.take().is_some() {
            trace!(%key, "Eviction cancelled");
        }
        (entry.subscribers, epoch)
    }

    /// Drop a subscriber for `key`; the last one starts the grace timer
    ///
    /// Subscriptions from before a `clear` were already forgotten and do not
    /// touch the current count.
    pub(crate) fn release(&self, key: &QueryKey, epoch: u64) -> usize {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.epoch != epoch {
            trace!(%key, "Ignoring release of a subscription from before a clear");
            return state.entries.get(key).map_or(0, |e| e.subscribers);
        }
        let Some(entry) = state.entries.get_mut(key) else {
            return 0;
        };
        entry.subscribers = entry.subscribers.saturating_sub(1);
        let remaining = entry.subscribers;
        if remaining == 0 {
            self.schedule_eviction(state, key);
        }
        remaining
    }

    fn start_fetch(
        &self,
        state: &mut LedgerState,
        key: QueryKey,
        tags: BTreeSet<String>,
        fetcher: Fetcher,
        max_age: Duration,
    ) -> SharedFetch {
        state.next_fetch += 1;
        let id = state.next_fetch;
        let entry = state.entry_mut(&key);
        entry.tags = tags;
        entry.max_age = max_age;
        entry.fetcher = Some(fetcher.clone());
        let generation = entry.generation;
        debug!(%key, "Fetching");

        let ledger = self.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let result = fetcher().await;
            ledger.complete_fetch(task_key, id, generation, &result);
            result
        });

        let endpoint = key.endpoint().to_string();
        let pending = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(FetchError::new(ErrorKind::Network, endpoint)
                    .with_detail(format!("fetch task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        state.inflight.insert(
            key,
            InFlight {
                id,
                generation,
                fetch: pending.clone(),
            },
        );
        pending
    }

    fn complete_fetch(
        &self,
        key: QueryKey,
        id: u64,
        generation: u64,
        result: &FetchResult<Value>,
    ) {
        let event = {
            let mut guard = self.lock();
            let state = &mut *guard;
            // Superseded by a newer fetch, or dropped by an eviction or clear
            if state.inflight.get(&key).map(|flight| flight.id) != Some(id) {
                debug!(%key, "Discarding result of a superseded fetch");
                return;
            }
            state.inflight.remove(&key);

            let Some(entry) = state.entries.get_mut(&key) else {
                trace!(%key, "Entry dropped while fetching");
                return;
            };

            let mut follow_up = None;
            let event = match result {
                Ok(data) => {
                    let overtaken = entry.generation != generation;
                    entry.data = Some(data.clone());
                    entry.fetched_at = Some(Instant::now());
                    entry.failed = false;
                    entry.stale = overtaken;
                    if overtaken && entry.subscribers > 0 {
                        follow_up = entry
                            .fetcher
                            .clone()
                            .map(|f| (f, entry.tags.clone(), entry.max_age));
                    }
                    CacheEvent::Updated(key.clone())
                }
                Err(e) => {
                    warn!(%key, "Fetch failed: {}", e);
                    entry.failed = true;
                    CacheEvent::Failed(key.clone())
                }
            };
            let idle = entry.subscribers == 0 && entry.eviction.is_none();

            if let Some((fetcher, tags, max_age)) = follow_up {
                debug!(%key, "Result was invalidated while in flight; refetching");
                drop(self.start_fetch(state, key.clone(), tags, fetcher, max_age));
            }
            if idle {
                self.schedule_eviction(state, &key);
            }
            event
        };
        self.publish(event);
    }

    fn schedule_eviction(&self, state: &mut LedgerState, key: &QueryKey) {
        state.next_ticket += 1;
        let ticket = state.next_ticket;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                if let Some(entry) = state.entries.get_mut(key) {
                    entry.eviction = Some(ticket);
                }
                let ledger = self.clone();
                let key = key.clone();
                let grace = self.inner.grace_period;
                trace!(%key, ?grace, "Eviction scheduled");
                runtime.spawn(async move {
                    tokio::time::sleep(grace).await;
                    ledger.evict_if_idle(&key, ticket);
                });
            }
            Err(_) => {
                // No runtime to run a timer on
                state.evict(key);
            }
        }
    }

    fn evict_if_idle(&self, key: &QueryKey, ticket: u64) {
        let evicted = {
            let mut guard = self.lock();
            let state = &mut *guard;
            match state.entries.get_mut(key) {
                Some(entry) if entry.eviction == Some(ticket) && entry.subscribers == 0 => {
                    if state.inflight.contains_key(key) {
                        // Rescheduled when the fetch lands
                        entry.eviction = None;
                        false
                    } else {
                        state.evict(key)
                    }
                }
                _ => false,
            }
        };
        if evicted {
            debug!(%key, "Evicted unused cache entry");
            self.publish(CacheEvent::Evicted(key.clone()));
        }
    }

    fn publish(&self, event: CacheEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }

    fn publish_all(&self, events: Vec<CacheEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
