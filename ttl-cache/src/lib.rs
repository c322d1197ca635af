//! In-memory cache with per-entry expiry and single-flight computation.
//!
//! [`TtlCache::get_or_compute`] returns a live entry without running the
//! supplied computation. On a miss, exactly one caller (the leader) runs it
//! while every other caller asking for the same key waits for the leader's
//! outcome. Successful values are stored with an expiry measured from the
//! moment the computation finished; failures are handed to all waiters and
//! leave nothing behind, so the next caller starts a fresh computation.
//!
//! If the leader is dropped before it finishes (the request was cancelled),
//! its in-flight marker is removed and one of the waiters takes over.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

/// Result shared between the leader and its waiters.
pub type Outcome<V, E> = Result<V, Arc<E>>;

type OutcomeSender<V, E> = watch::Sender<Option<Outcome<V, E>>>;
type OutcomeReceiver<V, E> = watch::Receiver<Option<Outcome<V, E>>>;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

enum Slot<V, E> {
    Ready(Entry<V>),
    InFlight {
        flight: u64,
        outcome: OutcomeReceiver<V, E>,
    },
}

enum Claim<V, E> {
    Hit(V),
    Wait(OutcomeReceiver<V, E>),
    Lead(u64, OutcomeSender<V, E>),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from a live entry.
    pub hits: u64,
    /// Lookups that ran the computation.
    pub misses: u64,
    /// Lookups that waited on another caller's computation.
    pub coalesced: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

pub struct TtlCache<K, V, E> {
    name: &'static str,
    slots: Mutex<HashMap<K, Slot<V, E>>>,
    next_flight: AtomicU64,
    counters: Counters,
}

impl<K, V, E> fmt::Debug for TtlCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl<K, V, E> TtlCache<K, V, E>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    /// Creates an empty cache. `name` only appears in log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Mutex::new(HashMap::new()),
            next_flight: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Returns the live value for `key`, or runs `compute` to produce it.
    ///
    /// Concurrent callers for the same key share one run of `compute`. A
    /// successful value is kept for `ttl` after the computation completes.
    /// An error is returned to every caller that shared the run and is not
    /// cached.
    pub async fn get_or_compute<F, Fut>(&self, key: K, ttl: Duration, compute: F) -> Outcome<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let flight = loop {
            match self.claim(&key) {
                Claim::Hit(value) => return Ok(value),
                Claim::Lead(id, sender) => {
                    break Flight {
                        cache: self,
                        key: key.clone(),
                        id,
                        sender,
                        finished: false,
                    };
                }
                Claim::Wait(mut receiver) => {
                    let shared = receiver
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|outcome| (*outcome).clone());
                    match shared {
                        Some(outcome) => return outcome,
                        None => {
                            debug!(
                                cache = self.name,
                                ?key,
                                "In-flight computation abandoned, retrying"
                            );
                        }
                    }
                }
            }
        };

        let outcome = compute().await.map_err(Arc::new);
        flight.finish(outcome.clone(), ttl);
        outcome
    }

    /// Returns the live value for `key` without computing anything.
    pub fn get(&self, key: &K) -> Option<V> {
        let slots = self.lock_slots();
        match slots.get(key) {
            Some(Slot::Ready(entry)) if entry.expires_at > Instant::now() => {
                Some(entry.value.clone())
            }
            _ => None,
        }
    }

    /// Drops the entry for `key`. Callers already waiting on an in-flight
    /// computation still receive its outcome, but it will not be stored.
    pub fn invalidate(&self, key: &K) {
        self.lock_slots().remove(key);
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.lock_slots();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready(entry) => entry.expires_at > now,
            Slot::InFlight { .. } => true,
        });
        let purged = before - slots.len();
        if purged > 0 {
            debug!(cache = self.name, purged, "Purged expired entries");
        }
        purged
    }

    /// Number of stored entries, including expired ones not yet purged and
    /// computations still in flight.
    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
        }
    }

    fn claim(&self, key: &K) -> Claim<V, E> {
        let mut slots = self.lock_slots();
        match slots.get(key) {
            Some(Slot::Ready(entry)) if entry.expires_at > Instant::now() => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(cache = self.name, ?key, "Cache hit");
                return Claim::Hit(entry.value.clone());
            }
            Some(Slot::InFlight { outcome, .. }) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(cache = self.name, ?key, "Joining in-flight computation");
                return Claim::Wait(outcome.clone());
            }
            _ => {}
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(cache = self.name, ?key, "Cache miss");
        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = watch::channel(None);
        slots.insert(
            key.clone(),
            Slot::InFlight {
                flight: id,
                outcome: receiver,
            },
        );
        Claim::Lead(id, sender)
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<K, Slot<V, E>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ownership of an in-flight computation for one key.
struct Flight<'a, K, V, E>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    cache: &'a TtlCache<K, V, E>,
    key: K,
    id: u64,
    sender: OutcomeSender<V, E>,
    finished: bool,
}

impl<K, V, E> Flight<'_, K, V, E>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    fn finish(mut self, outcome: Outcome<V, E>, ttl: Duration) {
        {
            let mut slots = self.cache.lock_slots();
            if self.owns_slot(&slots) {
                match &outcome {
                    Ok(value) => {
                        slots.insert(
                            self.key.clone(),
                            Slot::Ready(Entry {
                                value: value.clone(),
                                expires_at: Instant::now() + ttl,
                            }),
                        );
                    }
                    Err(_) => {
                        slots.remove(&self.key);
                    }
                }
            }
        }
        self.finished = true;
        self.sender.send_replace(Some(outcome));
    }

    fn owns_slot(&self, slots: &HashMap<K, Slot<V, E>>) -> bool {
        matches!(slots.get(&self.key), Some(Slot::InFlight { flight, .. }) if *flight == self.id)
    }
}

impl<K, V, E> Drop for Flight<'_, K, V, E>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut slots = self.cache.lock_slots();
        if self.owns_slot(&slots) {
            slots.remove(&self.key);
        }
        debug!(cache = self.cache.name, key = ?self.key, "Computation dropped before completion");
    }
}
