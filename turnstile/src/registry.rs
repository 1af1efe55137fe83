use std::borrow::Borrow;
use std::hash::Hash;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use quanta::Clock;
use quanta::Instant;

use crate::Quota;
use crate::Reason;
use crate::Strategy;
use crate::TokenBucket;

#[derive(Debug)]
struct ClientEntry {
    bucket: Arc<TokenBucket>,
    last_seen: Instant,
}

/// A concurrent map from client key to that client's [`TokenBucket`].
///
/// Buckets are created lazily with the registry's [`Quota`] and share its clock.
/// The map is sharded; a shard lock is held only while an entry is looked up,
/// inserted or removed, never while a bucket is consulted.
///
/// Any `Hash + Eq` key works: an `IpAddr` per client, a `String` per API key, or
/// `()` for a single global bucket.
#[derive(Debug)]
pub struct ClientRegistry<K>
where
    K: Hash + Eq,
{
    entries: DashMap<K, ClientEntry>,
    quota: Quota,
    clock: Clock,
}

impl<K> ClientRegistry<K>
where
    K: Hash + Eq,
{
    /// Creates an empty registry that reads time from the system clock.
    pub fn new(quota: Quota) -> Self {
        Self::with_clock(quota, Clock::new())
    }

    /// Creates an empty registry whose buckets and timestamps read from `clock`.
    pub fn with_clock(quota: Quota, clock: Clock) -> Self {
        Self {
            entries: DashMap::new(),
            quota,
            clock,
        }
    }

    /// Returns the bucket for `key`, creating a full one if the key is new.
    ///
    /// Insertion is atomic: racing first requests for the same key all receive
    /// the same bucket. The key's last-seen time is refreshed on every call,
    /// whether or not the caller is subsequently admitted, so a client that
    /// keeps hammering a drained bucket also keeps its entry alive.
    pub fn get_or_create(&self, key: K) -> Arc<TokenBucket> {
        let now = self.clock.now();
        let mut entry = self.entries.entry(key).or_insert_with(|| ClientEntry {
            bucket: Arc::new(TokenBucket::with_clock(self.quota, self.clock.clone())),
            last_seen: now,
        });
        entry.last_seen = now;
        Arc::clone(&entry.bucket)
    }

    /// Looks up (or creates) the bucket for `key` and asks it to admit one request.
    pub fn check(&self, key: K) -> ControlFlow<Reason> {
        self.get_or_create(key).process()
    }

    /// Removes every entry idle for longer than `threshold`, returning the evicted keys.
    pub fn evict_idle(&self, threshold: Duration) -> Vec<K>
    where
        K: Clone,
    {
        let now = self.clock.now();
        let mut evicted = Vec::new();
        self.entries.retain(|key, entry| {
            let idle = now.saturating_duration_since(entry.last_seen) > threshold;
            if idle {
                evicted.push(key.clone());
            }
            !idle
        });
        evicted
    }

    /// How long `key` has gone without a request, if it is tracked.
    pub fn idle_for<Q>(&self, key: &Q) -> Option<Duration>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        self.entries
            .get(key)
            .map(|entry| now.saturating_duration_since(entry.last_seen))
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn quota(&self) -> &Quota {
        &self.quota
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}
