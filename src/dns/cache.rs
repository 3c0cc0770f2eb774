//! Resolver cache with negative-TTL support and single-flight lookups
//! (design §3 `DnsCacheEntry`, §4.G "injectable cache with negative-TTL
//! support").

use super::message::{RecordData, ResolvedRecord};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Query key: a name plus the record type queried for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub query_type: QueryType,
}

/// The record types this resolver understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    A,
    Aaaa,
    Srv,
    Txt,
}

#[derive(Debug, Clone)]
struct Entry {
    answers: Vec<ResolvedRecord>,
    /// Monotonic nanosecond deadline (from the same clock source the caller
    /// uses) after which this entry must be treated as expired.
    deadline_nanos: u64,
}

/// Caches the most recent answer (positive or negative) per [`CacheKey`].
///
/// Negative answers (an empty `answers` vec, e.g. after NXDOMAIN) are cached
/// too, under `negative_ttl`, so a name that consistently fails to resolve
/// doesn't re-query on every lookup.
#[derive(Clone, Default)]
pub struct DnsCache {
    entries: Arc<Mutex<HashMap<CacheKey, Entry>>>,
    in_flight: Arc<Mutex<HashMap<CacheKey, Arc<Notify>>>>,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached answers if present and not yet past its deadline.
    pub fn get(&self, key: &CacheKey, now_nanos: u64) -> Option<Vec<ResolvedRecord>> {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        let entry = entries.get(key)?;
        if now_nanos >= entry.deadline_nanos {
            return None;
        }
        Some(entry.answers.clone())
    }

    /// Stores a positive answer, scheduling expiry at the shortest positive
    /// TTL among the answers (falling back to `negative_ttl` if empty, which
    /// in practice indicates the caller should have called
    /// [`Self::put_negative`] instead).
    pub fn put(&self, key: CacheKey, answers: Vec<ResolvedRecord>, now_nanos: u64, negative_ttl: Duration) {
        let ttl_nanos = answers
            .iter()
            .map(|r| r.ttl as u64 * 1_000_000_000)
            .min()
            .unwrap_or_else(|| negative_ttl.as_nanos() as u64);
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.insert(key, Entry { answers, deadline_nanos: now_nanos.saturating_add(ttl_nanos) });
    }

    /// Stores a negative answer (NXDOMAIN or empty response), scheduling a
    /// refresh after `negative_ttl`.
    pub fn put_negative(&self, key: CacheKey, now_nanos: u64, negative_ttl: Duration) {
        self.put(key, Vec::new(), now_nanos, negative_ttl);
    }

    pub fn invalidate(&self, key: &CacheKey) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).remove(key);
    }

    /// Looks up `key`, coalescing concurrent misses for the same key into a
    /// single call to `resolve`.
    ///
    /// The first caller to miss becomes the leader: it runs `resolve`, stores
    /// the answer (positive or negative) under `negative_ttl`, and wakes
    /// every follower that arrived while it was in flight. Followers never
    /// call `resolve` themselves — they wait on the leader's
    /// [`tokio::sync::Notify`] and then re-read the now-populated cache.
    pub async fn get_or_resolve<F, Fut>(
        &self,
        key: CacheKey,
        now_nanos: u64,
        negative_ttl: Duration,
        resolve: F,
    ) -> Vec<ResolvedRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Vec<ResolvedRecord>>,
    {
        loop {
            if let Some(cached) = self.get(&key, now_nanos) {
                return cached;
            }

            let notify = {
                let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
                match in_flight.get(&key) {
                    Some(existing) => Some(existing.clone()),
                    None => {
                        in_flight.insert(key.clone(), Arc::new(Notify::new()));
                        None
                    }
                }
            };

            match notify {
                Some(notify) => notify.notified().await,
                None => break,
            }
        }

        let resolved = resolve().await;
        if resolved.is_empty() {
            self.put_negative(key.clone(), now_nanos, negative_ttl);
        } else {
            self.put(key.clone(), resolved.clone(), now_nanos, negative_ttl);
        }
        if let Some(notify) = self.in_flight.lock().unwrap_or_else(|p| p.into_inner()).remove(&key) {
            notify.notify_waiters();
        }
        resolved
    }
}
