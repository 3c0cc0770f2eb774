//! Key derivation and a bounded, expiring breaker registry (design component C).
//!
//! Generalizes the teacher's `CircuitBreakerRegistry` (a flat `HashMap` behind
//! a mutex, keyed by a caller-chosen string id) to a derived key over request
//! dimensions, with an LRU bound and per-entry idle expiry so high-cardinality
//! dimensions (e.g. per-path) cannot grow the map without limit.

use super::state::CircuitBreaker;
use crate::clock::Clock;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const DEFAULT_CAPACITY: usize = 256;
const DEFAULT_IDLE_EXPIRY: Duration = Duration::from_secs(3600);

/// Which request dimensions participate in a breaker's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingMode {
    PerService,
    PerMethod,
    PerHost,
    PerPath,
    PerHostMethod,
    PerHostPath,
    PerMethodPath,
    PerHostMethodPath,
}

impl MappingMode {
    fn key(self, host: Option<&str>, method: Option<&str>, path: Option<&str>) -> BreakerKey {
        let (h, m, p) = match self {
            Self::PerService => (None, None, None),
            Self::PerMethod => (None, method, None),
            Self::PerHost => (host, None, None),
            Self::PerPath => (None, None, path),
            Self::PerHostMethod => (host, method, None),
            Self::PerHostPath => (host, None, path),
            Self::PerMethodPath => (None, method, path),
            Self::PerHostMethodPath => (host, method, path),
        };
        BreakerKey { host: h.map(String::from), method: m.map(String::from), path: p.map(String::from) }
    }
}

/// Derived lookup key. Unspecified dimensions (per the active [`MappingMode`])
/// contribute `None`, not an empty string, so `PER_HOST` on an empty-string
/// host is still distinct from "no host dimension at all".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BreakerKey {
    pub host: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
}

struct Entry {
    breaker: CircuitBreaker,
    last_used_nanos: u64,
}

/// Maps derived keys to lazily-created, LRU-bounded circuit breakers.
///
/// `F` is the user-supplied factory invoked on first miss for a given key.
pub struct CircuitBreakerMapping<F> {
    mode: MappingMode,
    cache: Mutex<LruCache<BreakerKey, Entry>>,
    idle_expiry_nanos: u64,
    clock: Arc<dyn Clock>,
    factory: F,
}

impl<F> CircuitBreakerMapping<F>
where
    F: Fn(&BreakerKey) -> CircuitBreaker,
{
    pub fn new(mode: MappingMode, clock: Arc<dyn Clock>, factory: F) -> Self {
        Self::with_capacity(mode, clock, factory, DEFAULT_CAPACITY, DEFAULT_IDLE_EXPIRY)
    }

    pub fn with_capacity(
        mode: MappingMode,
        clock: Arc<dyn Clock>,
        factory: F,
        capacity: usize,
        idle_expiry: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity.max(1) is never zero");
        Self {
            mode,
            cache: Mutex::new(LruCache::new(capacity)),
            idle_expiry_nanos: idle_expiry.as_nanos().max(1) as u64,
            clock,
            factory,
        }
    }

    /// Look up (or lazily create) the breaker for these request dimensions.
    /// An entry idle longer than the configured expiry is treated as a miss
    /// and recreated via the factory.
    pub fn get(&self, host: Option<&str>, method: Option<&str>, path: Option<&str>) -> CircuitBreaker {
        let key = self.mode.key(host, method, path);
        let now = self.clock.now_nanos();
        let mut cache = self.cache.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(entry) = cache.get_mut(&key) {
            if now.saturating_sub(entry.last_used_nanos) < self.idle_expiry_nanos {
                entry.last_used_nanos = now;
                return entry.breaker.clone();
            }
            cache.pop(&key);
        }

        let breaker = (self.factory)(&key);
        cache.put(key, Entry { breaker: breaker.clone(), last_used_nanos: now });
        breaker
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
