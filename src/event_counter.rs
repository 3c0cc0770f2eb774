//! Sliding-window success/failure event counter (design component A).
//!
//! A fixed-width ring of buckets, each covering `bucket_width` of wall time,
//! together spanning `window`. Writers perform a lock-free fetch-add on the
//! bucket that owns "now"; readers sum every bucket whose tag still falls
//! inside the window. Rolling is lazy: a writer that finds its target bucket
//! stale resets only that one bucket via compare-and-swap before recording
//! its event, so at most one stale bucket is cleared per write and
//! concurrent writers can never double count across a roll.

use crate::clock::Clock;
use crate::error::ArithmeticError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A point-in-time (success, failure) pair summed over the live window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventCount {
    pub success: u64,
    pub failure: u64,
}

impl EventCount {
    pub fn total(&self) -> u64 {
        self.success + self.failure
    }

    /// `failure / total`. Defined only when `total() > 0`.
    pub fn failure_rate(&self) -> Result<f64, ArithmeticError> {
        let total = self.total();
        if total == 0 {
            return Err(ArithmeticError);
        }
        Ok(self.failure as f64 / total as f64)
    }

    /// `success / total`. Defined only when `total() > 0`.
    pub fn success_rate(&self) -> Result<f64, ArithmeticError> {
        self.failure_rate().map(|r| 1.0 - r)
    }
}

struct Bucket {
    /// The bucket index (`now_nanos / bucket_width_nanos`) this cell currently represents.
    epoch: AtomicU64,
    /// Packed counts: success in the low 32 bits, failure in the high 32 bits.
    counts: AtomicU64,
}

impl Bucket {
    fn new() -> Self {
        // epoch = u64::MAX marks "never written", always stale against any real epoch.
        Self { epoch: AtomicU64::new(u64::MAX), counts: AtomicU64::new(0) }
    }
}

fn pack(success: u32, failure: u32) -> u64 {
    (success as u64) | ((failure as u64) << 32)
}

fn unpack(bits: u64) -> (u32, u32) {
    (bits as u32, (bits >> 32) as u32)
}

/// Lock-free sliding-window counter of successes and failures.
pub struct EventCounter {
    buckets: Vec<Bucket>,
    bucket_width_nanos: u64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EventCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCounter")
            .field("bucket_count", &self.buckets.len())
            .field("bucket_width_nanos", &self.bucket_width_nanos)
            .finish()
    }
}

impl EventCounter {
    /// `window` is divided into buckets of `bucket_width`; at least one bucket is always used.
    pub fn new(window: Duration, bucket_width: Duration, clock: Arc<dyn Clock>) -> Self {
        let bucket_width_nanos = bucket_width.as_nanos().max(1) as u64;
        let bucket_count =
            ((window.as_nanos() as u64).div_ceil(bucket_width_nanos)).max(1) as usize;
        let buckets = (0..bucket_count).map(|_| Bucket::new()).collect();
        Self { buckets, bucket_width_nanos, clock }
    }

    fn current_epoch(&self) -> u64 {
        self.clock.now_nanos() / self.bucket_width_nanos
    }

    /// Roll (if stale) and return a reference to the bucket owning the current epoch.
    fn current_bucket(&self, epoch: u64) -> &Bucket {
        let idx = (epoch % self.buckets.len() as u64) as usize;
        let bucket = &self.buckets[idx];
        let observed = bucket.epoch.load(Ordering::Acquire);
        if observed != epoch {
            // Stale (or never written): try to claim the reset for this epoch.
            // A losing CAS means a racing writer already rolled it forward (to this
            // epoch or a newer one); either way the bucket is now usable as-is.
            if bucket
                .epoch
                .compare_exchange(observed, epoch, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                bucket.counts.store(0, Ordering::Release);
            }
        }
        bucket
    }

    pub fn on_success(&self) {
        let epoch = self.current_epoch();
        self.current_bucket(epoch).counts.fetch_add(1, Ordering::AcqRel);
    }

    pub fn on_failure(&self) {
        let epoch = self.current_epoch();
        self.current_bucket(epoch).counts.fetch_add(1u64 << 32, Ordering::AcqRel);
    }

    /// Sum every bucket whose tag still falls inside the window; stale buckets
    /// (not yet rolled by a writer) read as zero without being mutated.
    pub fn snapshot(&self) -> EventCount {
        let now_epoch = self.current_epoch();
        let window_len = self.buckets.len() as u64;
        let oldest_live_epoch = now_epoch.saturating_sub(window_len - 1);

        let mut success: u64 = 0;
        let mut failure: u64 = 0;
        for bucket in &self.buckets {
            let epoch = bucket.epoch.load(Ordering::Acquire);
            if epoch == u64::MAX || epoch < oldest_live_epoch || epoch > now_epoch {
                continue;
            }
            let (s, f) = unpack(bucket.counts.load(Ordering::Acquire));
            success += s as u64;
            failure += f as u64;
        }
        EventCount { success, failure }
    }

    /// Reset every bucket to empty. Used when a breaker transitions state and
    /// must start its counters fresh.
    pub fn reset(&self) {
        for bucket in &self.buckets {
            bucket.epoch.store(u64::MAX, Ordering::Release);
            bucket.counts.store(0, Ordering::Release);
        }
    }
}
