//! Message deduplication.
//!
//! Broadcast media re-deliver. A frame can arrive twice from the same
//! sender (link-level retry) or once from each of several relays. The
//! deduplicator remembers every message identity it has admitted for a
//! TTL window and refuses repeats.
//!
//! # Bounding memory
//!
//! Two limits keep the cache small:
//! - entries older than `ttl` are pruned on every call
//! - if the cache still holds more than `capacity` entries, the oldest
//!   quarter is evicted in one go
//!
//! Evicting in bulk means a busy room doesn't pay an eviction on every
//! single message once it sits at the limit.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// DedupConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`MessageDeduplicator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// How long an admitted identity suppresses repeats.
    ///
    /// Default: 5 minutes.
    pub ttl: Duration,

    /// Soft cap on remembered identities. Exceeding it evicts the
    /// oldest 25%.
    ///
    /// Default: 1000.
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            capacity: 1000,
        }
    }
}

impl DedupConfig {
    /// Returns a copy with out-of-range values clamped.
    pub fn validated(mut self) -> Self {
        if self.capacity < 4 {
            tracing::warn!(capacity = self.capacity, "dedup capacity too small, using 4");
            self.capacity = 4;
        }
        if self.ttl.is_zero() {
            tracing::warn!("dedup ttl is zero, using 1s");
            self.ttl = Duration::from_secs(1);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// MessageDeduplicator
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DedupInner {
    seen: HashMap<String, Instant>,
    /// Admission order. Front is oldest.
    order: VecDeque<(String, Instant)>,
}

impl DedupInner {
    fn prune(&mut self, now: Instant, ttl: Duration) {
        while let Some((id, seen_at)) = self.order.front() {
            if now.saturating_duration_since(*seen_at) < ttl {
                break;
            }
            // Only drop the map entry if it still belongs to this
            // admission; an id can be re-admitted after expiring.
            if self.seen.get(id) == Some(seen_at) {
                self.seen.remove(id);
            }
            self.order.pop_front();
        }
    }

    fn evict_oldest_quarter(&mut self) {
        let n = (self.seen.len() / 4).max(1);
        for _ in 0..n {
            let Some((id, seen_at)) = self.order.pop_front() else {
                break;
            };
            if self.seen.get(&id) == Some(&seen_at) {
                self.seen.remove(&id);
            }
        }
    }
}

/// Admits each message identity at most once per TTL window.
///
/// Safe to share between tasks or threads: the cache sits behind a
/// mutex, so two concurrent calls with the same id can never both be
/// admitted.
///
/// ## Example
///
/// ```rust
/// use meshroom_peer::{DedupConfig, MessageDeduplicator};
/// use tokio::time::Instant;
///
/// let dedup = MessageDeduplicator::new(DedupConfig::default());
/// let now = Instant::now();
/// assert!(dedup.should_process("m-1", now));
/// assert!(!dedup.should_process("m-1", now));
/// ```
pub struct MessageDeduplicator {
    inner: Mutex<DedupInner>,
    config: DedupConfig,
}

impl MessageDeduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            inner: Mutex::new(DedupInner::default()),
            config: config.validated(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DedupInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns `true` the first time `id` is seen within the TTL window
    /// and records it. Later calls return `false` until it expires.
    pub fn should_process(&self, id: &str, now: Instant) -> bool {
        let mut inner = self.lock();
        inner.prune(now, self.config.ttl);

        if inner.seen.contains_key(id) {
            return false;
        }

        inner.seen.insert(id.to_owned(), now);
        inner.order.push_back((id.to_owned(), now));

        if inner.seen.len() > self.config.capacity {
            inner.evict_oldest_quarter();
            tracing::debug!(remaining = inner.seen.len(), "dedup cache over capacity, evicted oldest quarter");
        }
        true
    }

    /// Drops entries older than the TTL.
    pub fn prune(&self, now: Instant) {
        self.lock().prune(now, self.config.ttl);
    }

    /// Number of remembered identities.
    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets everything. Used when leaving a room.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.seen.clear();
        inner.order.clear();
    }
}

impl Default for MessageDeduplicator {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}
