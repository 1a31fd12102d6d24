//! Short-lived performance caches owned by the board composer and the
//! overlay store.
//!
//! Nothing here is correctness-critical: any entry can be dropped at any
//! time and the next caller simply goes back to the source.

use chrono::NaiveDate;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::{OperatorId, PersistedSailingEvent, RouteId};
use crate::sources::RouteSchedule;

/// Thread-safe map whose entries expire `ttl` after insertion.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: RwLock<HashMap<K, (Instant, V)>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fresh value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let mut entries = self.entries.write();
        entries.retain(|_, (stored_at, _)| stored_at.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.write().remove(key);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

pub type ScheduleCache = TtlCache<(RouteId, NaiveDate), RouteSchedule>;
pub type OperatorStatusCache = TtlCache<(OperatorId, NaiveDate), Vec<PersistedSailingEvent>>;

/// Remembers a successful schema check. Failures are never cached, so a
/// fixed schema is picked up on the next call.
#[derive(Debug)]
pub struct SchemaValidationCache {
    validated: TtlCache<(), ()>,
}

impl SchemaValidationCache {
    /// Valid for the life of the process.
    pub fn new() -> Self {
        Self::with_ttl(Duration::MAX)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            validated: TtlCache::new(ttl),
        }
    }

    pub fn is_validated(&self) -> bool {
        self.validated.get(&()).is_some()
    }

    pub fn mark_validated(&self) {
        self.validated.insert((), ());
    }

    pub fn reset(&self) {
        self.validated.clear();
    }
}

impl Default for SchemaValidationCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Caches shared by every board render in one process.
#[derive(Debug, Clone)]
pub struct BoardCaches {
    pub schedules: Arc<ScheduleCache>,
    pub operator_status: Arc<OperatorStatusCache>,
}

impl BoardCaches {
    pub fn new(schedule_ttl: Duration, status_ttl: Duration) -> Self {
        Self {
            schedules: Arc::new(TtlCache::new(schedule_ttl)),
            operator_status: Arc::new(TtlCache::new(status_ttl)),
        }
    }

    /// Caches that never hold anything, for tests that count source calls.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn clear(&self) {
        self.schedules.clear();
        self.operator_status.clear();
    }
}
