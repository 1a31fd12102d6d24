#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use ferry_board::config::BoardSettings;
use ferry_board::db::{LocalRepository, SailingEventRepository};
use ferry_board::models::{CorridorId, CorridorRegistry, OperatorId, SailingStatus};
use ferry_board::services::{
    BoardCaches, CorridorBoardComposer, OperatorSnapshot, SchemaValidationCache, SnapshotSailing,
    StatusOverlayStore,
};
use ferry_board::sources::{NoForecast, StaticScheduleSource};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily modified.
///
/// Restores the previous values on unwind and serializes access to the
/// process environment across parallel tests.
///
/// `changes` is a list of `(key, value)` pairs:
/// - `Some(v)` sets the variable to `v`
/// - `None` removes the variable
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let _guard = ScopedEnv::new(changes);
    f()
}

struct ScopedEnv {
    snapshot: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    fn new(changes: &[(&str, Option<&str>)]) -> Self {
        let keys: HashSet<&str> = changes.iter().map(|(k, _)| *k).collect();
        let snapshot = keys
            .into_iter()
            .map(|k| (k.to_string(), std::env::var(k).ok()))
            .collect::<Vec<_>>();

        for (k, v) in changes {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }

        Self { snapshot }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (k, v) in self.snapshot.drain(..) {
            match v {
                Some(val) => std::env::set_var(&k, val),
                None => std::env::remove_var(&k),
            }
        }
    }
}

/// 8:00 AM EDT on the Fourth of July.
pub fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 4, 12, 0, 0).unwrap()
}

pub fn service_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 7, 4).unwrap()
}

/// In-memory store, scriptable schedule source, a composer without caches
/// and an overlay store that shares the composer's status cache.
pub struct Stack {
    pub repo: LocalRepository,
    pub schedules: StaticScheduleSource,
    pub composer: CorridorBoardComposer,
    pub overlay: StatusOverlayStore,
}

pub fn stack() -> Stack {
    let repo = LocalRepository::new();
    let schedules = StaticScheduleSource::new();
    let shared: Arc<dyn SailingEventRepository> = Arc::new(repo.clone());
    let composer = CorridorBoardComposer::new(
        Arc::new(CorridorRegistry::builtin()),
        shared.clone(),
        Arc::new(schedules.clone()),
        Arc::new(NoForecast),
        BoardSettings::default(),
    )
    .with_caches(BoardCaches::disabled());
    let overlay = StatusOverlayStore::new(shared, Arc::new(SchemaValidationCache::new()))
        .with_status_cache(composer.caches().operator_status.clone());

    Stack {
        repo,
        schedules,
        composer,
        overlay,
    }
}

pub fn row(from: &str, to: &str, time: &str, status: SailingStatus) -> SnapshotSailing {
    SnapshotSailing {
        from_port: from.to_string(),
        to_port: to.to_string(),
        departure_time: time.to_string(),
        status,
        reason: None,
        vessel: None,
        weather: None,
    }
}

pub fn snapshot(
    operator: &str,
    corridor: &str,
    observed_at: DateTime<Utc>,
    sailings: Vec<SnapshotSailing>,
) -> OperatorSnapshot {
    OperatorSnapshot {
        operator_id: OperatorId::new(operator),
        corridor_id: CorridorId::new(corridor),
        service_date: service_date(),
        observed_at,
        source: format!("{}-status-page", operator),
        schedule_source: ferry_board::models::ScheduleSourceKind::OperatorSnapshot,
        sailings,
    }
}
