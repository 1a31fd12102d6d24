use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

use super::*;
use crate::db::{LocalRepository, SchemaReport};
use crate::models::{CorridorRegistry, SailingStatus::*};
use crate::services::cache::TtlCache;

fn service_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 7, 4).unwrap()
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 4, hour, minute, 0).unwrap()
}

fn observed(status: SailingStatus, reason: Option<&str>, when: DateTime<Utc>) -> ObservedStatus {
    let base = ObservedStatus::new(status, "ssa", when);
    match reason {
        Some(r) => base.with_reason(r),
        None => base,
    }
}

fn observation(time: &str, status: SailingStatus, reason: Option<&str>) -> SailingObservation {
    SailingObservation {
        identity: SailingIdentity::parse(
            "ssa",
            "woods-hole-vineyard-haven",
            "Woods Hole",
            "Vineyard Haven",
            service_day(),
            time,
        )
        .unwrap(),
        status: observed(status, reason, at(9, 0)),
        vessel: Some("Island Home".to_string()),
        schedule_source: ScheduleSourceKind::OperatorSnapshot,
        weather: None,
    }
}

fn store_with(repo: &LocalRepository) -> StatusOverlayStore {
    StatusOverlayStore::new(Arc::new(repo.clone()), Arc::new(SchemaValidationCache::new()))
}

// ==================== decide ====================

#[test]
fn test_canceled_ignores_incoming_status() {
    let stored = observed(Canceled, Some("weather"), at(6, 0));
    for incoming in [OnTime, Delayed, Canceled] {
        assert_eq!(
            decide(&stored, &observed(incoming, Some("resumed"), at(7, 0))),
            ReconcileDecision::Keep
        );
    }
}

#[test]
fn test_canceled_without_reason_is_enriched_only() {
    let stored = observed(Canceled, None, at(6, 0));
    let incoming = observed(OnTime, Some("resumed"), at(7, 0));
    assert_eq!(
        decide(&stored, &incoming),
        ReconcileDecision::EnrichReason("resumed".to_string())
    );
}

#[test]
fn test_same_status_enriches_empty_reason() {
    let stored = observed(Delayed, None, at(6, 0));
    assert_eq!(
        decide(&stored, &observed(Delayed, Some("late inbound"), at(7, 0))),
        ReconcileDecision::EnrichReason("late inbound".to_string())
    );
    assert_eq!(
        decide(&observed(Delayed, Some("fog"), at(6, 0)), &observed(Delayed, Some("late inbound"), at(7, 0))),
        ReconcileDecision::Keep
    );
}

#[test]
fn test_transition_keeps_existing_reason() {
    let stored = observed(Delayed, Some("fog"), at(6, 0));
    assert_eq!(
        decide(&stored, &observed(Canceled, None, at(7, 0))),
        ReconcileDecision::Transition {
            from: Delayed,
            to: Canceled,
            reason: Some("fog".to_string()),
        }
    );
}

#[test]
fn test_undelay_is_blocked() {
    let stored = observed(Delayed, None, at(6, 0));
    assert_eq!(
        decide(&stored, &observed(OnTime, None, at(7, 0))),
        ReconcileDecision::Blocked {
            from: Delayed,
            to: OnTime
        }
    );
}

fn any_status() -> impl Strategy<Value = SailingStatus> {
    prop_oneof![Just(OnTime), Just(Delayed), Just(Canceled)]
}

/// Pure replay of what `StatusOverlayStore::apply` writes.
fn replay(mut stored: ObservedStatus, incoming: &ObservedStatus) -> ObservedStatus {
    match decide(&stored, incoming) {
        ReconcileDecision::Keep | ReconcileDecision::Blocked { .. } => {}
        ReconcileDecision::EnrichReason(reason) => stored.reason = Some(reason),
        ReconcileDecision::Transition { reason, .. } => {
            stored = ObservedStatus {
                reason,
                ..incoming.clone()
            }
        }
    }
    stored
}

proptest! {
    #[test]
    fn prop_cancellation_is_absorbing(
        first_reason in proptest::option::of("[a-z]{0,8}"),
        steps in proptest::collection::vec((any_status(), proptest::option::of("[a-z]{0,8}")), 0..12),
    ) {
        let mut stored = observed(Canceled, first_reason.as_deref(), at(6, 0));
        for (idx, (status, reason)) in steps.iter().enumerate() {
            let incoming = observed(*status, reason.as_deref(), at(7, idx as u32));
            stored = replay(stored, &incoming);
            prop_assert_eq!(stored.status, Canceled);
        }
    }

    #[test]
    fn prop_reason_never_shrinks(
        steps in proptest::collection::vec((any_status(), proptest::option::of("[a-z]{1,8}")), 1..12),
    ) {
        let mut stored = observed(OnTime, None, at(6, 0));
        for (idx, (status, reason)) in steps.iter().enumerate() {
            let had_reason = stored.has_reason();
            stored = replay(stored, &observed(*status, reason.as_deref(), at(7, idx as u32)));
            prop_assert!(!had_reason || stored.has_reason());
        }
    }

    #[test]
    fn prop_same_observation_twice_is_keep(status in any_status(), reason in proptest::option::of("[a-z]{1,8}")) {
        let first = observed(status, reason.as_deref(), at(6, 0));
        let stored = replay(observed(status, None, at(5, 0)), &first);
        prop_assert_eq!(decide(&stored, &first), ReconcileDecision::Keep);
    }
}

// ==================== merge ====================

#[test]
fn test_merge_cancellation_is_sticky() {
    let merged = merge_observations(vec![
        observed(OnTime, None, at(6, 0)),
        observed(Canceled, Some("mechanical"), at(6, 30)),
        observed(OnTime, None, at(8, 0)),
    ])
    .unwrap();
    assert_eq!(merged.status, Canceled);
    assert_eq!(merged.reason.as_deref(), Some("mechanical"));
}

#[test]
fn test_merge_latest_non_canceled_wins() {
    let merged = merge_two(observed(OnTime, None, at(6, 0)), observed(Delayed, Some("fog"), at(7, 0)));
    assert_eq!(merged.status, Delayed);

    let merged = merge_two(observed(Delayed, Some("fog"), at(7, 0)), observed(OnTime, None, at(6, 0)));
    assert_eq!(merged.status, Delayed);
}

#[test]
fn test_merge_keeps_earliest_cancellation_and_reason() {
    let merged = merge_two(
        observed(Canceled, None, at(8, 0)),
        observed(Canceled, Some("weather"), at(6, 0)),
    );
    assert_eq!(merged.observed_at, at(6, 0));
    assert_eq!(merged.reason.as_deref(), Some("weather"));

    let merged = merge_two(
        observed(Canceled, Some("weather"), at(6, 0)),
        observed(Canceled, None, at(8, 0)),
    );
    assert_eq!(merged.reason.as_deref(), Some("weather"));
}

#[test]
fn test_merge_empty_is_none() {
    assert!(merge_observations(Vec::<ObservedStatus>::new()).is_none());
}

// ==================== reconcile ====================

#[tokio::test]
async fn test_first_observation_is_inserted_with_weather() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);
    let mut obs = observation("6:00 AM", OnTime, None);
    obs.weather = Some(WeatherSnapshot {
        wind_speed_mph: Some(18.0),
        wind_gust_mph: Some(27.0),
        wind_direction_deg: Some(220.0),
        conditions: Some("Breezy".to_string()),
        observed_at: at(8, 55),
    });

    let outcome = store.reconcile(&obs).await;
    assert!(matches!(outcome, ReconcileOutcome::Inserted { .. }));

    let stored = repo.events().pop().unwrap();
    assert_eq!(stored.weather, obs.weather);
    assert_eq!(stored.previous_status, None);
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);
    let obs = observation("6:00 AM", Delayed, Some("fog"));

    assert!(matches!(store.reconcile(&obs).await, ReconcileOutcome::Inserted { .. }));
    let before = repo.events();
    assert_eq!(store.reconcile(&obs).await, ReconcileOutcome::Unchanged);
    assert_eq!(repo.events(), before);
}

#[tokio::test]
async fn test_on_time_then_mechanical_cancellation() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);

    store.reconcile(&observation("6:00 AM", OnTime, None)).await;
    let outcome = store
        .reconcile(&observation("06:00:00", Canceled, Some("mechanical")))
        .await;

    assert!(matches!(
        outcome,
        ReconcileOutcome::Updated {
            change: StatusChange::Transition {
                from: OnTime,
                to: Canceled
            },
            ..
        }
    ));
    let stored = repo.events().pop().unwrap();
    assert_eq!(stored.status.status, Canceled);
    assert_eq!(stored.status.reason.as_deref(), Some("mechanical"));
    assert_eq!(stored.previous_status, Some(OnTime));
    assert_eq!(repo.event_count(), 1);
}

#[tokio::test]
async fn test_canceled_then_resumed_only_enriches() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);

    store.reconcile(&observation("6:00 AM", Canceled, None)).await;
    let outcome = store
        .reconcile(&observation("6:00 AM", OnTime, Some("resumed")))
        .await;

    assert!(matches!(
        outcome,
        ReconcileOutcome::Updated {
            change: StatusChange::ReasonEnriched,
            ..
        }
    ));
    let stored = repo.events().pop().unwrap();
    assert_eq!(stored.status.status, Canceled);
    assert_eq!(stored.status.reason.as_deref(), Some("resumed"));
}

#[tokio::test]
async fn test_blocked_transition_is_unchanged() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);

    store.reconcile(&observation("6:00 AM", Delayed, None)).await;
    assert_eq!(
        store.reconcile(&observation("6:00 AM", OnTime, None)).await,
        ReconcileOutcome::Unchanged
    );
    assert_eq!(repo.events()[0].status.status, Delayed);
}

#[tokio::test]
async fn test_lost_insert_race_becomes_update() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);
    let racer = observation("6:00 AM", OnTime, None);
    repo.inject_racing_insert(NewSailingEvent::from(&racer));

    let outcome = store
        .reconcile(&observation("6:00 AM", Canceled, Some("crew shortage")))
        .await;

    assert!(matches!(
        outcome,
        ReconcileOutcome::Updated {
            change: StatusChange::Transition {
                from: OnTime,
                to: Canceled
            },
            ..
        }
    ));
    assert_eq!(repo.event_count(), 1);
    assert_eq!(repo.events()[0].status.status, Canceled);
}

/// Holds the first `readers` lookups until all of them have read, so every
/// writer decides against the same stored row.
struct LockstepReads {
    inner: LocalRepository,
    readers: usize,
    reads: AtomicUsize,
    barrier: Barrier,
}

impl LockstepReads {
    fn new(inner: LocalRepository, readers: usize) -> Self {
        Self {
            inner,
            readers,
            reads: AtomicUsize::new(0),
            barrier: Barrier::new(readers),
        }
    }
}

#[async_trait]
impl SailingEventRepository for LockstepReads {
    async fn health_check(&self) -> RepositoryResult<bool> {
        self.inner.health_check().await
    }

    async fn validate_schema(&self) -> RepositoryResult<SchemaReport> {
        self.inner.validate_schema().await
    }

    async fn find_by_identity(
        &self,
        identity: &SailingIdentity,
    ) -> RepositoryResult<Option<PersistedSailingEvent>> {
        let found = self.inner.find_by_identity(identity).await;
        if self.reads.fetch_add(1, Ordering::SeqCst) < self.readers {
            self.barrier.wait().await;
        }
        found
    }

    async fn insert_event(&self, event: &NewSailingEvent) -> RepositoryResult<PersistedSailingEvent> {
        self.inner.insert_event(event).await
    }

    async fn update_event(
        &self,
        id: SailingEventId,
        update: &SailingEventUpdate,
    ) -> RepositoryResult<PersistedSailingEvent> {
        self.inner.update_event(id, update).await
    }

    async fn list_events_for_operator_date(
        &self,
        operator_id: &OperatorId,
        service_date: NaiveDate,
    ) -> RepositoryResult<Vec<PersistedSailingEvent>> {
        self.inner.list_events_for_operator_date(operator_id, service_date).await
    }
}

fn lockstep_store(repo: &LocalRepository) -> StatusOverlayStore {
    StatusOverlayStore::new(
        Arc::new(LockstepReads::new(repo.clone(), 2)),
        Arc::new(SchemaValidationCache::new()),
    )
}

#[tokio::test]
async fn test_concurrent_cancel_beats_concurrent_delay() {
    let repo = LocalRepository::new();
    repo.seed_event(NewSailingEvent::from(&observation("6:00 AM", OnTime, None)))
        .unwrap();
    let store = lockstep_store(&repo);

    let cancel = observation("6:00 AM", Canceled, Some("weather"));
    let delay = observation("6:00 AM", Delayed, Some("late inbound"));
    let (canceled, delayed) = tokio::join!(store.reconcile(&cancel), store.reconcile(&delay));

    assert!(!canceled.is_failed());
    assert!(!delayed.is_failed());
    let row = &repo.events()[0];
    assert_eq!(row.status.status, Canceled);
    assert_eq!(repo.event_count(), 1);
}

#[tokio::test]
async fn test_concurrent_delay_then_cancel_in_either_order() {
    let repo = LocalRepository::new();
    repo.seed_event(NewSailingEvent::from(&observation("6:00 AM", OnTime, None)))
        .unwrap();
    let store = lockstep_store(&repo);

    let cancel = observation("6:00 AM", Canceled, None);
    let delay = observation("6:00 AM", Delayed, Some("late inbound"));
    let (delayed, canceled) = tokio::join!(store.reconcile(&delay), store.reconcile(&cancel));

    assert!(!canceled.is_failed());
    assert!(!delayed.is_failed());
    let row = &repo.events()[0];
    assert_eq!(row.status.status, Canceled);
    assert_eq!(row.status.reason.as_deref(), Some("late inbound"));
}

#[tokio::test]
async fn test_concurrent_reason_fills_write_once() {
    let repo = LocalRepository::new();
    repo.seed_event(NewSailingEvent::from(&observation("6:00 AM", Canceled, None)))
        .unwrap();
    let store = lockstep_store(&repo);

    let first = observation("6:00 AM", Canceled, Some("weather"));
    let second = observation("6:00 AM", Canceled, Some("mechanical"));
    let (a, b) = tokio::join!(store.reconcile(&first), store.reconcile(&second));

    assert!(a.is_write() ^ b.is_write());
    let reason = repo.events()[0].status.reason.clone();
    assert!(reason.as_deref() == Some("weather") || reason.as_deref() == Some("mechanical"));
}

#[tokio::test]
async fn test_store_failure_is_reported_not_raised() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);
    repo.set_healthy(false);

    let outcome = store.reconcile(&observation("6:00 AM", Canceled, None)).await;
    assert!(outcome.is_failed());
}

#[tokio::test]
async fn test_schema_check_runs_once() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);

    store.reconcile(&observation("6:00 AM", OnTime, None)).await;
    store.reconcile(&observation("7:00 AM", OnTime, None)).await;
    store.reconcile(&observation("8:00 AM", OnTime, None)).await;
    assert_eq!(repo.schema_check_count(), 1);
}

#[tokio::test]
async fn test_missing_column_fails_until_fixed() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);
    repo.set_missing_columns(["previous_status"]);

    let outcome = store.reconcile(&observation("6:00 AM", OnTime, None)).await;
    match outcome {
        ReconcileOutcome::Failed { reason } => assert!(reason.contains("previous_status")),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(repo.event_count(), 0);

    repo.set_missing_columns(Vec::<String>::new());
    assert!(matches!(
        store.reconcile(&observation("6:00 AM", OnTime, None)).await,
        ReconcileOutcome::Inserted { .. }
    ));
    assert_eq!(repo.schema_check_count(), 2);
}

#[tokio::test]
async fn test_writes_invalidate_status_cache() {
    let repo = LocalRepository::new();
    let cache = Arc::new(TtlCache::new(Duration::from_secs(60)));
    let store = store_with(&repo).with_status_cache(cache.clone());
    let key = (OperatorId::new("ssa"), service_day());

    cache.insert(key.clone(), Vec::new());
    store.reconcile(&observation("6:00 AM", OnTime, None)).await;
    assert!(cache.get(&key).is_none());

    cache.insert(key.clone(), Vec::new());
    store.reconcile(&observation("6:00 AM", OnTime, None)).await;
    assert!(cache.get(&key).is_some(), "unchanged outcome must not invalidate");
}

// ==================== ingest ====================

fn snapshot(rows: Vec<(&str, &str, &str, SailingStatus)>, observed_at: DateTime<Utc>) -> OperatorSnapshot {
    OperatorSnapshot {
        operator_id: OperatorId::new("ssa"),
        corridor_id: CorridorId::new("woods-hole-vineyard-haven"),
        service_date: service_day(),
        observed_at,
        source: "ssa-status-page".to_string(),
        schedule_source: ScheduleSourceKind::OperatorSnapshot,
        sailings: rows
            .into_iter()
            .map(|(from, to, time, status)| SnapshotSailing {
                from_port: from.to_string(),
                to_port: to.to_string(),
                departure_time: time.to_string(),
                status,
                reason: None,
                vessel: None,
                weather: None,
            })
            .collect(),
    }
}

fn wh_vh() -> CorridorConfig {
    CorridorRegistry::builtin()
        .get(&CorridorId::new("woods-hole-vineyard-haven"))
        .cloned()
        .unwrap()
}

#[tokio::test]
async fn test_ingest_counts_outcomes() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);
    let corridor = wh_vh();

    let first = snapshot(
        vec![("wh", "vh", "7:00 AM", OnTime), ("vh", "wh", "8:15 AM", OnTime)],
        at(10, 0),
    );
    let report = store
        .ingest_operator_snapshot(&first, &corridor, IngestOptions::default())
        .await
        .unwrap();
    assert_eq!(report.inserted, 2);

    let second = snapshot(
        vec![("wh", "vh", "7:00 AM", Canceled), ("vh", "wh", "8:15 AM", OnTime)],
        at(10, 30),
    );
    let report = store
        .ingest_operator_snapshot(&second, &corridor, IngestOptions::default())
        .await
        .unwrap();
    assert_eq!((report.updated, report.unchanged, report.failed), (1, 1, 0));
}

#[tokio::test]
async fn test_ingest_schema_failure_is_fatal() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);
    repo.set_missing_columns(["status_source"]);

    let err = store
        .ingest_operator_snapshot(
            &snapshot(vec![("wh", "vh", "7:00 AM", OnTime)], at(10, 0)),
            &wh_vh(),
            IngestOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Schema(_)));
    assert_eq!(repo.event_count(), 0);
}

#[tokio::test]
async fn test_ingest_rejects_rows_outside_corridor() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);

    let err = store
        .ingest_operator_snapshot(
            &snapshot(
                vec![("wh", "vh", "7:00 AM", OnTime), ("wh", "ob", "7:30 AM", OnTime)],
                at(10, 0),
            ),
            &wh_vh(),
            IngestOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::InvalidSailing { index: 1, .. }));
    assert_eq!(repo.event_count(), 0);
}

#[tokio::test]
async fn test_vanished_future_sailing_is_canceled() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);
    let corridor = wh_vh();

    // 10:00 UTC is 6:00 AM in Woods Hole.
    store
        .ingest_operator_snapshot(
            &snapshot(
                vec![
                    ("wh", "vh", "5:30 AM", OnTime),
                    ("wh", "vh", "7:00 AM", OnTime),
                    ("wh", "vh", "9:00 AM", OnTime),
                ],
                at(10, 0),
            ),
            &corridor,
            IngestOptions::default(),
        )
        .await
        .unwrap();

    // 5:30 (already departed) and 9:00 vanish.
    let report = store
        .ingest_operator_snapshot(
            &snapshot(vec![("wh", "vh", "7:00 AM", OnTime)], at(10, 0) + ChronoDuration::minutes(5)),
            &corridor,
            IngestOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(report.inferred_removed, 1);

    let events = repo.events();
    let nine = events
        .iter()
        .find(|e| e.identity.departure_time.to_string() == "9:00am")
        .unwrap();
    assert_eq!(nine.status.status, Canceled);
    assert_eq!(nine.status.origin, StatusOrigin::OperatorRemoved);
    assert_eq!(nine.status.reason.as_deref(), Some(REMOVED_FROM_SCHEDULE_REASON));

    let early = events
        .iter()
        .find(|e| e.identity.departure_time.to_string() == "5:30am")
        .unwrap();
    assert_eq!(early.status.status, OnTime);
}

#[tokio::test]
async fn test_removal_inference_can_be_disabled() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);
    let corridor = wh_vh();
    let options = IngestOptions {
        infer_removed: false,
    };

    store
        .ingest_operator_snapshot(
            &snapshot(vec![("wh", "vh", "9:00 AM", OnTime)], at(10, 0)),
            &corridor,
            options,
        )
        .await
        .unwrap();
    let report = store
        .ingest_operator_snapshot(&snapshot(vec![], at(10, 5)), &corridor, options)
        .await
        .unwrap();

    assert_eq!(report.inferred_removed, 0);
    assert_eq!(repo.events()[0].status.status, OnTime);
}

#[tokio::test]
async fn test_snapshot_for_unserved_operator_is_rejected() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);
    let mut snap = snapshot(vec![], at(10, 0));
    snap.operator_id = OperatorId::new("hlc");

    let err = store
        .ingest_operator_snapshot(&snap, &wh_vh(), IngestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::OperatorNotServed { .. }));
}

#[tokio::test]
async fn test_template_observation_is_never_keyed() {
    let repo = LocalRepository::new();
    let store = store_with(&repo);
    let mut obs = observation("6:00 AM", Canceled, None);
    obs.schedule_source = ScheduleSourceKind::Template;

    assert!(store.reconcile(&obs).await.is_failed());
    assert_eq!(repo.event_count(), 0);
    assert_eq!(repo.schema_check_count(), 0);

    let mut snap = snapshot(vec![("wh", "vh", "7:00 AM", OnTime)], at(10, 0));
    snap.schedule_source = ScheduleSourceKind::Template;
    let err = store
        .ingest_operator_snapshot(&snap, &wh_vh(), IngestOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::NotOperatorSourced(ScheduleSourceKind::Template)));
}
