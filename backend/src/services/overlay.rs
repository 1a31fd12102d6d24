//! Status overlay store.
//!
//! Reconciles incoming status observations against the persisted row for
//! the same [`SailingIdentity`]. The transition table lives on
//! [`SailingStatus::can_transition_to`]; this module decides what a given
//! observation is allowed to change and issues the corresponding write.
//!
//! Store failures surface as [`ReconcileOutcome::Failed`] so a board render
//! never crashes on a write path problem. The ingestion path is stricter and
//! treats a schema mismatch as fatal.

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use super::cache::{OperatorStatusCache, SchemaValidationCache};
use crate::db::{NewSailingEvent, RepositoryError, RepositoryResult, SailingEventRepository, SailingEventUpdate};
use crate::models::{
    CorridorConfig, CorridorId, DepartureInstant, IdentityError, ObservedStatus, OperatorId,
    PersistedSailingEvent, SailingEventId, SailingIdentity, SailingKey, SailingObservation,
    SailingStatus, ScheduleSourceKind, StatusOrigin, WeatherSnapshot,
};

/// Reason recorded on a sailing that vanished from an operator's list.
pub const REMOVED_FROM_SCHEDULE_REASON: &str = "Removed from operator schedule";

/// What an observation may do to an existing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// Nothing to write.
    Keep,
    /// Fill the empty stored reason. Status is untouched.
    EnrichReason(String),
    /// Allowed status change. `reason` is never emptier than the stored one.
    Transition {
        from: SailingStatus,
        to: SailingStatus,
        reason: Option<String>,
    },
    /// Disallowed change such as un-canceling or un-delaying.
    Blocked {
        from: SailingStatus,
        to: SailingStatus,
    },
}

/// Decide how `incoming` reconciles against the stored status.
pub fn decide(stored: &ObservedStatus, incoming: &ObservedStatus) -> ReconcileDecision {
    if stored.status.is_canceled() || stored.status == incoming.status {
        return match (&incoming.reason, stored.has_reason()) {
            (Some(reason), false) if incoming.has_reason() => {
                ReconcileDecision::EnrichReason(reason.trim().to_string())
            }
            _ => ReconcileDecision::Keep,
        };
    }

    if stored.status.can_transition_to(incoming.status) {
        let reason = if incoming.has_reason() {
            incoming.reason.clone()
        } else {
            stored.reason.clone()
        };
        ReconcileDecision::Transition {
            from: stored.status,
            to: incoming.status,
            reason,
        }
    } else {
        ReconcileDecision::Blocked {
            from: stored.status,
            to: incoming.status,
        }
    }
}

/// Sticky merge of two observations for the same sailing.
///
/// A canceled observation beats any non-canceled one regardless of recency.
/// Between two cancellations the earlier one is kept. Otherwise the later
/// observation wins. A reason present on either side is never lost to a
/// winner without one.
pub fn merge_two(current: ObservedStatus, next: ObservedStatus) -> ObservedStatus {
    let (mut winner, loser) = match (current.status.is_canceled(), next.status.is_canceled()) {
        (true, false) => (current, next),
        (false, true) => (next, current),
        (true, true) => {
            if next.observed_at < current.observed_at {
                (next, current)
            } else {
                (current, next)
            }
        }
        (false, false) => {
            if next.observed_at >= current.observed_at {
                (next, current)
            } else {
                (current, next)
            }
        }
    };

    let inherits_reason = winner.status.is_canceled() || winner.status == loser.status;
    if !winner.has_reason() && loser.has_reason() && inherits_reason {
        winner.reason = loser.reason;
    }
    if winner.status.is_canceled() && loser.origin == StatusOrigin::Normal && loser.status.is_canceled() {
        // An explicit cancellation outranks an inferred one.
        winner.origin = StatusOrigin::Normal;
    }
    winner
}

/// Fold any number of observations with [`merge_two`].
pub fn merge_observations<I>(observations: I) -> Option<ObservedStatus>
where
    I: IntoIterator<Item = ObservedStatus>,
{
    observations.into_iter().reduce(merge_two)
}

/// Kind of change a successful update made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusChange {
    Transition {
        from: SailingStatus,
        to: SailingStatus,
    },
    ReasonEnriched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Inserted { id: SailingEventId },
    Updated { id: SailingEventId, change: StatusChange },
    Unchanged,
    Failed { reason: String },
}

impl ReconcileOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ReconcileOutcome::Failed { .. })
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Inserted { .. } | ReconcileOutcome::Updated { .. }
        )
    }
}

/// One row of an operator's published list for a corridor and date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSailing {
    pub from_port: String,
    pub to_port: String,
    pub departure_time: String,
    pub status: SailingStatus,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub vessel: Option<String>,
    #[serde(default)]
    pub weather: Option<WeatherSnapshot>,
}

/// Everything an operator published for one corridor on one service date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSnapshot {
    pub operator_id: OperatorId,
    pub corridor_id: CorridorId,
    pub service_date: NaiveDate,
    pub observed_at: DateTime<Utc>,
    pub source: String,
    #[serde(default = "default_snapshot_source")]
    pub schedule_source: ScheduleSourceKind,
    pub sailings: Vec<SnapshotSailing>,
}

fn default_snapshot_source() -> ScheduleSourceKind {
    ScheduleSourceKind::OperatorSnapshot
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    /// Cancel prior future sailings missing from the snapshot.
    pub infer_removed: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            infer_removed: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Prior sailings canceled because they vanished from the snapshot.
    pub inferred_removed: usize,
    pub failures: Vec<String>,
}

impl IngestReport {
    fn record(&mut self, key: &SailingKey, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Inserted { .. } => self.inserted += 1,
            ReconcileOutcome::Updated { .. } => self.updated += 1,
            ReconcileOutcome::Unchanged => self.unchanged += 1,
            ReconcileOutcome::Failed { reason } => {
                self.failed += 1;
                self.failures.push(format!("{}: {}", key, reason));
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Reconciliation columns missing. Nothing was written.
    #[error("Store schema is not ready for ingestion: {0}")]
    Schema(String),

    #[error("Store error during ingestion: {0}")]
    Store(#[from] RepositoryError),

    #[error("Snapshot is for corridor {snapshot} but was submitted for {expected}")]
    CorridorMismatch { snapshot: String, expected: String },

    #[error("Operator {operator} has no routes on corridor {corridor}")]
    OperatorNotServed { operator: String, corridor: String },

    #[error("Snapshots must be operator-sourced, got {0}")]
    NotOperatorSourced(ScheduleSourceKind),

    #[error("Snapshot row {index} is invalid: {message}")]
    InvalidSailing { index: usize, message: String },
}

/// Reconciliation front-end over a [`SailingEventRepository`].
#[derive(Clone)]
pub struct StatusOverlayStore {
    repo: Arc<dyn SailingEventRepository>,
    schema_cache: Arc<SchemaValidationCache>,
    status_cache: Option<Arc<OperatorStatusCache>>,
}

impl StatusOverlayStore {
    pub fn new(repo: Arc<dyn SailingEventRepository>, schema_cache: Arc<SchemaValidationCache>) -> Self {
        Self {
            repo,
            schema_cache,
            status_cache: None,
        }
    }

    /// Invalidate this cache's (operator, date) entry after every write.
    pub fn with_status_cache(mut self, cache: Arc<OperatorStatusCache>) -> Self {
        self.status_cache = Some(cache);
        self
    }

    pub fn repository(&self) -> &Arc<dyn SailingEventRepository> {
        &self.repo
    }

    /// Check the reconciliation columns once, then trust the cache.
    pub async fn ensure_schema(&self) -> RepositoryResult<()> {
        if self.schema_cache.is_validated() {
            return Ok(());
        }

        let report = self.repo.validate_schema().await?;
        if !report.is_valid() {
            return Err(RepositoryError::schema(format!(
                "table {} is missing columns: {}",
                report.table,
                report.missing_columns.join(", ")
            ))
            .with_operation("validate_schema"));
        }

        self.schema_cache.mark_validated();
        debug!("Reconciliation schema validated for {}", report.table);
        Ok(())
    }

    /// Reconcile one observation. Never panics and never returns an error:
    /// store problems come back as [`ReconcileOutcome::Failed`].
    pub async fn reconcile(&self, observation: &SailingObservation) -> ReconcileOutcome {
        if !observation.schedule_source.is_operator() {
            warn!(
                "Rejecting {} observation for {}: only operator-sourced sailings are keyed",
                observation.schedule_source,
                observation.identity.sailing_key()
            );
            return ReconcileOutcome::Failed {
                reason: IdentityError::TemplateKeying(observation.identity.sailing_key().to_string())
                    .to_string(),
            };
        }

        match self.try_reconcile(observation).await {
            Ok(outcome) => {
                if outcome.is_write() {
                    self.invalidate(&observation.identity);
                }
                outcome
            }
            Err(e) => {
                warn!(
                    "Reconcile failed for {} ({}): {}",
                    observation.identity.sailing_key(),
                    observation.identity.operator_id,
                    e
                );
                ReconcileOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn try_reconcile(&self, observation: &SailingObservation) -> RepositoryResult<ReconcileOutcome> {
        self.ensure_schema().await?;
        let key = observation.identity.sailing_key();

        // A lost race, on insert or on a conditional update, is retried once
        // against the row as the winner left it.
        for attempt in 0..2 {
            match self.repo.find_by_identity(&observation.identity).await? {
                Some(existing) => match self.apply(existing, observation).await {
                    Err(e) if e.is_conflict() && attempt == 0 => {
                        info!("Update race on {}, re-reading stored status", key);
                        continue;
                    }
                    result => return result,
                },
                None => match self.repo.insert_event(&NewSailingEvent::from(observation)).await {
                    Ok(inserted) => {
                        info!(
                            "Recorded {} {} as {}",
                            observation.identity.operator_id, key, inserted.status.status
                        );
                        return Ok(ReconcileOutcome::Inserted { id: inserted.id });
                    }
                    Err(e) if e.is_conflict() && attempt == 0 => {
                        info!("Insert race on {}, reconciling against existing row", key);
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        Err(RepositoryError::conflict(format!(
            "{} still conflicting after retry",
            key
        )))
    }

    async fn apply(
        &self,
        existing: PersistedSailingEvent,
        observation: &SailingObservation,
    ) -> RepositoryResult<ReconcileOutcome> {
        let key = existing.sailing_key();

        match decide(&existing.status, &observation.status) {
            ReconcileDecision::Keep => Ok(ReconcileOutcome::Unchanged),
            ReconcileDecision::EnrichReason(reason) => {
                let update = SailingEventUpdate::ReasonOnly {
                    expected_status: existing.status.status,
                    reason,
                };
                self.repo.update_event(existing.id, &update).await?;
                info!("Enriched reason on {} ({})", key, existing.status.status);
                Ok(ReconcileOutcome::Updated {
                    id: existing.id,
                    change: StatusChange::ReasonEnriched,
                })
            }
            ReconcileDecision::Transition { from, to, reason } => {
                let status = ObservedStatus {
                    reason,
                    ..observation.status.clone()
                };
                let update = SailingEventUpdate::Transition {
                    status,
                    previous_status: from,
                    weather: observation.weather.clone(),
                    vessel: observation.vessel.clone(),
                };
                self.repo.update_event(existing.id, &update).await?;
                info!("Sailing {} transitioned {} -> {}", key, from, to);
                Ok(ReconcileOutcome::Updated {
                    id: existing.id,
                    change: StatusChange::Transition { from, to },
                })
            }
            ReconcileDecision::Blocked { from, to } => {
                warn!(
                    "Blocked transition {} -> {} for {} from {}; keeping {}",
                    from, to, key, observation.status.source, from
                );
                Ok(ReconcileOutcome::Unchanged)
            }
        }
    }

    fn invalidate(&self, identity: &SailingIdentity) {
        if let Some(cache) = &self.status_cache {
            cache.invalidate(&(identity.operator_id.clone(), identity.service_date));
        }
    }

    /// Reconcile an operator's full published list for one corridor/date.
    ///
    /// Unlike [`reconcile`](Self::reconcile), a schema mismatch aborts the
    /// whole ingestion before anything is written.
    pub async fn ingest_operator_snapshot(
        &self,
        snapshot: &OperatorSnapshot,
        corridor: &CorridorConfig,
        options: IngestOptions,
    ) -> Result<IngestReport, IngestError> {
        if snapshot.corridor_id != corridor.id {
            return Err(IngestError::CorridorMismatch {
                snapshot: snapshot.corridor_id.to_string(),
                expected: corridor.id.to_string(),
            });
        }
        if !snapshot.schedule_source.is_operator() {
            return Err(IngestError::NotOperatorSourced(snapshot.schedule_source));
        }
        if !corridor.operator_ids().contains(&snapshot.operator_id) {
            return Err(IngestError::OperatorNotServed {
                operator: snapshot.operator_id.to_string(),
                corridor: corridor.id.to_string(),
            });
        }

        self.ensure_schema()
            .await
            .map_err(|e| IngestError::Schema(e.to_string()))?;

        let observations = snapshot_observations(snapshot, corridor)?;
        let published: HashSet<SailingKey> =
            observations.iter().map(|o| o.identity.sailing_key()).collect();

        let mut report = IngestReport::default();
        for observation in &observations {
            let outcome = self.reconcile(observation).await;
            report.record(&observation.identity.sailing_key(), &outcome);
        }

        if options.infer_removed {
            let prior = self
                .repo
                .list_events_for_operator_date(&snapshot.operator_id, snapshot.service_date)
                .await?;

            for event in prior {
                if !is_vanished_future_sailing(&event, snapshot, corridor, &published) {
                    continue;
                }

                let observation = SailingObservation {
                    identity: event.identity.clone(),
                    status: ObservedStatus::new(
                        SailingStatus::Canceled,
                        snapshot.source.as_str(),
                        snapshot.observed_at,
                    )
                    .with_reason(REMOVED_FROM_SCHEDULE_REASON)
                    .with_origin(StatusOrigin::OperatorRemoved),
                    vessel: None,
                    schedule_source: event.schedule_source,
                    weather: None,
                };
                let outcome = self.reconcile(&observation).await;
                if outcome.is_write() {
                    warn!(
                        "{} vanished from {} schedule, marked canceled",
                        event.sailing_key(),
                        snapshot.operator_id
                    );
                    report.inferred_removed += 1;
                }
                report.record(&event.sailing_key(), &outcome);
            }
        }

        info!(
            "Ingested {} snapshot for {} on {}: {} inserted, {} updated, {} unchanged, {} failed, {} removed",
            snapshot.operator_id,
            corridor.id,
            snapshot.service_date,
            report.inserted,
            report.updated,
            report.unchanged,
            report.failed,
            report.inferred_removed
        );
        Ok(report)
    }
}

fn snapshot_observations(
    snapshot: &OperatorSnapshot,
    corridor: &CorridorConfig,
) -> Result<Vec<SailingObservation>, IngestError> {
    let invalid = |index: usize, message: String| IngestError::InvalidSailing { index, message };

    snapshot
        .sailings
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let identity = SailingIdentity::parse(
                snapshot.operator_id.clone(),
                snapshot.corridor_id.clone(),
                &row.from_port,
                &row.to_port,
                snapshot.service_date,
                &row.departure_time,
            )
            .map_err(|e: IdentityError| invalid(index, e.to_string()))?;

            if !corridor.covers(&identity.from_port, &identity.to_port) {
                return Err(invalid(
                    index,
                    format!(
                        "{} -> {} is not served by corridor {}",
                        identity.from_port, identity.to_port, corridor.id
                    ),
                ));
            }

            let mut status =
                ObservedStatus::new(row.status, snapshot.source.as_str(), snapshot.observed_at);
            if let Some(reason) = &row.reason {
                status = status.with_reason(reason.as_str());
            }

            Ok(SailingObservation {
                identity,
                status,
                vessel: row.vessel.clone(),
                schedule_source: snapshot.schedule_source,
                weather: row.weather.clone(),
            })
        })
        .collect()
}

fn is_vanished_future_sailing(
    event: &PersistedSailingEvent,
    snapshot: &OperatorSnapshot,
    corridor: &CorridorConfig,
    published: &HashSet<SailingKey>,
) -> bool {
    if event.is_canceled()
        || event.identity.corridor_id != snapshot.corridor_id
        || !corridor.covers(&event.identity.from_port, &event.identity.to_port)
        || published.contains(&event.sailing_key())
    {
        return false;
    }

    let departure = DepartureInstant::resolve(
        event.identity.service_date,
        event.identity.departure_time,
        corridor.timezone,
    );
    departure.utc > snapshot.observed_at
}

#[cfg(test)]
#[path = "overlay_tests.rs"]
mod overlay_tests;
