//! Schedule authority resolution.
//!
//! A corridor's today-view comes from exactly one data family. If any
//! operator serving the corridor has persisted rows for the service date the
//! board is built from those rows alone; otherwise templates are used with
//! no status overlay.

use chrono::NaiveDate;
use futures::future::join_all;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::cache::OperatorStatusCache;
use crate::db::{RepositoryResult, SailingEventRepository};
use crate::models::{CorridorConfig, DepartureTime, OperatorId, PersistedSailingEvent, TodayAuthority};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorScheduleSummary {
    pub operator_id: OperatorId,
    pub has_schedule: bool,
    pub sailing_count: usize,
    pub distinct_times: usize,
}

/// Events whose two ports are both terminals of `corridor`.
pub fn scope_to_corridor<'a>(
    events: &'a [PersistedSailingEvent],
    corridor: &'a CorridorConfig,
) -> impl Iterator<Item = &'a PersistedSailingEvent> + 'a {
    events
        .iter()
        .filter(move |e| corridor.covers(&e.identity.from_port, &e.identity.to_port))
}

/// Summarize one operator's already-loaded rows for a corridor.
pub fn summarize_operator_schedule(
    operator_id: &OperatorId,
    corridor: &CorridorConfig,
    events: &[PersistedSailingEvent],
) -> OperatorScheduleSummary {
    let scoped: Vec<&PersistedSailingEvent> = scope_to_corridor(events, corridor)
        .filter(|e| &e.identity.operator_id == operator_id)
        .collect();
    let distinct_times: BTreeSet<DepartureTime> =
        scoped.iter().map(|e| e.identity.departure_time).collect();

    OperatorScheduleSummary {
        operator_id: operator_id.clone(),
        has_schedule: !scoped.is_empty(),
        sailing_count: scoped.len(),
        distinct_times: distinct_times.len(),
    }
}

/// Whether `operator_id` has persisted rows on `corridor` for `service_date`.
pub async fn has_operator_schedule(
    repo: &dyn SailingEventRepository,
    operator_id: &OperatorId,
    corridor: &CorridorConfig,
    service_date: NaiveDate,
) -> RepositoryResult<OperatorScheduleSummary> {
    let events = repo
        .list_events_for_operator_date(operator_id, service_date)
        .await?;
    Ok(summarize_operator_schedule(operator_id, corridor, &events))
}

/// Any operator with a schedule makes the whole corridor operator-only.
pub fn resolve_authority(summaries: &[OperatorScheduleSummary]) -> TodayAuthority {
    if summaries.iter().any(|s| s.has_schedule) {
        TodayAuthority::OperatorOnly
    } else {
        TodayAuthority::TemplateOnly
    }
}

/// Load every operator's rows for `service_date` concurrently.
///
/// Results come back in `operators` order. Any store failure fails the
/// whole load: authority and cancellation completeness cannot be decided
/// from a partial view.
pub async fn load_operator_events(
    repo: &dyn SailingEventRepository,
    cache: &OperatorStatusCache,
    operators: &[OperatorId],
    service_date: NaiveDate,
) -> RepositoryResult<Vec<(OperatorId, Vec<PersistedSailingEvent>)>> {
    let loads = operators
        .iter()
        .map(|operator_id| load_one(repo, cache, operator_id, service_date));

    join_all(loads).await.into_iter().collect()
}

async fn load_one(
    repo: &dyn SailingEventRepository,
    cache: &OperatorStatusCache,
    operator_id: &OperatorId,
    service_date: NaiveDate,
) -> RepositoryResult<(OperatorId, Vec<PersistedSailingEvent>)> {
    let key = (operator_id.clone(), service_date);
    if let Some(events) = cache.get(&key) {
        debug!("Operator status cache hit for {} on {}", operator_id, service_date);
        return Ok((operator_id.clone(), events));
    }

    let events = repo
        .list_events_for_operator_date(operator_id, service_date)
        .await?;
    cache.insert(key, events.clone());
    Ok((operator_id.clone(), events))
}
