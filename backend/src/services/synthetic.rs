//! Synthetic sailings for orphaned cancellations.
//!
//! A persisted cancellation must show up on its corridor's board even when
//! the resolved schedule no longer lists the sailing, for example because the
//! operator stopped publishing it instead of marking it canceled.

use log::info;
use std::collections::HashSet;

use crate::models::{
    CorridorConfig, OperatorId, PersistedSailingEvent, SailingKey, ScheduleSailing,
    ScheduleSourceKind, StatusProvenance,
};

/// Identity of a sailing already on the board. Two operators can run the
/// same ports at the same time, so the operator is part of it.
pub type ResolvedKey = (OperatorId, SailingKey);

/// Board sailing for a persisted row.
pub fn sailing_from_event(
    event: &PersistedSailingEvent,
    corridor: &CorridorConfig,
    schedule_source: ScheduleSourceKind,
    provenance: StatusProvenance,
) -> ScheduleSailing {
    let identity = &event.identity;
    let route = corridor
        .route_for(&identity.operator_id, &identity.from_port, &identity.to_port)
        .map(|r| r.id.clone());

    let mut sailing = ScheduleSailing::new(
        identity.operator_id.clone(),
        identity.from_port.clone(),
        identity.to_port.clone(),
        identity.departure_time,
        identity.service_date,
        corridor.timezone,
        schedule_source,
    )
    .with_route(route)
    .with_vessel(event.vessel.clone());
    sailing.apply_status(&event.status, provenance);
    sailing
}

/// Build a canceled sailing for every canceled event the board is missing.
///
/// Events for other corridors' ports and events already present in
/// `resolved` are skipped. Each emitted sailing is added to `resolved`.
pub fn build_synthetic_sailings<'a, I>(
    canceled_events: I,
    resolved: &mut HashSet<ResolvedKey>,
    corridor: &CorridorConfig,
) -> Vec<ScheduleSailing>
where
    I: IntoIterator<Item = &'a PersistedSailingEvent>,
{
    let mut synthetic = Vec::new();

    for event in canceled_events {
        if !event.is_canceled() {
            continue;
        }
        if !corridor.covers(&event.identity.from_port, &event.identity.to_port) {
            continue;
        }
        let key = (event.identity.operator_id.clone(), event.sailing_key());
        if !resolved.insert(key) {
            continue;
        }

        let mut sailing = sailing_from_event(
            event,
            corridor,
            ScheduleSourceKind::OperatorSnapshot,
            StatusProvenance::Synthetic,
        );
        sailing.synthetic = true;
        sailing.forecast_risk = None;

        info!(
            "Surfacing orphaned cancellation {} ({}) on {}",
            event.sailing_key(),
            event.identity.operator_id,
            corridor.id
        );
        synthetic.push(sailing);
    }

    synthetic
}
