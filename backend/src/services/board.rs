//! Corridor board composition.
//!
//! ```text
//! corridor ──► service date (corridor tz)
//!          ──► persisted rows per operator (concurrent, cached)
//!          ──► authority ──┬─ operator-only: persisted rows
//!                          └─ template-only: route fetches (concurrent, timed out)
//!          ──► forecasts ──► synthetic cancellations ──► sort ──► guards
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::authority::{load_operator_events, resolve_authority, scope_to_corridor, summarize_operator_schedule};
use super::cache::BoardCaches;
use super::guards::{canonical_schedule_source, validate_board, GuardViolation};
use super::overlay::merge_two;
use super::synthetic::{build_synthetic_sailings, sailing_from_event, ResolvedKey};
use crate::config::BoardSettings;
use crate::db::{RepositoryError, SailingEventRepository};
use crate::models::{
    service_date, Advisory, CorridorBoard, CorridorConfig, CorridorId, CorridorRegistry,
    DepartureTime, ObservedStatus, OperatorId, PersistedSailingEvent, PortSlug, Provenance,
    RiskAnnotation, Route, RouteId, ScheduleSailing, ScheduleSourceKind, ServiceState,
    StatusOrigin, StatusProvenance, TodayAuthority,
};
use crate::sources::{ForecastSource, RawSailing, RouteSchedule, ScheduleSource, SourceError};

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("Corridor not found: {0}")]
    CorridorNotFound(String),

    /// Persisted rows could not be read, so cancellations cannot be certified.
    #[error("Store unavailable while composing board: {0}")]
    Store(#[from] RepositoryError),

    #[error("Board invariant violated: {0}")]
    InvariantViolation(#[from] GuardViolation),
}

/// One row a fetched schedule contributed, before the authority split.
struct Candidate {
    sailing: ScheduleSailing,
    live: Option<ObservedStatus>,
}

/// Base sailings for the board plus what was learned building them.
#[derive(Default)]
struct Resolved {
    sailings: Vec<ScheduleSailing>,
    advisories: Vec<Advisory>,
    unavailable_routes: Vec<RouteId>,
    operators_using_templates: Vec<OperatorId>,
    attempted_fetches: usize,
}

pub struct CorridorBoardComposer {
    registry: Arc<CorridorRegistry>,
    repo: Arc<dyn SailingEventRepository>,
    schedules: Arc<dyn ScheduleSource>,
    forecast: Arc<dyn ForecastSource>,
    caches: BoardCaches,
    settings: BoardSettings,
}

impl CorridorBoardComposer {
    pub fn new(
        registry: Arc<CorridorRegistry>,
        repo: Arc<dyn SailingEventRepository>,
        schedules: Arc<dyn ScheduleSource>,
        forecast: Arc<dyn ForecastSource>,
        settings: BoardSettings,
    ) -> Self {
        let caches = BoardCaches::new(settings.schedule_cache_ttl(), settings.status_cache_ttl());
        Self {
            registry,
            repo,
            schedules,
            forecast,
            caches,
            settings,
        }
    }

    pub fn with_caches(mut self, caches: BoardCaches) -> Self {
        self.caches = caches;
        self
    }

    pub fn caches(&self) -> &BoardCaches {
        &self.caches
    }

    pub fn registry(&self) -> &CorridorRegistry {
        &self.registry
    }

    /// Compose today's board for `corridor_id` as of `now`.
    pub async fn compose(
        &self,
        corridor_id: &CorridorId,
        now: DateTime<Utc>,
    ) -> Result<CorridorBoard, BoardError> {
        let corridor = self
            .registry
            .get(corridor_id)
            .ok_or_else(|| BoardError::CorridorNotFound(corridor_id.to_string()))?;
        let date = service_date(now, corridor.timezone);

        let operators = corridor.operator_ids();
        let loaded = load_operator_events(
            self.repo.as_ref(),
            &self.caches.operator_status,
            &operators,
            date,
        )
        .await?;

        let summaries: Vec<_> = loaded
            .iter()
            .map(|(operator_id, events)| summarize_operator_schedule(operator_id, corridor, events))
            .collect();
        let operators_with_db_rows: Vec<OperatorId> = summaries
            .iter()
            .filter(|s| s.has_schedule)
            .map(|s| s.operator_id.clone())
            .collect();
        let events: Vec<PersistedSailingEvent> =
            loaded.into_iter().flat_map(|(_, events)| events).collect();
        let overlay = build_overlay(&events, corridor);

        let (authority, mut resolved) = match resolve_authority(&summaries) {
            TodayAuthority::OperatorOnly => {
                debug!(
                    "{} is operator-only on {} ({:?})",
                    corridor.id, date, operators_with_db_rows
                );
                let resolved = Resolved {
                    sailings: persisted_sailings(&events, corridor, &overlay),
                    ..Resolved::default()
                };
                (TodayAuthority::OperatorOnly, resolved)
            }
            TodayAuthority::TemplateOnly => self.resolve_from_sources(corridor, date, now).await,
        };
        let overlay_applied = authority == TodayAuthority::OperatorOnly;

        self.annotate_forecasts(corridor, &mut resolved.sailings).await;

        let mut resolved_keys: HashSet<ResolvedKey> = resolved
            .sailings
            .iter()
            .filter(|s| !s.schedule_source.is_template())
            .filter_map(|s| s.sailing_key().ok().map(|k| (s.operator_id.clone(), k)))
            .collect();
        let synthetic = build_synthetic_sailings(
            events.iter().filter(|e| e.is_canceled()),
            &mut resolved_keys,
            corridor,
        );
        let synthetic_count = synthetic.len();

        let mut sailings = resolved.sailings;
        sailings.extend(synthetic);
        sailings.sort_by_key(|s| s.departure_epoch_ms);

        let advisories = dedupe_advisories(resolved.advisories);

        let service_state = if !sailings.is_empty() {
            ServiceState::Active
        } else if resolved.attempted_fetches > 0
            && resolved.unavailable_routes.len() == resolved.attempted_fetches
        {
            ServiceState::ScheduleUnavailable
        } else {
            ServiceState::SeasonalInactive
        };

        let provenance = Provenance {
            schedule_source: canonical_schedule_source(authority, &sailings),
            today_authority: authority,
            operators_with_db_rows,
            operators_using_templates: resolved.operators_using_templates,
            unavailable_routes: resolved.unavailable_routes,
            synthetic_sailings: synthetic_count,
            overlay_applied,
            generated_at: now,
        };

        let board = CorridorBoard {
            corridor: self.registry.summary(corridor),
            terminals: self.registry.terminals(corridor),
            service_date: date,
            sailings,
            advisories,
            provenance,
            service_state,
            operator_links: self.registry.operator_links(corridor),
        };

        if let Err(violation) =
            validate_board(&board, corridor, &events, self.settings.strict_authority)
        {
            error!("Refusing to render {} for {}: {}", corridor.id, date, violation);
            return Err(BoardError::InvariantViolation(violation));
        }

        info!(
            "Composed {} for {}: {} sailings ({} canceled, {} synthetic), {:?}/{:?}",
            corridor.id,
            date,
            board.sailings.len(),
            board.canceled_count(),
            synthetic_count,
            board.provenance.today_authority,
            board.service_state
        );
        Ok(board)
    }

    /// No operator has persisted rows: build from the schedule collaborator.
    async fn resolve_from_sources(
        &self,
        corridor: &CorridorConfig,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> (TodayAuthority, Resolved) {
        let fetches = join_all(corridor.routes.iter().map(|route| async move {
            (route, self.fetch_route(route, date).await)
        }))
        .await;

        let mut resolved = Resolved {
            attempted_fetches: fetches.len(),
            ..Resolved::default()
        };
        let mut candidates = Vec::new();

        for (route, result) in fetches {
            match result {
                Ok(schedule) => {
                    resolved.advisories.extend(schedule.advisories.iter().cloned());
                    candidates.extend(
                        schedule
                            .sailings
                            .iter()
                            .filter_map(|raw| candidate(raw, &schedule, route, corridor, date, now)),
                    );
                }
                Err(e) => {
                    warn!("Route {} degraded to unavailable: {}", route.id, e);
                    resolved.unavailable_routes.push(route.id.clone());
                }
            }
        }

        let has_operator_rows = candidates
            .iter()
            .any(|c| c.sailing.schedule_source.is_operator());

        if has_operator_rows {
            let dropped = candidates
                .iter()
                .filter(|c| c.sailing.schedule_source.is_template())
                .count();
            if dropped > 0 {
                info!(
                    "{}: operator-sourced rows present, excluding {} template sailings",
                    corridor.id, dropped
                );
            }
            resolved.sailings = live_sailings(
                candidates
                    .into_iter()
                    .filter(|c| c.sailing.schedule_source.is_operator()),
                now,
            );
            (TodayAuthority::OperatorOnly, resolved)
        } else {
            let mut operators: Vec<OperatorId> = Vec::new();
            for candidate in &candidates {
                if !operators.contains(&candidate.sailing.operator_id) {
                    operators.push(candidate.sailing.operator_id.clone());
                }
            }
            resolved.operators_using_templates = operators;
            resolved.sailings = candidates.into_iter().map(|c| c.sailing).collect();
            (TodayAuthority::TemplateOnly, resolved)
        }
    }

    async fn fetch_route(&self, route: &Route, date: NaiveDate) -> Result<RouteSchedule, SourceError> {
        let key = (route.id.clone(), date);
        if let Some(schedule) = self.caches.schedules.get(&key) {
            debug!("Schedule cache hit for {} on {}", route.id, date);
            return Ok(schedule);
        }

        let limit = self.settings.fetch_timeout();
        match tokio::time::timeout(limit, self.schedules.fetch_schedule(&route.id, date)).await {
            Ok(Ok(schedule)) => {
                self.caches.schedules.insert(key, schedule.clone());
                Ok(schedule)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SourceError::Timeout {
                route: route.id.to_string(),
                after_ms: limit.as_millis() as u64,
            }),
        }
    }

    /// Attach forecast risk. Failures and timeouts leave it empty.
    async fn annotate_forecasts(&self, corridor: &CorridorConfig, sailings: &mut [ScheduleSailing]) {
        let limit = self.settings.forecast_timeout();
        let lookups = sailings.iter().map(|sailing| {
            let route = sailing
                .route_id
                .as_ref()
                .and_then(|id| corridor.routes.iter().find(|r| &r.id == id));
            async move {
                match tokio::time::timeout(limit, self.forecast.forecast_risk(sailing, route)).await {
                    Ok(Ok(risk)) => risk,
                    Ok(Err(e)) => {
                        debug!("Forecast unavailable for {}: {}", sailing.departure_display, e);
                        None
                    }
                    Err(_) => {
                        debug!("Forecast timed out for {}", sailing.departure_display);
                        None
                    }
                }
            }
        });
        let risks: Vec<Option<RiskAnnotation>> = join_all(lookups).await;

        for (sailing, risk) in sailings.iter_mut().zip(risks) {
            sailing.forecast_risk = risk;
        }
    }
}

/// Sticky-merged status per (operator, key) for rows on this corridor.
fn build_overlay(
    events: &[PersistedSailingEvent],
    corridor: &CorridorConfig,
) -> BTreeMap<ResolvedKey, ObservedStatus> {
    let mut overlay: BTreeMap<ResolvedKey, ObservedStatus> = BTreeMap::new();
    for event in scope_to_corridor(events, corridor) {
        let key = (event.identity.operator_id.clone(), event.sailing_key());
        let merged = match overlay.remove(&key) {
            Some(current) => merge_two(current, event.status.clone()),
            None => event.status.clone(),
        };
        overlay.insert(key, merged);
    }
    overlay
}

/// Operator-only board from persisted rows.
///
/// Rows inferred as removed are not part of the operator's published list;
/// they reach the board through the synthetic generator.
fn persisted_sailings(
    events: &[PersistedSailingEvent],
    corridor: &CorridorConfig,
    overlay: &BTreeMap<ResolvedKey, ObservedStatus>,
) -> Vec<ScheduleSailing> {
    let mut seen: HashSet<ResolvedKey> = HashSet::new();
    let mut sailings = Vec::new();

    for event in scope_to_corridor(events, corridor) {
        if event.status.origin == StatusOrigin::OperatorRemoved {
            continue;
        }
        let key = (event.identity.operator_id.clone(), event.sailing_key());
        if !seen.insert(key.clone()) {
            continue;
        }

        let mut sailing =
            sailing_from_event(event, corridor, event.schedule_source, StatusProvenance::Persisted);
        if let Some(merged) = overlay.get(&key) {
            sailing.apply_status(merged, StatusProvenance::Persisted);
        }
        sailings.push(sailing);
    }
    sailings
}

/// Operator-sourced fetched rows, one per (operator, key).
///
/// Only reached when no operator has persisted rows on the corridor, so the
/// live status is the only status there is to apply.
fn live_sailings(
    candidates: impl Iterator<Item = Candidate>,
    now: DateTime<Utc>,
) -> Vec<ScheduleSailing> {
    let mut index: HashMap<ResolvedKey, usize> = HashMap::new();
    let mut sailings: Vec<ScheduleSailing> = Vec::new();

    for Candidate { mut sailing, live } in candidates {
        let key = match sailing.sailing_key() {
            Ok(key) => (sailing.operator_id.clone(), key),
            Err(_) => continue,
        };

        if let Some(live) = live {
            sailing.apply_status(&live, StatusProvenance::Live);
        }

        match index.get(&key) {
            Some(&at) => {
                let existing = &mut sailings[at];
                let merged = merge_two(existing.observed_status(now), sailing.observed_status(now));
                let provenance = existing.status_provenance;
                existing.apply_status(&merged, provenance);
            }
            None => {
                index.insert(key, sailings.len());
                sailings.push(sailing);
            }
        }
    }
    sailings
}

fn candidate(
    raw: &RawSailing,
    schedule: &RouteSchedule,
    route: &Route,
    corridor: &CorridorConfig,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Option<Candidate> {
    let source = schedule.source_of(raw);
    if source == ScheduleSourceKind::Mixed {
        warn!("Skipping {} row on {} with mixed source", raw.departure_time, route.id);
        return None;
    }

    let parsed = PortSlug::normalize(&raw.from_port).and_then(|from| {
        let to = PortSlug::normalize(&raw.to_port)?;
        let time = DepartureTime::parse(&raw.departure_time)?;
        Ok((from, to, time))
    });
    let (from, to, time) = match parsed {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Skipping malformed row on {}: {}", route.id, e);
            return None;
        }
    };
    if !corridor.covers(&from, &to) {
        warn!("Skipping {} -> {} row on {}: not on {}", from, to, route.id, corridor.id);
        return None;
    }

    let route_id = corridor
        .route_for(&raw.operator_id, &from, &to)
        .map(|r| r.id.clone())
        .unwrap_or_else(|| route.id.clone());
    let arrival = raw
        .arrival_time
        .as_deref()
        .and_then(|t| DepartureTime::parse(t).ok());

    let sailing = ScheduleSailing::new(
        raw.operator_id.clone(),
        from,
        to,
        time,
        date,
        corridor.timezone,
        source,
    )
    .with_route(Some(route_id))
    .with_vessel(raw.vessel.clone())
    .with_arrival(arrival);

    // Templates never carry status onto the board.
    let live = match raw.status {
        Some(status) if source.is_operator() => {
            let (label, at) = match &schedule.status_source {
                Some(meta) => (meta.source.clone(), meta.fetched_at),
                None => (raw.operator_id.to_string(), now),
            };
            let mut observed = ObservedStatus::new(status, label, at);
            if let Some(reason) = &raw.status_reason {
                observed = observed.with_reason(reason.as_str());
            }
            Some(observed)
        }
        _ => None,
    };

    Some(Candidate { sailing, live })
}

fn dedupe_advisories(advisories: Vec<Advisory>) -> Vec<Advisory> {
    let mut seen = HashSet::new();
    advisories
        .into_iter()
        .filter(|a| seen.insert(a.text.clone()))
        .collect()
}

#[cfg(test)]
#[path = "board_tests.rs"]
mod board_tests;
