//! Schedule source collaborator.
//!
//! A source returns what an upstream published for one route on one
//! service date. It may report the route as unavailable; it never makes up
//! departure times.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConfigError, TemplateSettings};
use crate::models::{
    Advisory, CorridorRegistry, DepartureTime, OperatorId, RouteId, SailingStatus,
    ScheduleSourceKind,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("Schedule unavailable for route {route}: {reason}")]
    Unavailable { route: String, reason: String },

    #[error("Schedule fetch for route {route} timed out after {after_ms}ms")]
    Timeout { route: String, after_ms: u64 },

    #[error("Malformed upstream data: {0}")]
    InvalidData(String),
}

impl SourceError {
    pub fn unavailable(route: &RouteId, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            route: route.to_string(),
            reason: reason.into(),
        }
    }
}

/// One upstream row, still in upstream spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSailing {
    pub operator_id: OperatorId,
    pub from_port: String,
    pub to_port: String,
    pub departure_time: String,
    #[serde(default)]
    pub arrival_time: Option<String>,
    #[serde(default)]
    pub vessel: Option<String>,
    /// Live status, when the upstream publishes one alongside the schedule.
    #[serde(default)]
    pub status: Option<SailingStatus>,
    #[serde(default)]
    pub status_reason: Option<String>,
    /// Per-row source. Falls back to the schedule's declared source.
    #[serde(default)]
    pub schedule_source: Option<ScheduleSourceKind>,
}

impl RawSailing {
    pub fn new(
        operator_id: impl Into<OperatorId>,
        from_port: impl Into<String>,
        to_port: impl Into<String>,
        departure_time: impl Into<String>,
    ) -> Self {
        Self {
            operator_id: operator_id.into(),
            from_port: from_port.into(),
            to_port: to_port.into(),
            departure_time: departure_time.into(),
            arrival_time: None,
            vessel: None,
            status: None,
            status_reason: None,
            schedule_source: None,
        }
    }

    pub fn with_source(mut self, source: ScheduleSourceKind) -> Self {
        self.schedule_source = Some(source);
        self
    }

    pub fn with_status(mut self, status: SailingStatus, reason: Option<&str>) -> Self {
        self.status = Some(status);
        self.status_reason = reason.map(str::to_string);
        self
    }

    pub fn with_vessel(mut self, vessel: impl Into<String>) -> Self {
        self.vessel = Some(vessel.into());
        self
    }
}

/// Where live status for a schedule came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSourceMeta {
    pub source: String,
    pub url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSchedule {
    pub route_id: RouteId,
    pub sailings: Vec<RawSailing>,
    pub schedule_source: ScheduleSourceKind,
    pub status_source: Option<StatusSourceMeta>,
    #[serde(default)]
    pub advisories: Vec<Advisory>,
}

impl RouteSchedule {
    pub fn new(route_id: RouteId, schedule_source: ScheduleSourceKind) -> Self {
        Self {
            route_id,
            sailings: Vec::new(),
            schedule_source,
            status_source: None,
            advisories: Vec::new(),
        }
    }

    pub fn with_sailings(mut self, sailings: Vec<RawSailing>) -> Self {
        self.sailings = sailings;
        self
    }

    pub fn with_advisory(mut self, text: impl Into<String>) -> Self {
        self.advisories.push(Advisory {
            text: text.into(),
            route_id: Some(self.route_id.clone()),
            issued_at: None,
        });
        self
    }

    /// Source declared for one row.
    pub fn source_of(&self, sailing: &RawSailing) -> ScheduleSourceKind {
        sailing.schedule_source.unwrap_or(self.schedule_source)
    }
}

#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn fetch_schedule(
        &self,
        route_id: &RouteId,
        service_date: NaiveDate,
    ) -> Result<RouteSchedule, SourceError>;
}

/// In-memory schedule source.
///
/// Serves the same schedule for every service date. Routes can be marked
/// unavailable and fetches can be slowed down, which is how timeouts and
/// degraded boards are tested.
#[derive(Clone, Default)]
pub struct StaticScheduleSource {
    inner: Arc<RwLock<StaticInner>>,
}

#[derive(Default)]
struct StaticInner {
    schedules: HashMap<RouteId, RouteSchedule>,
    unavailable: HashSet<RouteId>,
    delay: Option<Duration>,
    fetches: HashMap<RouteId, usize>,
    in_flight: usize,
    peak_in_flight: usize,
}

impl StaticScheduleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Template schedules from `[[templates]]` config entries.
    pub fn from_templates(
        templates: &[TemplateSettings],
        registry: &CorridorRegistry,
    ) -> Result<Self, ConfigError> {
        let source = Self::new();
        for template in templates {
            let route_id = RouteId::new(&template.route);
            let route = registry
                .corridors()
                .iter()
                .flat_map(|c| c.routes.iter())
                .find(|r| r.id == route_id)
                .ok_or_else(|| ConfigError::UnknownRoute(template.route.clone()))?;

            let mut sailings = Vec::with_capacity(template.departures.len());
            for departure in &template.departures {
                // Reject bad times at load instead of at render.
                DepartureTime::parse(departure)?;
                let mut raw = RawSailing::new(
                    route.operator_id.clone(),
                    route.origin.as_str(),
                    route.destination.as_str(),
                    departure.as_str(),
                );
                raw.vessel = template.vessel.clone();
                sailings.push(raw);
            }

            let mut schedule =
                RouteSchedule::new(route_id.clone(), ScheduleSourceKind::Template)
                    .with_sailings(sailings);
            for advisory in &template.advisories {
                schedule = schedule.with_advisory(advisory.as_str());
            }
            source.set_schedule(schedule);
        }
        Ok(source)
    }

    pub fn set_schedule(&self, schedule: RouteSchedule) {
        let mut inner = self.inner.write();
        inner.unavailable.remove(&schedule.route_id);
        inner.schedules.insert(schedule.route_id.clone(), schedule);
    }

    pub fn set_unavailable(&self, route_id: &RouteId) {
        self.inner.write().unavailable.insert(route_id.clone());
    }

    /// Sleep this long before answering every fetch.
    pub fn set_delay(&self, delay: Duration) {
        self.inner.write().delay = Some(delay);
    }

    pub fn fetch_count(&self, route_id: &RouteId) -> usize {
        self.inner.read().fetches.get(route_id).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.inner.read().fetches.values().sum()
    }

    /// Most fetches that were ever outstanding at once.
    pub fn peak_in_flight(&self) -> usize {
        self.inner.read().peak_in_flight
    }
}

/// Counts a fetch as finished when dropped, including on timeout.
struct InFlight<'a>(&'a RwLock<StaticInner>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = self.0.write();
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }
}

#[async_trait]
impl ScheduleSource for StaticScheduleSource {
    async fn fetch_schedule(
        &self,
        route_id: &RouteId,
        _service_date: NaiveDate,
    ) -> Result<RouteSchedule, SourceError> {
        let delay = {
            let mut inner = self.inner.write();
            *inner.fetches.entry(route_id.clone()).or_insert(0) += 1;
            inner.in_flight += 1;
            inner.peak_in_flight = inner.peak_in_flight.max(inner.in_flight);
            inner.delay
        };
        let _in_flight = InFlight(&self.inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inner = self.inner.read();
        if inner.unavailable.contains(route_id) {
            return Err(SourceError::unavailable(route_id, "marked unavailable"));
        }
        inner
            .schedules
            .get(route_id)
            .cloned()
            .ok_or_else(|| SourceError::unavailable(route_id, "no schedule published"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 4).unwrap()
    }

    #[tokio::test]
    async fn test_templates_load_for_known_routes() {
        let registry = CorridorRegistry::builtin();
        let templates = vec![TemplateSettings {
            route: "wh-vh-ssa".to_string(),
            departures: vec!["7:00 AM".to_string(), "09:30".to_string()],
            vessel: None,
            advisories: vec!["Reservations recommended".to_string()],
        }];
        let source = StaticScheduleSource::from_templates(&templates, &registry).unwrap();

        let route = RouteId::new("wh-vh-ssa");
        let schedule = source.fetch_schedule(&route, date()).await.unwrap();
        assert_eq!(schedule.schedule_source, ScheduleSourceKind::Template);
        assert_eq!(schedule.sailings.len(), 2);
        assert_eq!(schedule.sailings[0].from_port, "woods-hole");
        assert_eq!(schedule.advisories.len(), 1);
        assert_eq!(source.fetch_count(&route), 1);
    }

    #[test]
    fn test_templates_reject_unknown_route_and_bad_time() {
        let registry = CorridorRegistry::builtin();
        let mut template = TemplateSettings {
            route: "wh-nowhere".to_string(),
            departures: vec!["7:00 AM".to_string()],
            vessel: None,
            advisories: vec![],
        };
        assert!(matches!(
            StaticScheduleSource::from_templates(&[template.clone()], &registry),
            Err(ConfigError::UnknownRoute(_))
        ));

        template.route = "wh-vh-ssa".to_string();
        template.departures = vec!["sometime".to_string()];
        assert!(matches!(
            StaticScheduleSource::from_templates(&[template], &registry),
            Err(ConfigError::Identity(_))
        ));
    }

    #[tokio::test]
    async fn test_unpublished_route_is_unavailable() {
        let source = StaticScheduleSource::new();
        let err = source
            .fetch_schedule(&RouteId::new("vh-wh-ssa"), date())
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable { .. }));
    }

    #[test]
    fn test_row_source_overrides_schedule_source() {
        let schedule = RouteSchedule::new(RouteId::new("r"), ScheduleSourceKind::OperatorStatus);
        let plain = RawSailing::new("ssa", "wh", "vh", "6:00 AM");
        let tagged = plain.clone().with_source(ScheduleSourceKind::Template);
        assert_eq!(schedule.source_of(&plain), ScheduleSourceKind::OperatorStatus);
        assert_eq!(schedule.source_of(&tagged), ScheduleSourceKind::Template);
    }
}
