//! Sailing status vocabulary and the board-facing records built from it.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::identity::{
    DepartureTime, IdentityError, OperatorId, PortSlug, RouteId, SailingEventId, SailingIdentity,
    SailingKey,
};
use super::time::DepartureInstant;

/// Operational status of a single sailing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SailingStatus {
    OnTime,
    Delayed,
    Canceled,
}

impl SailingStatus {
    /// Allowed transitions: `on_time -> {delayed, canceled}`,
    /// `delayed -> {canceled}`. `canceled` is absorbing.
    pub fn can_transition_to(self, next: SailingStatus) -> bool {
        matches!(
            (self, next),
            (SailingStatus::OnTime, SailingStatus::Delayed)
                | (SailingStatus::OnTime, SailingStatus::Canceled)
                | (SailingStatus::Delayed, SailingStatus::Canceled)
        )
    }

    pub fn is_canceled(self) -> bool {
        self == SailingStatus::Canceled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SailingStatus::OnTime => "on_time",
            SailingStatus::Delayed => "delayed",
            SailingStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for SailingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SailingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(' ', "_").replace('-', "_").as_str() {
            "on_time" | "ontime" | "scheduled" => Ok(SailingStatus::OnTime),
            "delayed" => Ok(SailingStatus::Delayed),
            "canceled" | "cancelled" => Ok(SailingStatus::Canceled),
            other => Err(format!("Unknown sailing status: {}", other)),
        }
    }
}

/// How a status observation came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatusOrigin {
    #[default]
    Normal,
    /// The sailing vanished from the operator's published list.
    OperatorRemoved,
}

impl StatusOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusOrigin::Normal => "normal",
            StatusOrigin::OperatorRemoved => "operator_removed",
        }
    }
}

impl FromStr for StatusOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" => Ok(StatusOrigin::Normal),
            "operator_removed" => Ok(StatusOrigin::OperatorRemoved),
            other => Err(format!("Unknown status origin: {}", other)),
        }
    }
}

/// Where a schedule row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSourceKind {
    OperatorSnapshot,
    OperatorStatus,
    Template,
    /// Diagnostic only. Never valid under operator-only authority.
    Mixed,
}

impl ScheduleSourceKind {
    pub fn is_template(self) -> bool {
        self == ScheduleSourceKind::Template
    }

    pub fn is_operator(self) -> bool {
        matches!(
            self,
            ScheduleSourceKind::OperatorSnapshot | ScheduleSourceKind::OperatorStatus
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScheduleSourceKind::OperatorSnapshot => "operator_snapshot",
            ScheduleSourceKind::OperatorStatus => "operator_status",
            ScheduleSourceKind::Template => "template",
            ScheduleSourceKind::Mixed => "mixed",
        }
    }
}

impl fmt::Display for ScheduleSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleSourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "operator_snapshot" => Ok(ScheduleSourceKind::OperatorSnapshot),
            "operator_status" => Ok(ScheduleSourceKind::OperatorStatus),
            "template" => Ok(ScheduleSourceKind::Template),
            "mixed" => Ok(ScheduleSourceKind::Mixed),
            other => Err(format!("Unknown schedule source: {}", other)),
        }
    }
}

/// Which data family a corridor's today-view is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodayAuthority {
    OperatorOnly,
    TemplateOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Active,
    SeasonalInactive,
    /// No sailings and every schedule fetch failed.
    ScheduleUnavailable,
}

/// Where the status shown on a board sailing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusProvenance {
    Persisted,
    Live,
    Synthetic,
    Template,
}

/// One status observation for a sailing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedStatus {
    pub status: SailingStatus,
    pub reason: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub origin: StatusOrigin,
}

impl ObservedStatus {
    pub fn new(status: SailingStatus, source: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            status,
            reason: None,
            observed_at,
            source: source.into(),
            origin: StatusOrigin::Normal,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let trimmed = reason.trim();
        self.reason = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn with_origin(mut self, origin: StatusOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// True when a non-blank reason is present.
    pub fn has_reason(&self) -> bool {
        self.reason
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Terminal conditions recorded alongside a persisted status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub wind_speed_mph: Option<f64>,
    pub wind_gust_mph: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub conditions: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Durable record of one sailing identity and its current status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSailingEvent {
    pub id: SailingEventId,
    pub identity: SailingIdentity,
    pub vessel: Option<String>,
    pub status: ObservedStatus,
    pub previous_status: Option<SailingStatus>,
    pub schedule_source: ScheduleSourceKind,
    pub weather: Option<WeatherSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersistedSailingEvent {
    pub fn sailing_key(&self) -> SailingKey {
        self.identity.sailing_key()
    }

    pub fn is_canceled(&self) -> bool {
        self.status.status.is_canceled()
    }
}

/// Incoming status report to reconcile against the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SailingObservation {
    pub identity: SailingIdentity,
    pub status: ObservedStatus,
    pub vessel: Option<String>,
    pub schedule_source: ScheduleSourceKind,
    pub weather: Option<WeatherSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    Elevated,
    High,
}

/// Interpretive forecast note. Never changes a sailing's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAnnotation {
    pub level: RiskLevel,
    pub summary: String,
    pub source: String,
}

/// Board-facing sailing, rebuilt on every render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSailing {
    pub operator_id: OperatorId,
    pub route_id: Option<RouteId>,
    pub from_port: PortSlug,
    pub to_port: PortSlug,
    pub departure_time: DepartureTime,
    /// `6:00 AM`
    pub departure_display: String,
    /// RFC 3339 in the corridor's timezone.
    pub departure_local: String,
    pub departure_utc: DateTime<Utc>,
    pub departure_epoch_ms: i64,
    pub arrival_display: Option<String>,
    pub vessel: Option<String>,
    pub status: SailingStatus,
    pub status_reason: Option<String>,
    pub status_provenance: StatusProvenance,
    pub status_origin: StatusOrigin,
    pub schedule_source: ScheduleSourceKind,
    pub synthetic: bool,
    pub forecast_risk: Option<RiskAnnotation>,
}

impl ScheduleSailing {
    /// A scheduled, on-time sailing with no status information yet.
    pub fn new(
        operator_id: OperatorId,
        from_port: PortSlug,
        to_port: PortSlug,
        departure_time: DepartureTime,
        service_date: NaiveDate,
        timezone: Tz,
        schedule_source: ScheduleSourceKind,
    ) -> Self {
        let instant = DepartureInstant::resolve(service_date, departure_time, timezone);
        let status_provenance = if schedule_source.is_template() {
            StatusProvenance::Template
        } else {
            StatusProvenance::Live
        };

        Self {
            operator_id,
            route_id: None,
            from_port,
            to_port,
            departure_time,
            departure_display: departure_time.display_12h(),
            departure_local: instant.local.to_rfc3339(),
            departure_utc: instant.utc,
            departure_epoch_ms: instant.utc.timestamp_millis(),
            arrival_display: None,
            vessel: None,
            status: SailingStatus::OnTime,
            status_reason: None,
            status_provenance,
            status_origin: StatusOrigin::Normal,
            schedule_source,
            synthetic: false,
            forecast_risk: None,
        }
    }

    pub fn with_route(mut self, route_id: Option<RouteId>) -> Self {
        self.route_id = route_id;
        self
    }

    pub fn with_vessel(mut self, vessel: Option<String>) -> Self {
        self.vessel = vessel;
        self
    }

    pub fn with_arrival(mut self, arrival: Option<DepartureTime>) -> Self {
        self.arrival_display = arrival.map(|t| t.display_12h());
        self
    }

    /// Overwrite the status fields from an observation.
    pub fn apply_status(&mut self, observed: &ObservedStatus, provenance: StatusProvenance) {
        self.status = observed.status;
        self.status_reason = observed.reason.clone();
        self.status_origin = observed.origin;
        self.status_provenance = provenance;
    }

    /// Current status as an observation, used for sticky merging.
    pub fn observed_status(&self, observed_at: DateTime<Utc>) -> ObservedStatus {
        ObservedStatus {
            status: self.status,
            reason: self.status_reason.clone(),
            observed_at,
            source: self.schedule_source.as_str().to_string(),
            origin: self.status_origin,
        }
    }

    /// Natural key for overlay matching.
    ///
    /// Template sailings have no stable departure identity across schedule
    /// revisions, so keying one is rejected.
    pub fn sailing_key(&self) -> Result<SailingKey, IdentityError> {
        if self.schedule_source.is_template() {
            log::error!(
                "Refusing to key template sailing {} {}->{}",
                self.departure_time,
                self.from_port,
                self.to_port
            );
            return Err(IdentityError::TemplateKeying(format!(
                "{}|{}|{}",
                self.from_port, self.to_port, self.departure_time
            )));
        }
        Ok(SailingKey::new(&self.from_port, &self.to_port, &self.departure_time))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub text: String,
    pub route_id: Option<RouteId>,
    pub issued_at: Option<DateTime<Utc>>,
}

/// Audit record of how a board was assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub schedule_source: ScheduleSourceKind,
    pub today_authority: TodayAuthority,
    pub operators_with_db_rows: Vec<OperatorId>,
    pub operators_using_templates: Vec<OperatorId>,
    pub unavailable_routes: Vec<RouteId>,
    pub synthetic_sailings: usize,
    pub overlay_applied: bool,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalInfo {
    pub slug: PortSlug,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorridorSummary {
    pub id: super::identity::CorridorId,
    pub name: String,
    pub timezone: String,
    pub crossing_km: Option<f64>,
}

/// Link shown when an operator's schedule could not be loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorLink {
    pub operator_id: OperatorId,
    pub name: String,
    pub status_url: Option<String>,
}

/// The per-corridor, bidirectional today-view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorridorBoard {
    pub corridor: CorridorSummary,
    pub terminals: Vec<TerminalInfo>,
    pub service_date: NaiveDate,
    pub sailings: Vec<ScheduleSailing>,
    pub advisories: Vec<Advisory>,
    pub provenance: Provenance,
    pub service_state: ServiceState,
    pub operator_links: Vec<OperatorLink>,
}

impl CorridorBoard {
    pub fn canceled_count(&self) -> usize {
        self.sailings.iter().filter(|s| s.status.is_canceled()).count()
    }
}
