//! Row-level types shared by every store implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    ObservedStatus, PersistedSailingEvent, SailingIdentity, SailingObservation, SailingStatus,
    ScheduleSourceKind, WeatherSnapshot,
};

/// Table holding one row per sailing identity.
pub const SAILING_EVENTS_TABLE: &str = "sailing_events";

/// Columns reconciliation cannot run without.
pub const RECONCILIATION_COLUMNS: [&str; 5] = [
    "status_reason",
    "previous_status",
    "status_observed_at",
    "status_source",
    "weather_snapshot",
];

/// Insert payload for a first observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSailingEvent {
    pub identity: SailingIdentity,
    pub vessel: Option<String>,
    pub status: ObservedStatus,
    pub schedule_source: ScheduleSourceKind,
    pub weather: Option<WeatherSnapshot>,
}

impl From<&SailingObservation> for NewSailingEvent {
    fn from(observation: &SailingObservation) -> Self {
        Self {
            identity: observation.identity.clone(),
            vessel: observation.vessel.clone(),
            status: observation.status.clone(),
            schedule_source: observation.schedule_source,
            weather: observation.weather.clone(),
        }
    }
}

impl NewSailingEvent {
    pub(crate) fn into_persisted(
        self,
        id: crate::models::SailingEventId,
        now: DateTime<Utc>,
    ) -> PersistedSailingEvent {
        PersistedSailingEvent {
            id,
            identity: self.identity,
            vessel: self.vessel,
            status: self.status,
            previous_status: None,
            schedule_source: self.schedule_source,
            weather: self.weather,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The two mutations an existing row may receive.
///
/// Both are conditional: a store applies them only while the row still
/// holds the state the update was decided against, and reports
/// [`RepositoryError::Conflict`](crate::db::RepositoryError) otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SailingEventUpdate {
    /// Fill an empty reason. Status is untouched.
    ReasonOnly {
        expected_status: SailingStatus,
        reason: String,
    },
    /// Move along the transition table. `previous_status` is also the
    /// status the row must still hold.
    Transition {
        status: ObservedStatus,
        previous_status: SailingStatus,
        weather: Option<WeatherSnapshot>,
        vessel: Option<String>,
    },
}

impl SailingEventUpdate {
    /// Status the row must hold for this update to apply.
    pub fn expected_status(&self) -> SailingStatus {
        match self {
            SailingEventUpdate::ReasonOnly {
                expected_status, ..
            } => *expected_status,
            SailingEventUpdate::Transition {
                previous_status, ..
            } => *previous_status,
        }
    }

    /// Whether `event` is still in the state this update was decided
    /// against. A reason fill additionally requires the reason to be empty.
    pub fn applies_to(&self, event: &PersistedSailingEvent) -> bool {
        if event.status.status != self.expected_status() {
            return false;
        }
        match self {
            SailingEventUpdate::ReasonOnly { .. } => !event.status.has_reason(),
            SailingEventUpdate::Transition { .. } => true,
        }
    }

    /// Apply to an in-memory row. Vessel and weather are only replaced when
    /// the update carries a value.
    pub fn apply_to(&self, event: &mut PersistedSailingEvent, now: DateTime<Utc>) {
        match self {
            SailingEventUpdate::ReasonOnly { reason, .. } => {
                event.status.reason = Some(reason.clone());
            }
            SailingEventUpdate::Transition {
                status,
                previous_status,
                weather,
                vessel,
            } => {
                event.status = status.clone();
                event.previous_status = Some(*previous_status);
                if weather.is_some() {
                    event.weather = weather.clone();
                }
                if vessel.is_some() {
                    event.vessel = vessel.clone();
                }
            }
        }
        event.updated_at = now;
    }
}

/// Result of checking the store for the reconciliation columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaReport {
    pub table: String,
    pub missing_columns: Vec<String>,
}

impl SchemaReport {
    /// Build from the column names the store actually exposes.
    pub fn from_present_columns<S: AsRef<str>>(present: &[S]) -> Self {
        let missing_columns = RECONCILIATION_COLUMNS
            .iter()
            .filter(|required| !present.iter().any(|p| p.as_ref() == **required))
            .map(|c| c.to_string())
            .collect();
        Self {
            table: SAILING_EVENTS_TABLE.to_string(),
            missing_columns,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.missing_columns.is_empty()
    }
}
