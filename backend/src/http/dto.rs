//! Data Transfer Objects for the HTTP API.
//!
//! Board responses serialize [`CorridorBoard`](crate::models::CorridorBoard)
//! directly. Request bodies carry upstream spellings and are normalized
//! here before they reach the service layer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    CorridorId, CorridorSummary, IdentityError, ObservedStatus, OperatorId, SailingIdentity,
    SailingObservation, SailingStatus, ScheduleSourceKind, WeatherSnapshot,
};
use crate::services::{OperatorSnapshot, ReconcileOutcome, SnapshotSailing};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status of the service
    pub status: String,
    /// Version of the API
    pub version: String,
    /// Database connection status
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorridorListResponse {
    pub corridors: Vec<CorridorSummary>,
    pub total: usize,
}

/// Query parameters for the board endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BoardQuery {
    /// Render as of this instant instead of now
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

fn default_live_source() -> ScheduleSourceKind {
    ScheduleSourceKind::OperatorStatus
}

fn default_snapshot_source() -> ScheduleSourceKind {
    ScheduleSourceKind::OperatorSnapshot
}

/// Request body for a single status observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SailingEventRequest {
    pub operator_id: String,
    pub corridor_id: String,
    pub from_port: String,
    pub to_port: String,
    pub service_date: NaiveDate,
    /// Any accepted spelling: `6:00 AM`, `06:00`, `06:00:00`
    pub departure_time: String,
    pub status: SailingStatus,
    #[serde(default)]
    pub reason: Option<String>,
    pub source: String,
    /// Defaults to the time the request is handled
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vessel: Option<String>,
    #[serde(default = "default_live_source")]
    pub schedule_source: ScheduleSourceKind,
    #[serde(default)]
    pub weather: Option<WeatherSnapshot>,
}

impl SailingEventRequest {
    pub fn into_observation(self, now: DateTime<Utc>) -> Result<SailingObservation, IdentityError> {
        let identity = SailingIdentity::parse(
            self.operator_id.as_str(),
            self.corridor_id.as_str(),
            &self.from_port,
            &self.to_port,
            self.service_date,
            &self.departure_time,
        )?;

        let mut status = ObservedStatus::new(self.status, self.source, self.observed_at.unwrap_or(now));
        if let Some(reason) = self.reason {
            status = status.with_reason(reason);
        }

        Ok(SailingObservation {
            identity,
            status,
            vessel: self.vessel,
            schedule_source: self.schedule_source,
            weather: self.weather,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResponse {
    /// Natural key the observation resolved to
    pub sailing_key: String,
    #[serde(flatten)]
    pub outcome: ReconcileOutcome,
}

/// Request body for an operator's full list on one corridor and date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub corridor_id: String,
    pub service_date: NaiveDate,
    pub source: String,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
    #[serde(default = "default_snapshot_source")]
    pub schedule_source: ScheduleSourceKind,
    pub sailings: Vec<SnapshotSailing>,
    /// Overrides the server's configured removal inference
    #[serde(default)]
    pub infer_removed: Option<bool>,
}

impl SnapshotRequest {
    pub fn into_snapshot(self, operator_id: OperatorId, now: DateTime<Utc>) -> OperatorSnapshot {
        OperatorSnapshot {
            operator_id,
            corridor_id: CorridorId::new(self.corridor_id),
            service_date: self.service_date,
            observed_at: self.observed_at.unwrap_or(now),
            source: self.source,
            schedule_source: self.schedule_source,
            sailings: self.sailings,
        }
    }
}
