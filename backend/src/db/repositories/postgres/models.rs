use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::Text;
use serde_json::Value;

use super::schema::sailing_events;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = sailing_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SailingEventRow {
    pub id: i64,
    pub operator_id: String,
    pub corridor_id: String,
    pub from_port: String,
    pub to_port: String,
    pub service_date: NaiveDate,
    pub departure_time: NaiveTime,
    pub vessel: Option<String>,
    pub status: String,
    pub status_reason: Option<String>,
    pub previous_status: Option<String>,
    pub status_observed_at: DateTime<Utc>,
    pub status_source: String,
    pub status_origin: String,
    pub schedule_source: String,
    pub weather_snapshot: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = sailing_events)]
pub struct NewSailingEventRow {
    pub operator_id: String,
    pub corridor_id: String,
    pub from_port: String,
    pub to_port: String,
    pub service_date: NaiveDate,
    pub departure_time: NaiveTime,
    pub vessel: Option<String>,
    pub status: String,
    pub status_reason: Option<String>,
    pub status_observed_at: DateTime<Utc>,
    pub status_source: String,
    pub status_origin: String,
    pub schedule_source: String,
    pub weather_snapshot: Option<Value>,
}

/// Changeset for an allowed status transition. `None` fields are skipped.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = sailing_events)]
pub struct TransitionChangeset {
    pub status: String,
    pub status_reason: Option<String>,
    pub previous_status: Option<String>,
    pub status_observed_at: DateTime<Utc>,
    pub status_source: String,
    pub status_origin: String,
    pub weather_snapshot: Option<Value>,
    pub vessel: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, QueryableByName)]
pub struct ColumnNameRow {
    #[diesel(sql_type = Text)]
    pub column_name: String,
}
