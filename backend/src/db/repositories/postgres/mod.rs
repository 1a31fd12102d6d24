//! Postgres repository implementation using Diesel.
//!
//! ## Features
//!
//! - Connection pooling with r2d2
//! - Automatic retry for transient failures
//! - Automatic migration execution (`sailing_events` plus its natural-key
//!   unique index)
//!
//! ## Configuration
//!
//! Environment variables:
//! - `DATABASE_URL` or `PG_DATABASE_URL`: Connection string (required)
//! - `PG_POOL_MAX`: Maximum pool size (default: 10)
//! - `PG_POOL_MIN`: Minimum pool size (default: 1)
//! - `PG_CONN_TIMEOUT_SEC`: Connection timeout in seconds (default: 30)
//! - `PG_IDLE_TIMEOUT_SEC`: Idle connection timeout in seconds (default: 600)
//! - `PG_MAX_RETRIES`: Maximum retry attempts for transient failures (default: 3)
//! - `PG_RETRY_DELAY_MS`: Initial retry delay in milliseconds (default: 100)

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_query;
use diesel::sql_types::Text;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;

use crate::db::models::{NewSailingEvent, SailingEventUpdate, SchemaReport, SAILING_EVENTS_TABLE};
use crate::db::repository::{ErrorContext, RepositoryError, RepositoryResult, SailingEventRepository};
use crate::models::{
    CorridorId, DepartureTime, ObservedStatus, OperatorId, PersistedSailingEvent, PortSlug,
    SailingEventId, SailingIdentity, SailingStatus, ScheduleSourceKind, StatusOrigin,
};

mod models;
mod schema;

use models::*;
use schema::*;

type PgPool = Pool<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/db/repositories/postgres/migrations");

/// Configuration for connecting to Postgres.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_pool_size: u32,
    pub min_pool_size: u32,
    pub connection_timeout_sec: u64,
    pub idle_timeout_sec: u64,
    /// Maximum number of retry attempts for transient failures
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles with each retry)
    pub retry_delay_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_pool_size: 10,
            min_pool_size: 1,
            connection_timeout_sec: 30,
            idle_timeout_sec: 600,
            max_retries: 3,
            retry_delay_ms: 100,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl PostgresConfig {
    /// Create configuration from environment variables (see module docs).
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .or_else(|_| std::env::var("PG_DATABASE_URL"))
            .map_err(|_| "DATABASE_URL or PG_DATABASE_URL must be set".to_string())?;

        let defaults = Self::default();
        Ok(Self {
            database_url,
            max_pool_size: env_or("PG_POOL_MAX", defaults.max_pool_size),
            min_pool_size: env_or("PG_POOL_MIN", defaults.min_pool_size),
            connection_timeout_sec: env_or("PG_CONN_TIMEOUT_SEC", defaults.connection_timeout_sec),
            idle_timeout_sec: env_or("PG_IDLE_TIMEOUT_SEC", defaults.idle_timeout_sec),
            max_retries: env_or("PG_MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_or("PG_RETRY_DELAY_MS", defaults.retry_delay_ms),
        })
    }

    /// Create a new configuration with a database URL.
    pub fn with_url(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }
}

/// Pool health statistics.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub connections_in_use: u32,
    pub idle_connections: u32,
    pub total_connections: u32,
    pub max_size: u32,
    pub total_queries: u64,
    pub failed_queries: u64,
    pub retried_operations: u64,
}

/// Diesel-backed sailing-event store.
#[derive(Clone, Debug)]
pub struct PostgresRepository {
    pool: PgPool,
    config: PostgresConfig,
    total_queries: Arc<AtomicU64>,
    failed_queries: Arc<AtomicU64>,
    retried_operations: Arc<AtomicU64>,
}

impl PostgresRepository {
    /// Create a new repository and run pending migrations.
    pub fn new(config: PostgresConfig) -> RepositoryResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_pool_size)
            .min_idle(Some(config.min_pool_size))
            .connection_timeout(Duration::from_secs(config.connection_timeout_sec))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_sec)))
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("create_pool")
                        .with_details(format!("max_size={}", config.max_pool_size)),
                )
            })?;

        {
            let mut conn = pool.get().map_err(|e| {
                RepositoryError::connection_with_context(
                    e.to_string(),
                    ErrorContext::new("get_connection_for_migrations"),
                )
            })?;
            Self::run_migrations(&mut conn)?;
        }

        log::info!(
            "Postgres sailing-event store ready (pool max={})",
            config.max_pool_size
        );

        Ok(Self {
            pool,
            config,
            total_queries: Arc::new(AtomicU64::new(0)),
            failed_queries: Arc::new(AtomicU64::new(0)),
            retried_operations: Arc::new(AtomicU64::new(0)),
        })
    }

    fn run_migrations(conn: &mut PgConnection) -> RepositoryResult<()> {
        conn.run_pending_migrations(MIGRATIONS).map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Migration failed: {}", e),
                ErrorContext::new("run_migrations"),
            )
        })?;

        Ok(())
    }

    /// Execute a database operation with automatic retry for transient failures.
    ///
    /// Conflicts are never retried here: the caller decides what a duplicate
    /// natural key means.
    async fn with_conn<T, F>(&self, f: F) -> RepositoryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> RepositoryResult<T> + Send + 'static + Clone,
    {
        let pool = self.pool.clone();
        let max_retries = self.config.max_retries;
        let retry_delay_ms = self.config.retry_delay_ms;
        let total_queries = self.total_queries.clone();
        let failed_queries = self.failed_queries.clone();
        let retried_operations = self.retried_operations.clone();

        task::spawn_blocking(move || {
            let mut last_error = None;
            let mut retry_delay = Duration::from_millis(retry_delay_ms);

            for attempt in 0..=max_retries {
                if attempt > 0 {
                    retried_operations.fetch_add(1, Ordering::Relaxed);
                    std::thread::sleep(retry_delay);
                    retry_delay *= 2;
                }

                let mut conn = match pool.get() {
                    Ok(c) => c,
                    Err(e) => {
                        let err = RepositoryError::connection_with_context(
                            e.to_string(),
                            ErrorContext::new("get_connection")
                                .with_details(format!("attempt={}", attempt + 1)),
                        );
                        if attempt < max_retries {
                            last_error = Some(err);
                            continue;
                        }
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                        return Err(err);
                    }
                };

                total_queries.fetch_add(1, Ordering::Relaxed);
                match f.clone()(&mut conn) {
                    Ok(result) => return Ok(result),
                    Err(e) if e.is_retryable() && attempt < max_retries => {
                        log::debug!("Retrying after transient store error: {}", e);
                        last_error = Some(e);
                        continue;
                    }
                    Err(e) => {
                        failed_queries.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }
                }
            }

            failed_queries.fetch_add(1, Ordering::Relaxed);
            Err(last_error.unwrap_or_else(|| {
                RepositoryError::internal("Max retries exceeded with no error captured")
            }))
        })
        .await
        .map_err(|e| {
            RepositoryError::internal_with_context(
                format!("Task join error: {}", e),
                ErrorContext::new("spawn_blocking"),
            )
        })?
    }

    /// Get pool health statistics.
    pub fn get_pool_stats(&self) -> PoolStats {
        let state = self.pool.state();
        PoolStats {
            connections_in_use: state.connections - state.idle_connections,
            idle_connections: state.idle_connections,
            total_connections: state.connections,
            max_size: self.config.max_pool_size,
            total_queries: self.total_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            retried_operations: self.retried_operations.load(Ordering::Relaxed),
        }
    }

    /// Returns (is_healthy, latency_ms, error_message).
    pub async fn health_check_detailed(&self) -> (bool, Option<u64>, Option<String>) {
        let start = Instant::now();
        let latency = || Some(start.elapsed().as_millis() as u64);
        match self.health_check().await {
            Ok(true) => (true, latency(), None),
            Ok(false) => (false, latency(), Some("Health check returned false".to_string())),
            Err(e) => (false, latency(), Some(e.to_string())),
        }
    }
}

fn map_diesel_error(err: diesel::result::Error) -> RepositoryError {
    RepositoryError::from(err)
}

fn decode_error(id: i64, field: &str, message: impl Into<String>) -> RepositoryError {
    RepositoryError::internal_with_context(
        message,
        ErrorContext::new("decode_row")
            .with_entity("sailing_event")
            .with_entity_id(id)
            .with_details(format!("field={}", field)),
    )
}

fn row_to_event(row: SailingEventRow) -> RepositoryResult<PersistedSailingEvent> {
    let id = row.id;

    let identity = SailingIdentity {
        operator_id: OperatorId::new(&row.operator_id),
        corridor_id: CorridorId::new(&row.corridor_id),
        from_port: PortSlug::normalize(&row.from_port)
            .map_err(|e| decode_error(id, "from_port", e.to_string()))?,
        to_port: PortSlug::normalize(&row.to_port)
            .map_err(|e| decode_error(id, "to_port", e.to_string()))?,
        service_date: row.service_date,
        departure_time: DepartureTime::from_naive(row.departure_time),
    };

    let status = SailingStatus::from_str(&row.status).map_err(|e| decode_error(id, "status", e))?;
    let previous_status = row
        .previous_status
        .as_deref()
        .map(SailingStatus::from_str)
        .transpose()
        .map_err(|e| decode_error(id, "previous_status", e))?;
    let origin =
        StatusOrigin::from_str(&row.status_origin).map_err(|e| decode_error(id, "status_origin", e))?;
    let schedule_source = ScheduleSourceKind::from_str(&row.schedule_source)
        .map_err(|e| decode_error(id, "schedule_source", e))?;
    let weather = row
        .weather_snapshot
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| decode_error(id, "weather_snapshot", e.to_string()))?;

    Ok(PersistedSailingEvent {
        id: SailingEventId(id),
        identity,
        vessel: row.vessel,
        status: ObservedStatus {
            status,
            reason: row.status_reason,
            observed_at: row.status_observed_at,
            source: row.status_source,
            origin,
        },
        previous_status,
        schedule_source,
        weather,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn weather_to_json(
    weather: &Option<crate::models::WeatherSnapshot>,
) -> RepositoryResult<Option<serde_json::Value>> {
    weather
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| RepositoryError::internal(format!("Failed to encode weather snapshot: {}", e)))
}

fn new_row(event: &NewSailingEvent) -> RepositoryResult<NewSailingEventRow> {
    let identity = &event.identity;
    Ok(NewSailingEventRow {
        operator_id: identity.operator_id.to_string(),
        corridor_id: identity.corridor_id.to_string(),
        from_port: identity.from_port.to_string(),
        to_port: identity.to_port.to_string(),
        service_date: identity.service_date,
        departure_time: identity.departure_time.as_naive(),
        vessel: event.vessel.clone(),
        status: event.status.status.as_str().to_string(),
        status_reason: event.status.reason.clone(),
        status_observed_at: event.status.observed_at,
        status_source: event.status.source.clone(),
        status_origin: event.status.origin.as_str().to_string(),
        schedule_source: event.schedule_source.as_str().to_string(),
        weather_snapshot: weather_to_json(&event.weather)?,
    })
}

#[async_trait]
impl SailingEventRepository for PostgresRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        self.with_conn(|conn| {
            sql_query("SELECT 1")
                .execute(conn)
                .map(|_| true)
                .map_err(map_diesel_error)
        })
        .await
    }

    async fn validate_schema(&self) -> RepositoryResult<SchemaReport> {
        self.with_conn(|conn| {
            let rows: Vec<ColumnNameRow> = sql_query(
                "SELECT column_name FROM information_schema.columns WHERE table_name = $1",
            )
            .bind::<Text, _>(SAILING_EVENTS_TABLE)
            .load(conn)
            .map_err(map_diesel_error)?;

            let present: Vec<String> = rows.into_iter().map(|r| r.column_name).collect();
            Ok(SchemaReport::from_present_columns(&present))
        })
        .await
        .map_err(|e| e.with_operation("validate_schema"))
    }

    async fn find_by_identity(
        &self,
        identity: &SailingIdentity,
    ) -> RepositoryResult<Option<PersistedSailingEvent>> {
        let identity = identity.clone();
        self.with_conn(move |conn| {
            let row = sailing_events::table
                .filter(sailing_events::operator_id.eq(identity.operator_id.as_str()))
                .filter(sailing_events::corridor_id.eq(identity.corridor_id.as_str()))
                .filter(sailing_events::from_port.eq(identity.from_port.as_str()))
                .filter(sailing_events::to_port.eq(identity.to_port.as_str()))
                .filter(sailing_events::service_date.eq(identity.service_date))
                .filter(sailing_events::departure_time.eq(identity.departure_time.as_naive()))
                .select(SailingEventRow::as_select())
                .first::<SailingEventRow>(conn)
                .optional()
                .map_err(map_diesel_error)?;

            row.map(row_to_event).transpose()
        })
        .await
        .map_err(|e| e.with_operation("find_by_identity"))
    }

    async fn insert_event(
        &self,
        event: &NewSailingEvent,
    ) -> RepositoryResult<PersistedSailingEvent> {
        let row = new_row(event)?;
        self.with_conn(move |conn| {
            let inserted: SailingEventRow = diesel::insert_into(sailing_events::table)
                .values(&row)
                .returning(SailingEventRow::as_returning())
                .get_result(conn)
                .map_err(map_diesel_error)?;
            row_to_event(inserted)
        })
        .await
        .map_err(|e| e.with_operation("insert_event"))
    }

    async fn update_event(
        &self,
        id: SailingEventId,
        update: &SailingEventUpdate,
    ) -> RepositoryResult<PersistedSailingEvent> {
        let now = Utc::now();
        let expected = update.expected_status().as_str().to_string();
        let changeset = match update {
            SailingEventUpdate::ReasonOnly { reason, .. } => Err(reason.clone()),
            SailingEventUpdate::Transition {
                status,
                previous_status,
                weather,
                vessel,
            } => Ok(TransitionChangeset {
                status: status.status.as_str().to_string(),
                status_reason: status.reason.clone(),
                previous_status: Some(previous_status.as_str().to_string()),
                status_observed_at: status.observed_at,
                status_source: status.source.clone(),
                status_origin: status.origin.as_str().to_string(),
                weather_snapshot: weather_to_json(weather)?,
                vessel: vessel.clone(),
                updated_at: now,
            }),
        };

        self.with_conn(move |conn| {
            // Only the row as it was read may be written.
            let target = sailing_events::table
                .find(id.value())
                .filter(sailing_events::status.eq(expected.clone()));
            let updated: Option<SailingEventRow> = match changeset {
                Ok(changes) => diesel::update(target)
                    .set(&changes)
                    .returning(SailingEventRow::as_returning())
                    .get_result(conn)
                    .optional(),
                Err(reason) => diesel::update(target.filter(
                    sailing_events::status_reason
                        .is_null()
                        .or(sailing_events::status_reason.eq("")),
                ))
                .set((
                    sailing_events::status_reason.eq(Some(reason)),
                    sailing_events::updated_at.eq(now),
                ))
                .returning(SailingEventRow::as_returning())
                .get_result(conn)
                .optional(),
            }
            .map_err(map_diesel_error)?;

            match updated {
                Some(row) => row_to_event(row),
                None => Err(RepositoryError::conflict_with_context(
                    format!("Sailing event {} changed since it was read", id),
                    ErrorContext::new("update_event")
                        .with_entity("sailing_event")
                        .with_entity_id(id)
                        .with_details(format!("expected {}", expected)),
                )),
            }
        })
        .await
        .map_err(|e| e.with_operation("update_event"))
    }

    async fn list_events_for_operator_date(
        &self,
        operator_id: &OperatorId,
        service_date: NaiveDate,
    ) -> RepositoryResult<Vec<PersistedSailingEvent>> {
        let operator_id = operator_id.to_string();
        self.with_conn(move |conn| {
            let rows: Vec<SailingEventRow> = sailing_events::table
                .filter(sailing_events::operator_id.eq(&operator_id))
                .filter(sailing_events::service_date.eq(service_date))
                .order(sailing_events::id.asc())
                .select(SailingEventRow::as_select())
                .load(conn)
                .map_err(map_diesel_error)?;

            rows.into_iter().map(row_to_event).collect()
        })
        .await
        .map_err(|e| e.with_operation("list_events_for_operator_date"))
    }
}
