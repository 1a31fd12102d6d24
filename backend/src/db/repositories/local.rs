//! In-memory local repository implementation.
//!
//! Suitable for unit tests and local development. Besides the store contract
//! it exposes a few fault injectors (unhealthy connection, missing schema
//! columns, a racing writer) so the reconciliation failure paths can be
//! exercised deterministically.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::models::{NewSailingEvent, SailingEventUpdate, SchemaReport, RECONCILIATION_COLUMNS};
use crate::db::repository::{ErrorContext, RepositoryError, RepositoryResult, SailingEventRepository};
use crate::models::{OperatorId, PersistedSailingEvent, SailingEventId, SailingIdentity};

/// In-memory local repository.
///
/// # Example
/// ```
/// use ferry_board::db::repositories::LocalRepository;
///
/// let repo = LocalRepository::new();
/// repo.set_healthy(false);
/// assert_eq!(repo.event_count(), 0);
/// ```
#[derive(Clone)]
pub struct LocalRepository {
    data: Arc<RwLock<LocalData>>,
}

struct LocalData {
    events: HashMap<SailingEventId, PersistedSailingEvent>,
    by_identity: HashMap<SailingIdentity, SailingEventId>,
    next_event_id: i64,

    // Fault injection
    is_healthy: bool,
    missing_columns: Vec<String>,
    racing_insert: Option<NewSailingEvent>,

    // Call counters
    schema_checks: usize,
    list_calls: usize,
}

impl Default for LocalData {
    fn default() -> Self {
        Self {
            events: HashMap::new(),
            by_identity: HashMap::new(),
            next_event_id: 1,
            is_healthy: true,
            missing_columns: Vec::new(),
            racing_insert: None,
            schema_checks: 0,
            list_calls: 0,
        }
    }
}

impl LocalData {
    fn store(&mut self, event: NewSailingEvent) -> RepositoryResult<PersistedSailingEvent> {
        if let Some(existing) = self.by_identity.get(&event.identity) {
            return Err(RepositoryError::conflict_with_context(
                "Sailing identity already recorded",
                ErrorContext::new("insert_event")
                    .with_entity("sailing_event")
                    .with_entity_id(existing)
                    .with_details(event.identity.sailing_key().to_string()),
            ));
        }

        let id = SailingEventId(self.next_event_id);
        self.next_event_id += 1;

        let persisted = event.into_persisted(id, Utc::now());
        self.by_identity.insert(persisted.identity.clone(), id);
        self.events.insert(id, persisted.clone());
        Ok(persisted)
    }
}

impl LocalRepository {
    /// Create a new empty local repository.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(LocalData::default())),
        }
    }

    /// Store a row directly, bypassing reconciliation.
    pub fn seed_event(&self, event: NewSailingEvent) -> RepositoryResult<PersistedSailingEvent> {
        self.data.write().store(event)
    }

    /// Set the health status for testing connection failures.
    pub fn set_healthy(&self, healthy: bool) {
        self.data.write().is_healthy = healthy;
    }

    /// Pretend the given reconciliation columns do not exist.
    pub fn set_missing_columns<S: Into<String>>(&self, columns: impl IntoIterator<Item = S>) {
        self.data.write().missing_columns = columns.into_iter().map(Into::into).collect();
    }

    /// Have another writer land `event` immediately before the next
    /// `insert_event` call, as if two first observations raced.
    pub fn inject_racing_insert(&self, event: NewSailingEvent) {
        self.data.write().racing_insert = Some(event);
    }

    /// Clear all rows, keeping health and schema settings.
    pub fn clear(&self) {
        let mut data = self.data.write();
        data.events.clear();
        data.by_identity.clear();
        data.next_event_id = 1;
        data.racing_insert = None;
    }

    /// Get the number of rows stored.
    pub fn event_count(&self) -> usize {
        self.data.read().events.len()
    }

    /// How many times `validate_schema` has run.
    pub fn schema_check_count(&self) -> usize {
        self.data.read().schema_checks
    }

    /// How many times `list_events_for_operator_date` has run.
    pub fn list_call_count(&self) -> usize {
        self.data.read().list_calls
    }

    /// Snapshot of every stored row, ordered by id.
    pub fn events(&self) -> Vec<PersistedSailingEvent> {
        let data = self.data.read();
        let mut events: Vec<_> = data.events.values().cloned().collect();
        events.sort_by_key(|e| e.id);
        events
    }

    /// Helper to check health and return error if unhealthy.
    fn check_health(&self, operation: &str) -> RepositoryResult<()> {
        if !self.data.read().is_healthy {
            return Err(RepositoryError::connection_with_context(
                "Database is not healthy",
                ErrorContext::new(operation),
            ));
        }
        Ok(())
    }
}

impl Default for LocalRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SailingEventRepository for LocalRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(self.data.read().is_healthy)
    }

    async fn validate_schema(&self) -> RepositoryResult<SchemaReport> {
        self.check_health("validate_schema")?;
        let mut data = self.data.write();
        data.schema_checks += 1;

        let present: Vec<&str> = RECONCILIATION_COLUMNS
            .iter()
            .copied()
            .filter(|c| !data.missing_columns.iter().any(|m| m == c))
            .collect();
        Ok(SchemaReport::from_present_columns(&present))
    }

    async fn find_by_identity(
        &self,
        identity: &SailingIdentity,
    ) -> RepositoryResult<Option<PersistedSailingEvent>> {
        self.check_health("find_by_identity")?;
        let data = self.data.read();
        Ok(data
            .by_identity
            .get(identity)
            .and_then(|id| data.events.get(id))
            .cloned())
    }

    async fn insert_event(
        &self,
        event: &NewSailingEvent,
    ) -> RepositoryResult<PersistedSailingEvent> {
        self.check_health("insert_event")?;
        let mut data = self.data.write();

        if let Some(racer) = data.racing_insert.take() {
            data.store(racer)?;
        }

        data.store(event.clone())
    }

    async fn update_event(
        &self,
        id: SailingEventId,
        update: &SailingEventUpdate,
    ) -> RepositoryResult<PersistedSailingEvent> {
        self.check_health("update_event")?;
        let mut data = self.data.write();
        let event = data.events.get_mut(&id).ok_or_else(|| {
            RepositoryError::not_found_with_context(
                format!("Sailing event {} not found", id),
                ErrorContext::new("update_event")
                    .with_entity("sailing_event")
                    .with_entity_id(id),
            )
        })?;

        if !update.applies_to(event) {
            return Err(RepositoryError::conflict_with_context(
                format!("Sailing event {} changed since it was read", id),
                ErrorContext::new("update_event")
                    .with_entity("sailing_event")
                    .with_entity_id(id)
                    .with_details(format!(
                        "expected {}, found {}",
                        update.expected_status(),
                        event.status.status
                    )),
            ));
        }

        update.apply_to(event, Utc::now());
        Ok(event.clone())
    }

    async fn list_events_for_operator_date(
        &self,
        operator_id: &OperatorId,
        service_date: NaiveDate,
    ) -> RepositoryResult<Vec<PersistedSailingEvent>> {
        self.check_health("list_events_for_operator_date")?;
        let mut data = self.data.write();
        data.list_calls += 1;

        let mut events: Vec<_> = data
            .events
            .values()
            .filter(|e| {
                &e.identity.operator_id == operator_id && e.identity.service_date == service_date
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.id);
        Ok(events)
    }
}
