//! Persisted-store contract for sailing events.

use async_trait::async_trait;
use chrono::NaiveDate;

use super::error::RepositoryResult;
use crate::db::models::{NewSailingEvent, SailingEventUpdate, SchemaReport};
use crate::models::{OperatorId, PersistedSailingEvent, SailingEventId, SailingIdentity};

/// Row store keyed by [`SailingIdentity`].
///
/// Rows are never deleted. Writers racing on the same identity are resolved
/// by the unique natural-key constraint: the loser's `insert_event` returns
/// [`RepositoryError::Conflict`](super::RepositoryError::Conflict).
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to work with async Rust.
#[async_trait]
pub trait SailingEventRepository: Send + Sync {
    /// Check if the store is reachable.
    async fn health_check(&self) -> RepositoryResult<bool>;

    /// Report which reconciliation columns are missing.
    async fn validate_schema(&self) -> RepositoryResult<SchemaReport>;

    /// Select by natural key.
    async fn find_by_identity(
        &self,
        identity: &SailingIdentity,
    ) -> RepositoryResult<Option<PersistedSailingEvent>>;

    /// Insert a first observation.
    ///
    /// # Returns
    /// * `Ok(PersistedSailingEvent)` - The stored row with its assigned id
    /// * `Err(RepositoryError::Conflict)` - The identity already has a row
    async fn insert_event(&self, event: &NewSailingEvent)
        -> RepositoryResult<PersistedSailingEvent>;

    /// Update by row id, provided the row still holds the status the update
    /// was decided against.
    ///
    /// # Returns
    /// * `Err(RepositoryError::Conflict)` - Another writer changed the row first
    async fn update_event(
        &self,
        id: SailingEventId,
        update: &SailingEventUpdate,
    ) -> RepositoryResult<PersistedSailingEvent>;

    /// All rows for one operator on one service date, any corridor.
    async fn list_events_for_operator_date(
        &self,
        operator_id: &OperatorId,
        service_date: NaiveDate,
    ) -> RepositoryResult<Vec<PersistedSailingEvent>>;
}
