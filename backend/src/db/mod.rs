//! Persisted sailing-event store.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  HTTP handlers / board composer / ingestion             │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼─────────────────────────────────────┐
//! │  services::overlay - reconciliation state machine       │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//! ┌───────────────────▼─────────────────────────────────────┐
//! │  SailingEventRepository (repository/) - store contract  │
//! └───────────────────┬─────────────────────────────────────┘
//!                     │
//!     ┌───────────────┴───────────────┐
//!     │ LocalRepository               │ PostgresRepository
//!     │ (in-memory, fault injectors)  │ (Diesel + r2d2)
//!     └───────────────────────────────┘
//! ```
//!
//! Store access goes through an injected `Arc<dyn SailingEventRepository>`;
//! there is no process-wide repository instance.

#[cfg(not(any(feature = "postgres-repo", feature = "local-repo")))]
compile_error!("Enable at least one repository backend feature.");

pub mod factory;
pub mod models;
pub mod repositories;
pub mod repository;

// Postgres config is colocated with the repository implementation.
#[cfg(feature = "postgres-repo")]
pub use repositories::postgres::{PoolStats, PostgresConfig};
#[cfg(not(feature = "postgres-repo"))]
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    _private: (),
}
#[cfg(not(feature = "postgres-repo"))]
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    _private: (),
}

pub use factory::{RepositoryFactory, RepositoryType};
pub use models::{
    NewSailingEvent, SailingEventUpdate, SchemaReport, RECONCILIATION_COLUMNS,
    SAILING_EVENTS_TABLE,
};
pub use repositories::LocalRepository;
#[cfg(feature = "postgres-repo")]
pub use repositories::PostgresRepository;
pub use repository::{ErrorContext, RepositoryError, RepositoryResult, SailingEventRepository};
