//! Repository trait definitions for the sailing-event store.
//!
//! - [`error`]: Error types for repository operations
//! - [`sailing_events`]: Natural-key row store used by reconciliation

pub mod error;
pub mod sailing_events;

pub use error::{ErrorContext, RepositoryError, RepositoryResult};
pub use sailing_events::SailingEventRepository;
