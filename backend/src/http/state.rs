//! Application state for the HTTP server.

use std::sync::Arc;

use crate::db::SailingEventRepository;
use crate::services::{CorridorBoardComposer, IngestOptions, SchemaValidationCache, StatusOverlayStore};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repository instance for database operations
    pub repository: Arc<dyn SailingEventRepository>,
    pub composer: Arc<CorridorBoardComposer>,
    /// Write path. Invalidates the composer's operator-status cache.
    pub overlay: StatusOverlayStore,
    /// Defaults for snapshot ingestion requests
    pub ingest: IngestOptions,
}

impl AppState {
    pub fn new(repository: Arc<dyn SailingEventRepository>, composer: CorridorBoardComposer) -> Self {
        let overlay = StatusOverlayStore::new(repository.clone(), Arc::new(SchemaValidationCache::new()))
            .with_status_cache(composer.caches().operator_status.clone());
        Self {
            repository,
            composer: Arc::new(composer),
            overlay,
            ingest: IngestOptions::default(),
        }
    }

    pub fn with_ingest_options(mut self, ingest: IngestOptions) -> Self {
        self.ingest = ingest;
        self
    }
}
