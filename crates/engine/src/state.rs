//! Shared application state for the ReviewFlow server.
//!
//! Passed to every handler through Axum's state management.

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::engine::WorkflowEngine;
use crate::model::Page;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The workflow engine
    pub engine: WorkflowEngine,

    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Database pool when the Postgres store is active
    pub db: Option<DbPool>,

    /// NATS client (optional)
    pub nats: Option<Arc<async_nats::Client>>,

    /// Server start time for uptime calculation
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        engine: WorkflowEngine,
        config: AppConfig,
        db: Option<DbPool>,
        nats: Option<async_nats::Client>,
    ) -> Self {
        Self {
            engine,
            config: Arc::new(config),
            db,
            nats: nats.map(Arc::new),
            start_time: std::time::Instant::now(),
        }
    }

    /// Get the server uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Check if NATS is configured and connected.
    pub fn has_nats(&self) -> bool {
        self.nats.is_some()
    }

    /// Page for a listing request, falling back to the configured page size.
    pub fn page(&self, offset: Option<u32>, limit: Option<u32>) -> Page {
        Page::new(offset, limit.or(Some(self.config.default_page_size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionRegistry;
    use crate::store::MemoryStore;
    use std::collections::BTreeSet;

    fn state(config: AppConfig) -> AppState {
        let registry = DefinitionRegistry::from_documents::<&str>(&[], BTreeSet::new()).unwrap();
        let engine =
            WorkflowEngine::builder(Arc::new(registry), Arc::new(MemoryStore::new())).build();
        AppState::new(engine, config, None, None)
    }

    #[test]
    fn test_page_uses_configured_size() {
        let mut config = AppConfig::default();
        config.default_page_size = 20;
        let state = state(config);

        assert_eq!(state.page(None, None).limit, 20);
        assert_eq!(state.page(Some(5), Some(10)).offset, 5);
        assert_eq!(state.page(None, Some(500)).limit, Page::MAX_LIMIT);
        assert!(!state.has_nats());
    }
}
