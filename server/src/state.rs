use std::sync::Arc;
use std::time::{Duration, Instant};

use lookalike_core::{BrowseCatalog, BrowseError, Pipeline};

use crate::config::AppConfig;
use crate::sessions::SessionMap;

pub(crate) struct AppState {
    pub(crate) started_at: Instant,
    pub(crate) config: Arc<AppConfig>,
    pub(crate) pipeline: Pipeline,
    pub(crate) catalog: Arc<BrowseCatalog>,
    pub(crate) sessions: Arc<SessionMap>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            started_at: self.started_at,
            config: Arc::clone(&self.config),
            pipeline: self.pipeline.clone(),
            catalog: Arc::clone(&self.catalog),
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl AppState {
    /// Resolves every catalog entry's category once so browse steps only
    /// compare positions.
    pub(crate) fn new(config: AppConfig, pipeline: Pipeline) -> Result<Self, BrowseError> {
        let catalog = BrowseCatalog::new(pipeline.index())?;
        let sessions = SessionMap::new(
            Duration::from_secs(config.session_ttl_seconds),
            config.max_sessions,
        );
        Ok(Self {
            started_at: Instant::now(),
            config: Arc::new(config),
            pipeline,
            catalog: Arc::new(catalog),
            sessions: Arc::new(sessions),
        })
    }
}
