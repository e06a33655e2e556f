//! Application state.

use std::sync::Arc;

use supoclip_media::FontCatalog;
use supoclip_models::DEFAULT_FONT_FAMILY;
use supoclip_queue::{JobQueue, TaskDispatcher};
use supoclip_store::{connect_store, StoreConfig, TaskManager};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub tasks: Arc<TaskManager>,
    pub dispatcher: Arc<dyn TaskDispatcher>,
    pub fonts: FontCatalog,
}

impl AppState {
    /// Connect the store and queue configured in the environment.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = connect_store(&StoreConfig::from_env()).await?;
        let queue = JobQueue::from_env()?;
        queue.init().await?;

        Ok(Self::from_parts(config, Arc::new(TaskManager::new(store)), Arc::new(queue)))
    }

    /// Assemble state from already constructed services.
    pub fn from_parts(
        config: ApiConfig,
        tasks: Arc<TaskManager>,
        dispatcher: Arc<dyn TaskDispatcher>,
    ) -> Self {
        let fonts = FontCatalog::new(config.fonts_dir.clone(), DEFAULT_FONT_FAMILY);
        Self {
            config,
            tasks,
            dispatcher,
            fonts,
        }
    }
}
