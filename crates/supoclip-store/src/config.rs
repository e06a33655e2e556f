//! Store configuration.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::StoreResult;
use crate::memory::MemoryTaskStore;
use crate::redis_store::RedisTaskStore;
use crate::store::TaskStore;

/// Which adapter backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    /// Process-local, for tests and local experiments
    Memory,
}

impl StoreBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Some(Self::Redis),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
    /// Key prefix for Redis records
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "supoclip".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let backend = match std::env::var("STORE_BACKEND") {
            Ok(raw) => StoreBackend::parse(&raw).unwrap_or_else(|| {
                warn!(value = %raw, "Unknown STORE_BACKEND, using redis");
                StoreBackend::Redis
            }),
            Err(_) => defaults.backend,
        };

        Self {
            backend,
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        }
    }
}

/// Build the configured store.
pub async fn connect_store(config: &StoreConfig) -> StoreResult<Arc<dyn TaskStore>> {
    match config.backend {
        StoreBackend::Redis => {
            let store = RedisTaskStore::connect(&config.redis_url, config.key_prefix.clone()).await?;
            info!(prefix = %config.key_prefix, "Connected Redis task store");
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory task store; state is lost on restart");
            Ok(Arc::new(MemoryTaskStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend() {
        assert_eq!(StoreBackend::parse("Redis"), Some(StoreBackend::Redis));
        assert_eq!(StoreBackend::parse(" memory "), Some(StoreBackend::Memory));
        assert_eq!(StoreBackend::parse("postgres"), None);
    }

    #[tokio::test]
    async fn test_connect_memory() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            ..Default::default()
        };
        let store = connect_store(&config).await.unwrap();
        store.ping().await.unwrap();
    }
}
