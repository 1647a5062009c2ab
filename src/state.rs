use std::sync::Arc;

use crate::config::{AppConfig, StorageConfig};
use crate::kv::{KvStore, MemoryStore, RedisStore};
use crate::storage::{LocalStorage, S3Storage, StorageClient};

/// `REDIS_URL` value that selects [`MemoryStore`] instead of Redis.
pub const MEMORY_STORE_URL: &str = "memory://";

/// Process-wide handles, built once in `main` and cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub kv: Arc<dyn KvStore>,
    pub storage: Arc<dyn StorageClient>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let kv = if config.redis_url == MEMORY_STORE_URL {
            tracing::warn!("using in-process store; data is lost on restart");
            Arc::new(MemoryStore::new()) as Arc<dyn KvStore>
        } else {
            tracing::info!(url = %config.redis_url, "connecting to redis");
            Arc::new(RedisStore::connect(&config.redis_url, config.store_timeout()).await?)
                as Arc<dyn KvStore>
        };

        let storage = match &config.storage {
            StorageConfig::Local { images_dir } => {
                Arc::new(LocalStorage::new(images_dir, &config.public_url).await?)
                    as Arc<dyn StorageClient>
            }
            StorageConfig::S3 {
                endpoint,
                bucket,
                access_key,
                secret_key,
                public_url,
            } => Arc::new(
                S3Storage::new(
                    endpoint, bucket, access_key, secret_key, "us-east-1", public_url,
                )
                .await?,
            ) as Arc<dyn StorageClient>,
        };

        Ok(Self::from_parts(config, kv, storage))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        kv: Arc<dyn KvStore>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            config,
            kv,
            storage,
        }
    }
}
