use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    Local {
        images_dir: String,
    },
    S3 {
        endpoint: String,
        bucket: String,
        access_key: String,
        secret_key: String,
        public_url: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used to build avatar links.
    pub public_url: String,
    pub redis_url: String,
    pub store_timeout_ms: u64,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            ttl_minutes: parsed_or("JWT_TTL_MINUTES", 6 * 60),
            refresh_ttl_minutes: parsed_or("JWT_REFRESH_TTL_MINUTES", 6 * 60),
        };

        let storage = match std::env::var("STORAGE_BACKEND").as_deref() {
            Ok("s3") => StorageConfig::S3 {
                endpoint: required("MINIO_ENDPOINT")?,
                bucket: required("MINIO_BUCKET")?,
                access_key: required("MINIO_ACCESS_KEY")?,
                secret_key: required("MINIO_SECRET_KEY")?,
                public_url: required("MINIO_PUBLIC_URL")?,
            },
            Ok("local") | Err(_) => StorageConfig::Local {
                images_dir: std::env::var("IMAGES_DIR").unwrap_or_else(|_| "images".into()),
            },
            Ok(other) => anyhow::bail!("unknown STORAGE_BACKEND {other:?}"),
        };

        Ok(Self {
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parsed_or("APP_PORT", 8080),
            public_url: std::env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            redis_url: required("REDIS_URL")?,
            store_timeout_ms: parsed_or("STORE_TIMEOUT_MS", 5000),
            jwt,
            storage,
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("missing environment variable {key}"))
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
