use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()>;
    async fn delete_object(&self, key: &str) -> anyhow::Result<()>;
    /// Publicly reachable URL of a stored object.
    fn public_url(&self, key: &str) -> String;
}

/// Joins a base URL and path segments with exactly one `/` between them.
pub fn join_url(base: &str, segments: &[&str]) -> String {
    let path = segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// Files in a directory served under `/images`.
#[derive(Clone)]
pub struct LocalStorage {
    dir: PathBuf,
    public_url: String,
}

impl LocalStorage {
    pub async fn new(dir: impl Into<PathBuf>, public_url: &str) -> anyhow::Result<Self> {
        let dir = dir.into();
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if !meta.is_dir() => {
                anyhow::bail!("{} exists and is not a directory", dir.display())
            }
            Ok(_) => {}
            Err(_) => tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("create images dir {}", dir.display()))?,
        }
        Ok(Self {
            dir,
            public_url: public_url.to_string(),
        })
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        anyhow::ensure!(
            !key.is_empty() && !key.contains(['/', '\\']) && key != "." && key != "..",
            "invalid object key {key:?}"
        );
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn put_object(&self, key: &str, body: Bytes, _content_type: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("write {}", path.display()))
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("remove {}", path.display()))
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_url, &["images", key])
    }
}

#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    public_url: String,
}

impl S3Storage {
    pub async fn new(
        endpoint: &str,
        bucket: &str,
        access_key: &str,
        secret_key: &str,
        region: &str,
        public_url: &str,
    ) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "static",
            ))
            .endpoint_url(endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: bucket.to_string(),
            public_url: public_url.to_string(),
        })
    }
}

#[async_trait]
impl StorageClient for S3Storage {
    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("s3 put_object")?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("s3 delete_object")?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        join_url(&self.public_url, &[key])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(
            join_url("http://host:8080/", &["/images", "a.png"]),
            "http://host:8080/images/a.png"
        );
        assert_eq!(join_url("http://host", &["a.png"]), "http://host/a.png");
    }

    #[tokio::test]
    async fn local_put_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("images");
        let storage = LocalStorage::new(&dir, "http://x").await.unwrap();
        storage
            .put_object("k.png", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();
        let on_disk = tokio::fs::read(dir.join("k.png")).await.unwrap();
        assert_eq!(on_disk, b"png");
        assert_eq!(storage.public_url("k.png"), "http://x/images/k.png");

        storage.delete_object("k.png").await.unwrap();
        assert!(!dir.join("k.png").exists());
    }

    #[tokio::test]
    async fn local_rejects_path_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(tmp.path(), "http://x").await.unwrap();
        assert!(storage
            .put_object("../evil", Bytes::new(), "text/plain")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn local_refuses_file_in_place_of_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("images");
        std::fs::write(&file, b"").unwrap();
        assert!(LocalStorage::new(&file, "http://x").await.is_err());
    }
}
