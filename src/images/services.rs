use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::StorageClient;

pub struct UploadItem {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub key: String,
    pub url: String,
}

/// Stores an avatar under a fresh random key and returns where it lives.
pub async fn store_image(storage: &dyn StorageClient, img: UploadItem) -> anyhow::Result<StoredImage> {
    anyhow::ensure!(!img.body.is_empty(), "empty image upload");

    let ext = img
        .content_type
        .as_deref()
        .and_then(ext_from_mime)
        .or_else(|| img.file_name.as_deref().and_then(ext_from_file_name))
        .unwrap_or("bin");
    let key = format!("{}.{}", Uuid::new_v4().simple(), ext);
    let content_type = img
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");

    storage
        .put_object(&key, img.body, content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    let url = storage.public_url(&key);
    info!(%key, "image stored");
    Ok(StoredImage { key, url })
}

/// Best-effort removal of a stored image, addressed by its key.
pub async fn discard_image(storage: &dyn StorageClient, key: &str) {
    if let Err(e) = storage.delete_object(key).await {
        warn!(error = ?e, key, "failed to remove image");
    }
}

/// Best-effort removal of the image behind a public URL produced by [`store_image`].
pub async fn discard_image_by_url(storage: &dyn StorageClient, url: &str) {
    match key_from_url(url) {
        Some(key) => discard_image(storage, key).await,
        None => warn!(url, "cannot derive image key from url"),
    }
}

fn key_from_url(url: &str) -> Option<&str> {
    url.rsplit('/').next().filter(|k| !k.is_empty())
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

fn ext_from_file_name(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    ext_from_mime(&format!("image/{}", ext.to_ascii_lowercase()))
}
