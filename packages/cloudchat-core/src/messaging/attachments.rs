//! # Image Attachments
//!
//! Images are uploaded to object storage before the message is written, and
//! the message only stores the resulting URL. Object keys are content
//! addressed (`{conversation}/{sha256}.{ext}`), so sending the same image
//! twice stores it once.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use sha2::{Digest, Sha256};

use super::ConversationId;
use crate::error::{Error, Result};

/// Accepted image MIME types.
pub const ALLOWED_IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// An image picked for the next message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Name of the picked file
    pub filename: String,
    /// MIME type
    pub content_type: String,
    /// Raw bytes
    pub data: Bytes,
}

impl ImageAttachment {
    /// Create an attachment.
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image has no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check the type and size.
    pub fn validate(&self, max_size: usize) -> Result<()> {
        if !ALLOWED_IMAGE_TYPES.contains(&self.content_type.as_str()) {
            return Err(Error::UnsupportedImageType(self.content_type.clone()));
        }
        if self.data.is_empty() {
            return Err(Error::EmptyImage(self.filename.clone()));
        }
        if self.data.len() > max_size {
            return Err(Error::ImageTooLarge {
                size: self.data.len(),
                max: max_size,
            });
        }
        Ok(())
    }

    /// Hex SHA-256 of the bytes.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.data);
        hex::encode(hasher.finalize())
    }

    /// File extension for the content type.
    pub fn extension(&self) -> &'static str {
        match self.content_type.as_str() {
            "image/png" => "png",
            "image/jpeg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "bin",
        }
    }

    /// Object key under which this image is stored for `conversation`.
    pub fn object_key(&self, conversation: &ConversationId) -> String {
        format!("{}/{}.{}", conversation, self.content_hash(), self.extension())
    }
}

/// Durable storage for uploaded images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `image` under `key` and return its stable public URL.
    async fn upload(&self, key: &str, image: &ImageAttachment) -> Result<String>;
}

/// Object store held in process memory.
#[derive(Clone)]
pub struct MemoryObjectStore {
    base_url: String,
    objects: Arc<RwLock<HashMap<String, (Bytes, String)>>>,
}

impl MemoryObjectStore {
    /// Create an empty store whose URLs start with `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            objects: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Bytes and content type stored under `key`.
    pub fn get(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.read().get(key).cloned()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, key: &str, image: &ImageAttachment) -> Result<String> {
        let mut objects = self.objects.write();
        if !objects.contains_key(key) {
            objects.insert(
                key.to_string(),
                (image.data.clone(), image.content_type.clone()),
            );
            tracing::info!(key, size = image.len(), "Image stored");
        }
        Ok(format!("{}/{}", self.base_url, key))
    }
}

/// Object store reached with HTTP `PUT {base}/{key}`.
#[derive(Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpObjectStore {
    /// Upload to `base_url`, optionally with a bearer token.
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
        }
    }

    /// Public URL of `key`.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(&self, key: &str, image: &ImageAttachment) -> Result<String> {
        let url = self.url_for(key);
        let mut request = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, image.content_type.as_str())
            .body(image.data.clone());
        if let Some(token) = &self.auth_token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(key, status = status.as_u16(), "Image upload rejected");
            return Err(Error::UploadFailed(format!("{}: {}", status, body)));
        }

        tracing::info!(key, size = image.len(), "Image uploaded");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UserId;

    fn png(bytes: &'static [u8]) -> ImageAttachment {
        ImageAttachment::new("cat.png", "image/png", bytes)
    }

    fn conversation() -> ConversationId {
        ConversationId::between(&UserId::new("u1").unwrap(), &UserId::new("u2").unwrap())
    }

    #[test]
    fn test_validate() {
        assert!(png(b"\x89PNG").validate(1024).is_ok());
        assert!(matches!(
            ImageAttachment::new("a.svg", "image/svg+xml", &b"<svg/>"[..]).validate(1024),
            Err(Error::UnsupportedImageType(_))
        ));
        assert!(matches!(
            png(b"0123456789").validate(4),
            Err(Error::ImageTooLarge { size: 10, max: 4 })
        ));
        let empty = png(b"").validate(1024).unwrap_err();
        assert!(matches!(empty, Error::EmptyImage(_)));
        assert_eq!(empty.kind(), crate::error::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_object_key_is_content_addressed() {
        let a = png(b"same bytes");
        let b = ImageAttachment::new("other-name.png", "image/png", &b"same bytes"[..]);
        assert_eq!(a.object_key(&conversation()), b.object_key(&conversation()));
        assert!(a.object_key(&conversation()).starts_with("u1_u2/"));
        assert!(a.object_key(&conversation()).ends_with(".png"));
        assert_eq!(a.content_hash().len(), 64);
    }

    #[tokio::test]
    async fn test_memory_store_dedupes() {
        let store = MemoryObjectStore::new("https://cdn.example.com/");
        let image = png(b"pixels");
        let key = image.object_key(&conversation());

        let first = store.upload(&key, &image).await.unwrap();
        let second = store.upload(&key, &image).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, format!("https://cdn.example.com/{}", key));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key).unwrap().1, "image/png");
    }

    #[test]
    fn test_http_store_url() {
        let store = HttpObjectStore::new("https://cdn.example.com/", None);
        assert_eq!(store.url_for("u1_u2/ab.png"), "https://cdn.example.com/u1_u2/ab.png");
    }
}
