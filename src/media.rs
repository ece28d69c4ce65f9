use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::storage::StorageClient;

/// A file received in a multipart request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: String,
    pub body: Bytes,
}

/// Where an uploaded file ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub public_id: String,
    pub url: String,
}

#[derive(Clone)]
pub struct MediaService {
    storage: Arc<dyn StorageClient>,
}

impl MediaService {
    pub fn new(storage: Arc<dyn StorageClient>) -> Self {
        Self { storage }
    }

    pub async fn upload(&self, file: UploadedFile) -> anyhow::Result<StoredMedia> {
        anyhow::ensure!(!file.body.is_empty(), "uploaded file is empty");

        let public_id = Uuid::new_v4().simple().to_string();
        let content_type = if file.content_type.is_empty() {
            content_type_from_name(file.file_name.as_deref()).unwrap_or("application/octet-stream")
        } else {
            file.content_type.as_str()
        };
        let size = file.body.len();

        self.storage
            .put_object(&public_id, file.body.clone(), content_type)
            .await
            .with_context(|| format!("upload media {}", public_id))?;

        let url = self.storage.public_url(&public_id);
        info!(%public_id, size, content_type, "media uploaded");
        Ok(StoredMedia { public_id, url })
    }

    /// Best effort: a failed delete only leaves an orphaned object behind.
    pub async fn delete(&self, public_id: &str) -> bool {
        match self.storage.delete_object(public_id).await {
            Ok(()) => {
                debug!(%public_id, "media deleted");
                true
            }
            Err(e) => {
                warn!(error = ?e, %public_id, "media delete failed");
                false
            }
        }
    }
}

/// `https://host/bucket/abc_small.jpg` -> `abc`
pub fn extract_public_id(url: &str) -> &str {
    let last = url.rsplit('/').next().unwrap_or(url);
    let stem = last.split('.').next().unwrap_or(last);
    stem.split('_').next().unwrap_or(stem)
}

fn content_type_from_name(name: Option<&str>) -> Option<&'static str> {
    let ext = name?.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::FakeStorage;

    fn file(body: &'static [u8]) -> UploadedFile {
        UploadedFile {
            file_name: Some("me.png".into()),
            content_type: "image/png".into(),
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn public_id_from_url() {
        assert_eq!(extract_public_id("https://cdn.example.com/media/abc123.jpg"), "abc123");
        assert_eq!(extract_public_id("https://cdn.example.com/v17/abc_thumb.png"), "abc");
        assert_eq!(extract_public_id("https://cdn.example.com/media/abc"), "abc");
        assert_eq!(extract_public_id("plain"), "plain");
    }

    #[test]
    fn content_type_guess() {
        assert_eq!(content_type_from_name(Some("a.JPG")), Some("image/jpeg"));
        assert_eq!(content_type_from_name(Some("a.webp")), Some("image/webp"));
        assert_eq!(content_type_from_name(Some("noext")), None);
        assert_eq!(content_type_from_name(None), None);
    }

    #[tokio::test]
    async fn upload_returns_url_that_maps_back_to_id() {
        let storage = Arc::new(FakeStorage::default());
        let media = MediaService::new(storage.clone());

        let stored = media.upload(file(b"png-bytes")).await.expect("upload");
        assert_eq!(extract_public_id(&stored.url), stored.public_id);
        assert_eq!(storage.puts(), vec![stored.public_id.clone()]);
    }

    #[tokio::test]
    async fn upload_rejects_empty_file() {
        let storage = Arc::new(FakeStorage::default());
        let media = MediaService::new(storage.clone());
        assert!(media.upload(file(b"")).await.is_err());
        assert!(storage.puts().is_empty());
    }

    #[tokio::test]
    async fn upload_failure_is_reported() {
        let storage = Arc::new(FakeStorage::failing_uploads());
        let media = MediaService::new(storage);
        assert!(media.upload(file(b"data")).await.is_err());
    }

    #[tokio::test]
    async fn delete_swallows_errors() {
        let storage = Arc::new(FakeStorage::failing_deletes());
        let media = MediaService::new(storage.clone());
        assert!(!media.delete("abc").await);
        assert_eq!(storage.deletes(), vec!["abc".to_string()]);
    }
}
