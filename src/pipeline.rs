use std::path::Path;

use bytes::Bytes;
use tracing::{info, warn};

use crate::caption;
use crate::error::AppError;
use crate::gemini::Captioner;
use crate::store::ObjectStore;

/// Runs the upload-and-caption pipeline for one received file and returns the
/// stored image key.
///
/// The image and its caption record are staged in a directory private to this
/// request; `TempDir` removes it on every exit path, including early aborts.
/// The record is uploaded before the image so that a failure between the two
/// writes leaves an invisible orphan record rather than an uncaptioned image.
pub async fn run_upload(
    store: &dyn ObjectStore,
    captioner: &dyn Captioner,
    filename: &str,
    data: Bytes,
) -> Result<String, AppError> {
    let image_key = sanitize_filename(filename).ok_or(AppError::MissingFile)?;

    // Reject undecodable uploads before spending a generation call on them.
    image::load_from_memory(&data)
        .map_err(|e| AppError::InvalidUpload(format!("not a decodable image: {e}")))?;

    let staging = tempfile::tempdir()?;
    let image_path = staging.path().join(&image_key);
    tokio::fs::write(&image_path, &data).await?;

    let record_key = record_key(&image_key);

    let raw = captioner.generate(&data, "image/jpeg").await?;
    let record = caption::normalize(&raw);

    let record_path = staging.path().join(&record_key);
    let record_json = serde_json::to_vec_pretty(&record).map_err(std::io::Error::other)?;
    // A failed staging write aborts here, before anything reaches the bucket.
    tokio::fs::write(&record_path, &record_json).await?;

    let record_bytes = tokio::fs::read(&record_path).await?;
    store
        .write(&record_key, record_bytes.into(), "application/json")
        .await?;

    let image_bytes = tokio::fs::read(&image_path).await?;
    if let Err(e) = store.write(&image_key, image_bytes.into(), "image/jpeg").await {
        warn!(record = %record_key, "caption record uploaded without its image");
        return Err(e);
    }

    info!(image = %image_key, record = %record_key, "upload complete");
    Ok(image_key)
}

/// Derives the caption record key from an image key: same basename, extension
/// replaced with `.json`. Only the final extension is replaced.
pub fn record_key(image_key: &str) -> String {
    match image_key.rsplit_once('.') {
        Some((basename, _)) => format!("{basename}.json"),
        None => format!("{image_key}.json"),
    }
}

/// Reduces a client-supplied filename to its final path component, refusing
/// empty or path-only names.
fn sanitize_filename(raw: &str) -> Option<String> {
    Path::new(raw)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::caption::CaptionRecord;
    use crate::store::memory::MemoryStore;

    struct StubCaptioner(String);

    #[async_trait]
    impl Captioner for StubCaptioner {
        async fn generate(&self, _image: &[u8], _mime_type: &str) -> Result<String, AppError> {
            Ok(self.0.clone())
        }
    }

    struct FailingCaptioner;

    #[async_trait]
    impl Captioner for FailingCaptioner {
        async fn generate(&self, _image: &[u8], _mime_type: &str) -> Result<String, AppError> {
            Err(AppError::Generation("quota exhausted".to_owned()))
        }
    }

    fn tiny_jpeg() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(4, 4));
        let mut buf = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut buf),
            image::ImageOutputFormat::Jpeg(85),
        )
        .unwrap();
        buf
    }

    #[test]
    fn record_key_replaces_final_extension() {
        assert_eq!(record_key("cat.jpg"), "cat.json");
        assert_eq!(record_key("dog.jpeg"), "dog.json");
        assert_eq!(record_key("archive.tar.jpg"), "archive.tar.json");
        assert_eq!(record_key("noext"), "noext.json");
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_filename("cat.jpg").as_deref(), Some("cat.jpg"));
        assert_eq!(
            sanitize_filename("../../etc/cat.jpg").as_deref(),
            Some("cat.jpg")
        );
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename(".."), None);
    }

    #[tokio::test]
    async fn upload_stores_image_and_record() {
        let store = MemoryStore::new();
        let captioner = StubCaptioner(
            "```json\n{\"title\":\"Dog\",\"description\":\"A brown dog\"}\n```".to_owned(),
        );

        let key = run_upload(&store, &captioner, "dog.jpeg", tiny_jpeg().into())
            .await
            .unwrap();

        assert_eq!(key, "dog.jpeg");
        assert!(store.contains("dog.jpeg"));
        assert!(store.contains("dog.json"));

        let stored = store.read_text("dog.json").await.unwrap();
        assert_eq!(
            caption::parse_stored(&stored),
            CaptionRecord {
                title: "Dog".into(),
                description: "A brown dog".into(),
            }
        );
    }

    #[tokio::test]
    async fn malformed_caption_text_degrades_to_fallback_record() {
        let store = MemoryStore::new();
        let captioner = StubCaptioner("not json at all".to_owned());

        run_upload(&store, &captioner, "cat.jpg", tiny_jpeg().into())
            .await
            .unwrap();

        let stored = store.read_text("cat.json").await.unwrap();
        assert_eq!(caption::parse_stored(&stored), CaptionRecord::fallback());
    }

    #[tokio::test]
    async fn generation_failure_aborts_without_writing() {
        let store = MemoryStore::new();

        let err = run_upload(&store, &FailingCaptioner, "cat.jpg", tiny_jpeg().into())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Generation(_)));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn undecodable_upload_is_rejected_before_generation() {
        let store = MemoryStore::new();
        let captioner = FailingCaptioner;

        let err = run_upload(&store, &captioner, "cat.jpg", Bytes::from_static(b"not an image"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidUpload(_)));
        assert_eq!(store.len(), 0);
    }
}
