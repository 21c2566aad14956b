//! Staged media: photos captured locally and held until a submit resolves
//! them to remote URLs.
//!
//! [`MediaStore`] is the durable key-value backend. [`StagedMediaStore`]
//! sits in front of it, normalizes incoming files and caches previews.

mod memory;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use fieldreport_common::ComposerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{StageError, StoreError};
use crate::normalize::Normalizer;
use crate::types::StagedImageId;

pub use memory::MemoryMediaStore;

/// A normalized photo waiting in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedImage {
    pub id: StagedImageId,
    /// Normalized JPEG
    pub bytes: Bytes,
    pub original_name: String,
    pub created_at: DateTime<Utc>,
    pub uploaded: bool,
    /// Set once an upload succeeded; reused by later submits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
}

impl StagedImage {
    pub fn new(bytes: Bytes, original_name: impl Into<String>) -> Self {
        Self {
            id: StagedImageId::new(),
            bytes,
            original_name: original_name.into(),
            created_at: Utc::now(),
            uploaded: false,
            remote_url: None,
        }
    }

    /// Remote URL of a completed upload.
    pub fn uploaded_url(&self) -> Option<&str> {
        self.remote_url.as_deref().filter(|_| self.uploaded)
    }
}

/// Durable storage for staged images. Must survive process restarts for
/// anything but test/ephemeral backends.
pub trait MediaStore: Send + Sync {
    fn put(&self, image: &StagedImage) -> Result<(), StoreError>;

    fn get(&self, id: StagedImageId) -> Result<Option<StagedImage>, StoreError>;

    /// All images, oldest first.
    fn get_all(&self) -> Result<Vec<StagedImage>, StoreError>;

    /// Returns whether an image was removed.
    fn delete(&self, id: StagedImageId) -> Result<bool, StoreError>;

    fn clear(&self) -> Result<(), StoreError>;

    /// Record a successful upload. Returns false when the id is unknown.
    fn mark_uploaded(&self, id: StagedImageId, url: &str) -> Result<bool, StoreError>;
}

impl<S: MediaStore + ?Sized> MediaStore for Arc<S> {
    fn put(&self, image: &StagedImage) -> Result<(), StoreError> {
        (**self).put(image)
    }

    fn get(&self, id: StagedImageId) -> Result<Option<StagedImage>, StoreError> {
        (**self).get(id)
    }

    fn get_all(&self) -> Result<Vec<StagedImage>, StoreError> {
        (**self).get_all()
    }

    fn delete(&self, id: StagedImageId) -> Result<bool, StoreError> {
        (**self).delete(id)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }

    fn mark_uploaded(&self, id: StagedImageId, url: &str) -> Result<bool, StoreError> {
        (**self).mark_uploaded(id, url)
    }
}

/// One input file for batch staging.
#[derive(Debug, Clone)]
pub struct RawFile {
    pub name: String,
    pub bytes: Bytes,
}

impl RawFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Progress of a batch staging run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageProgress {
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
pub struct StageBatchReport {
    pub staged: Vec<StagedImage>,
    pub failed: Vec<StageError>,
}

/// Front of the media store: normalization, batching and preview cache.
///
/// Cloning shares the backend and the cache.
pub struct StagedMediaStore<S> {
    store: Arc<S>,
    normalizer: Normalizer,
    batch_size: usize,
    progress_threshold: usize,
    previews: Arc<Mutex<HashMap<StagedImageId, Bytes>>>,
}

impl<S> Clone for StagedMediaStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            normalizer: self.normalizer,
            batch_size: self.batch_size,
            progress_threshold: self.progress_threshold,
            previews: self.previews.clone(),
        }
    }
}

impl<S: MediaStore> StagedMediaStore<S> {
    pub fn new(store: S, config: &ComposerConfig) -> Self {
        Self::from_shared(Arc::new(store), config)
    }

    pub fn from_shared(store: Arc<S>, config: &ComposerConfig) -> Self {
        Self {
            store,
            normalizer: Normalizer::from_config(config),
            batch_size: config.stage_batch_size.max(1),
            progress_threshold: config.stage_progress_threshold,
            previews: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn backend(&self) -> &S {
        &self.store
    }

    /// Normalize and persist one file.
    pub fn stage(&self, raw: &[u8], file_name: &str) -> Result<StagedImage, StageError> {
        let bytes = self
            .normalizer
            .normalize(raw)
            .map_err(|source| StageError::Normalize {
                file: file_name.to_string(),
                source,
            })?;
        let image = StagedImage::new(bytes, file_name);
        self.store.put(&image)?;
        tracing::debug!(id = %image.id, file = file_name, size = image.bytes.len(), "staged image");
        Ok(image)
    }

    /// Stage many files in small batches. Files of one batch are normalized
    /// concurrently on the blocking pool; the task yields between batches.
    ///
    /// A file that fails is recorded and skipped. `on_progress` is only
    /// called when the run is larger than the progress threshold.
    pub async fn stage_batch(
        &self,
        files: Vec<RawFile>,
        mut on_progress: impl FnMut(StageProgress),
    ) -> StageBatchReport
    where
        S: 'static,
    {
        let total = files.len();
        let report_progress = total > self.progress_threshold;
        let mut report = StageBatchReport::default();

        for (n, chunk) in files.chunks(self.batch_size).enumerate() {
            if n > 0 {
                tokio::task::yield_now().await;
            }
            let tasks = chunk.iter().cloned().map(|file| {
                let media = self.clone();
                tokio::task::spawn_blocking(move || media.stage(&file.bytes, &file.name))
            });
            let results = n0_future::join_all(tasks).await;
            for (file, result) in chunk.iter().zip(results) {
                let result = result.unwrap_or_else(|err| {
                    Err(StageError::Interrupted {
                        file: file.name.clone(),
                        reason: err.to_string(),
                    })
                });
                match result {
                    Ok(image) => report.staged.push(image),
                    Err(err) => {
                        tracing::warn!(file = %file.name, error = %err, "skipping file");
                        report.failed.push(err);
                    }
                }
            }
        if report_progress {
                on_progress(StageProgress {
                    done: report.staged.len() + report.failed.len(),
                    total,
                });
            }
        }

        tracing::info!(
            staged = report.staged.len(),
            failed = report.failed.len(),
            "batch staging finished"
        );
        report
    }

    pub fn get(&self, id: StagedImageId) -> Result<Option<StagedImage>, StoreError> {
        self.store.get(id)
    }

    /// Delete an image and drop its cached preview.
    pub fn remove(&self, id: StagedImageId) -> Result<bool, StoreError> {
        self.evict_preview(id);
        self.store.delete(id)
    }

    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.previews
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.store.clear()
    }

    pub fn list_all(&self) -> Result<Vec<StagedImage>, StoreError> {
        self.store.get_all()
    }

    pub fn mark_uploaded(&self, id: StagedImageId, url: &str) -> Result<bool, StoreError> {
        self.store.mark_uploaded(id, url)
    }

    /// Preview thumbnail, generated on first request and cached.
    ///
    /// A preview that cannot be generated is logged and reported as `None`.
    pub fn preview(&self, id: StagedImageId) -> Result<Option<Bytes>, StoreError> {
        if let Some(hit) = self
            .previews
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
        {
            return Ok(Some(hit.clone()));
        }
        let Some(image) = self.store.get(id)? else {
            return Ok(None);
        };
        match self.normalizer.thumbnail(&image.bytes) {
            Ok(thumb) => {
                self.previews
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id, thumb.clone());
                Ok(Some(thumb))
            }
            Err(err) => {
                tracing::warn!(%id, error = %err, "could not build preview");
                Ok(None)
            }
        }
    }

    /// Number of cached previews.
    pub fn cached_previews(&self) -> usize {
        self.previews
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn evict_preview(&self, id: StagedImageId) {
        self.previews
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::*;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([90, 90, 20]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    pub(crate) fn small_config() -> ComposerConfig {
        ComposerConfig {
            max_image_width: 64,
            preview_width: 16,
            stage_batch_size: 2,
            stage_progress_threshold: 3,
            ..ComposerConfig::default()
        }
    }

    #[test]
    fn stage_normalizes_and_persists() {
        let media = StagedMediaStore::new(MemoryMediaStore::new(), &small_config());
        let image = media.stage(&png_bytes(128, 32), "wall.png").unwrap();
        assert_eq!(image.original_name, "wall.png");
        assert!(!image.uploaded);
        let stored = media.get(image.id).unwrap().unwrap();
        assert_eq!(stored, image);
        let decoded = image::load_from_memory(&stored.bytes).unwrap();
        assert_eq!(decoded.width(), 64);
    }

    #[tokio::test]
    async fn batch_skips_bad_files_and_reports_progress() {
        let media = StagedMediaStore::new(MemoryMediaStore::new(), &small_config());
        let files = vec![
            RawFile::new("a.png", png_bytes(8, 8)),
            RawFile::new("broken.jpg", b"nope".to_vec()),
            RawFile::new("c.png", png_bytes(8, 8)),
            RawFile::new("d.png", png_bytes(8, 8)),
            RawFile::new("e.png", png_bytes(8, 8)),
        ];
        let mut seen = Vec::new();
        let report = media.stage_batch(files, |p| seen.push(p)).await;

        // batch members run concurrently but report in input order
        assert_eq!(
            report
                .staged
                .iter()
                .map(|i| i.original_name.as_str())
                .collect::<Vec<_>>(),
            ["a.png", "c.png", "d.png", "e.png"]
        );
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(
            &report.failed[0],
            StageError::Normalize { file, .. } if file == "broken.jpg"
        ));
        assert_eq!(
            seen.iter().map(|p| p.done).collect::<Vec<_>>(),
            [2, 4, 5]
        );
        assert_eq!(media.list_all().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn small_batches_do_not_report_progress() {
        let media = StagedMediaStore::new(MemoryMediaStore::new(), &small_config());
        let files = vec![
            RawFile::new("a.png", png_bytes(8, 8)),
            RawFile::new("b.png", png_bytes(8, 8)),
        ];
        let mut calls = 0;
        media.stage_batch(files, |_| calls += 1).await;
        assert_eq!(calls, 0);
    }

    #[test]
    fn remove_evicts_preview() {
        let media = StagedMediaStore::new(MemoryMediaStore::new(), &small_config());
        let image = media.stage(&png_bytes(64, 64), "x.png").unwrap();
        let preview = media.preview(image.id).unwrap().unwrap();
        assert_eq!(image::load_from_memory(&preview).unwrap().width(), 16);
        assert_eq!(media.cached_previews(), 1);

        assert!(media.remove(image.id).unwrap());
        assert_eq!(media.cached_previews(), 0);
        assert!(media.get(image.id).unwrap().is_none());
        assert!(media.preview(image.id).unwrap().is_none());
    }

    #[test]
    fn mark_uploaded_records_url() {
        let media = StagedMediaStore::new(MemoryMediaStore::new(), &small_config());
        let image = media.stage(&png_bytes(8, 8), "x.png").unwrap();
        assert!(media.mark_uploaded(image.id, "https://cdn/x.jpg").unwrap());
        let stored = media.get(image.id).unwrap().unwrap();
        assert_eq!(stored.uploaded_url(), Some("https://cdn/x.jpg"));
        assert!(!media
            .mark_uploaded(StagedImageId::new(), "https://cdn/y.jpg")
            .unwrap());
    }
}
