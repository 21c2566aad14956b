use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{MediaStore, StagedImage};
use crate::error::StoreError;
use crate::types::StagedImageId;

/// Process-local media store for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryMediaStore {
    // UUIDv7 keys keep capture order
    images: Mutex<BTreeMap<StagedImageId, StagedImage>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn images(&self) -> MutexGuard<'_, BTreeMap<StagedImageId, StagedImage>> {
        self.images.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MediaStore for MemoryMediaStore {
    fn put(&self, image: &StagedImage) -> Result<(), StoreError> {
        self.images().insert(image.id, image.clone());
        Ok(())
    }

    fn get(&self, id: StagedImageId) -> Result<Option<StagedImage>, StoreError> {
        Ok(self.images().get(&id).cloned())
    }

    fn get_all(&self) -> Result<Vec<StagedImage>, StoreError> {
        Ok(self.images().values().cloned().collect())
    }

    fn delete(&self, id: StagedImageId) -> Result<bool, StoreError> {
        Ok(self.images().remove(&id).is_some())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.images().clear();
        Ok(())
    }

    fn mark_uploaded(&self, id: StagedImageId, url: &str) -> Result<bool, StoreError> {
        Ok(match self.images().get_mut(&id) {
            Some(image) => {
                image.uploaded = true;
                image.remote_url = Some(url.to_string());
                true
            }
            None => false,
        })
    }
}
