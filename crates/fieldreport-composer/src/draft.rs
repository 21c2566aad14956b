//! Draft autosave and restore.
//!
//! One draft slot per composer. Every save replaces the slot wholesale.
//! Staged photo references are not persisted: image blocks are saved as
//! empty shells plus a count of the photos they held, so a restored
//! document can ask for the photos to be re-attached.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::error::StoreError;
use crate::model::SectionModel;
use crate::types::{HeaderFields, Section, SectionId, SectionPayload};

/// Key of the single draft slot.
pub const DRAFT_KEY: &str = "fieldreport_draft:current";

/// Photos an image block held when its draft was saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedPhotos {
    pub section: SectionId,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSnapshot {
    pub header: HeaderFields,
    /// Image blocks carry no photos
    pub sections: Vec<Section>,
    pub section_counter: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detached_photos: Vec<DetachedPhotos>,
    pub saved_at: DateTime<Utc>,
}

impl DraftSnapshot {
    pub fn capture(
        header: &HeaderFields,
        model: &SectionModel,
        remote_id: Option<&str>,
        saved_at: DateTime<Utc>,
    ) -> Self {
        let mut detached_photos = Vec::new();
        let sections = model
            .sections()
            .iter()
            .map(|section| match &section.payload {
                SectionPayload::ImageBlock(block) => {
                    if !block.is_empty() {
                        detached_photos.push(DetachedPhotos {
                            section: section.id,
                            count: block.photo_count(),
                        });
                    }
                    Section {
                        id: section.id,
                        payload: SectionPayload::ImageBlock(block.emptied()),
                    }
                }
                _ => section.clone(),
            })
            .collect();

        Self {
            header: header.clone(),
            sections,
            section_counter: model.counter(),
            remote_id: remote_id.map(str::to_string),
            detached_photos,
            saved_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.saved_at)
    }

    /// Future-dated snapshots (clock skew) count as fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, freshness: chrono::Duration) -> bool {
        self.age(now) < freshness
    }

    pub fn into_restored(self) -> RestoredDraft {
        RestoredDraft {
            header: self.header,
            model: SectionModel::from_parts(self.sections, self.section_counter),
            remote_id: self.remote_id,
            detached_photos: self.detached_photos,
        }
    }
}

/// A snapshot turned back into live state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredDraft {
    pub header: HeaderFields,
    pub model: SectionModel,
    pub remote_id: Option<String>,
    pub detached_photos: Vec<DetachedPhotos>,
}

/// The durable draft slot.
pub trait DraftStore: Send + Sync {
    fn load(&self) -> Result<Option<DraftSnapshot>, StoreError>;

    fn save(&self, snapshot: &DraftSnapshot) -> Result<(), StoreError>;

    fn clear(&self) -> Result<(), StoreError>;
}

impl<S: DraftStore + ?Sized> DraftStore for std::sync::Arc<S> {
    fn load(&self) -> Result<Option<DraftSnapshot>, StoreError> {
        (**self).load()
    }

    fn save(&self, snapshot: &DraftSnapshot) -> Result<(), StoreError> {
        (**self).save(snapshot)
    }

    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
}

/// In-memory slot. Stores serialized JSON so it round-trips like the
/// durable backend does.
#[derive(Debug, Default)]
pub struct MemoryDraftSlot {
    slot: Mutex<Option<String>>,
}

impl MemoryDraftSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<String>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn put_raw(&self, raw: &str) {
        *self.slot() = Some(raw.to_string());
    }
}

impl DraftStore for MemoryDraftSlot {
    fn load(&self) -> Result<Option<DraftSnapshot>, StoreError> {
        self.slot()
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(StoreError::from)
    }

    fn save(&self, snapshot: &DraftSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string(snapshot)?;
        *self.slot() = Some(json);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.slot() = None;
        Ok(())
    }
}

/// Debounce timer: every mutation pushes the deadline out again.
#[derive(Debug, Clone)]
pub struct Autosave {
    debounce: Duration,
    deadline: Option<Instant>,
}

impl Autosave {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            deadline: None,
        }
    }

    pub fn mark_dirty(&mut self, now: Instant) {
        self.deadline = Some(now + self.debounce);
    }

    pub fn is_dirty(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once, when the deadline has passed. Resets the timer.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

/// Result of looking at the draft slot on start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftCheck {
    Empty,
    /// Young enough to offer for restoration
    Offer(Box<DraftSnapshot>),
    /// Older than the freshness window; already cleared
    DiscardedStale,
    /// Could not be decoded; already cleared
    DiscardedCorrupt,
}

/// Inspect the slot. Stale or unreadable drafts are cleared and logged,
/// never surfaced as errors.
pub fn check_draft(
    store: &impl DraftStore,
    now: DateTime<Utc>,
    freshness: chrono::Duration,
) -> Result<DraftCheck, StoreError> {
    let snapshot = match store.load() {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return Ok(DraftCheck::Empty),
        Err(StoreError::Serialization(err)) => {
            tracing::warn!(error = %err, "discarding unreadable draft");
            store.clear()?;
            return Ok(DraftCheck::DiscardedCorrupt);
        }
        Err(err) => return Err(err),
    };

    if snapshot.is_fresh(now, freshness) {
        tracing::debug!(saved_at = %snapshot.saved_at, "found draft to offer");
        Ok(DraftCheck::Offer(Box::new(snapshot)))
    } else {
        tracing::warn!(
            saved_at = %snapshot.saved_at,
            age_hours = snapshot.age(now).num_hours(),
            "discarding stale draft"
        );
        store.clear()?;
        Ok(DraftCheck::DiscardedStale)
    }
}
