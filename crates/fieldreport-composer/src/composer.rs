//! The composer context: one report being edited.
//!
//! Owns the header, the [`SectionModel`], the selection set and the gesture
//! state, and wires them to the staged media store and the draft slot.
//! Every successful command is broadcast as a [`ComposerEvent`] and marks
//! the draft dirty. Nothing is global, so several composers can coexist.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use fieldreport_common::{
    ComposerConfig, Directory, DirectoryEntry, FieldReportError, ImageUploader, ReportApi,
    TokenProvider,
};
use tokio::sync::broadcast;
use web_time::Instant;

use crate::draft::{Autosave, DetachedPhotos, DraftCheck, DraftSnapshot, DraftStore, check_draft};
use crate::error::{CaptureError, ModelError, StoreError, SubmitError};
use crate::model::{ModelChange, SectionModel};
use crate::reconcile::{Reconciler, SubmitOutcome, SubmitReport, SubmitTicket};
use crate::reorder::{DragSource, DropTarget, InputKind, Point, ReorderController};
use crate::staging::{MediaStore, StagedImage, StagedMediaStore};
use crate::types::{
    HeaderFields, ImageLayout, ImageListRef, ImageRef, Section, SectionId, SectionKind,
    SectionPatch,
};

const EVENT_CAPACITY: usize = 64;

/// Broadcast to subscribers after each state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComposerEvent {
    Model(ModelChange),
    HeaderChanged,
    SelectionChanged,
    DraftSaved { at: DateTime<Utc> },
    DraftCleared,
    DraftRestored { detached_photos: Vec<DetachedPhotos> },
    Submitted { remote_id: String },
    /// Document discarded; a new generation started
    DocumentReset,
}

/// What a restore brought back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub sections: usize,
    /// Image blocks that came back empty and held photos before
    pub detached_photos: Vec<DetachedPhotos>,
}

pub struct Composer<S, D> {
    header: HeaderFields,
    model: SectionModel,
    remote_id: Option<String>,
    selection: BTreeSet<SectionId>,
    media: StagedMediaStore<S>,
    drafts: D,
    autosave: Autosave,
    reorder: ReorderController,
    /// Bumped when the document is replaced or discarded
    generation: u64,
    /// Bumped on every edit
    revision: u64,
    config: ComposerConfig,
    events: broadcast::Sender<ComposerEvent>,
}

impl<S: MediaStore, D: DraftStore> Composer<S, D> {
    pub fn new(media: StagedMediaStore<S>, drafts: D, config: ComposerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            header: HeaderFields::default(),
            model: SectionModel::new(),
            remote_id: None,
            selection: BTreeSet::new(),
            media,
            drafts,
            autosave: Autosave::new(config.autosave_debounce()),
            reorder: ReorderController::new(config.hold_delay(), config.drag_threshold_px),
            generation: 0,
            revision: 0,
            config,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ComposerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ComposerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn header(&self) -> &HeaderFields {
        &self.header
    }

    pub fn model(&self) -> &SectionModel {
        &self.model
    }

    pub fn sections(&self) -> &[Section] {
        self.model.sections()
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn media(&self) -> &StagedMediaStore<S> {
        &self.media
    }

    pub fn drafts(&self) -> &D {
        &self.drafts
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_dirty(&self) -> bool {
        self.autosave.is_dirty()
    }

    pub fn autosave_deadline(&self) -> Option<Instant> {
        self.autosave.deadline()
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.autosave.mark_dirty(Instant::now());
    }

    fn commit(&mut self, change: ModelChange) -> ModelChange {
        if !change.is_noop() {
            self.touch();
            self.emit(ComposerEvent::Model(change.clone()));
        }
        change
    }

    // header

    pub fn update_header(&mut self, edit: impl FnOnce(&mut HeaderFields)) {
        let before = self.header.clone();
        edit(&mut self.header);
        if self.header != before {
            self.touch();
            self.emit(ComposerEvent::HeaderChanged);
        }
    }

    /// Link the document to an existing remote report, so the next submit
    /// updates it instead of creating a new one.
    pub fn set_remote_id(&mut self, id: impl Into<String>) {
        self.remote_id = Some(id.into());
        self.touch();
    }

    /// Take store id and name (and brand, when the entry carries one) from
    /// a directory row.
    pub fn apply_store_entry(&mut self, entry: &DirectoryEntry) {
        self.update_header(|header| {
            header.store_id = entry.id.clone();
            header.store_name = entry.name.clone();
            if let Some(brand) = entry.extra_str("brand") {
                header.brand = brand.to_string();
            }
        });
    }

    // sections

    pub fn add_section(&mut self, kind: SectionKind) -> SectionId {
        let (id, change) = self.model.add_section(kind);
        self.commit(change);
        id
    }

    pub fn add_image_block(&mut self, layout: ImageLayout) -> SectionId {
        let (id, change) = self.model.add_image_block(layout);
        self.commit(change);
        id
    }

    pub fn remove_section(&mut self, id: SectionId) -> Result<ModelChange, ModelError> {
        let change = self.model.remove_section(id)?;
        if self.selection.remove(&id) {
            self.emit(ComposerEvent::SelectionChanged);
        }
        Ok(self.commit(change))
    }

    pub fn update_section(
        &mut self,
        id: SectionId,
        patch: SectionPatch,
    ) -> Result<ModelChange, ModelError> {
        let change = self.model.update_section_payload(id, patch)?;
        Ok(self.commit(change))
    }

    pub fn move_section(&mut self, id: SectionId, to_index: usize) -> Result<ModelChange, ModelError> {
        let change = self.model.move_section(id, to_index)?;
        Ok(self.commit(change))
    }

    pub fn duplicate_section(&mut self, id: SectionId) -> Result<SectionId, ModelError> {
        let (new_id, change) = self.model.duplicate_section(id)?;
        self.commit(change);
        Ok(new_id)
    }

    // photos

    pub fn attach_image(
        &mut self,
        list: ImageListRef,
        image: ImageRef,
    ) -> Result<Option<ModelChange>, ModelError> {
        let change = self.model.attach_image(list, image)?;
        Ok(change.map(|c| self.commit(c)))
    }

    /// Stage a captured photo and attach it in one step. The list is checked
    /// first so nothing is staged for an invalid target.
    pub fn capture_photo(
        &mut self,
        list: ImageListRef,
        raw: &[u8],
        file_name: &str,
    ) -> Result<StagedImage, CaptureError> {
        self.model.photos(list)?;
        let staged = self.media.stage(raw, file_name)?;
        self.attach_image(list, ImageRef::staged(staged.id))?;
        Ok(staged)
    }

    pub fn remove_image(
        &mut self,
        list: ImageListRef,
        image: &ImageRef,
    ) -> Result<ModelChange, ModelError> {
        let change = self.model.remove_image(list, image)?;
        Ok(self.commit(change))
    }

    pub fn move_image_within(
        &mut self,
        list: ImageListRef,
        from: usize,
        to: usize,
    ) -> Result<ModelChange, ModelError> {
        let change = self.model.move_image_within(list, from, to)?;
        if from == to {
            return Ok(change);
        }
        Ok(self.commit(change))
    }

    pub fn move_image_across(
        &mut self,
        from: ImageListRef,
        index: usize,
        to: ImageListRef,
    ) -> Result<ModelChange, ModelError> {
        let change = self.model.move_image_across(from, index, to)?;
        Ok(self.commit(change))
    }

    // selection

    pub fn selection(&self) -> &BTreeSet<SectionId> {
        &self.selection
    }

    /// Returns whether the section is selected afterwards.
    pub fn toggle_selected(&mut self, id: SectionId) -> Result<bool, ModelError> {
        if self.model.index_of(id).is_none() {
            return Err(ModelError::UnknownSection(id));
        }
        let selected = if self.selection.remove(&id) {
            false
        } else {
            self.selection.insert(id);
            true
        };
        self.emit(ComposerEvent::SelectionChanged);
        Ok(selected)
    }

    pub fn clear_selection(&mut self) {
        if !self.selection.is_empty() {
            self.selection.clear();
            self.emit(ComposerEvent::SelectionChanged);
        }
    }

    /// Remove every selected section and clear the selection.
    pub fn remove_selected(&mut self) -> Vec<ModelChange> {
        let ids = std::mem::take(&mut self.selection);
        let mut changes = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(change) = self.model.remove_section(id) {
                changes.push(self.commit(change));
            }
        }
        self.emit(ComposerEvent::SelectionChanged);
        changes
    }

    /// Duplicate every selected section, in document order. The selection
    /// is kept.
    pub fn duplicate_selected(&mut self) -> Vec<SectionId> {
        let ordered: Vec<SectionId> = self
            .model
            .ids()
            .into_iter()
            .filter(|id| self.selection.contains(id))
            .collect();
        let mut created = Vec::with_capacity(ordered.len());
        for id in ordered {
            if let Ok((new_id, change)) = self.model.duplicate_section(id) {
                self.commit(change);
                created.push(new_id);
            }
        }
        created
    }

    // reorder gestures

    pub fn pointer_down(&mut self, source: DragSource, kind: InputKind, at: Point, now: Instant) {
        self.reorder.pointer_down(source, kind, at, now);
    }

    pub fn pointer_move(&mut self, at: Point, hit: Option<DropTarget>, now: Instant) -> bool {
        self.reorder.pointer_move(at, hit, now)
    }

    pub fn tick(&mut self, now: Instant) -> bool {
        self.reorder.tick(now)
    }

    pub fn drag_target(&self) -> Option<DropTarget> {
        self.reorder.target()
    }

    pub fn cancel_drag(&mut self) {
        self.reorder.cancel();
    }

    /// Finish a gesture and apply the resulting reorder, if any.
    pub fn pointer_up(&mut self, now: Instant) -> Result<Option<ModelChange>, ModelError> {
        let Some(command) = self.reorder.pointer_up(now, &self.model) else {
            return Ok(None);
        };
        let change = command.apply(&mut self.model)?;
        Ok(Some(self.commit(change)))
    }

    // drafts

    /// Save the draft if the debounce deadline has passed.
    pub fn poll_autosave(&mut self, now: Instant) -> Result<bool, StoreError> {
        if !self.autosave.take_due(now) {
            return Ok(false);
        }
        self.save_draft()?;
        Ok(true)
    }

    /// Save now, regardless of the debounce timer.
    pub fn flush_draft(&mut self) -> Result<(), StoreError> {
        self.autosave.cancel();
        self.save_draft()
    }

    fn save_draft(&mut self) -> Result<(), StoreError> {
        let at = Utc::now();
        let snapshot = DraftSnapshot::capture(&self.header, &self.model, self.remote_id(), at);
        if let Err(err) = self.drafts.save(&snapshot) {
            tracing::warn!(error = %err, "draft save failed");
            // retry on the next poll
            self.autosave.mark_dirty(Instant::now());
            return Err(err);
        }
        tracing::debug!(sections = snapshot.sections.len(), "draft saved");
        self.emit(ComposerEvent::DraftSaved { at });
        Ok(())
    }

    /// Look at the draft slot. Stale drafts are discarded here.
    pub fn check_draft(&self, now: DateTime<Utc>) -> Result<DraftCheck, StoreError> {
        check_draft(&self.drafts, now, self.config.draft_freshness())
    }

    /// Replace the document with an offered draft.
    pub fn restore(&mut self, snapshot: DraftSnapshot) -> RestoreReport {
        let restored = snapshot.into_restored();
        self.header = restored.header;
        self.model = restored.model;
        self.remote_id = restored.remote_id;
        self.reset_transient();
        let report = RestoreReport {
            sections: self.model.len(),
            detached_photos: restored.detached_photos,
        };
        tracing::info!(
            sections = report.sections,
            detached = report.detached_photos.len(),
            "draft restored"
        );
        self.emit(ComposerEvent::Model(ModelChange::Replaced));
        self.emit(ComposerEvent::DraftRestored {
            detached_photos: report.detached_photos.clone(),
        });
        report
    }

    /// The user declined the offered draft.
    pub fn decline_draft(&mut self) -> Result<(), StoreError> {
        self.drafts.clear()?;
        self.emit(ComposerEvent::DraftCleared);
        Ok(())
    }

    /// Throw the whole document away and start a new one.
    ///
    /// Staged photos the document referenced are released. Pending autosave
    /// is cancelled and any submit still in flight for the old document will
    /// be discarded when it completes.
    pub fn discard_document(&mut self) -> Result<(), StoreError> {
        for (_, id) in self.model.staged_images() {
            if let Err(err) = self.media.remove(id) {
                tracing::warn!(%id, error = %err, "could not release staged image");
            }
        }
        self.header = HeaderFields::default();
        self.model.clear();
        self.remote_id = None;
        self.reset_transient();
        tracing::info!(generation = self.generation, "document discarded");
        self.emit(ComposerEvent::DocumentReset);
        self.drafts.clear()?;
        self.emit(ComposerEvent::DraftCleared);
        Ok(())
    }

    fn reset_transient(&mut self) {
        self.generation += 1;
        self.revision = 0;
        self.autosave.cancel();
        self.reorder.cancel();
        self.selection.clear();
    }

    // submit

    /// Copy of the document for a submit attempt.
    pub fn begin_submit(&self) -> SubmitTicket {
        SubmitTicket {
            generation: self.generation,
            revision: self.revision,
            header: self.header.clone(),
            model: self.model.clone(),
            remote_id: self.remote_id.clone(),
        }
    }

    /// Apply a finished attempt. Outcomes from an older generation are
    /// rejected with [`SubmitError::Superseded`] and change nothing.
    pub fn apply_submit(&mut self, outcome: SubmitOutcome) -> Result<SubmitReport, SubmitError> {
        if outcome.generation != self.generation {
            tracing::warn!(
                outcome = outcome.generation,
                current = self.generation,
                "discarding submit result for a replaced document"
            );
            return Err(SubmitError::Superseded);
        }
        let report = outcome.result?;

        let change = self.model.resolve_staged(&report.resolved, &report.dropped);
        self.remote_id = Some(report.remote_id.clone());
        self.emit(ComposerEvent::Model(change));

        if outcome.revision == self.revision {
            self.autosave.cancel();
            match self.drafts.clear() {
                Ok(()) => self.emit(ComposerEvent::DraftCleared),
                Err(err) => tracing::warn!(error = %err, "could not clear draft after submit"),
            }
        } else {
            // edited while sending; keep a draft of the newer state
            self.touch();
        }

        if self.config.prune_after_submit {
            for id in report.resolved.keys() {
                if let Err(err) = self.media.remove(*id) {
                    tracing::warn!(%id, error = %err, "could not prune staged image");
                }
            }
        }

        self.emit(ComposerEvent::Submitted {
            remote_id: report.remote_id.clone(),
        });
        Ok(report)
    }

    /// Run a whole submit attempt with `reconciler`.
    ///
    /// The document is copied up front; the model is only touched again in
    /// [`Composer::apply_submit`] once the attempt has finished.
    pub async fn submit<U, R, T>(
        &mut self,
        reconciler: &Reconciler<'_, U, R, T>,
    ) -> Result<SubmitReport, SubmitError>
    where
        U: ImageUploader,
        R: ReportApi,
        T: TokenProvider,
    {
        let ticket = self.begin_submit();
        let media = self.media.clone();
        let outcome = reconciler.run(&media, ticket).await;
        self.apply_submit(outcome)
    }
}

/// Look a store up in the directory. A miss is [`FieldReportError::NotFound`].
pub async fn find_store(
    directory: &impl Directory,
    store_id: &str,
) -> Result<DirectoryEntry, FieldReportError> {
    let store_id = store_id.trim();
    directory.find_by_id(store_id).await?.ok_or_else(|| {
        tracing::debug!(store_id, "store not found in directory");
        FieldReportError::NotFound(format!("store {store_id}"))
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fieldreport_common::InMemoryDirectory;

    use super::*;
    use crate::draft::MemoryDraftSlot;
    use crate::reconcile::tests::{FakeApi, FakeUploader, header, token};
    use crate::staging::MemoryMediaStore;
    use crate::staging::tests::{png_bytes, small_config};
    use crate::types::PhotoCategory;

    type TestComposer = Composer<MemoryMediaStore, MemoryDraftSlot>;

    fn composer() -> TestComposer {
        let config = small_config();
        Composer::new(
            StagedMediaStore::new(MemoryMediaStore::new(), &config),
            MemoryDraftSlot::new(),
            config,
        )
    }

    fn later(c: &TestComposer) -> Instant {
        Instant::now() + c.config().autosave_debounce() + Duration::from_millis(5)
    }

    #[test]
    fn commands_broadcast_and_mark_dirty() {
        let mut c = composer();
        let mut rx = c.subscribe();
        let id = c.add_section(SectionKind::Comment);
        assert_eq!(
            rx.try_recv().unwrap(),
            ComposerEvent::Model(ModelChange::Added { id, index: 0 })
        );
        assert!(c.is_dirty());

        let now = later(&c);
        assert!(c.poll_autosave(now).unwrap());
        assert!(matches!(rx.try_recv().unwrap(), ComposerEvent::DraftSaved { .. }));
        assert!(!c.poll_autosave(now).unwrap());
        assert!(c.drafts().load().unwrap().is_some());
    }

    #[test]
    fn noop_moves_do_not_dirty() {
        let mut c = composer();
        let id = c.add_section(SectionKind::Comment);
        c.flush_draft().unwrap();
        c.move_section(id, 0).unwrap();
        assert!(!c.is_dirty());
    }

    #[test]
    fn selection_batches_remove_and_duplicate() {
        let mut c = composer();
        let a = c.add_section(SectionKind::ChecklistItem);
        let b = c.add_section(SectionKind::Comment);
        let d = c.add_section(SectionKind::WorkDescription);
        c.toggle_selected(d).unwrap();
        c.toggle_selected(a).unwrap();

        let copies = c.duplicate_selected();
        assert_eq!(copies.len(), 2);
        assert_eq!(c.model().ids(), [a, copies[0], b, d, copies[1]]);

        let removed = c.remove_selected();
        assert_eq!(removed.len(), 2);
        assert_eq!(c.model().ids(), [copies[0], b, copies[1]]);
        assert!(c.selection().is_empty());
        assert!(c.toggle_selected(a).is_err());
    }

    #[test]
    fn gesture_reorders_sections() {
        let mut c = composer();
        let a = c.add_section(SectionKind::ChecklistItem);
        let b = c.add_section(SectionKind::Comment);
        let t0 = Instant::now();
        c.pointer_down(DragSource::Section(a), InputKind::Mouse, Point::new(0, 0), t0);
        c.pointer_move(Point::new(0, 30), Some(DropTarget::Section(b)), t0);
        let change = c.pointer_up(t0).unwrap();
        assert_eq!(
            change,
            Some(ModelChange::Moved {
                id: a,
                from: 0,
                to: 1
            })
        );
        assert_eq!(c.model().ids(), [b, a]);
    }

    #[test]
    fn capture_photo_checks_target_before_staging() {
        let mut c = composer();
        let comment = c.add_section(SectionKind::Comment);
        let bad = ImageListRef::new(comment, PhotoCategory::Before);
        assert!(matches!(
            c.capture_photo(bad, &png_bytes(8, 8), "x.png"),
            Err(CaptureError::Model(ModelError::NotAnImageBlock(_)))
        ));
        assert!(c.media().list_all().unwrap().is_empty());

        let block = c.add_image_block(ImageLayout::BeforeAfter);
        let list = ImageListRef::new(block, PhotoCategory::Before);
        let staged = c.capture_photo(list, &png_bytes(8, 8), "x.png").unwrap();
        assert_eq!(c.model().photos(list).unwrap(), &[ImageRef::staged(staged.id)]);
    }

    #[test]
    fn stale_check_and_restore() {
        let mut c = composer();
        c.update_header(|h| h.brand = "Acme".into());
        let block = c.add_image_block(ImageLayout::Completed);
        let list = ImageListRef::new(block, PhotoCategory::Completed);
        c.capture_photo(list, &png_bytes(8, 8), "x.png").unwrap();
        c.flush_draft().unwrap();

        let check = c.check_draft(Utc::now()).unwrap();
        let DraftCheck::Offer(snapshot) = check else {
            panic!("expected a draft offer");
        };

        let mut fresh = composer();
        let mut rx = fresh.subscribe();
        let report = fresh.restore(*snapshot);
        assert_eq!(report.sections, 1);
        assert_eq!(report.detached_photos[0].count, 1);
        assert_eq!(fresh.header().brand, "Acme");
        assert!(fresh.model().photos(list).unwrap().is_empty());
        assert_eq!(rx.try_recv().unwrap(), ComposerEvent::Model(ModelChange::Replaced));

        let far = Utc::now() + chrono::Duration::hours(48);
        assert_eq!(c.check_draft(far).unwrap(), DraftCheck::DiscardedStale);
        assert_eq!(c.check_draft(Utc::now()).unwrap(), DraftCheck::Empty);
    }

    #[test]
    fn discard_clears_draft_and_bumps_generation() {
        let mut c = composer();
        c.add_section(SectionKind::Comment);
        c.flush_draft().unwrap();
        let generation = c.generation();
        c.discard_document().unwrap();
        assert_eq!(c.generation(), generation + 1);
        assert!(c.model().is_empty());
        assert!(!c.is_dirty());
        assert!(c.drafts().load().unwrap().is_none());
        // ids restart for the new document
        assert_eq!(c.add_section(SectionKind::Comment), SectionId(1));
    }

    #[test]
    fn discard_releases_staged_photos() {
        let mut c = composer();
        let block = c.add_image_block(ImageLayout::BeforeAfter);
        let list = ImageListRef::new(block, PhotoCategory::After);
        let staged = c.capture_photo(list, &png_bytes(8, 8), "x.png").unwrap();
        c.media().preview(staged.id).unwrap();
        // stock photos not in the document stay
        let loose = c.media().stage(&png_bytes(8, 8), "loose.png").unwrap();

        c.discard_document().unwrap();
        let left = c.media().list_all().unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, loose.id);
        assert_eq!(c.media().cached_previews(), 0);
    }

    #[tokio::test]
    async fn submit_rewrites_refs_clears_draft_and_prunes() {
        let mut c = composer();
        c.update_header(|h| *h = header());
        let block = c.add_image_block(ImageLayout::BeforeAfter);
        let before = ImageListRef::new(block, PhotoCategory::Before);
        let after = ImageListRef::new(block, PhotoCategory::After);
        c.capture_photo(before, &png_bytes(8, 8), "b.png").unwrap();
        let kept = c.capture_photo(after, &png_bytes(8, 8), "a.png").unwrap();
        c.flush_draft().unwrap();

        let uploader = FakeUploader::default();
        uploader.fail.lock().unwrap().insert("b.png".into());
        let (api, tokens) = (FakeApi::default(), token());
        let reconciler = Reconciler::new(&uploader, &api, &tokens, 2);
        let report = c.submit(&reconciler).await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(c.remote_id(), Some(report.remote_id.as_str()));
        assert!(c.model().photos(before).unwrap().is_empty());
        assert_eq!(
            c.model().photos(after).unwrap(),
            &[ImageRef::resolved("https://cdn.test/a.png")]
        );
        assert!(c.drafts().load().unwrap().is_none());
        // uploaded image pruned, failed one kept for another try
        assert!(c.media().get(kept.id).unwrap().is_none());
        assert_eq!(c.media().list_all().unwrap().len(), 1);

        // second submit updates the same report
        let again = c.submit(&reconciler).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.remote_id, report.remote_id);
    }

    #[tokio::test]
    async fn failed_submit_leaves_model_alone() {
        let mut c = composer();
        c.update_header(|h| *h = header());
        let block = c.add_image_block(ImageLayout::Completed);
        let list = ImageListRef::new(block, PhotoCategory::Completed);
        let staged = c.capture_photo(list, &png_bytes(8, 8), "x.png").unwrap();
        let model_before = c.model().clone();

        let (uploader, api) = (FakeUploader::default(), FakeApi::default());
        api.down.store(true, std::sync::atomic::Ordering::SeqCst);
        let tokens = token();
        let reconciler = Reconciler::new(&uploader, &api, &tokens, 2);
        assert!(matches!(
            c.submit(&reconciler).await,
            Err(SubmitError::Transport(_))
        ));
        assert_eq!(c.model(), &model_before);
        assert!(c.remote_id().is_none());
        // upload was recorded for the retry
        let stored = c.media().get(staged.id).unwrap().unwrap();
        assert!(stored.uploaded);
    }

    #[tokio::test]
    async fn stale_generation_outcome_is_discarded() {
        let mut c = composer();
        c.update_header(|h| *h = header());
        let id = c.add_section(SectionKind::Comment);
        c.update_section(id, SectionPatch::Text("x".into())).unwrap();
        let ticket = c.begin_submit();

        let (uploader, api, tokens) = (FakeUploader::default(), FakeApi::default(), token());
        let reconciler = Reconciler::new(&uploader, &api, &tokens, 2);
        let media = c.media().clone();
        let outcome = reconciler.run(&media, ticket).await;

        c.discard_document().unwrap();
        assert!(matches!(c.apply_submit(outcome), Err(SubmitError::Superseded)));
        assert!(c.remote_id().is_none());
    }

    #[tokio::test]
    async fn store_entry_fills_header() {
        let directory = InMemoryDirectory::new([DirectoryEntry::new("S-7", "Corner Shop")
            .with_extra("brand", "Acme")]);
        let mut c = composer();
        let entry = find_store(&directory, " S-7 ").await.unwrap();
        c.apply_store_entry(&entry);
        assert_eq!(c.header().store_id, "S-7");
        assert_eq!(c.header().store_name, "Corner Shop");
        assert_eq!(c.header().brand, "Acme");
        assert!(matches!(
            find_store(&directory, "nope").await,
            Err(FieldReportError::NotFound(_))
        ));
    }
}
