//! The Section Model: ordered, typed content blocks of one report.
//!
//! Every command either applies fully and returns a [`ModelChange`], or
//! returns a [`ModelError`] and leaves the model exactly as it was. Commands
//! are synchronous; nothing here awaits.

use std::collections::{HashMap, HashSet};

use crate::error::ModelError;
use crate::types::{
    ImageBlock, ImageLayout, ImageListRef, ImageRef, PhotoCategory, Section, SectionId,
    SectionKind, SectionPatch, SectionPayload, StagedImageId,
};

/// Notification emitted by every successful model command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelChange {
    Added { id: SectionId, index: usize },
    Removed { id: SectionId, index: usize },
    Updated { id: SectionId },
    Moved { id: SectionId, from: usize, to: usize },
    Duplicated { source: SectionId, id: SectionId },
    /// Photo list(s) of a section changed (attach, remove, reorder)
    PhotosChanged { id: SectionId },
    /// Photo moved between two lists, possibly of different sections
    PhotoMoved { from: ImageListRef, to: ImageListRef },
    /// Whole document replaced (restore, reset, post-submit rewrite)
    Replaced,
}

impl ModelChange {
    /// A move onto its own position changes nothing worth saving.
    pub fn is_noop(&self) -> bool {
        matches!(self, ModelChange::Moved { from, to, .. } if from == to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionModel {
    sections: Vec<Section>,
    /// Last id handed out; ids are `counter + 1` onwards
    counter: u32,
}

impl SectionModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted parts. The counter is raised past every
    /// existing id so restored documents never reuse one.
    pub fn from_parts(sections: Vec<Section>, counter: u32) -> Self {
        let max_id = sections.iter().map(|s| s.id.0).max().unwrap_or(0);
        Self {
            sections,
            counter: counter.max(max_id),
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn get(&self, id: SectionId) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    pub fn index_of(&self, id: SectionId) -> Option<usize> {
        self.sections.iter().position(|s| s.id == id)
    }

    pub fn ids(&self) -> Vec<SectionId> {
        self.sections.iter().map(|s| s.id).collect()
    }

    fn next_id(&mut self) -> SectionId {
        self.counter += 1;
        SectionId(self.counter)
    }

    fn index_or_err(&self, id: SectionId) -> Result<usize, ModelError> {
        self.index_of(id).ok_or(ModelError::UnknownSection(id))
    }

    /// Append a section with content of the given kind.
    pub fn add_section(&mut self, kind: SectionKind) -> (SectionId, ModelChange) {
        self.push(SectionPayload::empty(kind))
    }

    pub fn add_image_block(&mut self, layout: ImageLayout) -> (SectionId, ModelChange) {
        self.push(SectionPayload::ImageBlock(ImageBlock::new(layout)))
    }

    /// Append a section with prepared content.
    pub fn push(&mut self, payload: SectionPayload) -> (SectionId, ModelChange) {
        let id = self.next_id();
        let index = self.sections.len();
        self.sections.push(Section { id, payload });
        (id, ModelChange::Added { id, index })
    }

    /// Hard delete. Callers confirm destructive intent before calling.
    pub fn remove_section(&mut self, id: SectionId) -> Result<ModelChange, ModelError> {
        let index = self.index_or_err(id)?;
        self.sections.remove(index);
        Ok(ModelChange::Removed { id, index })
    }

    pub fn update_section_payload(
        &mut self,
        id: SectionId,
        patch: SectionPatch,
    ) -> Result<ModelChange, ModelError> {
        let index = self.index_or_err(id)?;
        let section = &mut self.sections[index];
        let kind = section.kind();
        match (&mut section.payload, patch) {
            (SectionPayload::ChecklistItem { name }, SectionPatch::Name(new_name)) => {
                *name = new_name;
            }
            (
                SectionPayload::Comment { text } | SectionPayload::WorkDescription { text },
                SectionPatch::Text(new_text),
            ) => {
                *text = new_text;
            }
            (SectionPayload::ImageBlock(block), SectionPatch::Layout(layout)) => {
                if block.layout() != layout {
                    if !block.is_empty() {
                        return Err(ModelError::LayoutNotEmpty(id));
                    }
                    *block = ImageBlock::new(layout);
                }
            }
            _ => return Err(ModelError::PatchMismatch { id, kind }),
        }
        Ok(ModelChange::Updated { id })
    }

    /// Move a section so it ends up at `to_index` (splice, not re-sort).
    pub fn move_section(&mut self, id: SectionId, to_index: usize) -> Result<ModelChange, ModelError> {
        let from = self.index_or_err(id)?;
        let len = self.sections.len();
        if to_index >= len {
            return Err(ModelError::IndexOutOfRange {
                index: to_index,
                len,
            });
        }
        if from != to_index {
            let section = self.sections.remove(from);
            self.sections.insert(to_index, section);
        }
        Ok(ModelChange::Moved {
            id,
            from,
            to: to_index,
        })
    }

    /// Copy a section and insert the copy right after it.
    ///
    /// Image blocks are copied with their layout but no photos, so two
    /// sections never share a staged image.
    pub fn duplicate_section(&mut self, id: SectionId) -> Result<(SectionId, ModelChange), ModelError> {
        let index = self.index_or_err(id)?;
        let payload = match &self.sections[index].payload {
            SectionPayload::ImageBlock(block) => SectionPayload::ImageBlock(block.emptied()),
            other => other.clone(),
        };
        let new_id = self.next_id();
        self.sections.insert(
            index + 1,
            Section {
                id: new_id,
                payload,
            },
        );
        Ok((
            new_id,
            ModelChange::Duplicated {
                source: id,
                id: new_id,
            },
        ))
    }

    fn photos_mut(&mut self, list: ImageListRef) -> Result<&mut Vec<ImageRef>, ModelError> {
        let index = self.index_or_err(list.section)?;
        let block = self.sections[index]
            .payload
            .image_block_mut()
            .ok_or(ModelError::NotAnImageBlock(list.section))?;
        let layout = block.layout();
        block
            .photos_mut(list.category)
            .ok_or(ModelError::CategoryNotInLayout {
                id: list.section,
                category: list.category,
                layout,
            })
    }

    /// Photos of one list.
    pub fn photos(&self, list: ImageListRef) -> Result<&[ImageRef], ModelError> {
        let section = self
            .get(list.section)
            .ok_or(ModelError::UnknownSection(list.section))?;
        let block = section
            .payload
            .image_block()
            .ok_or(ModelError::NotAnImageBlock(list.section))?;
        block
            .photos(list.category)
            .ok_or(ModelError::CategoryNotInLayout {
                id: list.section,
                category: list.category,
                layout: block.layout(),
            })
    }

    /// Category another list already uses the staged photo under, if it
    /// differs from `category`. Occurrences in `skip` are ignored.
    fn staged_conflict(
        &self,
        image: &ImageRef,
        category: PhotoCategory,
        skip: Option<ImageListRef>,
    ) -> Result<(), ModelError> {
        let Some(staged) = image.staged_id() else {
            return Ok(());
        };
        match self
            .staged_images()
            .into_iter()
            .find(|&(list, id)| id == staged && Some(list) != skip && list.category != category)
        {
            Some((list, _)) => Err(ModelError::StagedCategoryConflict {
                image: staged,
                category: list.category,
            }),
            None => Ok(()),
        }
    }

    /// Append a photo. Attaching one already in the list is a no-op (`Ok(None)`).
    ///
    /// A staged photo keeps one category across the document.
    pub fn attach_image(
        &mut self,
        list: ImageListRef,
        image: ImageRef,
    ) -> Result<Option<ModelChange>, ModelError> {
        self.photos(list)?;
        self.staged_conflict(&image, list.category, None)?;
        let photos = self.photos_mut(list)?;
        if photos.contains(&image) {
            return Ok(None);
        }
        photos.push(image);
        Ok(Some(ModelChange::PhotosChanged { id: list.section }))
    }

    /// Remove a photo. Removing the last one leaves an empty list.
    pub fn remove_image(
        &mut self,
        list: ImageListRef,
        image: &ImageRef,
    ) -> Result<ModelChange, ModelError> {
        let photos = self.photos_mut(list)?;
        let pos = photos
            .iter()
            .position(|i| i == image)
            .ok_or(ModelError::ImageNotFound {
                id: list.section,
                category: list.category,
            })?;
        photos.remove(pos);
        Ok(ModelChange::PhotosChanged { id: list.section })
    }

    /// Reorder inside one list. `from == to` leaves content untouched.
    pub fn move_image_within(
        &mut self,
        list: ImageListRef,
        from: usize,
        to: usize,
    ) -> Result<ModelChange, ModelError> {
        let photos = self.photos_mut(list)?;
        let len = photos.len();
        for index in [from, to] {
            if index >= len {
                return Err(ModelError::IndexOutOfRange { index, len });
            }
        }
        if from != to {
            let image = photos.remove(from);
            photos.insert(to, image);
        }
        Ok(ModelChange::PhotosChanged { id: list.section })
    }

    /// Move the photo at `index` of `from` to the end of `to`.
    ///
    /// If `to` already holds the same photo it is only removed from `from`.
    pub fn move_image_across(
        &mut self,
        from: ImageListRef,
        index: usize,
        to: ImageListRef,
    ) -> Result<ModelChange, ModelError> {
        if from == to {
            let last = self.photos(from)?.len().saturating_sub(1);
            return self.move_image_within(from, index, last);
        }
        // validate the target before touching the origin
        let already_there = {
            let image = self
                .photos(from)?
                .get(index)
                .ok_or(ModelError::IndexOutOfRange {
                    index,
                    len: self.photos(from).map(|p| p.len()).unwrap_or(0),
                })?;
            let already_there = self.photos(to)?.contains(image);
            self.staged_conflict(image, to.category, Some(from))?;
            already_there
        };
        let image = self.photos_mut(from)?.remove(index);
        if !already_there {
            self.photos_mut(to)?.push(image);
        }
        Ok(ModelChange::PhotoMoved { from, to })
    }

    /// Every staged photo reference, with its list, in document order.
    pub fn staged_images(&self) -> Vec<(ImageListRef, StagedImageId)> {
        self.sections
            .iter()
            .filter_map(|s| s.payload.image_block().map(|b| (s.id, b)))
            .flat_map(|(id, block)| {
                block.iter_photos().filter_map(move |(category, image)| {
                    image
                        .staged_id()
                        .map(|staged| (ImageListRef::new(id, category), staged))
                })
            })
            .collect()
    }

    /// Swap staged refs for their uploaded URLs and drop the ones in `dropped`.
    pub fn resolve_staged(
        &mut self,
        resolved: &HashMap<StagedImageId, String>,
        dropped: &HashSet<StagedImageId>,
    ) -> ModelChange {
        for section in &mut self.sections {
            let Some(block) = section.payload.image_block_mut() else {
                continue;
            };
            for &category in block.layout().categories() {
                if let Some(photos) = block.photos_mut(category) {
                    resolve_list(photos, resolved, dropped);
                }
            }
        }
        ModelChange::Replaced
    }

    /// Drop every section; the id counter restarts for the next document.
    pub fn clear(&mut self) -> ModelChange {
        self.sections.clear();
        self.counter = 0;
        ModelChange::Replaced
    }
}

fn resolve_list(
    photos: &mut Vec<ImageRef>,
    resolved: &HashMap<StagedImageId, String>,
    dropped: &HashSet<StagedImageId>,
) {
    let mut out: Vec<ImageRef> = Vec::with_capacity(photos.len());
    for image in photos.drain(..) {
        let image = match image.staged_id() {
            Some(id) if dropped.contains(&id) => continue,
            Some(id) => match resolved.get(&id) {
                Some(url) => ImageRef::resolved(url.clone()),
                None => image,
            },
            None => image,
        };
        // two staged photos may have resolved to the same URL
        if !out.contains(&image) {
            out.push(image);
        }
    }
    *photos = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with(kinds: &[SectionKind]) -> SectionModel {
        let mut model = SectionModel::new();
        for &kind in kinds {
            model.add_section(kind);
        }
        model
    }

    fn before(id: SectionId) -> ImageListRef {
        ImageListRef::new(id, PhotoCategory::Before)
    }

    fn after(id: SectionId) -> ImageListRef {
        ImageListRef::new(id, PhotoCategory::After)
    }

    #[test]
    fn ids_are_never_reused() {
        let mut model = model_with(&[SectionKind::Comment, SectionKind::Comment]);
        let ids = model.ids();
        model.remove_section(ids[1]).unwrap();
        let (id, _) = model.add_section(SectionKind::Comment);
        assert_eq!(id, SectionId(3));
    }

    #[test]
    fn from_parts_raises_counter_past_existing_ids() {
        let sections = vec![Section {
            id: SectionId(9),
            payload: SectionPayload::empty(SectionKind::Comment),
        }];
        let mut model = SectionModel::from_parts(sections, 2);
        let (id, _) = model.add_section(SectionKind::Comment);
        assert_eq!(id, SectionId(10));
    }

    #[test]
    fn move_sequences_are_permutations() {
        let mut model = model_with(&[
            SectionKind::ChecklistItem,
            SectionKind::ImageBlock,
            SectionKind::Comment,
            SectionKind::WorkDescription,
            SectionKind::ChecklistItem,
        ]);
        let mut original = model.ids();
        let moves = [(0usize, 4usize), (3, 0), (2, 2), (4, 1), (1, 3), (0, 0)];
        for (pick, to) in moves {
            let id = model.ids()[pick];
            model.move_section(id, to).unwrap();
            assert_eq!(model.index_of(id), Some(to));
        }
        let mut after = model.ids();
        original.sort();
        after.sort();
        assert_eq!(original, after);
    }

    #[test]
    fn move_out_of_range_leaves_model_unchanged() {
        let mut model = model_with(&[SectionKind::Comment, SectionKind::Comment]);
        let before = model.clone();
        let id = model.ids()[0];
        let err = model.move_section(id, 2).unwrap_err();
        assert_eq!(err, ModelError::IndexOutOfRange { index: 2, len: 2 });
        assert_eq!(model, before);
    }

    #[test]
    fn patch_must_match_kind() {
        let mut model = model_with(&[SectionKind::ChecklistItem]);
        let id = model.ids()[0];
        let err = model
            .update_section_payload(id, SectionPatch::Text("x".into()))
            .unwrap_err();
        assert!(matches!(err, ModelError::PatchMismatch { .. }));
        model
            .update_section_payload(id, SectionPatch::Name("Floor".into()))
            .unwrap();
        assert_eq!(
            model.get(id).unwrap().payload,
            SectionPayload::ChecklistItem {
                name: "Floor".into()
            }
        );
    }

    #[test]
    fn layout_change_requires_empty_block() {
        let mut model = SectionModel::new();
        let (id, _) = model.add_image_block(ImageLayout::BeforeAfter);
        model
            .update_section_payload(id, SectionPatch::Layout(ImageLayout::Completed))
            .unwrap();
        let list = ImageListRef::new(id, PhotoCategory::Completed);
        model.attach_image(list, ImageRef::resolved("u")).unwrap();
        let err = model
            .update_section_payload(id, SectionPatch::Layout(ImageLayout::BeforeAfter))
            .unwrap_err();
        assert_eq!(err, ModelError::LayoutNotEmpty(id));
    }

    #[test]
    fn duplicate_image_block_starts_empty() {
        let mut model = SectionModel::new();
        let (id, _) = model.add_image_block(ImageLayout::Completed);
        let list = ImageListRef::new(id, PhotoCategory::Completed);
        model
            .attach_image(list, ImageRef::staged(StagedImageId::new()))
            .unwrap();

        let (copy, _) = model.duplicate_section(id).unwrap();
        assert_eq!(model.index_of(copy), Some(1));
        let block = model.get(copy).unwrap().payload.image_block().unwrap();
        assert_eq!(block.layout(), ImageLayout::Completed);
        assert!(block.is_empty());
        // original keeps its photo
        assert_eq!(model.photos(list).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_copies_text() {
        let mut model = SectionModel::new();
        let (id, _) = model.push(SectionPayload::Comment {
            text: "leak under sink".into(),
        });
        let (copy, _) = model.duplicate_section(id).unwrap();
        assert_eq!(
            model.get(copy).unwrap().payload,
            model.get(id).unwrap().payload
        );
    }

    #[test]
    fn attach_is_idempotent() {
        let mut model = SectionModel::new();
        let (id, _) = model.add_image_block(ImageLayout::BeforeAfter);
        let image = ImageRef::staged(StagedImageId::new());
        assert!(model.attach_image(before(id), image.clone()).unwrap().is_some());
        assert!(model.attach_image(before(id), image.clone()).unwrap().is_none());
        assert_eq!(model.photos(before(id)).unwrap().len(), 1);
    }

    #[test]
    fn attach_rejects_foreign_category() {
        let mut model = SectionModel::new();
        let (id, _) = model.add_image_block(ImageLayout::Completed);
        let err = model
            .attach_image(before(id), ImageRef::resolved("u"))
            .unwrap_err();
        assert!(matches!(err, ModelError::CategoryNotInLayout { .. }));
    }

    #[test]
    fn staged_photo_keeps_one_category() {
        let mut model = SectionModel::new();
        let (a, _) = model.add_image_block(ImageLayout::BeforeAfter);
        let (b, _) = model.add_image_block(ImageLayout::BeforeAfter);
        let staged = StagedImageId::new();
        model.attach_image(before(a), ImageRef::staged(staged)).unwrap();

        // same category elsewhere is fine
        model.attach_image(before(b), ImageRef::staged(staged)).unwrap();
        let snapshot = model.clone();
        let err = model
            .attach_image(after(a), ImageRef::staged(staged))
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::StagedCategoryConflict {
                image: staged,
                category: PhotoCategory::Before
            }
        );
        // moving while another before list still holds it is rejected too
        assert!(model.move_image_across(before(a), 0, after(a)).is_err());
        assert_eq!(model, snapshot);

        // once it is the only occurrence it can change category
        model.remove_image(before(b), &ImageRef::staged(staged)).unwrap();
        model.move_image_across(before(a), 0, after(a)).unwrap();
        assert_eq!(model.photos(after(a)).unwrap(), &[ImageRef::staged(staged)]);
        // resolved URLs are not restricted
        model.attach_image(before(a), ImageRef::resolved("u")).unwrap();
        model.attach_image(after(b), ImageRef::resolved("u")).unwrap();
    }

    #[test]
    fn removing_last_image_leaves_empty_list_and_sibling_intact() {
        let mut model = SectionModel::new();
        let (id, _) = model.add_image_block(ImageLayout::BeforeAfter);
        let b = ImageRef::resolved("before.jpg");
        let a = ImageRef::resolved("after.jpg");
        model.attach_image(before(id), b.clone()).unwrap();
        model.attach_image(after(id), a.clone()).unwrap();

        model.remove_image(before(id), &b).unwrap();
        assert_eq!(model.photos(before(id)).unwrap(), &[] as &[ImageRef]);
        assert_eq!(model.photos(after(id)).unwrap(), &[a]);
    }

    #[test]
    fn move_image_onto_itself_is_noop() {
        let mut model = SectionModel::new();
        let (id, _) = model.add_image_block(ImageLayout::BeforeAfter);
        for url in ["1", "2", "3"] {
            model.attach_image(before(id), ImageRef::resolved(url)).unwrap();
        }
        let snapshot = model.clone();
        model.move_image_within(before(id), 1, 1).unwrap();
        assert_eq!(model, snapshot);
        model.move_image_within(before(id), 1, 1).unwrap();
        assert_eq!(model, snapshot);
    }

    #[test]
    fn move_image_within_splices() {
        let mut model = SectionModel::new();
        let (id, _) = model.add_image_block(ImageLayout::BeforeAfter);
        for url in ["1", "2", "3"] {
            model.attach_image(before(id), ImageRef::resolved(url)).unwrap();
        }
        model.move_image_within(before(id), 0, 2).unwrap();
        let urls: Vec<_> = model
            .photos(before(id))
            .unwrap()
            .iter()
            .filter_map(|i| i.url())
            .collect();
        assert_eq!(urls, ["2", "3", "1"]);
    }

    #[test]
    fn move_image_across_sections_appends() {
        let mut model = SectionModel::new();
        let (a, _) = model.add_image_block(ImageLayout::BeforeAfter);
        let (b, _) = model.add_image_block(ImageLayout::Completed);
        let target = ImageListRef::new(b, PhotoCategory::Completed);
        model.attach_image(target, ImageRef::resolved("x")).unwrap();
        model.attach_image(before(a), ImageRef::resolved("y")).unwrap();

        model.move_image_across(before(a), 0, target).unwrap();
        assert!(model.photos(before(a)).unwrap().is_empty());
        assert_eq!(
            model.photos(target).unwrap(),
            &[ImageRef::resolved("x"), ImageRef::resolved("y")]
        );
    }

    #[test]
    fn move_image_to_invalid_target_is_rejected_atomically() {
        let mut model = SectionModel::new();
        let (a, _) = model.add_image_block(ImageLayout::BeforeAfter);
        let (c, _) = model.add_section(SectionKind::Comment);
        model.attach_image(before(a), ImageRef::resolved("y")).unwrap();
        let snapshot = model.clone();

        let err = model
            .move_image_across(before(a), 0, ImageListRef::new(c, PhotoCategory::After))
            .unwrap_err();
        assert_eq!(err, ModelError::NotAnImageBlock(c));
        assert_eq!(model, snapshot);
    }

    #[test]
    fn resolve_staged_rewrites_and_drops() {
        let mut model = SectionModel::new();
        let (id, _) = model.add_image_block(ImageLayout::BeforeAfter);
        let ok = StagedImageId::new();
        let bad = StagedImageId::new();
        model.attach_image(before(id), ImageRef::staged(bad)).unwrap();
        model.attach_image(after(id), ImageRef::staged(ok)).unwrap();
        assert_eq!(model.staged_images().len(), 2);

        let resolved = HashMap::from([(ok, "https://cdn/ok.jpg".to_string())]);
        let dropped = HashSet::from([bad]);
        model.resolve_staged(&resolved, &dropped);

        assert!(model.photos(before(id)).unwrap().is_empty());
        assert_eq!(
            model.photos(after(id)).unwrap(),
            &[ImageRef::resolved("https://cdn/ok.jpg")]
        );
        assert!(model.staged_images().is_empty());
    }
}
