//! Document types: sections, photo references, header fields.
//!
//! These are plain data. All ordering and mutation rules live in
//! [`crate::model::SectionModel`].

use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Section identifier, allocated from a per-document counter and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionId(pub u32);

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a photo held in the staged media store.
///
/// UUIDv7, so ids sort in capture order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagedImageId(Uuid);

impl StagedImageId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for StagedImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StagedImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    ChecklistItem,
    ImageBlock,
    Comment,
    WorkDescription,
}

impl SectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::ChecklistItem => "checklist_item",
            SectionKind::ImageBlock => "image_block",
            SectionKind::Comment => "comment",
            SectionKind::WorkDescription => "work_description",
        }
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageLayout {
    #[default]
    BeforeAfter,
    Completed,
}

impl ImageLayout {
    /// Categories this layout holds, in display order.
    pub fn categories(&self) -> &'static [PhotoCategory] {
        match self {
            ImageLayout::BeforeAfter => &[PhotoCategory::Before, PhotoCategory::After],
            ImageLayout::Completed => &[PhotoCategory::Completed],
        }
    }

    pub fn allows(&self, category: PhotoCategory) -> bool {
        self.categories().contains(&category)
    }
}

impl fmt::Display for ImageLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageLayout::BeforeAfter => "before_after",
            ImageLayout::Completed => "completed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoCategory {
    Before,
    After,
    Completed,
}

impl fmt::Display for PhotoCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhotoCategory::Before => "before",
            PhotoCategory::After => "after",
            PhotoCategory::Completed => "completed",
        })
    }
}

/// A photo attached to an image block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImageRef {
    /// Already stored server-side
    Resolved { url: String },
    /// Only in the local staged media store
    Staged { id: StagedImageId },
}

impl ImageRef {
    pub fn resolved(url: impl Into<String>) -> Self {
        ImageRef::Resolved { url: url.into() }
    }

    pub fn staged(id: StagedImageId) -> Self {
        ImageRef::Staged { id }
    }

    pub fn staged_id(&self) -> Option<StagedImageId> {
        match self {
            ImageRef::Staged { id } => Some(*id),
            ImageRef::Resolved { .. } => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ImageRef::Resolved { url } => Some(url),
            ImageRef::Staged { .. } => None,
        }
    }
}

/// Photos of an image block. The layout fixes which lists exist, so a
/// `Completed` block can never carry `before`/`after` photos or vice versa.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum ImageBlock {
    BeforeAfter {
        before: Vec<ImageRef>,
        after: Vec<ImageRef>,
    },
    Completed {
        completed: Vec<ImageRef>,
    },
}

impl ImageBlock {
    pub fn new(layout: ImageLayout) -> Self {
        match layout {
            ImageLayout::BeforeAfter => ImageBlock::BeforeAfter {
                before: Vec::new(),
                after: Vec::new(),
            },
            ImageLayout::Completed => ImageBlock::Completed {
                completed: Vec::new(),
            },
        }
    }

    pub fn layout(&self) -> ImageLayout {
        match self {
            ImageBlock::BeforeAfter { .. } => ImageLayout::BeforeAfter,
            ImageBlock::Completed { .. } => ImageLayout::Completed,
        }
    }

    pub fn photos(&self, category: PhotoCategory) -> Option<&[ImageRef]> {
        match (self, category) {
            (ImageBlock::BeforeAfter { before, .. }, PhotoCategory::Before) => Some(before),
            (ImageBlock::BeforeAfter { after, .. }, PhotoCategory::After) => Some(after),
            (ImageBlock::Completed { completed }, PhotoCategory::Completed) => Some(completed),
            _ => None,
        }
    }

    pub fn photos_mut(&mut self, category: PhotoCategory) -> Option<&mut Vec<ImageRef>> {
        match (self, category) {
            (ImageBlock::BeforeAfter { before, .. }, PhotoCategory::Before) => Some(before),
            (ImageBlock::BeforeAfter { after, .. }, PhotoCategory::After) => Some(after),
            (ImageBlock::Completed { completed }, PhotoCategory::Completed) => Some(completed),
            _ => None,
        }
    }

    /// Every photo with its category, in layout order.
    pub fn iter_photos(&self) -> impl Iterator<Item = (PhotoCategory, &ImageRef)> {
        self.layout().categories().iter().flat_map(move |&category| {
            self.photos(category)
                .unwrap_or_default()
                .iter()
                .map(move |image| (category, image))
        })
    }

    pub fn photo_count(&self) -> usize {
        match self {
            ImageBlock::BeforeAfter { before, after } => before.len() + after.len(),
            ImageBlock::Completed { completed } => completed.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.photo_count() == 0
    }

    /// Same layout, no photos.
    pub fn emptied(&self) -> Self {
        ImageBlock::new(self.layout())
    }
}

/// Per-kind section content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SectionPayload {
    ChecklistItem { name: String },
    ImageBlock(ImageBlock),
    Comment { text: String },
    WorkDescription { text: String },
}

impl SectionPayload {
    /// Fresh content for a newly added section.
    pub fn empty(kind: SectionKind) -> Self {
        match kind {
            SectionKind::ChecklistItem => SectionPayload::ChecklistItem {
                name: String::new(),
            },
            SectionKind::ImageBlock => SectionPayload::ImageBlock(ImageBlock::new(
                ImageLayout::default(),
            )),
            SectionKind::Comment => SectionPayload::Comment {
                text: String::new(),
            },
            SectionKind::WorkDescription => SectionPayload::WorkDescription {
                text: String::new(),
            },
        }
    }

    pub fn kind(&self) -> SectionKind {
        match self {
            SectionPayload::ChecklistItem { .. } => SectionKind::ChecklistItem,
            SectionPayload::ImageBlock(_) => SectionKind::ImageBlock,
            SectionPayload::Comment { .. } => SectionKind::Comment,
            SectionPayload::WorkDescription { .. } => SectionKind::WorkDescription,
        }
    }

    /// True when the section carries nothing worth submitting.
    ///
    /// Whitespace-only names and texts count as blank.
    pub fn is_blank(&self) -> bool {
        match self {
            SectionPayload::ChecklistItem { name } => name.trim().is_empty(),
            SectionPayload::ImageBlock(block) => block.is_empty(),
            SectionPayload::Comment { text } | SectionPayload::WorkDescription { text } => {
                text.trim().is_empty()
            }
        }
    }

    pub fn image_block(&self) -> Option<&ImageBlock> {
        match self {
            SectionPayload::ImageBlock(block) => Some(block),
            _ => None,
        }
    }

    pub fn image_block_mut(&mut self) -> Option<&mut ImageBlock> {
        match self {
            SectionPayload::ImageBlock(block) => Some(block),
            _ => None,
        }
    }
}

/// One block of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub payload: SectionPayload,
}

impl Section {
    pub fn kind(&self) -> SectionKind {
        self.payload.kind()
    }
}

/// Partial update for [`crate::model::SectionModel::update_section_payload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionPatch {
    /// Checklist item name
    Name(String),
    /// Comment or work description text
    Text(String),
    /// Image block layout; only allowed while the block holds no photos
    Layout(ImageLayout),
}

/// One `(section, category)` photo list, the unit of image reordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageListRef {
    pub section: SectionId,
    pub category: PhotoCategory,
}

impl ImageListRef {
    pub fn new(section: SectionId, category: PhotoCategory) -> Self {
        Self { section, category }
    }
}

/// Report header, edited alongside the sections and saved with drafts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderFields {
    pub brand: String,
    pub store_id: String,
    pub store_name: String,
    pub date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_fixes_categories() {
        let block = ImageBlock::new(ImageLayout::Completed);
        assert!(block.photos(PhotoCategory::Completed).is_some());
        assert!(block.photos(PhotoCategory::Before).is_none());
        assert!(block.photos(PhotoCategory::After).is_none());

        let block = ImageBlock::new(ImageLayout::BeforeAfter);
        assert!(block.photos(PhotoCategory::Completed).is_none());
        assert_eq!(block.photos(PhotoCategory::Before), Some(&[][..]));
    }

    #[test]
    fn iter_photos_follows_layout_order() {
        let block = ImageBlock::BeforeAfter {
            before: vec![ImageRef::resolved("b1")],
            after: vec![ImageRef::resolved("a1"), ImageRef::resolved("a2")],
        };
        let cats: Vec<_> = block.iter_photos().map(|(c, _)| c).collect();
        assert_eq!(
            cats,
            [PhotoCategory::Before, PhotoCategory::After, PhotoCategory::After]
        );
        assert_eq!(block.photo_count(), 3);
        assert!(block.emptied().is_empty());
        assert_eq!(block.emptied().layout(), ImageLayout::BeforeAfter);
    }

    #[test]
    fn blank_detection_trims_whitespace() {
        assert!(SectionPayload::ChecklistItem { name: "  ".into() }.is_blank());
        assert!(!SectionPayload::Comment { text: "ok".into() }.is_blank());
        assert!(SectionPayload::empty(SectionKind::ImageBlock).is_blank());
    }

    #[test]
    fn section_round_trips_through_json() {
        let section = Section {
            id: SectionId(4),
            payload: SectionPayload::ImageBlock(ImageBlock::Completed {
                completed: vec![ImageRef::resolved("https://cdn.example/x.jpg")],
            }),
        };
        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(json["payload"]["kind"], "image_block");
        assert_eq!(json["payload"]["data"]["layout"], "completed");
        let back: Section = serde_json::from_value(json).unwrap();
        assert_eq!(back, section);
    }
}
