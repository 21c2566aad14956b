//! fieldreport-composer: section-based report composer that works offline.
//!
//! This crate provides:
//! - `SectionModel` - ordered, typed content blocks with atomic commands
//! - `StagedMediaStore` - normalized photos held locally until submit
//! - `ReorderController` - drag gestures for sections and photos
//! - Draft autosave/restore with debounce and staleness checks
//! - `Reconciler` - uploads staged photos and sends the final payload
//! - `Composer` - the context object tying these together

pub mod composer;
pub mod draft;
pub mod error;
pub mod model;
pub mod normalize;
pub mod reconcile;
pub mod reorder;
pub mod sqlite;
pub mod staging;
pub mod types;

pub use composer::{Composer, ComposerEvent, RestoreReport, find_store};
pub use draft::{
    Autosave, DRAFT_KEY, DetachedPhotos, DraftCheck, DraftSnapshot, DraftStore, MemoryDraftSlot,
    RestoredDraft, check_draft,
};
pub use error::{
    CaptureError, ModelError, NormalizeError, StageError, StoreError, SubmitError, UploadError,
    UploadFailure, ValidationError,
};
pub use model::{ModelChange, SectionModel};
pub use normalize::Normalizer;
pub use reconcile::{
    ChecklistEntry, PayloadSection, Reconciler, ReportPayload, SubmitOutcome, SubmitPhase,
    SubmitReport, SubmitTicket,
};
pub use reorder::{DragSource, DropTarget, InputKind, Point, ReorderCommand, ReorderController};
pub use sqlite::SqliteStore;
pub use staging::{
    MediaStore, MemoryMediaStore, RawFile, StageBatchReport, StageProgress, StagedImage,
    StagedMediaStore,
};
pub use types::{
    HeaderFields, ImageBlock, ImageLayout, ImageListRef, ImageRef, PhotoCategory, Section,
    SectionId, SectionKind, SectionPatch, SectionPayload, StagedImageId,
};
