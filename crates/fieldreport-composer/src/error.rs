//! Error types for composer operations.

use fieldreport_common::FieldReportError;
use miette::Diagnostic;
use thiserror::Error;

use crate::types::{ImageLayout, PhotoCategory, SectionId, SectionKind, StagedImageId};

/// A Section Model command was rejected. The model is unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelError {
    #[error("no section with id {0}")]
    UnknownSection(SectionId),

    #[error("index {index} is out of range for {len} items")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("section {id} is a {kind} and cannot take that edit")]
    PatchMismatch { id: SectionId, kind: SectionKind },

    #[error("section {0} is not an image block")]
    NotAnImageBlock(SectionId),

    #[error("section {id} uses the {layout} layout, which has no {category} photos")]
    CategoryNotInLayout {
        id: SectionId,
        category: PhotoCategory,
        layout: ImageLayout,
    },

    #[error("photo not found in {category} list of section {id}")]
    ImageNotFound { id: SectionId, category: PhotoCategory },

    #[error("section {0} still holds photos; remove them before changing layout")]
    LayoutNotEmpty(SectionId),

    #[error("staged photo {image} is already used as a {category} photo")]
    StagedCategoryConflict {
        image: StagedImageId,
        category: PhotoCategory,
    },
}

/// Local persistence failure (staged images or draft slot).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored record could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Image decode/re-encode failure; always scoped to one file.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NormalizeError {
    #[error("empty image data")]
    Empty,

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Staging one file failed; the rest of a batch carries on.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StageError {
    #[error("could not read image {file}: {source}")]
    Normalize {
        file: String,
        #[source]
        source: NormalizeError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("staging {file} did not finish: {reason}")]
    Interrupted { file: String, reason: String },
}

/// Capturing a photo failed before it was attached. Nothing was staged
/// when the target list is invalid.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CaptureError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Stage(#[from] StageError),
}

/// Why a single photo could not be resolved to a remote URL.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UploadFailure {
    #[error("staged image is no longer in the local store")]
    Missing,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] FieldReportError),
}

/// Per-photo upload error. Logged and aggregated, never fatal to a submit.
#[derive(Error, Debug)]
#[error("photo {image} ({category}) in section {section} was not uploaded: {reason}")]
pub struct UploadError {
    pub section: SectionId,
    pub category: PhotoCategory,
    pub image: StagedImageId,
    #[source]
    pub reason: UploadFailure,
}

/// Document is not ready to submit. Shown to the user; nothing was sent.
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("a store must be selected")]
    #[diagnostic(code(fieldreport::validation::store))]
    MissingStore,

    #[error("a brand name is required")]
    #[diagnostic(code(fieldreport::validation::brand))]
    MissingBrand,

    #[error("a report date is required")]
    #[diagnostic(code(fieldreport::validation::date))]
    MissingDate,

    #[error("the report is empty")]
    #[diagnostic(
        code(fieldreport::validation::empty),
        help("add a checklist item, a photo or some text before submitting")
    )]
    EmptyDocument,
}

/// A submit attempt did not reach `Sent`.
#[derive(Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum SubmitError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error("not signed in; the report was kept locally")]
    #[diagnostic(
        code(fieldreport::submit::auth),
        help("sign in and submit again; uploaded photos will not be sent twice")
    )]
    NotAuthenticated,

    #[error("the report could not be sent: {0}")]
    #[diagnostic(
        code(fieldreport::submit::transport),
        help("check the connection and retry; nothing was lost")
    )]
    Transport(#[source] FieldReportError),

    #[error("the document changed while submitting; this result was discarded")]
    #[diagnostic(code(fieldreport::submit::superseded))]
    Superseded,
}

impl SubmitError {
    /// Whether sending the same document again later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SubmitError::Transport(err) => err.is_transient(),
            _ => false,
        }
    }
}
