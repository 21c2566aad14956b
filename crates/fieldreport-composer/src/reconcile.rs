//! Submit-time reconciliation: staged photos become remote URLs, then the
//! final payload is assembled and sent.
//!
//! A run works on a [`SubmitTicket`], a copy of the document taken at
//! submit time, so the live model is never borrowed across an await. The
//! resulting [`SubmitOutcome`] is handed back to the composer, which applies
//! it only if the document generation still matches.
//!
//! Per-photo failures are logged and collected in [`SubmitReport::failed`];
//! the photo is left out of the payload and the submit carries on.

use std::collections::{BTreeMap, HashMap, HashSet};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{NaiveDate, NaiveTime};
use fieldreport_common::{
    AuthToken, EncodedImage, FieldReportError, ImageUploader, ReportApi, TokenProvider,
    UploadCategory,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{SubmitError, UploadError, UploadFailure, ValidationError};
use crate::model::SectionModel;
use crate::staging::{MediaStore, StagedMediaStore};
use crate::types::{
    HeaderFields, ImageLayout, ImageListRef, PhotoCategory, SectionId, SectionPayload,
    StagedImageId,
};

const TRANSPORT_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitPhase {
    #[default]
    Idle,
    Validating,
    Uploading {
        done: usize,
        total: usize,
    },
    Assembling,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistEntry {
    pub name: String,
}

/// Non-checklist section as sent to the report API. Photos are URLs only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayloadSection {
    ImageBlock {
        id: SectionId,
        layout: ImageLayout,
        photos: BTreeMap<PhotoCategory, Vec<String>>,
    },
    Comment {
        id: SectionId,
        text: String,
    },
    WorkDescription {
        id: SectionId,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportPayload {
    pub brand: String,
    pub store_id: String,
    pub store_name: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<NaiveTime>,
    pub checklist: Vec<ChecklistEntry>,
    pub sections: Vec<PayloadSection>,
}

/// Document copy a submit attempt works on.
#[derive(Debug, Clone)]
pub struct SubmitTicket {
    pub generation: u64,
    /// Edit counter when the ticket was taken
    pub revision: u64,
    pub header: HeaderFields,
    pub model: SectionModel,
    pub remote_id: Option<String>,
}

#[derive(Debug)]
pub struct SubmitReport {
    pub remote_id: String,
    /// False when an existing report was updated
    pub created: bool,
    /// Staged ids that now have a remote URL
    pub resolved: HashMap<StagedImageId, String>,
    /// Staged ids left out of the payload
    pub dropped: HashSet<StagedImageId>,
    pub uploaded: usize,
    pub reused: usize,
    pub failed: Vec<UploadError>,
    pub payload: ReportPayload,
}

#[derive(Debug)]
pub struct SubmitOutcome {
    pub generation: u64,
    pub revision: u64,
    pub result: Result<SubmitReport, SubmitError>,
}

/// Check required header fields and that something is worth sending.
/// Returns the report date.
pub fn validate(header: &HeaderFields, model: &SectionModel) -> Result<NaiveDate, ValidationError> {
    if header.store_id.trim().is_empty() {
        return Err(ValidationError::MissingStore);
    }
    if header.brand.trim().is_empty() {
        return Err(ValidationError::MissingBrand);
    }
    let date = header.date.ok_or(ValidationError::MissingDate)?;
    if model.sections().iter().all(|s| s.payload.is_blank()) {
        return Err(ValidationError::EmptyDocument);
    }
    Ok(date)
}

/// Upload categories are only `before`/`after`; completed photos go up as `after`.
pub fn upload_category(category: PhotoCategory) -> UploadCategory {
    match category {
        PhotoCategory::Before => UploadCategory::Before,
        PhotoCategory::After | PhotoCategory::Completed => UploadCategory::After,
    }
}

/// Build the wire payload. Staged refs without an entry in `resolved` are
/// left out.
pub fn assemble(
    header: &HeaderFields,
    date: NaiveDate,
    model: &SectionModel,
    resolved: &HashMap<StagedImageId, String>,
) -> ReportPayload {
    let mut checklist = Vec::new();
    let mut sections = Vec::new();

    for section in model.sections() {
        let id = section.id;
        match &section.payload {
            SectionPayload::ChecklistItem { name } => {
                let name = name.trim();
                if !name.is_empty() {
                    checklist.push(ChecklistEntry {
                        name: name.to_string(),
                    });
                }
            }
            SectionPayload::ImageBlock(block) => {
                let photos = block
                    .layout()
                    .categories()
                    .iter()
                    .map(|&category| {
                        let urls = block
                            .photos(category)
                            .unwrap_or_default()
                            .iter()
                            .filter_map(|image| match image.staged_id() {
                                Some(staged) => resolved.get(&staged).cloned(),
                                None => image.url().map(str::to_string),
                            })
                            .collect();
                        (category, urls)
                    })
                    .collect();
                sections.push(PayloadSection::ImageBlock {
                    id,
                    layout: block.layout(),
                    photos,
                });
            }
            SectionPayload::Comment { text } => sections.push(PayloadSection::Comment {
                id,
                text: text.clone(),
            }),
            SectionPayload::WorkDescription { text } => {
                sections.push(PayloadSection::WorkDescription {
                    id,
                    text: text.clone(),
                })
            }
        }
    }

    ReportPayload {
        brand: header.brand.trim().to_string(),
        store_id: header.store_id.trim().to_string(),
        store_name: header.store_name.clone(),
        date,
        start_time: header.start_time,
        end_time: header.end_time,
        checklist,
        sections,
    }
}

struct UploadJob {
    list: ImageListRef,
    id: StagedImageId,
}

enum Resolution {
    Uploaded(String),
    Reused(String),
}

pub struct Reconciler<'a, U, R, T> {
    uploader: &'a U,
    api: &'a R,
    tokens: &'a T,
    batch_size: usize,
    phase: watch::Sender<SubmitPhase>,
}

impl<'a, U, R, T> Reconciler<'a, U, R, T>
where
    U: ImageUploader,
    R: ReportApi,
    T: TokenProvider,
{
    pub fn new(uploader: &'a U, api: &'a R, tokens: &'a T, batch_size: usize) -> Self {
        let (phase, _) = watch::channel(SubmitPhase::Idle);
        Self {
            uploader,
            api,
            tokens,
            batch_size: batch_size.max(1),
            phase,
        }
    }

    /// Follow the phase of the current run.
    pub fn subscribe(&self) -> watch::Receiver<SubmitPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> SubmitPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: SubmitPhase) {
        self.phase.send_replace(phase);
    }

    pub async fn run<S: MediaStore>(
        &self,
        media: &StagedMediaStore<S>,
        ticket: SubmitTicket,
    ) -> SubmitOutcome {
        let (generation, revision) = (ticket.generation, ticket.revision);
        let result = self.attempt(media, ticket).await;
        match &result {
            Ok(report) => {
                self.set_phase(SubmitPhase::Sent);
                tracing::info!(
                    remote_id = %report.remote_id,
                    created = report.created,
                    uploaded = report.uploaded,
                    reused = report.reused,
                    failed = report.failed.len(),
                    "report sent"
                );
            }
            Err(err) => {
                self.set_phase(SubmitPhase::Failed);
                tracing::warn!(error = %err, "submit failed");
            }
        }
        SubmitOutcome {
            generation,
            revision,
            result,
        }
    }

    async fn attempt<S: MediaStore>(
        &self,
        media: &StagedMediaStore<S>,
        ticket: SubmitTicket,
    ) -> Result<SubmitReport, SubmitError> {
        self.set_phase(SubmitPhase::Validating);
        let date = validate(&ticket.header, &ticket.model)?;
        let token = self.tokens.token().ok_or(SubmitError::NotAuthenticated)?;

        // the model keeps every staged photo in a single category, so one
        // upload per id serves all of its lists
        let mut jobs = Vec::new();
        let mut seen = HashSet::new();
        for (list, id) in ticket.model.staged_images() {
            if seen.insert(id) {
                jobs.push(UploadJob { list, id });
            }
        }

        let total = jobs.len();
        self.set_phase(SubmitPhase::Uploading { done: 0, total });
        let mut resolved = HashMap::new();
        let mut dropped = HashSet::new();
        let mut failed = Vec::new();
        let (mut uploaded, mut reused) = (0, 0);

        for chunk in jobs.chunks(self.batch_size) {
            let results = n0_future::join_all(
                chunk
                    .iter()
                    .map(|job| self.resolve_one(media, &token, job, date)),
            )
            .await;
            for (job, result) in chunk.iter().zip(results) {
                match result {
                    Ok(Resolution::Uploaded(url)) => {
                        uploaded += 1;
                        resolved.insert(job.id, url);
                    }
                    Ok(Resolution::Reused(url)) => {
                        reused += 1;
                        resolved.insert(job.id, url);
                    }
                    Err(reason) => {
                        let err = UploadError {
                            section: job.list.section,
                            category: job.list.category,
                            image: job.id,
                            reason,
                        };
                        tracing::warn!(error = %err, "dropping photo from report");
                        dropped.insert(job.id);
                        failed.push(err);
                    }
                }
            }
            self.set_phase(SubmitPhase::Uploading {
                done: resolved.len() + dropped.len(),
                total,
            });
        }

        self.set_phase(SubmitPhase::Assembling);
        let payload = assemble(&ticket.header, date, &ticket.model, &resolved);

        let sent = match &ticket.remote_id {
            Some(id) => self.api.update(&token, id, &payload).await,
            None => self.api.create(&token, &payload).await,
        };
        let remote = sent.map_err(|err| match err {
            FieldReportError::NotAuthenticated => SubmitError::NotAuthenticated,
            other => SubmitError::Transport(other),
        })?;

        Ok(SubmitReport {
            remote_id: remote.id,
            created: ticket.remote_id.is_none(),
            resolved,
            dropped,
            uploaded,
            reused,
            failed,
            payload,
        })
    }

    async fn resolve_one<S: MediaStore>(
        &self,
        media: &StagedMediaStore<S>,
        token: &AuthToken,
        job: &UploadJob,
        date: NaiveDate,
    ) -> Result<Resolution, UploadFailure> {
        let image = media.get(job.id)?.ok_or(UploadFailure::Missing)?;
        if let Some(url) = image.uploaded_url() {
            tracing::debug!(id = %job.id, "reusing earlier upload");
            return Ok(Resolution::Reused(url.to_string()));
        }

        let encoded = EncodedImage {
            file_name: image.original_name.clone(),
            mime_type: TRANSPORT_MIME.to_string(),
            data: STANDARD.encode(&image.bytes),
        };
        let category = upload_category(job.list.category);
        let remote = self
            .uploader
            .upload(token, &encoded, category, date)
            .await?;

        // a failed bookkeeping write only costs a re-upload on retry
        if let Err(err) = media.mark_uploaded(job.id, &remote.url) {
            tracing::warn!(id = %job.id, error = %err, "could not record upload");
        }
        tracing::debug!(id = %job.id, %category, url = %remote.url, "uploaded photo");
        Ok(Resolution::Uploaded(remote.url))
    }
}
