//! JSON report description accepted by `fieldreport submit`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fieldreport_composer::{
    Composer, DraftStore, HeaderFields, ImageLayout, ImageListRef, ImageRef, MediaStore,
    PhotoCategory, SectionKind, SectionPatch, StagedImageId,
};
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ReportFile {
    #[serde(default)]
    pub header: HeaderFields,
    /// Store to look up in the directory; fills id, name and brand
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub remote_id: Option<String>,
    pub sections: Vec<SectionSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionSpec {
    ChecklistItem {
        name: String,
    },
    ImageBlock {
        #[serde(default)]
        layout: ImageLayout,
        #[serde(default)]
        photos: BTreeMap<PhotoCategory, Vec<PhotoSpec>>,
    },
    Comment {
        text: String,
    },
    WorkDescription {
        text: String,
    },
}

/// A photo: already uploaded, already staged, or a file to capture.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PhotoSpec {
    Url { url: String },
    Staged { staged: StagedImageId },
    File(PathBuf),
}

impl ReportFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&raw)
            .into_diagnostic()
            .wrap_err_with(|| format!("parsing {}", path.display()))
    }

    /// Build the document in `composer`. Relative photo paths resolve
    /// against `base_dir`.
    pub fn apply<S: MediaStore, D: DraftStore>(
        self,
        composer: &mut Composer<S, D>,
        base_dir: &Path,
    ) -> Result<()> {
        let header = self.header;
        composer.update_header(|h| *h = header);

        for spec in self.sections {
            match spec {
                SectionSpec::ChecklistItem { name } => {
                    let id = composer.add_section(SectionKind::ChecklistItem);
                    composer
                        .update_section(id, SectionPatch::Name(name))
                        .into_diagnostic()?;
                }
                SectionSpec::Comment { text } => {
                    let id = composer.add_section(SectionKind::Comment);
                    composer
                        .update_section(id, SectionPatch::Text(text))
                        .into_diagnostic()?;
                }
                SectionSpec::WorkDescription { text } => {
                    let id = composer.add_section(SectionKind::WorkDescription);
                    composer
                        .update_section(id, SectionPatch::Text(text))
                        .into_diagnostic()?;
                }
                SectionSpec::ImageBlock { layout, photos } => {
                    let id = composer.add_image_block(layout);
                    for (category, specs) in photos {
                        let list = ImageListRef::new(id, category);
                        for photo in specs {
                            attach(composer, list, photo, base_dir)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn attach<S: MediaStore, D: DraftStore>(
    composer: &mut Composer<S, D>,
    list: ImageListRef,
    photo: PhotoSpec,
    base_dir: &Path,
) -> Result<()> {
    match photo {
        PhotoSpec::Url { url } => {
            composer
                .attach_image(list, ImageRef::resolved(url))
                .into_diagnostic()?;
        }
        PhotoSpec::Staged { staged } => {
            if composer.media().get(staged).into_diagnostic()?.is_none() {
                return Err(miette::miette!("staged image {staged} is not in the local stock"));
            }
            composer
                .attach_image(list, ImageRef::staged(staged))
                .into_diagnostic()?;
        }
        PhotoSpec::File(path) => {
            let path = if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            };
            let raw = std::fs::read(&path)
                .into_diagnostic()
                .wrap_err_with(|| format!("reading {}", path.display()))?;
            let name = file_name(&path);
            composer
                .capture_photo(list, &raw, &name)
                .into_diagnostic()
                .wrap_err_with(|| format!("staging {}", path.display()))?;
        }
    }
    Ok(())
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
