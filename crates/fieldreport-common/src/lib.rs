//! fieldreport-common: shared plumbing for the fieldreport crates.
//!
//! - `error`: `FieldReportError` and serde error wrappers
//! - `config`: TOML configuration with environment substitution
//! - `api`: interfaces to the upload, report, token and directory services
//! - `http`: `reqwest` client implementing the upload and report interfaces
//! - `telemetry`: tracing subscriber setup (feature `telemetry`)

pub mod api;
pub mod config;
pub mod error;
pub mod http;
#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use crate::api::{
    AuthToken, Directory, DirectoryEntry, EncodedImage, EnvToken, ImageUploader,
    InMemoryDirectory, RemoteReport, ReportApi, StaticToken, TokenProvider, UploadCategory,
    UploadedImage,
};
pub use crate::config::{ApiConfig, ComposerConfig, Config, StorageConfig};
pub use crate::error::{FieldReportError, SerDeError};
pub use crate::http::HttpClient;
