//! Narrow interfaces to the services the composer depends on.
//!
//! The composer never talks HTTP itself. It is handed implementations of
//! these traits: [`crate::http::HttpClient`] in production, in-memory fakes
//! in tests.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::RwLock;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::FieldReportError;

/// Photo category as understood by the upload endpoint.
///
/// The endpoint only knows `before`/`after`. Callers with richer
/// vocabularies map onto these at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadCategory {
    Before,
    After,
}

impl UploadCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadCategory::Before => "before",
            UploadCategory::After => "after",
        }
    }
}

impl fmt::Display for UploadCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bearer token for the current user. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(..)")
    }
}

/// Image bytes prepared for the wire.
#[derive(Debug, Clone, Serialize)]
pub struct EncodedImage {
    pub file_name: String,
    pub mime_type: String,
    /// Standard base64 of the image bytes
    pub data: String,
}

/// Response of a successful image upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedImage {
    pub url: String,
}

/// Response of a successful report create/update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteReport {
    pub id: String,
}

/// Source of the token used to attribute uploads and submits.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<AuthToken>;
}

/// Fixed token, or none. Handy for tests and one-shot CLI runs.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<AuthToken>);

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<AuthToken> {
        self.0.clone()
    }
}

/// Reads the token from an environment variable on every call, so a
/// refreshed token is picked up without restarting.
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenProvider for EnvToken {
    fn token(&self) -> Option<AuthToken> {
        std::env::var(&self.var)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(AuthToken::new)
    }
}

/// Image upload endpoint.
pub trait ImageUploader: Send + Sync {
    fn upload(
        &self,
        token: &AuthToken,
        image: &EncodedImage,
        category: UploadCategory,
        date: NaiveDate,
    ) -> impl Future<Output = Result<UploadedImage, FieldReportError>> + Send;
}

/// Report storage endpoint.
pub trait ReportApi: Send + Sync {
    fn create<P: Serialize + Sync>(
        &self,
        token: &AuthToken,
        payload: &P,
    ) -> impl Future<Output = Result<RemoteReport, FieldReportError>> + Send;

    fn update<P: Serialize + Sync>(
        &self,
        token: &AuthToken,
        id: &str,
        payload: &P,
    ) -> impl Future<Output = Result<RemoteReport, FieldReportError>> + Send;
}

/// One row of a directory (brand, store, checklist catalog).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: String,
    pub name: String,
    /// Anything else the directory returns (e.g. a store's `brand`)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DirectoryEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.to_owned(), value.into());
        self
    }

    /// String-valued extra field, if present.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// Read-only lookup service.
pub trait Directory: Send + Sync {
    fn find_by_id(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<DirectoryEntry>, FieldReportError>> + Send;

    fn list_all(&self) -> impl Future<Output = Result<Vec<DirectoryEntry>, FieldReportError>> + Send;
}

/// Directory backed by a map; entries list in id order.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entries: RwLock<BTreeMap<String, DirectoryEntry>>,
}

impl InMemoryDirectory {
    pub fn new(entries: impl IntoIterator<Item = DirectoryEntry>) -> Self {
        Self {
            entries: RwLock::new(entries.into_iter().map(|e| (e.id.clone(), e)).collect()),
        }
    }

    pub fn insert(&self, entry: DirectoryEntry) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry.id.clone(), entry);
    }
}

impl Directory for InMemoryDirectory {
    async fn find_by_id(&self, id: &str) -> Result<Option<DirectoryEntry>, FieldReportError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<DirectoryEntry>, FieldReportError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_debug_is_redacted() {
        let token = AuthToken::new("secret-value");
        assert_eq!(format!("{:?}", token), "AuthToken(..)");
        assert_eq!(token.as_str(), "secret-value");
    }

    #[test]
    fn category_serializes_lowercase() {
        let json = serde_json::to_string(&UploadCategory::After).unwrap();
        assert_eq!(json, "\"after\"");
    }

    #[test]
    fn directory_entry_keeps_extra_fields() {
        let json = r#"{"id":"s1","name":"Main St","brand":"Acme"}"#;
        let entry: DirectoryEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.extra_str("brand"), Some("Acme"));
    }

    #[tokio::test]
    async fn in_memory_directory_lookup() {
        let dir = InMemoryDirectory::new([
            DirectoryEntry::new("b", "Second"),
            DirectoryEntry::new("a", "First"),
        ]);
        let found = dir.find_by_id("a").await.unwrap();
        assert_eq!(found.map(|e| e.name), Some("First".to_string()));
        assert!(dir.find_by_id("zzz").await.unwrap().is_none());

        let all = dir.list_all().await.unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
