//! SQLite-backed local stores.
//!
//! One database file holds both namespaces: the `staged_images` table and
//! the `drafts` table (one row per draft key).

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::draft::{DRAFT_KEY, DraftSnapshot, DraftStore};
use crate::error::StoreError;
use crate::staging::{MediaStore, StagedImage};
use crate::types::StagedImageId;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    draft_key: String,
}

impl SqliteStore {
    /// Open or create the database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened local store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Use a different draft slot, for composers sharing one database.
    pub fn with_draft_key(mut self, key: impl Into<String>) -> Self {
        self.draft_key = key.into();
        self
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS staged_images (
                id              TEXT PRIMARY KEY,
                bytes           BLOB NOT NULL,
                original_name   TEXT NOT NULL,
                created_at      INTEGER NOT NULL,
                uploaded        INTEGER NOT NULL DEFAULT 0,
                remote_url      TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_staged_images_created_at
                ON staged_images(created_at);
            CREATE TABLE IF NOT EXISTS drafts (
                key             TEXT PRIMARY KEY,
                snapshot_json   TEXT NOT NULL,
                saved_at        INTEGER NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            draft_key: DRAFT_KEY.to_string(),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type ImageRow = (String, Vec<u8>, String, i64, bool, Option<String>);

const IMAGE_COLUMNS: &str = "id, bytes, original_name, created_at, uploaded, remote_url";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_image(row: ImageRow) -> Result<StagedImage, StoreError> {
    let (id, bytes, original_name, created_ms, uploaded, remote_url) = row;
    let parsed = StagedImageId::parse(&id).ok_or_else(|| StoreError::Corrupt {
        key: id.clone(),
        reason: "invalid image id".into(),
    })?;
    let created_at =
        DateTime::<Utc>::from_timestamp_millis(created_ms).ok_or_else(|| StoreError::Corrupt {
            key: id.clone(),
            reason: format!("invalid timestamp {created_ms}"),
        })?;
    Ok(StagedImage {
        id: parsed,
        bytes: Bytes::from(bytes),
        original_name,
        created_at,
        uploaded,
        remote_url,
    })
}

impl MediaStore for SqliteStore {
    fn put(&self, image: &StagedImage) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO staged_images
                (id, bytes, original_name, created_at, uploaded, remote_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                image.id.to_string(),
                &image.bytes[..],
                image.original_name,
                image.created_at.timestamp_millis(),
                image.uploaded,
                image.remote_url,
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: StagedImageId) -> Result<Option<StagedImage>, StoreError> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {IMAGE_COLUMNS} FROM staged_images WHERE id = ?1"),
                params![id.to_string()],
                read_row,
            )
            .optional()?;
        row.map(into_image).transpose()
    }

    fn get_all(&self) -> Result<Vec<StagedImage>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {IMAGE_COLUMNS} FROM staged_images ORDER BY created_at, id"
        ))?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(into_image).collect()
    }

    fn delete(&self, id: StagedImageId) -> Result<bool, StoreError> {
        let n = self.conn().execute(
            "DELETE FROM staged_images WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(n > 0)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.conn().execute("DELETE FROM staged_images", [])?;
        Ok(())
    }

    fn mark_uploaded(&self, id: StagedImageId, url: &str) -> Result<bool, StoreError> {
        let n = self.conn().execute(
            "UPDATE staged_images SET uploaded = 1, remote_url = ?2 WHERE id = ?1",
            params![id.to_string(), url],
        )?;
        Ok(n > 0)
    }
}

impl DraftStore for SqliteStore {
    fn load(&self) -> Result<Option<DraftSnapshot>, StoreError> {
        let json: Option<String> = self
            .conn()
            .query_row(
                "SELECT snapshot_json FROM drafts WHERE key = ?1",
                params![self.draft_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|j| serde_json::from_str(&j)).transpose()?)
    }

    fn save(&self, snapshot: &DraftSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string(snapshot)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO drafts (key, snapshot_json, saved_at)
             VALUES (?1, ?2, ?3)",
            params![self.draft_key, json, snapshot.saved_at.timestamp_millis()],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM drafts WHERE key = ?1", params![self.draft_key])?;
        Ok(())
    }
}
