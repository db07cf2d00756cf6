use rusqlite::{params, OptionalExtension, Result};

use super::models::MediaRecord;
use super::sqlite::Database;
use crate::error::ProcessingError;
use crate::index::Album;

impl Database {
    /// Insert or refresh an album row, keyed on its relative path.
    pub fn upsert_album(&self, album: &Album) -> Result<()> {
        self.connection().execute(
            "INSERT INTO album (rel_path, name, metadata_json) VALUES (?1, ?2, ?3) \
             ON CONFLICT(rel_path) DO UPDATE SET name = ?2, metadata_json = ?3",
            params![
                album.rel_path.to_string_lossy(),
                album.name,
                album.metadata_json,
            ],
        )?;
        Ok(())
    }

    /// Insert or replace a media row. A changed file re-scanned under the
    /// same relative path supersedes its old row.
    pub fn upsert_media(&self, record: &MediaRecord) -> Result<()> {
        let people_json = serde_json::to_string(&record.people).unwrap_or_else(|_| "[]".to_string());
        self.connection().execute(
            "INSERT INTO media (album_path, rel_path, file_name, file_size, last_modified, \
                                content_hash, match_phase, confidence, sidecar_path, title, \
                                description, taken_at, latitude, longitude, people_json, scanned_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
             ON CONFLICT(rel_path) DO UPDATE SET \
                album_path = ?1, file_name = ?3, file_size = ?4, last_modified = ?5, \
                content_hash = ?6, match_phase = ?7, confidence = ?8, sidecar_path = ?9, \
                title = ?10, description = ?11, taken_at = ?12, latitude = ?13, \
                longitude = ?14, people_json = ?15, scanned_at = ?16",
            params![
                record.album_path,
                record.rel_path,
                record.file_name,
                record.file_size,
                record.last_modified,
                record.content_hash,
                record.match_phase,
                record.confidence,
                record.sidecar_path,
                record.title,
                record.description,
                record.taken_at,
                record.latitude,
                record.longitude,
                people_json,
                record.scanned_at,
            ],
        )?;
        Ok(())
    }

    pub fn insert_error(&self, error: &ProcessingError) -> Result<()> {
        self.connection().execute(
            "INSERT INTO processing_error (resume_key, kind, message, occurred_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                error.resume_key.to_string(),
                error.kind.as_str(),
                error.message,
                error.occurred_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn media_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))
    }

    pub fn album_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM album", [], |row| row.get(0))
    }

    pub fn error_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM processing_error", [], |row| row.get(0))
    }

    /// Look one media row up by relative path.
    pub fn get_media(&self, rel_path: &str) -> Result<Option<MediaRecord>> {
        self.connection()
            .query_row(
                "SELECT album_path, rel_path, file_name, file_size, last_modified, content_hash, \
                        match_phase, confidence, sidecar_path, title, description, taken_at, \
                        latitude, longitude, people_json, scanned_at \
                 FROM media WHERE rel_path = ?1",
                params![rel_path],
                |row| {
                    let people_json: String = row.get(14)?;
                    Ok(MediaRecord {
                        album_path: row.get(0)?,
                        rel_path: row.get(1)?,
                        file_name: row.get(2)?,
                        file_size: row.get(3)?,
                        last_modified: row.get(4)?,
                        content_hash: row.get(5)?,
                        match_phase: row.get(6)?,
                        confidence: row.get(7)?,
                        sidecar_path: row.get(8)?,
                        title: row.get(9)?,
                        description: row.get(10)?,
                        taken_at: row.get(11)?,
                        latitude: row.get(12)?,
                        longitude: row.get(13)?,
                        people: serde_json::from_str(&people_json).unwrap_or_default(),
                        scanned_at: row.get(15)?,
                    })
                },
            )
            .optional()
    }
}
