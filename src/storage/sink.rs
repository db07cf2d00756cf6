use std::cell::RefCell;

use super::models::MediaRecord;
use super::sqlite::Database;
use crate::error::{Error, ProcessingError};
use crate::index::Album;

/// The persistence boundary the orchestrator writes outcomes to. All calls
/// happen on the orchestrator thread, serialized by construction.
pub trait ResultSink {
    fn record_media(&self, record: &MediaRecord) -> Result<(), Error>;
    fn record_album(&self, album: &Album) -> Result<(), Error>;
    fn record_error(&self, error: &ProcessingError) -> Result<(), Error>;
}

impl ResultSink for Database {
    fn record_media(&self, record: &MediaRecord) -> Result<(), Error> {
        self.upsert_media(record)?;
        Ok(())
    }

    fn record_album(&self, album: &Album) -> Result<(), Error> {
        self.upsert_album(album)?;
        Ok(())
    }

    fn record_error(&self, error: &ProcessingError) -> Result<(), Error> {
        self.insert_error(error)?;
        Ok(())
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemorySink {
    pub media: RefCell<Vec<MediaRecord>>,
    pub albums: RefCell<Vec<Album>>,
    pub errors: RefCell<Vec<ProcessingError>>,
}

impl ResultSink for MemorySink {
    fn record_media(&self, record: &MediaRecord) -> Result<(), Error> {
        let mut media = self.media.borrow_mut();
        // a re-scan of the same path supersedes the old row, like the upsert
        if let Some(existing) = media.iter_mut().find(|m| m.rel_path == record.rel_path) {
            *existing = record.clone();
        } else {
            media.push(record.clone());
        }
        Ok(())
    }

    fn record_album(&self, album: &Album) -> Result<(), Error> {
        let mut albums = self.albums.borrow_mut();
        if let Some(existing) = albums.iter_mut().find(|a| a.rel_path == album.rel_path) {
            *existing = album.clone();
        } else {
            albums.push(album.clone());
        }
        Ok(())
    }

    fn record_error(&self, error: &ProcessingError) -> Result<(), Error> {
        self.errors.borrow_mut().push(error.clone());
        Ok(())
    }
}
