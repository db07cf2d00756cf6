use glob::Pattern;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

use crate::error::Error;
use crate::matcher::strip;

/// Extensions treated as media. RAW formats included so an export mixing
/// originals and developed files catalogs both.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "heif", "tif", "tiff", "avif", "mp4",
    "mov", "avi", "mkv", "m4v", "3gp", "mpg", "mpeg", "wmv", "webm", "nef", "dng", "cr2", "cr3",
    "arw", "orf", "rw2", "raf",
];

/// Export tools nest the actual albums two levels below the archive root.
const EXPORT_SUBDIRS: [&str; 2] = ["Takeout", "Google Photos"];

const ALBUM_METADATA_STEM: &str = "metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Media,
    Sidecar,
    AlbumMetadata,
    Corrupted,
    Ignored,
}

/// One classified file. Immutable once built.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: PathBuf,
    pub rel_path: PathBuf,
    /// File name normalized to Unicode NFC; all matching runs on this.
    pub name: String,
    pub size: u64,
    pub modified: SystemTime,
    pub kind: FileKind,
}

#[derive(Debug, Clone)]
pub struct Album {
    pub name: String,
    pub rel_path: PathBuf,
    pub metadata_json: Option<String>,
}

#[derive(Debug)]
pub struct AlbumListing {
    pub album: Album,
    pub entries: Vec<FileEntry>,
}

/// Enumerates and classifies the album tree. Re-runnable; never mutates the
/// filesystem.
pub struct PathIndex {
    start: PathBuf,
    ignore_patterns: Vec<Pattern>,
}

impl PathIndex {
    pub fn open(root: &Path, ignore_globs: &[String]) -> Result<Self, Error> {
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "'{}' is not a directory",
                root.display()
            )));
        }

        let ignore_patterns: Vec<Pattern> = ignore_globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Invalid ignore pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();

        Ok(Self {
            start: detect_export_root(root),
            ignore_patterns,
        })
    }

    /// The directory enumeration actually starts from (the nested export
    /// subfolder when present, the root itself otherwise).
    pub fn start_path(&self) -> &Path {
        &self.start
    }

    /// All directories under the start path, as sorted relative paths. The
    /// empty path is the start directory itself. Unreadable subtrees are
    /// logged and skipped, never fatal.
    pub fn album_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: BTreeSet<PathBuf> = BTreeSet::new();
        let walker = WalkDir::new(&self.start)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !self.is_ignored(e.path()));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable directory entry: {}", err);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                dirs.insert(self.rel_path(entry.path()));
            }
        }
        dirs.into_iter().collect()
    }

    /// List and classify the files directly inside one album directory.
    pub fn read_album(&self, rel_dir: &Path) -> Result<AlbumListing, Error> {
        let dir = self.start.join(rel_dir);
        let read = fs::read_dir(&dir)
            .map_err(|e| Error::Discovery(format!("cannot list {}: {}", dir.display(), e)))?;

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in read {
            match entry {
                Ok(entry) => paths.push(entry.path()),
                Err(err) => warn!("Skipping unreadable entry in {}: {}", dir.display(), err),
            }
        }

        let mut entries: Vec<FileEntry> = paths
            .par_iter()
            .filter_map(|path| self.classify(path))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let name = if rel_dir.as_os_str().is_empty() {
            dir.file_name()
                .map(|n| normalize(&n.to_string_lossy()))
                .unwrap_or_else(|| dir.to_string_lossy().into_owned())
        } else {
            rel_dir
                .file_name()
                .map(|n| normalize(&n.to_string_lossy()))
                .unwrap_or_default()
        };

        let metadata_json = read_album_metadata(&entries);

        Ok(AlbumListing {
            album: Album {
                name,
                rel_path: rel_dir.to_path_buf(),
                metadata_json,
            },
            entries,
        })
    }

    fn classify(&self, path: &Path) -> Option<FileEntry> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Cannot stat {}: {}", path.display(), err);
                return Some(FileEntry {
                    path: path.to_path_buf(),
                    rel_path: self.rel_path(path),
                    name: file_name(path),
                    size: 0,
                    modified: UNIX_EPOCH,
                    kind: FileKind::Corrupted,
                });
            }
        };
        if metadata.is_dir() {
            return None;
        }
        if metadata.file_type().is_symlink() {
            debug!("Skipping symlink {}", path.display());
            return None;
        }

        let rel_path = self.rel_path(path);
        if self.is_ignored(path) {
            return None;
        }

        let name = file_name(path);
        let mut kind = classify_name(&name);
        if metadata.len() == 0 && kind != FileKind::Ignored {
            kind = FileKind::Corrupted;
        }

        Some(FileEntry {
            path: path.to_path_buf(),
            rel_path,
            name,
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(UNIX_EPOCH),
            kind,
        })
    }

    fn rel_path(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.start)
            .unwrap_or(path)
            .to_path_buf()
    }

    fn is_ignored(&self, path: &Path) -> bool {
        if self.ignore_patterns.is_empty() {
            return false;
        }
        let rel = path.strip_prefix(&self.start).unwrap_or(path);
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(rel))
    }
}

/// `root/Takeout/Google Photos` when the export tool's nesting is present,
/// `root` for flat layouts.
fn detect_export_root(root: &Path) -> PathBuf {
    let nested = root.join(EXPORT_SUBDIRS[0]).join(EXPORT_SUBDIRS[1]);
    if nested.is_dir() {
        debug!("Using nested export root {}", nested.display());
        nested
    } else {
        root.to_path_buf()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| normalize(&n.to_string_lossy()))
        .unwrap_or_default()
}

/// Canonical Unicode form so composed and decomposed accents compare equal.
pub fn normalize(name: &str) -> String {
    name.nfc().collect()
}

fn classify_name(name: &str) -> FileKind {
    if name.starts_with('.') {
        return FileKind::Ignored;
    }
    let lower = name.to_lowercase();
    if let Some(stem) = lower.strip_suffix(".json") {
        let stem = match strip::strip_copy_index(stem) {
            Some((stripped, _)) => stripped,
            None => stem.to_string(),
        };
        if stem == ALBUM_METADATA_STEM {
            return FileKind::AlbumMetadata;
        }
        return FileKind::Sidecar;
    }
    match lower.rsplit_once('.') {
        Some((_, ext)) if MEDIA_EXTENSIONS.contains(&ext) => FileKind::Media,
        _ => FileKind::Ignored,
    }
}

/// Pull the album-level metadata blob, if a readable one exists. Validated as
/// JSON but stored unparsed.
fn read_album_metadata(entries: &[FileEntry]) -> Option<String> {
    let entry = entries
        .iter()
        .find(|e| e.kind == FileKind::AlbumMetadata)?;
    match fs::read_to_string(&entry.path) {
        Ok(text) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(_) => Some(text),
            Err(err) => {
                warn!("Invalid album metadata {}: {}", entry.path.display(), err);
                None
            }
        },
        Err(err) => {
            warn!("Cannot read album metadata {}: {}", entry.path.display(), err);
            None
        }
    }
}
