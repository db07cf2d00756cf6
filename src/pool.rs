//! CPU-bound and I/O-bound worker pools.
//!
//! Workers pull from bounded channels and report every outcome back to the
//! orchestrator; they never touch scan state themselves. A governor thread
//! samples system load and moves each pool's active-worker limit between 1
//! and the configured maximum.

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use sysinfo::System;
use tracing::{debug, trace};

use crate::error::{ProcessingError, ProcessingErrorKind};
use crate::extract::{content_hash, MediaMetadata, MetadataExtractor};
use crate::matcher::MatchResult;
use crate::state::ResumeKey;
use crate::storage::MediaRecord;

const IDLE_POLL: Duration = Duration::from_millis(100);
const PAUSED_POLL: Duration = Duration::from_millis(50);
const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);
const RETRY_BASE_DELAY_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub cpu_workers: usize,
    pub io_workers: usize,
    pub cpu_ceiling_pct: f32,
    pub memory_ceiling_pct: f32,
    pub max_io_retries: u32,
    pub item_timeout: Duration,
}

/// One schedulable unit: a media file, its matched sidecar if any, and the
/// key the orchestrator tracks it under.
#[derive(Debug)]
pub struct WorkItem {
    pub result: MatchResult,
    pub album_path: PathBuf,
    pub resume_key: ResumeKey,
}

/// I/O stage output: the item with its bytes in memory.
pub struct LoadedItem {
    pub item: WorkItem,
    pub media_bytes: Vec<u8>,
    pub sidecar_bytes: Option<Vec<u8>>,
}

#[derive(Debug)]
pub enum Outcome {
    Done {
        key: ResumeKey,
        record: Box<MediaRecord>,
    },
    Failed {
        key: ResumeKey,
        error: ProcessingError,
    },
}

/// Read stage. Registers each item as in-flight before touching the disk so
/// the orchestrator can enforce the per-item deadline.
#[allow(clippy::too_many_arguments)]
pub fn io_worker(
    index: usize,
    work_rx: Receiver<WorkItem>,
    loaded_tx: Sender<LoadedItem>,
    done_tx: Sender<Outcome>,
    limit: &AtomicUsize,
    cancel: &AtomicBool,
    in_flight: &DashMap<ResumeKey, Instant>,
    max_retries: u32,
) {
    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        if index >= limit.load(Ordering::Relaxed) {
            thread::sleep(PAUSED_POLL);
            continue;
        }
        let item = match work_rx.recv_timeout(IDLE_POLL) {
            Ok(item) => item,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        in_flight.insert(item.resume_key, Instant::now());
        match load_item(item, max_retries) {
            Ok(loaded) => {
                if loaded_tx.send(loaded).is_err() {
                    break;
                }
            }
            Err(outcome) => {
                if done_tx.send(outcome).is_err() {
                    break;
                }
            }
        }
    }
    trace!("I/O worker {} exiting", index);
}

/// Extraction stage: hash the content, parse the sidecar, build the record.
/// Failures are converted at this boundary; nothing escapes the pool.
pub fn cpu_worker(
    index: usize,
    loaded_rx: Receiver<LoadedItem>,
    done_tx: Sender<Outcome>,
    limit: &AtomicUsize,
    cancel: &AtomicBool,
    extractor: &dyn MetadataExtractor,
) {
    loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        if index >= limit.load(Ordering::Relaxed) {
            thread::sleep(PAUSED_POLL);
            continue;
        }
        let loaded = match loaded_rx.recv_timeout(IDLE_POLL) {
            Ok(loaded) => loaded,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if done_tx.send(process_item(loaded, extractor)).is_err() {
            break;
        }
    }
    trace!("CPU worker {} exiting", index);
}

fn load_item(item: WorkItem, max_retries: u32) -> Result<LoadedItem, Outcome> {
    let key = item.resume_key;
    let media_bytes = match read_with_retry(&item.result.media.path, max_retries) {
        Ok(bytes) => bytes,
        Err(err) => {
            return Err(Outcome::Failed {
                key,
                error: ProcessingError::new(
                    key,
                    ProcessingErrorKind::Read,
                    format!(
                        "cannot read '{}': {}",
                        item.result.media.rel_path.display(),
                        err
                    ),
                ),
            })
        }
    };
    let sidecar_bytes = match &item.result.sidecar {
        Some(sidecar) => match read_with_retry(&sidecar.path, max_retries) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                return Err(Outcome::Failed {
                    key,
                    error: ProcessingError::new(
                        key,
                        ProcessingErrorKind::Read,
                        format!("cannot read sidecar '{}': {}", sidecar.rel_path.display(), err),
                    ),
                })
            }
        },
        None => None,
    };
    Ok(LoadedItem {
        item,
        media_bytes,
        sidecar_bytes,
    })
}

fn process_item(loaded: LoadedItem, extractor: &dyn MetadataExtractor) -> Outcome {
    let LoadedItem {
        item,
        media_bytes,
        sidecar_bytes,
    } = loaded;
    let key = item.resume_key;
    let hash = content_hash(&media_bytes);
    match extractor.extract(&item.result.media, sidecar_bytes.as_deref()) {
        Ok(metadata) => Outcome::Done {
            key,
            record: Box::new(build_record(&item, hash, metadata)),
        },
        Err(err) => Outcome::Failed {
            key,
            error: ProcessingError::new(key, ProcessingErrorKind::Extraction, err.to_string()),
        },
    }
}

fn build_record(item: &WorkItem, hash: u64, metadata: MediaMetadata) -> MediaRecord {
    let media = &item.result.media;
    MediaRecord {
        album_path: item.album_path.to_string_lossy().into_owned(),
        rel_path: media.rel_path.to_string_lossy().into_owned(),
        file_name: media.name.clone(),
        file_size: media.size as i64,
        last_modified: unix_secs(media.modified),
        content_hash: hash as i64,
        match_phase: item.result.phase.as_str().to_string(),
        confidence: item.result.confidence.as_str().to_string(),
        sidecar_path: item
            .result
            .sidecar
            .as_ref()
            .map(|s| s.rel_path.to_string_lossy().into_owned()),
        title: metadata.title,
        description: metadata.description,
        taken_at: metadata.taken_at.map(|t| t.to_rfc3339()),
        latitude: metadata.latitude,
        longitude: metadata.longitude,
        people: metadata.people,
        scanned_at: Utc::now().to_rfc3339(),
    }
}

fn unix_secs(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}

/// Bounded exponential backoff on transient error kinds; anything else fails
/// immediately.
pub fn read_with_retry(path: &Path, max_retries: u32) -> io::Result<Vec<u8>> {
    let mut attempt = 0u32;
    loop {
        match fs::read(path) {
            Ok(data) => return Ok(data),
            Err(err) if is_transient(&err) && attempt < max_retries => {
                let delay = Duration::from_millis(RETRY_BASE_DELAY_MS << attempt.min(6));
                debug!(
                    "Transient read error on {} (attempt {}): {}, retrying in {:?}",
                    path.display(),
                    attempt + 1,
                    err,
                    delay
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Control loop for adaptive sizing: sample system load, nudge each pool's
/// active limit one step per sample toward the sustainable level.
pub fn run_governor(
    config: &PoolConfig,
    cpu_limit: &AtomicUsize,
    io_limit: &AtomicUsize,
    stop: &AtomicBool,
) {
    let mut system = System::new();
    while !stop.load(Ordering::Relaxed) {
        system.refresh_cpu_usage();
        system.refresh_memory();
        let cpu_pct = system.global_cpu_usage();
        let total = system.total_memory();
        let memory_pct = if total == 0 {
            0.0
        } else {
            system.used_memory() as f32 / total as f32 * 100.0
        };
        let overloaded =
            cpu_pct > config.cpu_ceiling_pct || memory_pct > config.memory_ceiling_pct;
        adjust_limit("cpu", cpu_limit, overloaded, config.cpu_workers);
        adjust_limit("io", io_limit, overloaded, config.io_workers);
        thread::sleep(SAMPLE_INTERVAL);
    }
    trace!("Governor exiting");
}

fn adjust_limit(pool: &str, limit: &AtomicUsize, overloaded: bool, max: usize) {
    let current = limit.load(Ordering::Relaxed);
    let target = if overloaded {
        current.saturating_sub(1).max(1)
    } else {
        (current + 1).min(max)
    };
    if target != current {
        debug!("{} pool active limit {} -> {}", pool, current, target);
        limit.store(target, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adjust_limit_steps_and_clamps() {
        let limit = AtomicUsize::new(4);
        adjust_limit("cpu", &limit, true, 4);
        assert_eq!(limit.load(Ordering::Relaxed), 3);
        adjust_limit("cpu", &limit, true, 4);
        adjust_limit("cpu", &limit, true, 4);
        adjust_limit("cpu", &limit, true, 4);
        // never below one active worker
        assert_eq!(limit.load(Ordering::Relaxed), 1);

        adjust_limit("cpu", &limit, false, 4);
        assert_eq!(limit.load(Ordering::Relaxed), 2);
        for _ in 0..10 {
            adjust_limit("cpu", &limit, false, 4);
        }
        // never above the configured cap
        assert_eq!(limit.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_read_with_retry_fails_fast_on_missing_file() {
        let started = Instant::now();
        let err = read_with_retry(Path::new("/nonexistent/never.jpg"), 3).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        // NotFound is not transient, so no backoff sleeps happened
        assert!(started.elapsed() < Duration::from_millis(RETRY_BASE_DELAY_MS));
    }

    #[test]
    fn test_transient_kinds() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_transient(&io::Error::from(
            io::ErrorKind::PermissionDenied
        )));
    }
}
