//! The scan pipeline: index albums, match sidecars, schedule work, collect
//! outcomes.
//!
//! A producer thread walks the tree album by album; matching for an album is
//! finished before any of its work is dispatched. Work items flow through the
//! I/O and CPU pools; every outcome returns over a channel to the
//! orchestrator, which is the only writer of scan state and the only caller
//! of the result sink.

use crossbeam_channel::{bounded, never, select, unbounded, Receiver, Sender};
use dashmap::DashMap;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::error::{Error, ProcessingError, ProcessingErrorKind};
use crate::extract::{MetadataExtractor, SidecarExtractor};
use crate::index::{Album, FileKind, PathIndex};
use crate::matcher::{self, MatchPhase};
use crate::pool::{self, Outcome, PoolConfig, WorkItem};
use crate::progress::ProgressReporter;
use crate::state::{Marker, ResumeKey, ScanStateStore};
use crate::storage::ResultSink;

pub struct ScanEngine {
    config: AppConfig,
    cancel: Arc<AtomicBool>,
    extractor: Arc<dyn MetadataExtractor>,
}

#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub albums: usize,
    pub scheduled: usize,
    pub processed: usize,
    pub skipped: usize,
    pub matched_exact: usize,
    pub matched_copy_index: usize,
    pub matched_edited: usize,
    pub unmatched_media: usize,
    pub unmatched_sidecars: usize,
    pub duplicate_sidecars: usize,
    pub errors: usize,
    pub cancelled: bool,
    pub duration: Duration,
}

enum Event {
    Album(Album),
    MatchStats {
        exact: usize,
        copy_index: usize,
        edited: usize,
        unmatched_media: usize,
        unmatched_sidecars: usize,
        duplicates: usize,
    },
    Scheduled(ResumeKey),
    Skipped,
    Corrupted(ProcessingError),
    Finished(Option<Error>),
}

impl ScanEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            extractor: Arc::new(SidecarExtractor),
        }
    }

    /// Swap the metadata-extraction collaborator.
    pub fn with_extractor(mut self, extractor: Arc<dyn MetadataExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Cooperative cancellation: in-flight items finish, nothing new is
    /// dispatched, scan state reflects exactly what completed.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn scan(
        &self,
        sink: &dyn ResultSink,
        reporter: &dyn ProgressReporter,
    ) -> Result<ScanSummary, Error> {
        self.config.validate()?;
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        let start = Instant::now();
        let index = PathIndex::open(Path::new(&self.config.root_path), &self.config.ignore_patterns)?;
        let state = ScanStateStore::open(Path::new(&self.config.state_path))?;
        if !self.config.resume {
            state.clear_all()?;
        }

        let pool_config = PoolConfig {
            cpu_workers: self.config.resolved_cpu_workers(),
            io_workers: self.config.resolved_io_workers(),
            cpu_ceiling_pct: self.config.cpu_ceiling_pct,
            memory_ceiling_pct: self.config.memory_ceiling_pct,
            max_io_retries: self.config.max_io_retries,
            item_timeout: Duration::from_secs(self.config.item_timeout_secs),
        };
        info!(
            "Scanning {} ({} CPU workers, {} I/O workers)",
            index.start_path().display(),
            pool_config.cpu_workers,
            pool_config.io_workers,
        );
        reporter.on_scan_start();

        // Bounded work channels give back-pressure; outcome and event
        // channels stay unbounded so the orchestrator can never deadlock the
        // producer against its own workers.
        let (work_tx, work_rx) = bounded::<WorkItem>(pool_config.io_workers * 2);
        let (loaded_tx, loaded_rx) = bounded(pool_config.cpu_workers * 2);
        let (done_tx, done_rx) = unbounded::<Outcome>();
        let (event_tx, event_rx) = unbounded::<Event>();

        let cpu_limit = AtomicUsize::new(pool_config.cpu_workers);
        let io_limit = AtomicUsize::new(pool_config.io_workers);
        let governor_stop = AtomicBool::new(false);
        let in_flight: DashMap<ResumeKey, Instant> = DashMap::new();

        let cancel = &*self.cancel;
        let extractor = &*self.extractor;

        let mut summary = ScanSummary::default();
        let mut fatal: Option<Error> = None;

        thread::scope(|s| {
            {
                let index = &index;
                let state = &state;
                s.spawn(move || produce(index, state, work_tx, event_tx, cancel, reporter));
            }

            for i in 0..pool_config.io_workers {
                let work_rx = work_rx.clone();
                let loaded_tx = loaded_tx.clone();
                let done_tx = done_tx.clone();
                let io_limit = &io_limit;
                let in_flight = &in_flight;
                let max_retries = pool_config.max_io_retries;
                s.spawn(move || {
                    pool::io_worker(
                        i, work_rx, loaded_tx, done_tx, io_limit, cancel, in_flight, max_retries,
                    )
                });
            }
            for i in 0..pool_config.cpu_workers {
                let loaded_rx = loaded_rx.clone();
                let done_tx = done_tx.clone();
                let cpu_limit = &cpu_limit;
                s.spawn(move || {
                    pool::cpu_worker(i, loaded_rx, done_tx, cpu_limit, cancel, extractor)
                });
            }
            // the workers hold the only live senders now; their exit closes
            // the outcome channel and ends the orchestrator loop
            drop(work_rx);
            drop(loaded_tx);
            drop(loaded_rx);
            drop(done_tx);

            {
                let pool_config = pool_config.clone();
                let cpu_limit = &cpu_limit;
                let io_limit = &io_limit;
                let governor_stop = &governor_stop;
                s.spawn(move || {
                    pool::run_governor(&pool_config, cpu_limit, io_limit, governor_stop)
                });
            }

            let orchestrator = Orchestrator {
                state: &state,
                sink,
                reporter,
                cancel,
                in_flight: &in_flight,
                item_timeout: pool_config.item_timeout,
                max_sink_retries: self.config.max_sink_retries,
                summary: ScanSummary::default(),
                fatal: None,
                done_keys: HashSet::new(),
                expired: HashSet::new(),
            };
            let (run_summary, run_fatal) = orchestrator.run(event_rx, done_rx);
            summary = run_summary;
            fatal = run_fatal;
            governor_stop.store(true, Ordering::Relaxed);
        });

        summary.duration = start.elapsed();
        summary.cancelled = fatal.is_none() && self.cancel.load(Ordering::Relaxed);
        reporter.on_scan_complete(&summary);

        if let Some(err) = fatal {
            return Err(err);
        }
        info!(
            "Scan finished in {:.2}s: {} processed, {} skipped, {} unmatched, {} errors",
            summary.duration.as_secs_f64(),
            summary.processed,
            summary.skipped,
            summary.unmatched_media,
            summary.errors,
        );
        Ok(summary)
    }
}

/// Producer: index → match → schedule, one album at a time. Matching for an
/// album always completes before any of its items enter the work channel.
fn produce(
    index: &PathIndex,
    state: &ScanStateStore,
    work_tx: Sender<WorkItem>,
    event_tx: Sender<Event>,
    cancel: &AtomicBool,
    reporter: &dyn ProgressReporter,
) {
    let result = schedule_albums(index, state, &work_tx, &event_tx, cancel, reporter);
    let _ = event_tx.send(Event::Finished(result.err()));
}

fn schedule_albums(
    index: &PathIndex,
    state: &ScanStateStore,
    work_tx: &Sender<WorkItem>,
    event_tx: &Sender<Event>,
    cancel: &AtomicBool,
    reporter: &dyn ProgressReporter,
) -> Result<(), Error> {
    for rel_dir in index.album_dirs() {
        if cancel.load(Ordering::Relaxed) {
            debug!("Cancellation requested, no further albums scheduled");
            return Ok(());
        }
        let listing = match index.read_album(&rel_dir) {
            Ok(listing) => listing,
            Err(Error::Discovery(msg)) => {
                // skip the subtree, keep scanning
                warn!("{}", msg);
                continue;
            }
            Err(err) => return Err(err),
        };

        let mut media = Vec::new();
        let mut sidecars = Vec::new();
        let mut corrupted = Vec::new();
        for entry in listing.entries {
            match entry.kind {
                FileKind::Media => media.push(entry),
                FileKind::Sidecar => sidecars.push(entry),
                FileKind::Corrupted => corrupted.push(entry),
                FileKind::AlbumMetadata | FileKind::Ignored => {}
            }
        }
        if media.is_empty()
            && sidecars.is_empty()
            && corrupted.is_empty()
            && listing.album.metadata_json.is_none()
        {
            continue;
        }

        reporter.on_album_indexed(&listing.album.name, media.len(), sidecars.len());
        let album_path = listing.album.rel_path.clone();
        let _ = event_tx.send(Event::Album(listing.album));

        for entry in corrupted {
            let key = ResumeKey::compute(&entry.rel_path, entry.size, entry.modified);
            let _ = event_tx.send(Event::Corrupted(ProcessingError::new(
                key,
                ProcessingErrorKind::Corrupted,
                format!("corrupted or empty file '{}'", entry.rel_path.display()),
            )));
        }

        let outcome = matcher::match_album(media, sidecars)?;

        let mut exact = 0;
        let mut copy_index = 0;
        let mut edited = 0;
        let mut unmatched_media = 0;
        for result in &outcome.matches {
            match result.phase {
                MatchPhase::Exact => exact += 1,
                MatchPhase::CopyIndex => copy_index += 1,
                MatchPhase::EditedVariant => edited += 1,
                MatchPhase::Unmatched => unmatched_media += 1,
            }
        }
        for sidecar in &outcome.unmatched_sidecars {
            debug!("Unmatched sidecar: {}", sidecar.rel_path.display());
        }
        for sidecar in &outcome.duplicate_sidecars {
            warn!("Duplicate sidecar: {}", sidecar.rel_path.display());
        }
        let _ = event_tx.send(Event::MatchStats {
            exact,
            copy_index,
            edited,
            unmatched_media,
            unmatched_sidecars: outcome.unmatched_sidecars.len(),
            duplicates: outcome.duplicate_sidecars.len(),
        });

        for result in outcome.matches {
            if cancel.load(Ordering::Relaxed) {
                return Ok(());
            }
            let media = &result.media;
            let key = ResumeKey::compute(&media.rel_path, media.size, media.modified);
            if let Some(Marker::Succeeded) = state.get(key)? {
                let _ = event_tx.send(Event::Skipped);
                continue;
            }
            let _ = event_tx.send(Event::Scheduled(key));
            let item = WorkItem {
                result,
                album_path: album_path.clone(),
                resume_key: key,
            };
            if work_tx.send(item).is_err() {
                // pool is gone; the orchestrator already knows why
                return Ok(());
            }
        }
    }
    Ok(())
}

struct Orchestrator<'a> {
    state: &'a ScanStateStore,
    sink: &'a dyn ResultSink,
    reporter: &'a dyn ProgressReporter,
    cancel: &'a AtomicBool,
    in_flight: &'a DashMap<ResumeKey, Instant>,
    item_timeout: Duration,
    max_sink_retries: u32,
    summary: ScanSummary,
    fatal: Option<Error>,
    done_keys: HashSet<ResumeKey>,
    expired: HashSet<ResumeKey>,
}

impl<'a> Orchestrator<'a> {
    fn run(
        mut self,
        mut event_rx: Receiver<Event>,
        mut done_rx: Receiver<Outcome>,
    ) -> (ScanSummary, Option<Error>) {
        let mut producer_done = false;
        let mut workers_done = false;

        while !(producer_done && workers_done) {
            select! {
                recv(event_rx) -> msg => match msg {
                    Ok(event) => self.handle_event(event),
                    Err(_) => {
                        producer_done = true;
                        event_rx = never();
                    }
                },
                recv(done_rx) -> msg => match msg {
                    Ok(outcome) => self.handle_outcome(outcome),
                    Err(_) => {
                        workers_done = true;
                        done_rx = never();
                    }
                },
                default(Duration::from_millis(200)) => {}
            }
            self.expire_overdue();
        }

        // anything still registered was abandoned mid-flight (cancellation);
        // it stays Pending and reruns on resume
        self.in_flight.clear();
        (self.summary, self.fatal)
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Album(album) => {
                self.summary.albums += 1;
                if let Err(err) =
                    persist_with_retry(|| self.sink.record_album(&album), self.max_sink_retries)
                {
                    error!("Cannot record album '{}': {}", album.name, err);
                }
            }
            Event::MatchStats {
                exact,
                copy_index,
                edited,
                unmatched_media,
                unmatched_sidecars,
                duplicates,
            } => {
                self.summary.matched_exact += exact;
                self.summary.matched_copy_index += copy_index;
                self.summary.matched_edited += edited;
                self.summary.unmatched_media += unmatched_media;
                self.summary.unmatched_sidecars += unmatched_sidecars;
                self.summary.duplicate_sidecars += duplicates;
            }
            Event::Scheduled(key) => {
                self.summary.scheduled += 1;
                // a worker can finish before this event is read; never let
                // Pending overwrite a terminal marker
                if !self.done_keys.contains(&key) {
                    if let Err(err) = self.state.put(key, &Marker::Pending) {
                        warn!("Cannot mark {} pending: {}", key, err);
                    }
                }
            }
            Event::Skipped => self.summary.skipped += 1,
            Event::Corrupted(processing_error) => {
                let key = processing_error.resume_key;
                let _ = self
                    .state
                    .put(key, &Marker::Failed(processing_error.message.clone()));
                if let Err(err) = persist_with_retry(
                    || self.sink.record_error(&processing_error),
                    self.max_sink_retries,
                ) {
                    error!("Cannot record processing error for {}: {}", key, err);
                }
                self.summary.errors += 1;
            }
            Event::Finished(maybe_error) => {
                if let Some(err) = maybe_error {
                    error!("Scheduling aborted: {}", err);
                    self.fatal = Some(err);
                    // stop the pools; in-flight items still drain
                    self.cancel.store(true, Ordering::Relaxed);
                }
            }
        }
    }

    fn handle_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Done { key, record } => {
                if self.expired.remove(&key) {
                    debug!("Ignoring late result for abandoned item {}", key);
                    return;
                }
                self.in_flight.remove(&key);
                self.done_keys.insert(key);
                match persist_with_retry(
                    || self.sink.record_media(&record),
                    self.max_sink_retries,
                ) {
                    Ok(()) => {
                        if let Err(err) = self.state.put(key, &Marker::Succeeded) {
                            warn!("Cannot mark {} succeeded: {}", key, err);
                        }
                        self.summary.processed += 1;
                    }
                    Err(err) => {
                        let processing_error = ProcessingError::new(
                            key,
                            ProcessingErrorKind::Persistence,
                            err.to_string(),
                        );
                        self.record_failure(processing_error);
                    }
                }
                self.report_progress();
            }
            Outcome::Failed { key, error } => {
                if self.expired.remove(&key) {
                    debug!("Ignoring late failure for abandoned item {}", key);
                    return;
                }
                self.in_flight.remove(&key);
                self.done_keys.insert(key);
                self.record_failure(error);
                self.report_progress();
            }
        }
    }

    fn expire_overdue(&mut self) {
        let overdue: Vec<ResumeKey> = self
            .in_flight
            .iter()
            .filter(|entry| entry.value().elapsed() > self.item_timeout)
            .map(|entry| *entry.key())
            .collect();
        for key in overdue {
            self.in_flight.remove(&key);
            self.expired.insert(key);
            self.done_keys.insert(key);
            warn!("Work item {} exceeded its deadline, abandoning", key);
            let processing_error = ProcessingError::new(
                key,
                ProcessingErrorKind::Timeout,
                "work item exceeded its deadline and was abandoned",
            );
            self.record_failure(processing_error);
        }
    }

    fn record_failure(&mut self, processing_error: ProcessingError) {
        let key = processing_error.resume_key;
        let _ = self
            .state
            .put(key, &Marker::Failed(processing_error.message.clone()));
        if let Err(err) = persist_with_retry(
            || self.sink.record_error(&processing_error),
            self.max_sink_retries,
        ) {
            error!("Cannot record processing error for {}: {}", key, err);
        }
        self.summary.errors += 1;
    }

    fn report_progress(&self) {
        self.reporter.on_work_progress(
            self.summary.processed + self.summary.errors,
            self.summary.scheduled,
        );
    }
}

/// Bounded retry for sink writes; a persistent failure fails the item, not
/// the scan.
fn persist_with_retry(
    mut op: impl FnMut() -> Result<(), Error>,
    max_retries: u32,
) -> Result<(), Error> {
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(err) if attempt < max_retries => {
                warn!("Sink write failed (attempt {}): {}", attempt + 1, err);
                thread::sleep(Duration::from_millis(25 << attempt.min(6)));
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_persist_with_retry_eventually_succeeds() {
        let attempts = Cell::new(0);
        let result = persist_with_retry(
            || {
                attempts.set(attempts.get() + 1);
                if attempts.get() < 3 {
                    Err(Error::Persistence("busy".to_string()))
                } else {
                    Ok(())
                }
            },
            3,
        );
        assert!(result.is_ok());
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_persist_with_retry_gives_up() {
        let attempts = Cell::new(0);
        let result = persist_with_retry(
            || {
                attempts.set(attempts.get() + 1);
                Err(Error::Persistence("down".to_string()))
            },
            2,
        );
        assert!(result.is_err());
        assert_eq!(attempts.get(), 3);
    }
}
