use crate::engine::ScanSummary;

/// Trait for reporting scan progress.
///
/// The CLI implements this with indicatif bars; tests and library callers
/// use the no-op reporter. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_album_indexed(&self, _album: &str, _media_files: usize, _sidecars: usize) {}
    fn on_work_progress(&self, _completed: usize, _scheduled: usize) {}
    fn on_scan_complete(&self, _summary: &ScanSummary) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
