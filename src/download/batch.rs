//! Runs every segment of one video concurrently.
//!
//! Each [`SegmentSource`] becomes one engine submission writing to
//! `<output_dir>/<name>-part<N><ext>` (or its explicit file name). All
//! transfers run at once; the returned [`BatchSummary`] lists them in input
//! order. [`run_batch_until`] also takes a shutdown future that cancels every
//! running transfer, leaving flushed partial files to resume from.

use std::future::{Future, pending};
use std::path::{Path, PathBuf};

use futures_util::future::join_all;
use tracing::{info, instrument, warn};

use super::engine::{CancelHandle, Submission, TransferEngine, TransferOutcome, TransferRequest};
use super::filename::{sanitize_filename, segment_file_name};
use super::progress::ProgressEvent;
use super::TransferError;

/// One segment to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSource {
    /// Remote URL of the segment.
    pub url: String,
    /// Explicit file name; `None` uses the `<name>-part<N>` scheme.
    pub file_name: Option<String>,
}

impl SegmentSource {
    /// A segment named by the batch scheme.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: None,
        }
    }

    /// Sets an explicit file name.
    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }
}

/// Shared settings of a batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Directory receiving the segment files; created when missing.
    pub output_dir: PathBuf,
    /// Base name of the segment files.
    pub name: String,
    /// Referer sent with every segment request (the page the video is on).
    pub referer: Option<String>,
}

/// How one segment ended.
#[derive(Debug)]
pub enum SegmentStatus {
    Finished(TransferOutcome),
    /// The URL was already registered; nothing was fetched.
    Duplicate,
    Failed(TransferError),
}

/// Result for one segment, in input order.
#[derive(Debug)]
pub struct SegmentReport {
    /// Zero-based position in the input list.
    pub index: usize,
    pub source_url: String,
    pub destination: PathBuf,
    pub status: SegmentStatus,
}

/// Per-segment results of a batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub reports: Vec<SegmentReport>,
}

impl BatchSummary {
    #[must_use]
    pub fn finished(&self) -> usize {
        self.count(|status| matches!(status, SegmentStatus::Finished(_)))
    }

    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.count(|status| matches!(status, SegmentStatus::Duplicate))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, SegmentStatus::Failed(_)))
    }

    /// Failed segments that were stopped by cancellation.
    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.count(|status| {
            matches!(
                status,
                SegmentStatus::Failed(TransferError::Cancelled { .. })
            )
        })
    }

    /// Total body bytes received across finished segments.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.reports
            .iter()
            .filter_map(|report| match &report.status {
                SegmentStatus::Finished(outcome) => Some(outcome.bytes_received),
                _ => None,
            })
            .sum()
    }

    /// Returns true when no segment failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, predicate: impl Fn(&SegmentStatus) -> bool) -> usize {
        self.reports
            .iter()
            .filter(|report| predicate(&report.status))
            .count()
    }
}

/// Destination of the segment at `index`.
#[must_use]
pub fn segment_destination(
    options: &BatchOptions,
    index: usize,
    source: &SegmentSource,
) -> PathBuf {
    let file_name = match &source.file_name {
        Some(name) => sanitize_filename(name),
        None => segment_file_name(&options.name, index, &source.url),
    };
    options.output_dir.join(file_name)
}

/// Fetches all `sources` concurrently.
///
/// `on_progress` receives every progress event of every segment together
/// with the segment's zero-based input index; duplicates produce no events.
/// Per-segment failures are reported in the summary and do not stop the
/// other segments.
///
/// # Errors
///
/// Returns [`TransferError::Storage`] only when the output directory cannot
/// be created.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
pub async fn run_batch<F>(
    engine: &TransferEngine,
    sources: &[SegmentSource],
    options: &BatchOptions,
    on_progress: F,
) -> Result<BatchSummary, TransferError>
where
    F: Fn(usize, &ProgressEvent),
{
    run_batch_until(engine, sources, options, on_progress, pending()).await
}

/// Like [`run_batch`], but cancels every running transfer once `shutdown`
/// completes. Cancelled segments end as [`TransferError::Cancelled`] after
/// flushing what they wrote.
///
/// # Errors
///
/// Same as [`run_batch`].
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
#[instrument(skip_all, fields(segments = sources.len(), output_dir = %options.output_dir.display()))]
pub async fn run_batch_until<F, S>(
    engine: &TransferEngine,
    sources: &[SegmentSource],
    options: &BatchOptions,
    on_progress: F,
    shutdown: S,
) -> Result<BatchSummary, TransferError>
where
    F: Fn(usize, &ProgressEvent),
    S: Future<Output = ()>,
{
    ensure_output_dir(&options.output_dir).await?;

    let mut duplicates = Vec::new();
    let mut running = Vec::new();
    for (index, source) in sources.iter().enumerate() {
        let destination = segment_destination(options, index, source);
        let mut request = TransferRequest::new(source.url.clone(), destination.clone());
        if let Some(referer) = &options.referer {
            request = request.with_referer(referer.clone());
        }

        match engine.submit(request) {
            Submission::Started(handle) => running.push((index, handle)),
            Submission::Duplicate => duplicates.push(SegmentReport {
                index,
                source_url: source.url.clone(),
                destination,
                status: SegmentStatus::Duplicate,
            }),
        }
    }

    let cancels: Vec<CancelHandle> = running
        .iter()
        .map(|(_, handle)| handle.cancel_handle())
        .collect();

    let on_progress = &on_progress;
    let transfers = join_all(running.into_iter().map(|(index, handle)| async move {
        let source_url = handle.source_url().to_string();
        let destination = handle.destination().to_path_buf();
        let status = match handle
            .wait_with_progress(|event| on_progress(index, event))
            .await
        {
            Ok(outcome) => SegmentStatus::Finished(outcome),
            Err(error) => SegmentStatus::Failed(error),
        };
        SegmentReport {
            index,
            source_url,
            destination,
            status,
        }
    }));
    tokio::pin!(transfers);
    tokio::pin!(shutdown);

    let finished = tokio::select! {
        finished = &mut transfers => finished,
        () = &mut shutdown => {
            warn!(running = cancels.len(), "shutdown requested, cancelling transfers");
            for cancel in &cancels {
                cancel.cancel();
            }
            transfers.await
        }
    };

    let mut reports: Vec<SegmentReport> = duplicates.into_iter().chain(finished).collect();
    reports.sort_by_key(|report| report.index);
    let summary = BatchSummary { reports };

    info!(
        finished = summary.finished(),
        duplicates = summary.duplicates(),
        failed = summary.failed(),
        bytes_received = summary.bytes_received(),
        "batch complete"
    );
    Ok(summary)
}

async fn ensure_output_dir(dir: &Path) -> Result<(), TransferError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| TransferError::storage(dir, e))
}
