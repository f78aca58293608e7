//! Resumable, deduplicated segment transfers.
//!
//! A transfer streams one remote resource into one local file:
//!
//! - a [`TaskRegistry`] admits each source URL once per run
//! - an existing partial file is resumed with `Range: bytes=<size>-` and appended to
//! - redirects are followed by [`RedirectResolver`] up to a fixed hop count
//! - bytes pass through a [`ProgressMeter`] that samples progress into a channel
//!
//! [`TransferEngine`] ties these together; [`run_batch`] runs the segments of
//! one video side by side.
//!
//! # Example
//!
//! ```no_run
//! use clipfetch_core::download::{BatchOptions, EngineConfig, SegmentSource, TransferEngine, run_batch};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = TransferEngine::new(EngineConfig::default())?;
//! let sources = vec![
//!     SegmentSource::new("https://cdn.example.com/v/1.flv"),
//!     SegmentSource::new("https://cdn.example.com/v/2.flv"),
//! ];
//! let options = BatchOptions {
//!     output_dir: "downloads".into(),
//!     name: "clip".to_string(),
//!     referer: Some("https://www.example.com/video/1".to_string()),
//! };
//! let summary = run_batch(&engine, &sources, &options, |_, _| {}).await?;
//! println!("{} finished, {} failed", summary.finished(), summary.failed());
//! # Ok(())
//! # }
//! ```

pub mod batch;
mod constants;
mod engine;
mod error;
pub mod filename;
pub mod progress;
pub mod redirect;
pub mod registry;
pub mod resume;

pub use batch::{
    BatchOptions, BatchSummary, SegmentReport, SegmentSource, SegmentStatus, run_batch,
    run_batch_until,
};
pub use constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_MAX_REDIRECTS, DEFAULT_SAMPLE_INTERVAL,
    DEFAULT_SEGMENT_EXTENSION, MAX_REDIRECTS_LIMIT, READ_TIMEOUT_SECS,
};
pub use engine::{
    CancelHandle, EngineConfig, EngineError, Submission, TransferEngine, TransferHandle,
    TransferOutcome, TransferRequest,
};
pub use error::{ErrorKind, TransferError};
pub use progress::{MeteredStream, ProgressEvent, ProgressMeter, ProgressSample};
pub use redirect::{FetchedResponse, RedirectResolver};
pub use registry::{RegistryPolicy, TaskOrdinal, TaskRegistry, TaskState, TransferTask};
pub use resume::ResumePlan;

// Note: no module-local Result aliases; signatures spell out
// `Result<T, TransferError>`.
