//! Clipfetch Core Library
//!
//! Fetches the segments of a segmented online video into local files. Each
//! segment is a plain HTTP resource streamed to disk with resume support,
//! per-run deduplication of source URLs, bounded redirect following, and
//! throttled progress reporting.
//!
//! # Architecture
//!
//! - [`download`] - transfer engine, task registry, redirect resolver, progress meter
//! - `user_agent` - browser User-Agent sent by default

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use download::{
    BatchOptions, BatchSummary, EngineConfig, EngineError, ErrorKind, ProgressEvent,
    ProgressSample, RegistryPolicy, SegmentSource, SegmentStatus, Submission, TaskRegistry,
    TaskState, TransferEngine, TransferError, TransferHandle, TransferOutcome, TransferRequest,
    run_batch, run_batch_until,
};
pub use user_agent::BROWSER_USER_AGENT;
