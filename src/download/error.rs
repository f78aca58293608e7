//! Error types for the transfer engine.
//!
//! Every variant carries the URL or path it concerns. Variants map onto four
//! coarse classes ([`ErrorKind`]) so callers can decide on retry policy
//! without matching every variant.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a [`TransferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Destination inaccessible, disk full, or stat/open/write failure.
    Storage,
    /// Connection failure, timeout, cancellation, or truncated body.
    Network,
    /// Redirect chain longer than the configured bound.
    TooManyRedirects,
    /// Malformed or unacceptable response.
    Protocol,
}

impl ErrorKind {
    /// Returns the stable label used in log output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Network => "network",
            Self::TooManyRedirects => "too_many_redirects",
            Self::Protocol => "protocol",
        }
    }
}

/// Errors that can occur while transferring a single segment.
///
/// All of these are local to one task: they never affect other in-flight
/// transfers and are never retried inside the engine.
#[derive(Debug, Error)]
pub enum TransferError {
    /// File system error on the destination (stat, open, write, flush).
    #[error("storage error on {path}: {source}")]
    Storage {
        /// The destination path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Transport-level failure (DNS, connection reset, TLS, body read).
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL being fetched when the failure happened.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Body ended before the declared length was reached.
    #[error("stream for {url} ended after {received} of {expected} bytes")]
    Interrupted {
        /// The final URL of the transfer.
        url: String,
        /// Bytes written to the destination in this transfer (including the resume offset).
        received: u64,
        /// Declared total length.
        expected: u64,
    },

    /// The caller cancelled the transfer through its handle.
    #[error("transfer of {url} cancelled")]
    Cancelled {
        /// The source URL.
        url: String,
    },

    /// More redirects than allowed.
    #[error("too many redirects fetching {url} (limit {limit})")]
    TooManyRedirects {
        /// The original URL of the chain.
        url: String,
        /// The configured hop limit.
        limit: usize,
    },

    /// Response could not be used (missing Location, ignored Range, ...).
    #[error("protocol error fetching {url}: {reason}")]
    Protocol {
        /// The URL that produced the response.
        url: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Final response carried a 4xx/5xx status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The transfer task ended without reporting a result (panicked or aborted).
    #[error("transfer task for {url} ended abnormally: {reason}")]
    TaskAborted {
        /// The source URL.
        url: String,
        /// Join failure description.
        reason: String,
    },
}

impl TransferError {
    /// Creates a storage error.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Creates a network or timeout error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an interrupted-stream error.
    pub fn interrupted(url: impl Into<String>, received: u64, expected: u64) -> Self {
        Self::Interrupted {
            url: url.into(),
            received,
            expected,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Creates a redirect-limit error.
    pub fn too_many_redirects(url: impl Into<String>, limit: usize) -> Self {
        Self::TooManyRedirects {
            url: url.into(),
            limit,
        }
    }

    /// Creates a protocol error.
    pub fn protocol(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Protocol {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an error for a transfer task that panicked or was aborted.
    pub fn task_aborted(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TaskAborted {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns the coarse class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage { .. } => ErrorKind::Storage,
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::Interrupted { .. }
            | Self::Cancelled { .. }
            | Self::TaskAborted { .. } => ErrorKind::Network,
            Self::TooManyRedirects { .. } => ErrorKind::TooManyRedirects,
            Self::Protocol { .. } | Self::HttpStatus { .. } | Self::InvalidUrl { .. } => {
                ErrorKind::Protocol
            }
        }
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs a
// url or path the source error does not carry.
