//! Transfer engine: dedup, resume, redirect, meter, write.
//!
//! [`TransferEngine::submit`] registers the source URL, then spawns the
//! transfer on the Tokio runtime and hands back a [`TransferHandle`]. A URL the
//! registry already knows yields [`Submission::Duplicate`] without touching
//! the network or the filesystem.
//!
//! # Example
//!
//! ```no_run
//! use clipfetch_core::download::{EngineConfig, Submission, TransferEngine, TransferRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = TransferEngine::new(EngineConfig::default())?;
//! let request = TransferRequest::new("https://cdn.example.com/seg1.flv", "downloads/clip-part1.flv")
//!     .with_referer("https://www.example.com/video/1");
//!
//! if let Submission::Started(handle) = engine.submit(request) {
//!     let outcome = handle
//!         .wait_with_progress(|event| {
//!             if let Some(pct) = event.sample.percentage {
//!                 println!("part {} at {pct:.2}%", event.ordinal + 1);
//!             }
//!         })
//!         .await?;
//!     println!("wrote {} bytes", outcome.file_size);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Caller obligations
//!
//! The registry dedups on source URL only. Callers must keep a 1:1 mapping
//! between source URLs and destination paths; two distinct URLs written to
//! the same path is not detected.

mod handle;
mod task;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument};

use super::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_MAX_REDIRECTS, DEFAULT_SAMPLE_INTERVAL, MAX_REDIRECTS_LIMIT,
    READ_TIMEOUT_SECS,
};
use super::redirect::RedirectResolver;
use super::registry::{RegistryPolicy, TaskOrdinal, TaskRegistry};
use crate::user_agent;

pub use handle::{CancelHandle, TransferHandle};

/// Error type for engine construction.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Redirect limit outside the accepted range.
    #[error("invalid redirect limit {value}: must be at most {max}", max = MAX_REDIRECTS_LIMIT)]
    InvalidRedirectLimit {
        /// The rejected value.
        value: usize,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// User-Agent sent when a request does not carry its own.
    pub user_agent: String,
    /// Referer sent when a request does not carry its own.
    pub referer: Option<String>,
    /// Redirect hops followed before [`TooManyRedirects`](super::TransferError::TooManyRedirects).
    pub max_redirects: usize,
    /// Progress sampling interval.
    pub sample_interval: Duration,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Per-read timeout while streaming.
    pub read_timeout: Duration,
    /// How the registry treats URLs it has already seen.
    pub registry_policy: RegistryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: user_agent::default_user_agent().to_string(),
            referer: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            registry_policy: RegistryPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the default User-Agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the default Referer.
    #[must_use]
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Sets the redirect bound.
    #[must_use]
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Sets the progress sampling interval.
    #[must_use]
    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    /// Sets connect and read timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Sets the registry policy.
    #[must_use]
    pub fn with_registry_policy(mut self, policy: RegistryPolicy) -> Self {
        self.registry_policy = policy;
        self
    }
}

/// One fetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Remote resource; also the dedup key.
    pub source_url: String,
    /// Local file to create or resume.
    pub destination: PathBuf,
    /// Overrides the engine User-Agent.
    pub user_agent: Option<String>,
    /// Overrides the engine Referer.
    pub referer: Option<String>,
}

impl TransferRequest {
    /// Creates a request with engine-default headers.
    pub fn new(source_url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            destination: destination.into(),
            user_agent: None,
            referer: None,
        }
    }

    /// Sets the Referer for this request.
    #[must_use]
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Sets the User-Agent for this request.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Registry ordinal.
    pub ordinal: TaskOrdinal,
    /// Requested URL.
    pub source_url: String,
    /// URL that served the body, after redirects.
    pub final_url: String,
    /// Destination path.
    pub destination: PathBuf,
    /// Offset the transfer resumed from (0 for a fresh transfer).
    pub resumed_from: u64,
    /// Body bytes received by this transfer.
    pub bytes_received: u64,
    /// Destination size after the transfer.
    pub file_size: u64,
    /// Declared size of the whole resource, when known.
    pub total_bytes: Option<u64>,
    /// Redirect hops followed.
    pub redirects: usize,
}

/// What [`TransferEngine::submit`] did with a request.
#[derive(Debug)]
pub enum Submission {
    /// The transfer is running.
    Started(TransferHandle),
    /// The URL is already registered; nothing was done.
    Duplicate,
}

impl Submission {
    /// Returns true for [`Submission::Duplicate`].
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate)
    }

    /// Returns the handle of a started transfer.
    #[must_use]
    pub fn into_handle(self) -> Option<TransferHandle> {
        match self {
            Self::Started(handle) => Some(handle),
            Self::Duplicate => None,
        }
    }
}

/// Orchestrates transfers for one run.
///
/// Cloning is cheap and clones share the registry, so a clone sees (and
/// dedups against) every transfer submitted through the original.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    resolver: RedirectResolver,
    registry: Arc<TaskRegistry>,
    config: Arc<EngineConfig>,
}

impl TransferEngine {
    /// Creates an engine with a fresh registry.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidRedirectLimit`] if `max_redirects` exceeds
    /// the accepted bound, or [`EngineError::Client`] if the HTTP client
    /// cannot be built.
    #[instrument(level = "debug", skip(config))]
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let registry = Arc::new(TaskRegistry::with_policy(config.registry_policy));
        Self::with_registry(config, registry)
    }

    /// Creates an engine around an existing registry.
    ///
    /// # Errors
    ///
    /// Same as [`TransferEngine::new`].
    pub fn with_registry(
        config: EngineConfig,
        registry: Arc<TaskRegistry>,
    ) -> Result<Self, EngineError> {
        if config.max_redirects > MAX_REDIRECTS_LIMIT {
            return Err(EngineError::InvalidRedirectLimit {
                value: config.max_redirects,
            });
        }

        let resolver = RedirectResolver::with_settings(
            config.max_redirects,
            config.connect_timeout,
            config.read_timeout,
        )?;

        debug!(
            max_redirects = config.max_redirects,
            sample_interval_ms = config.sample_interval.as_millis(),
            policy = ?registry.policy(),
            "creating transfer engine"
        );

        Ok(Self {
            resolver,
            registry,
            config: Arc::new(config),
        })
    }

    /// Returns the task registry of this run.
    #[must_use]
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Returns the engine settings.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submits a transfer.
    ///
    /// Returns [`Submission::Duplicate`] when the registry already knows the
    /// source URL; in that case no I/O happens. Otherwise the transfer runs in
    /// a spawned task and its errors surface through
    /// [`TransferHandle::wait`].
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[instrument(skip(self, request), fields(url = %request.source_url))]
    pub fn submit(&self, request: TransferRequest) -> Submission {
        let Some(ordinal) = self.registry.try_register(&request.source_url) else {
            info!(url = %request.source_url, "already registered, skipping duplicate submission");
            return Submission::Duplicate;
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let source_url = request.source_url.clone();
        let destination = request.destination.clone();
        let context = task::TaskContext {
            ordinal,
            user_agent: request
                .user_agent
                .unwrap_or_else(|| self.config.user_agent.clone()),
            referer: request.referer.or_else(|| self.config.referer.clone()),
            source_url: request.source_url,
            destination: request.destination,
            sample_interval: self.config.sample_interval,
            resolver: self.resolver.clone(),
            registry: Arc::clone(&self.registry),
            events: event_tx,
            cancel: cancel_rx,
        };

        debug!(ordinal, destination = %destination.display(), "spawning transfer");
        let join = tokio::spawn(task::run_transfer(context));

        Submission::Started(TransferHandle::new(
            ordinal,
            source_url,
            destination,
            event_rx,
            cancel_tx,
            join,
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_redirects, 5);
        assert_eq!(config.sample_interval, Duration::from_millis(250));
        assert!(config.referer.is_none());
        assert!(config.user_agent.starts_with("Mozilla/5.0"));
        assert_eq!(config.registry_policy, RegistryPolicy::RejectKnown);
    }

    #[test]
    fn test_engine_config_builders() {
        let config = EngineConfig::default()
            .with_user_agent("clipfetch-test")
            .with_referer("https://www.example.com/video/1")
            .with_max_redirects(2)
            .with_sample_interval(Duration::ZERO)
            .with_registry_policy(RegistryPolicy::AllowFinished);
        assert_eq!(config.user_agent, "clipfetch-test");
        assert_eq!(
            config.referer.as_deref(),
            Some("https://www.example.com/video/1")
        );
        assert_eq!(config.max_redirects, 2);
        assert_eq!(config.sample_interval, Duration::ZERO);
        assert_eq!(config.registry_policy, RegistryPolicy::AllowFinished);
    }

    #[test]
    fn test_engine_rejects_excessive_redirect_limit() {
        let result = TransferEngine::new(EngineConfig::default().with_max_redirects(21));
        assert!(matches!(
            result,
            Err(EngineError::InvalidRedirectLimit { value: 21 })
        ));
    }

    #[test]
    fn test_engine_error_display() {
        let msg = EngineError::InvalidRedirectLimit { value: 50 }.to_string();
        assert!(msg.contains("50"));
        assert!(msg.contains("20"));
    }

    #[test]
    fn test_request_builders() {
        let request = TransferRequest::new("https://cdn.example/a.flv", "/tmp/a.flv")
            .with_referer("https://www.example.com/")
            .with_user_agent("ua");
        assert_eq!(request.referer.as_deref(), Some("https://www.example.com/"));
        assert_eq!(request.user_agent.as_deref(), Some("ua"));
        assert_eq!(request.destination, PathBuf::from("/tmp/a.flv"));
    }

    #[tokio::test]
    async fn test_clones_share_registry() {
        let engine = TransferEngine::new(EngineConfig::default()).unwrap();
        let clone = engine.clone();
        assert!(Arc::ptr_eq(engine.registry(), clone.registry()));
    }

    #[tokio::test]
    async fn test_duplicate_submission_is_rejected_without_io() {
        let engine = TransferEngine::new(EngineConfig::default()).unwrap();
        // Pre-register so the engine sees a duplicate; the destination must stay untouched.
        engine.registry().try_register("http://127.0.0.1:9/seg.flv");

        let temp_dir = tempfile::TempDir::new().unwrap();
        let destination = temp_dir.path().join("seg.flv");
        let submission =
            engine.submit(TransferRequest::new("http://127.0.0.1:9/seg.flv", &destination));

        assert!(submission.is_duplicate());
        assert!(submission.into_handle().is_none());
        assert!(!destination.exists());
    }
}
