//! Constants for the download module (timeouts, redirects, progress cadence).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large segments).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default number of redirect hops followed before giving up.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

/// Upper bound accepted for a configured redirect limit.
pub const MAX_REDIRECTS_LIMIT: usize = 20;

/// Default interval between progress samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Extension used for segment files when the URL path carries none.
pub const DEFAULT_SEGMENT_EXTENSION: &str = ".flv";
