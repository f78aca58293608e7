//! Resume planning: decides where a transfer starts from the local file size.

use std::path::Path;

use tracing::debug;

use super::TransferError;

/// Where a transfer should start and how the destination must be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePlan {
    /// Byte offset of the first byte to request.
    pub offset: u64,
    /// Open the destination for append (`true`) or create it (`false`).
    pub append: bool,
}

impl ResumePlan {
    /// Plan for a destination that does not exist yet.
    #[must_use]
    pub const fn fresh() -> Self {
        Self {
            offset: 0,
            append: false,
        }
    }

    /// Returns the `Range` header value for this plan, or `None` when starting at zero.
    #[must_use]
    pub fn range_header(&self) -> Option<String> {
        (self.offset > 0).then(|| format!("bytes={}-", self.offset))
    }
}

/// Computes the resume plan for `destination`.
///
/// A missing destination yields [`ResumePlan::fresh`]. An existing file yields
/// its size as the offset. This only stats the path.
///
/// # Errors
///
/// Returns [`TransferError::Storage`] for any stat failure other than "not
/// found", and when the path exists but is not a regular file.
pub async fn plan(destination: &Path) -> Result<ResumePlan, TransferError> {
    match tokio::fs::metadata(destination).await {
        Ok(meta) if meta.is_file() => {
            debug!(path = %destination.display(), offset = meta.len(), "resuming from existing file");
            Ok(ResumePlan {
                offset: meta.len(),
                append: true,
            })
        }
        Ok(_) => Err(TransferError::storage(
            destination,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "destination exists and is not a regular file",
            ),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ResumePlan::fresh()),
        Err(e) => Err(TransferError::storage(destination, e)),
    }
}
