use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc::UnboundedReceiver, watch};
use tokio::task::JoinHandle;

use super::TransferOutcome;
use crate::download::TransferError;
use crate::download::progress::ProgressEvent;
use crate::download::registry::TaskOrdinal;

/// Cloneable trigger that cancels one transfer, usable after its
/// [`TransferHandle`] has been consumed.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    /// Same as [`TransferHandle::cancel`].
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Handle to a running transfer.
///
/// Progress events queue up until read; the queue closes once the transfer
/// has ended and every event has been taken. Dropping the handle detaches the
/// transfer, which then runs to completion on its own.
#[derive(Debug)]
pub struct TransferHandle {
    ordinal: TaskOrdinal,
    source_url: String,
    destination: PathBuf,
    events: UnboundedReceiver<ProgressEvent>,
    cancel: Arc<watch::Sender<bool>>,
    join: JoinHandle<Result<TransferOutcome, TransferError>>,
}

impl TransferHandle {
    pub(super) fn new(
        ordinal: TaskOrdinal,
        source_url: String,
        destination: PathBuf,
        events: UnboundedReceiver<ProgressEvent>,
        cancel: watch::Sender<bool>,
        join: JoinHandle<Result<TransferOutcome, TransferError>>,
    ) -> Self {
        Self {
            ordinal,
            source_url,
            destination,
            events,
            cancel: Arc::new(cancel),
            join,
        }
    }

    /// Registry ordinal of this transfer.
    #[must_use]
    pub fn ordinal(&self) -> TaskOrdinal {
        self.ordinal
    }

    #[must_use]
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Waits for the next progress event; `None` once the transfer has ended
    /// and all events were consumed.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    /// Takes a queued progress event without waiting.
    pub fn try_next_event(&mut self) -> Option<ProgressEvent> {
        self.events.try_recv().ok()
    }

    /// Asks the transfer to stop. It ends with [`TransferError::Cancelled`]
    /// unless it completes first; bytes already written stay on disk.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Returns a trigger that cancels this transfer.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    /// Returns true once the transfer task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the transfer to end, discarding unread progress events.
    ///
    /// # Errors
    ///
    /// Returns the transfer's error, or [`TransferError::TaskAborted`] if the
    /// task panicked or was aborted by the runtime.
    pub async fn wait(self) -> Result<TransferOutcome, TransferError> {
        let url = self.source_url;
        self.join
            .await
            .unwrap_or_else(|e| Err(TransferError::task_aborted(url, e.to_string())))
    }

    /// Feeds every progress event to `on_event`, then waits for the outcome.
    ///
    /// # Errors
    ///
    /// Same as [`TransferHandle::wait`].
    pub async fn wait_with_progress<F>(
        mut self,
        mut on_event: F,
    ) -> Result<TransferOutcome, TransferError>
    where
        F: FnMut(&ProgressEvent),
    {
        while let Some(event) = self.events.recv().await {
            on_event(&event);
        }
        self.wait().await
    }
}
