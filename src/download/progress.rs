//! Progress metering for body streams.
//!
//! [`ProgressMeter::wrap`] returns a [`MeteredStream`] that yields exactly the
//! chunks of the wrapped stream while counting bytes. At most once per sample
//! interval it pushes a [`ProgressEvent`] into an unbounded channel, so the
//! transfer never waits on the consumer. When the wrapped stream ends, one
//! last sample is pushed before the metered stream itself ends; if the
//! declared total was reached that sample reports 100%.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc::UnboundedSender;

use super::constants::DEFAULT_SAMPLE_INTERVAL;
use super::registry::TaskOrdinal;

/// One observation of a transfer's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    /// Bytes present at the destination, including any resume offset.
    pub bytes_transferred: u64,
    /// Declared size of the whole resource, when known.
    pub total_bytes: Option<u64>,
    /// `bytes_transferred / total_bytes` in `[0, 100]`; `None` while the total is unknown.
    pub percentage: Option<f64>,
    /// Time since the body started streaming.
    pub elapsed: Duration,
    /// Average throughput of this transfer (resume offset excluded).
    pub bytes_per_sec: f64,
    /// Estimated time to completion at the current average rate.
    pub eta: Option<Duration>,
}

impl ProgressSample {
    /// Computes a sample from raw counters.
    ///
    /// `initial` is the resume offset: it counts toward `bytes_transferred`
    /// but not toward the throughput of this transfer.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compute(
        bytes_transferred: u64,
        total_bytes: Option<u64>,
        initial: u64,
        elapsed: Duration,
    ) -> Self {
        let percentage = total_bytes.map(|total| {
            if total == 0 {
                100.0
            } else {
                (bytes_transferred as f64 / total as f64 * 100.0).min(100.0)
            }
        });

        let secs = elapsed.as_secs_f64();
        let fresh = bytes_transferred.saturating_sub(initial);
        let bytes_per_sec = if secs > 0.0 { fresh as f64 / secs } else { 0.0 };

        let eta = total_bytes.and_then(|total| {
            let remaining = total.saturating_sub(bytes_transferred);
            if remaining == 0 {
                Some(Duration::ZERO)
            } else if bytes_per_sec > 0.0 {
                // Out of range for Duration when a huge total trickles in.
                Duration::try_from_secs_f64(remaining as f64 / bytes_per_sec).ok()
            } else {
                None
            }
        });

        Self {
            bytes_transferred,
            total_bytes,
            percentage,
            elapsed,
            bytes_per_sec,
            eta,
        }
    }

    /// Returns true when the total is known and has been reached.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total_bytes
            .is_some_and(|total| self.bytes_transferred >= total)
    }
}

/// A sample tagged with the registry ordinal of its task.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Registry ordinal of the task.
    pub ordinal: TaskOrdinal,
    /// The sample.
    pub sample: ProgressSample,
}

/// Configuration for metering one stream.
#[derive(Debug, Clone)]
pub struct ProgressMeter {
    ordinal: TaskOrdinal,
    total_bytes: Option<u64>,
    initial: u64,
    interval: Duration,
    sink: UnboundedSender<ProgressEvent>,
}

impl ProgressMeter {
    /// Creates a meter for task `ordinal` that reports into `sink`.
    #[must_use]
    pub fn new(ordinal: TaskOrdinal, sink: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            ordinal,
            total_bytes: None,
            initial: 0,
            interval: DEFAULT_SAMPLE_INTERVAL,
            sink,
        }
    }

    /// Sets the declared size of the whole resource.
    #[must_use]
    pub fn with_total(mut self, total_bytes: Option<u64>) -> Self {
        self.total_bytes = total_bytes;
        self
    }

    /// Sets the byte count already present before streaming starts.
    #[must_use]
    pub fn with_initial(mut self, initial: u64) -> Self {
        self.initial = initial;
        self
    }

    /// Sets the sampling interval. Zero samples on every chunk.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Wraps `stream`; see the module docs.
    pub fn wrap<S>(self, stream: S) -> MeteredStream<S> {
        let now = Instant::now();
        MeteredStream {
            inner: stream,
            transferred: self.initial,
            started: now,
            last_emit: now,
            last_percentage: 0.0,
            ended: false,
            meter: self,
        }
    }
}

/// Pass-through stream produced by [`ProgressMeter::wrap`].
#[derive(Debug)]
pub struct MeteredStream<S> {
    inner: S,
    meter: ProgressMeter,
    transferred: u64,
    started: Instant,
    last_emit: Instant,
    last_percentage: f64,
    ended: bool,
}

impl<S> MeteredStream<S> {
    /// Bytes counted so far, including the initial offset.
    #[must_use]
    pub fn bytes_transferred(&self) -> u64 {
        self.transferred
    }

    /// Declared size of the whole resource.
    #[must_use]
    pub fn total_bytes(&self) -> Option<u64> {
        self.meter.total_bytes
    }

    fn emit(&mut self, now: Instant) {
        let mut sample = ProgressSample::compute(
            self.transferred,
            self.meter.total_bytes,
            self.meter.initial,
            now.duration_since(self.started),
        );
        if let Some(percentage) = sample.percentage {
            let percentage = percentage.max(self.last_percentage);
            self.last_percentage = percentage;
            sample.percentage = Some(percentage);
        }
        self.last_emit = now;
        // A dropped receiver only means nobody is watching.
        let _ = self.meter.sink.send(ProgressEvent {
            ordinal: self.meter.ordinal,
            sample,
        });
    }
}

impl<S, E> Stream for MeteredStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.ended {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.transferred = this.transferred.saturating_add(chunk.len() as u64);
                let now = Instant::now();
                if now.duration_since(this.last_emit) >= this.meter.interval {
                    this.emit(now);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
            Poll::Ready(None) => {
                this.ended = true;
                this.emit(Instant::now());
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
