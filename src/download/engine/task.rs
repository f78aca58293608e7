use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, RANGE, REFERER, USER_AGENT};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc::UnboundedSender, watch};
use tracing::{debug, info, instrument, warn};

use super::TransferOutcome;
use crate::download::TransferError;
use crate::download::progress::{MeteredStream, ProgressEvent, ProgressMeter, ProgressSample};
use crate::download::redirect::{ByteStream, FetchedResponse, RedirectResolver};
use crate::download::registry::{TaskOrdinal, TaskRegistry};
use crate::download::resume::{self, ResumePlan};

/// Everything a spawned transfer owns.
pub(super) struct TaskContext {
    pub(super) ordinal: TaskOrdinal,
    pub(super) source_url: String,
    pub(super) destination: PathBuf,
    pub(super) user_agent: String,
    pub(super) referer: Option<String>,
    pub(super) sample_interval: Duration,
    pub(super) resolver: RedirectResolver,
    pub(super) registry: Arc<TaskRegistry>,
    pub(super) events: UnboundedSender<ProgressEvent>,
    pub(super) cancel: watch::Receiver<bool>,
}

/// Runs one transfer and records its terminal state in the registry.
#[instrument(
    name = "transfer",
    skip(ctx),
    fields(ordinal = ctx.ordinal, url = %ctx.source_url)
)]
pub(super) async fn run_transfer(
    mut ctx: TaskContext,
) -> Result<TransferOutcome, TransferError> {
    let result = execute(&mut ctx).await;
    match &result {
        Ok(outcome) => {
            ctx.registry.mark_finished(&ctx.source_url);
            info!(
                path = %outcome.destination.display(),
                resumed_from = outcome.resumed_from,
                bytes_received = outcome.bytes_received,
                file_size = outcome.file_size,
                redirects = outcome.redirects,
                "transfer finished"
            );
        }
        Err(error) => {
            ctx.registry.mark_failed(&ctx.source_url);
            warn!(kind = error.kind().as_str(), error = %error, "transfer failed");
        }
    }
    result
}

async fn execute(ctx: &mut TaskContext) -> Result<TransferOutcome, TransferError> {
    let plan = resume::plan(&ctx.destination).await?;
    let headers = build_headers(ctx, plan)?;
    let file = open_destination(&ctx.destination, plan).await?;

    let resolver = ctx.resolver.clone();
    let source_url = ctx.source_url.clone();
    let fetched = until_cancelled(&mut ctx.cancel, &ctx.source_url, async {
        resolver.fetch(&source_url, &headers).await
    })
    .await?;

    if fetched.is_range_not_satisfiable() {
        return already_complete(ctx, plan, &fetched);
    }

    if plan.offset > 0 {
        if !fetched.is_partial() {
            return Err(TransferError::protocol(
                &ctx.source_url,
                format!(
                    "requested resume at byte {} but server answered HTTP {}",
                    plan.offset,
                    fetched.status().as_u16()
                ),
            ));
        }
        if let Some((start, _)) = fetched.content_range()
            && start != plan.offset
        {
            return Err(TransferError::protocol(
                &ctx.source_url,
                format!(
                    "Content-Range starts at byte {start}, expected {}",
                    plan.offset
                ),
            ));
        }
    }

    let total_bytes = fetched.total_length(plan.offset);
    let final_url = fetched.final_url().to_string();
    let redirects = fetched.hops();
    debug!(
        offset = plan.offset,
        total_bytes = ?total_bytes,
        status = fetched.status().as_u16(),
        "streaming body"
    );

    let stream = ProgressMeter::new(ctx.ordinal, ctx.events.clone())
        .with_total(total_bytes)
        .with_initial(plan.offset)
        .with_interval(ctx.sample_interval)
        .wrap(fetched.into_stream());

    let mut writer = BufWriter::new(file);
    let pumped = pump(ctx, stream, &mut writer).await;
    // Flush whatever reached the buffer, even on failure; those bytes are a valid resume point.
    let flushed = writer.flush().await;

    let bytes_received = match (pumped, flushed) {
        (Ok(received), Ok(())) => received,
        (Ok(_), Err(e)) => return Err(TransferError::storage(&ctx.destination, e)),
        (Err(error), flush_result) => {
            if let Err(e) = flush_result {
                warn!(error = %e, "flush after failed transfer also failed");
            }
            return Err(error);
        }
    };

    let file_size = plan.offset.saturating_add(bytes_received);
    if let Some(expected) = total_bytes
        && file_size < expected
    {
        return Err(TransferError::interrupted(
            &ctx.source_url,
            file_size,
            expected,
        ));
    }

    Ok(TransferOutcome {
        ordinal: ctx.ordinal,
        source_url: ctx.source_url.clone(),
        final_url,
        destination: ctx.destination.clone(),
        resumed_from: plan.offset,
        bytes_received,
        file_size,
        total_bytes,
        redirects,
    })
}

/// Settles a `416` answer to a resume request. The file is whole when the
/// server's `bytes */<total>` equals the bytes on disk; anything else stays an
/// HTTP error.
fn already_complete(
    ctx: &TaskContext,
    plan: ResumePlan,
    fetched: &FetchedResponse,
) -> Result<TransferOutcome, TransferError> {
    if plan.offset == 0 || fetched.unsatisfied_range_total() != Some(plan.offset) {
        return Err(TransferError::http_status(
            fetched.final_url().as_str(),
            fetched.status().as_u16(),
        ));
    }
    debug!(offset = plan.offset, "destination already complete");

    let sample =
        ProgressSample::compute(plan.offset, Some(plan.offset), plan.offset, Duration::ZERO);
    let _ = ctx.events.send(ProgressEvent {
        ordinal: ctx.ordinal,
        sample,
    });

    Ok(TransferOutcome {
        ordinal: ctx.ordinal,
        source_url: ctx.source_url.clone(),
        final_url: fetched.final_url().to_string(),
        destination: ctx.destination.clone(),
        resumed_from: plan.offset,
        bytes_received: 0,
        file_size: plan.offset,
        total_bytes: Some(plan.offset),
        redirects: fetched.hops(),
    })
}

/// Copies the metered body into `writer`, returning the body bytes written.
async fn pump(
    ctx: &mut TaskContext,
    mut stream: MeteredStream<ByteStream>,
    writer: &mut BufWriter<File>,
) -> Result<u64, TransferError> {
    let mut written = 0u64;
    loop {
        let next = until_cancelled(&mut ctx.cancel, &ctx.source_url, async {
            Ok(stream.next().await)
        })
        .await?;

        let Some(chunk) = next else {
            return Ok(written);
        };
        let chunk = chunk.map_err(|e| TransferError::network(&ctx.source_url, e))?;
        if chunk.is_empty() {
            continue;
        }
        if written == 0 {
            ctx.registry.mark_in_progress(&ctx.source_url);
        }

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| TransferError::storage(&ctx.destination, e))?;
        written += chunk.len() as u64;
    }
}

/// Awaits `fut` unless the cancel flag is raised first.
///
/// A dropped handle closes the cancel channel; the transfer then runs to
/// completion undisturbed.
async fn until_cancelled<F, T>(
    cancel: &mut watch::Receiver<bool>,
    url: &str,
    fut: F,
) -> Result<T, TransferError>
where
    F: Future<Output = Result<T, TransferError>>,
{
    if *cancel.borrow() {
        return Err(TransferError::cancelled(url));
    }

    tokio::pin!(fut);
    let mut watching = true;
    loop {
        tokio::select! {
            biased;
            changed = cancel.changed(), if watching => match changed {
                Ok(()) if *cancel.borrow() => {
                    debug!(url, "cancellation requested");
                    return Err(TransferError::cancelled(url));
                }
                Ok(()) => {}
                Err(_) => watching = false,
            },
            out = &mut fut => return out,
        }
    }
}

fn build_headers(ctx: &TaskContext, plan: ResumePlan) -> Result<HeaderMap, TransferError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, header_value(ctx, "User-Agent", &ctx.user_agent)?);
    if let Some(referer) = &ctx.referer {
        headers.insert(REFERER, header_value(ctx, "Referer", referer)?);
    }
    if let Some(range) = plan.range_header() {
        headers.insert(RANGE, header_value(ctx, "Range", &range)?);
    }
    Ok(headers)
}

fn header_value(ctx: &TaskContext, name: &str, value: &str) -> Result<HeaderValue, TransferError> {
    HeaderValue::from_str(value).map_err(|_| {
        TransferError::protocol(&ctx.source_url, format!("invalid {name} header value"))
    })
}

async fn open_destination(path: &Path, plan: ResumePlan) -> Result<File, TransferError> {
    let mut options = OpenOptions::new();
    if plan.append {
        options.append(true);
    } else {
        options.write(true).create_new(true);
    }
    options
        .open(path)
        .await
        .map_err(|e| TransferError::storage(path, e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn context(destination: PathBuf) -> (TaskContext, watch::Sender<bool>) {
        let (events, _rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel) = watch::channel(false);
        let registry = Arc::new(TaskRegistry::new());
        registry.try_register("https://cdn.example.com/seg.flv");
        let ctx = TaskContext {
            ordinal: 0,
            source_url: "https://cdn.example.com/seg.flv".to_string(),
            destination,
            user_agent: "clipfetch-test".to_string(),
            referer: Some("https://www.example.com/video/1".to_string()),
            sample_interval: Duration::ZERO,
            resolver: RedirectResolver::new().unwrap(),
            registry,
            events,
            cancel,
        };
        (ctx, cancel_tx)
    }

    #[tokio::test]
    async fn test_build_headers_fresh_omits_range() {
        let (ctx, _cancel) = context(PathBuf::from("/tmp/unused.flv"));
        let headers = build_headers(&ctx, ResumePlan::fresh()).unwrap();
        assert!(headers.get(RANGE).is_none());
        assert_eq!(headers.get(USER_AGENT).unwrap(), "clipfetch-test");
        assert_eq!(
            headers.get(REFERER).unwrap(),
            "https://www.example.com/video/1"
        );
    }

    #[tokio::test]
    async fn test_build_headers_resume_sets_range() {
        let (ctx, _cancel) = context(PathBuf::from("/tmp/unused.flv"));
        let plan = ResumePlan {
            offset: 1024,
            append: true,
        };
        let headers = build_headers(&ctx, plan).unwrap();
        assert_eq!(headers.get(RANGE).unwrap(), "bytes=1024-");
    }

    #[tokio::test]
    async fn test_build_headers_rejects_control_characters() {
        let (mut ctx, _cancel) = context(PathBuf::from("/tmp/unused.flv"));
        ctx.referer = Some("https://bad.example/\nInjected: 1".to_string());
        let err = build_headers(&ctx, ResumePlan::fresh()).unwrap_err();
        assert!(matches!(err, TransferError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_open_destination_fresh_refuses_existing_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("seg.flv");
        std::fs::write(&path, b"abc").unwrap();

        let err = open_destination(&path, ResumePlan::fresh())
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Storage { .. }));
    }

    #[tokio::test]
    async fn test_open_destination_append_keeps_existing_bytes() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("seg.flv");
        std::fs::write(&path, b"abc").unwrap();

        let plan = ResumePlan {
            offset: 3,
            append: true,
        };
        let mut file = open_destination(&path, plan).await.unwrap();
        file.write_all(b"def").await.unwrap();
        file.flush().await.unwrap();
        drop(file);

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_until_cancelled_returns_cancelled_when_flag_raised() {
        let (mut ctx, cancel_tx) = context(PathBuf::from("/tmp/unused.flv"));
        cancel_tx.send_replace(true);
        let result: Result<(), _> =
            until_cancelled(&mut ctx.cancel, "https://cdn.example.com/seg.flv", async {
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(TransferError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_until_cancelled_survives_dropped_sender() {
        let (mut ctx, cancel_tx) = context(PathBuf::from("/tmp/unused.flv"));
        drop(cancel_tx);
        let result = until_cancelled(&mut ctx.cancel, "https://cdn.example.com/seg.flv", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(7u8)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_run_transfer_marks_failed_on_storage_error() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        // A directory at the destination cannot be resumed or created.
        let (ctx, _cancel) = context(temp_dir.path().to_path_buf());
        let registry = Arc::clone(&ctx.registry);

        let err = run_transfer(ctx).await.unwrap_err();
        assert!(matches!(err, TransferError::Storage { .. }));
        assert_eq!(
            registry.state_of("https://cdn.example.com/seg.flv"),
            Some(crate::download::registry::TaskState::Failed)
        );
    }
}
