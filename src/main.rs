//! CLI entry point for clipfetch.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Parser;
use clipfetch_core::download::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use clipfetch_core::{
    BatchOptions, BatchSummary, EngineConfig, ProgressEvent, SegmentStatus, TransferEngine,
    run_batch_until,
};
use tracing::{debug, error, info, warn};

mod app_config;
mod cli;
mod input;

use app_config::FileConfig;
use cli::Args;

const DEFAULT_OUTPUT_DIR: &str = "downloads";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();
    let file_config = app_config::load_config(args.config.as_deref())?.unwrap_or_default();

    init_tracing(&args, &file_config);
    debug!(?args, ?file_config, "configuration loaded");

    let sources = input::collect_sources(&args.urls, args.tasks_file.as_deref())?;
    if sources.is_empty() {
        info!("No segment URLs provided. Pass URLs as arguments or use --tasks-file.");
        return Ok(());
    }

    let engine = TransferEngine::new(engine_config(&args, &file_config))?;
    let options = BatchOptions {
        output_dir: args
            .output_dir
            .clone()
            .or_else(|| file_config.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        name: args.name.clone(),
        referer: args.referer.clone().or_else(|| file_config.referer.clone()),
    };
    info!(
        segments = sources.len(),
        output_dir = %options.output_dir.display(),
        "clipfetch starting"
    );

    let interrupted = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted; partial segments stay on disk and resume on the next run");
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    };
    let summary =
        run_batch_until(&engine, &sources, &options, report_progress, interrupted).await?;

    report_summary(&summary);
    if summary.cancelled() > 0 {
        bail!("interrupted");
    }
    if summary.is_success() {
        Ok(())
    } else {
        bail!(
            "{} of {} segments failed",
            summary.failed(),
            summary.reports.len()
        );
    }
}

/// Log level priority: `RUST_LOG` > `-q` > `-v` > config `verbosity` > info.
fn init_tracing(args: &Args, file_config: &FileConfig) {
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => file_config
                .verbosity
                .map_or("info", app_config::VerbositySetting::default_filter),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn engine_config(args: &Args, file_config: &FileConfig) -> EngineConfig {
    let mut config = EngineConfig::default().with_timeouts(
        Duration::from_secs(
            file_config
                .connect_timeout_secs
                .unwrap_or(CONNECT_TIMEOUT_SECS),
        ),
        Duration::from_secs(file_config.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS)),
    );

    if let Some(user_agent) = args
        .user_agent
        .clone()
        .or_else(|| file_config.user_agent.clone())
    {
        config = config.with_user_agent(user_agent);
    }
    if let Some(max_redirects) = args
        .max_redirects
        .map(usize::from)
        .or(file_config.max_redirects)
    {
        config = config.with_max_redirects(max_redirects);
    }
    if let Some(interval_ms) = args.sample_interval_ms.or(file_config.sample_interval_ms) {
        config = config.with_sample_interval(Duration::from_millis(interval_ms));
    }
    config
}

fn report_progress(index: usize, event: &ProgressEvent) {
    let part = index + 1;
    let sample = &event.sample;
    match sample.percentage {
        Some(percentage) => info!(
            part,
            bytes = sample.bytes_transferred,
            "Part {part} - Progress: {percentage:.2}%"
        ),
        None => info!(
            part,
            bytes = sample.bytes_transferred,
            "Part {part} - Received {} bytes",
            sample.bytes_transferred
        ),
    }
}

fn report_summary(summary: &BatchSummary) {
    for report in &summary.reports {
        let part = report.index + 1;
        match &report.status {
            SegmentStatus::Finished(outcome) => info!(
                part,
                path = %outcome.destination.display(),
                bytes = outcome.file_size,
                resumed_from = outcome.resumed_from,
                "Part {part} finished"
            ),
            SegmentStatus::Duplicate => info!(
                part,
                url = %report.source_url,
                "Part {part} is already being downloaded."
            ),
            SegmentStatus::Failed(err) => error!(
                part,
                kind = err.kind().as_str(),
                error = %err,
                "Part {part} failed"
            ),
        }
    }

    info!(
        finished = summary.finished(),
        duplicates = summary.duplicates(),
        failed = summary.failed(),
        bytes_received = summary.bytes_received(),
        "Download complete"
    );
}
