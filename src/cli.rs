//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Fetch the segments of an online video into local files.
///
/// Each URL is one segment. Segments are written as `<name>-part<N>.<ext>`
/// in the output directory and fetched concurrently. Re-running the same
/// command resumes partially written segments.
#[derive(Parser, Debug)]
#[command(name = "clipfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Segment URLs, in playback order
    pub urls: Vec<String>,

    /// Read segment URLs from a file (one per line, optional file name after whitespace, `#` comments)
    #[arg(short = 't', long, value_name = "PATH")]
    pub tasks_file: Option<PathBuf>,

    /// Directory receiving segment files [default: downloads]
    #[arg(short, long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Base name of segment files
    #[arg(short, long, default_value = "video")]
    pub name: String,

    /// Referer sent with every segment request (the page the video is on)
    #[arg(long)]
    pub referer: Option<String>,

    /// User-Agent sent with every segment request
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Redirect hops followed per request (0-20) [default: 5]
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=20))]
    pub max_redirects: Option<u8>,

    /// Minimum milliseconds between progress lines per segment (0-60000) [default: 250]
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub sample_interval_ms: Option<u64>,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}
