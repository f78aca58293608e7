//! Segment list input: positional URLs and task files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use clipfetch_core::SegmentSource;

/// Parses a task file.
///
/// One segment per line: a URL, optionally followed by whitespace and an
/// explicit file name. Blank lines and lines starting with `#` are skipped.
pub fn parse_tasks(raw: &str) -> Result<Vec<SegmentSource>> {
    let mut sources = Vec::new();
    for (line_index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.split_whitespace();
        let Some(url) = fields.next() else {
            continue;
        };
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            bail!("Expected an http(s) URL on line {}: '{url}'", line_index + 1);
        }

        let mut source = SegmentSource::new(url);
        let rest: Vec<&str> = fields.collect();
        if !rest.is_empty() {
            source = source.with_file_name(rest.join(" "));
        }
        sources.push(source);
    }
    Ok(sources)
}

/// Reads and parses the task file at `path`.
pub fn load_tasks(path: &Path) -> Result<Vec<SegmentSource>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tasks file '{}'", path.display()))?;
    parse_tasks(&raw).with_context(|| format!("Failed to parse tasks file '{}'", path.display()))
}

/// Combines positional URLs with an optional task file, positional first.
pub fn collect_sources(urls: &[String], tasks_file: Option<&Path>) -> Result<Vec<SegmentSource>> {
    let mut sources: Vec<SegmentSource> = urls.iter().map(SegmentSource::new).collect();
    if let Some(path) = tasks_file {
        sources.extend(load_tasks(path)?);
    }
    Ok(sources)
}
