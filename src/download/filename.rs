//! Segment file naming and sanitization.
//!
//! Segments of one video land next to each other as `<name>-part<N><ext>`,
//! numbered from 1 in input order.

use std::path::{Component, Path};

use url::Url;

use super::constants::DEFAULT_SEGMENT_EXTENSION;

/// Longest extension (dot included) taken from a URL path.
const MAX_EXTENSION_LEN: usize = 8;

/// Builds `<name>-part<index + 1><ext>` for the segment at zero-based `index`.
///
/// The extension comes from the URL path when it has a short alphanumeric
/// one, otherwise [`DEFAULT_SEGMENT_EXTENSION`].
#[must_use]
pub fn segment_file_name(name: &str, index: usize, source_url: &str) -> String {
    let extension = extension_from_url(source_url)
        .unwrap_or_else(|| DEFAULT_SEGMENT_EXTENSION.to_string());
    format!("{}-part{}{extension}", sanitize_filename(name), index + 1)
}

/// Extension of the last URL path segment, lowercased with its dot.
#[must_use]
pub fn extension_from_url(source_url: &str) -> Option<String> {
    let parsed = Url::parse(source_url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let dot = last.rfind('.')?;
    let extension = &last[dot..];
    let valid = (2..=MAX_EXTENSION_LEN).contains(&extension.len())
        && extension[1..].chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| extension.to_ascii_lowercase())
}

/// Sanitizes a caller-supplied name for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems
/// (`/ \ : * ? " < > |` and control characters). A result that would still
/// resolve outside the output directory has its dots replaced as well.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized.replace('.', "_")
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}
