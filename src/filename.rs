//! Stable identifiers and output file naming.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;
use url::Url;

static LOCALIZED_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:dm\d+/)?(?:id|en)/([^/]+)/?$")
        .unwrap_or_else(|e| panic!("invalid static regex for page identifiers: {e}"))
});

/// Upper bound of numeric suffixes tried before giving up on a name.
const MAX_SUFFIX: usize = 10_000;

/// Extracts the stable identifier of a page URL.
///
/// Recognizes `/id/<x>`, `/en/<x>` and `/dmNN/(id|en)/<x>`; anything else
/// uses the last non-empty path segment. The result is percent-decoded and
/// sanitized. Returns `None` when nothing usable remains.
#[must_use]
pub fn extract_video_id(page_url: &Url) -> Option<String> {
    let path = page_url.path();
    let raw = LOCALIZED_ID_RE
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .or_else(|| path.split('/').rev().find(|segment| !segment.is_empty()))?;

    let decoded = urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |d| d.into_owned());
    let id = sanitize_filename_component(&decoded);
    (!id.is_empty()).then_some(id)
}

/// `<id>-<height>p.<ext>`
#[must_use]
pub fn output_file_name(id: &str, height: u32, extension: &str) -> String {
    format!("{id}-{height}p.{}", extension.trim_start_matches('.'))
}

/// Replaces path separators, reserved characters and whitespace with `_`,
/// collapsing runs and trimming the ends.
#[must_use]
pub fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            c if c.is_alphanumeric() || matches!(c, '-' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches(|c| c == '_' || c == '.').to_string()
}

/// Moves `staged` to `dir/filename`, or to `stem_N.ext` for the first free
/// `N >= suffix_start`, and returns the path it landed at.
///
/// Each name is claimed with a hard link, which fails if the name exists, so
/// racing sessions end up with distinct files and the name never appears
/// before its content. `staged` must be on the same filesystem as `dir`.
///
/// # Errors
///
/// Returns the IO error if linking fails for a reason other than a taken
/// name, or every suffix is taken.
pub async fn promote_unique(
    staged: &Path,
    dir: &Path,
    filename: &str,
    suffix_start: usize,
) -> std::io::Result<PathBuf> {
    let (stem, ext) = match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename, ""),
    };

    let candidates = std::iter::once(filename.to_string())
        .chain((suffix_start..MAX_SUFFIX).map(|i| format!("{stem}_{i}{ext}")));

    for name in candidates {
        let path = dir.join(&name);
        match tokio::fs::hard_link(staged, &path).await {
            Ok(()) => {
                if let Err(error) = tokio::fs::remove_file(staged).await {
                    debug!(path = %staged.display(), error = %error, "staged output left behind");
                }
                return Ok(path);
            }
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {}
            Err(error) => return Err(error),
        }
    }
    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free file name for '{filename}' in {}", dir.display()),
    ))
}
