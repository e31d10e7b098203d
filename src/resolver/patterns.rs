//! URL-shape patterns and the resolution quality table.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Compiles a regex at static init; panics on invalid pattern.
fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// `sourceNNN = '...'` markers embedded in player setup code.
static NAMED_SOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"source(\d+)\s*=\s*['"]([^'"]+)['"]"#)
});

/// Literal HLS manifest URLs.
static MANIFEST_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"https?://[^'"\s<>\\]+\.m3u8(?:\?[^'"\s<>\\]*)?"#)
});

/// Any absolute URL; filtered by extension afterwards.
static ANY_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r#"https?://[^'"\s<>\\)]+"#));

/// `1080p`-style height tokens.
static HEIGHT_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?i)(?:^|[^0-9])(\d{3,4})p(?:[^a-z0-9]|$)"));

/// Path extensions accepted by the lenient pattern.
pub const VIDEO_EXTENSIONS: [&str; 6] = [".m3u8", ".mp4", ".ts", ".m4v", ".avi", ".mkv"];

/// A URL found by the pattern set, with the bucket height of its named
/// source marker if it came from one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute URL as found in the text.
    pub url: String,
    /// Height bucket from a `sourceNNN` marker.
    pub named_height: Option<u32>,
}

impl Candidate {
    fn plain(url: &str) -> Self {
        Self {
            url: url.to_string(),
            named_height: None,
        }
    }
}

/// Maps URL shapes and source markers to a resolution height.
///
/// Labels and pixel heights differ on the origin (`1280x720` is served as
/// the 1080 tier), so the mapping is data, not arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityTable {
    dimensions: Vec<(String, u32)>,
    named_sources: Vec<(String, u32)>,
    default_height: u32,
}

impl Default for QualityTable {
    fn default() -> Self {
        Self {
            dimensions: vec![
                ("1280x720".to_string(), 1080),
                ("842x480".to_string(), 720),
                ("640x360".to_string(), 360),
            ],
            named_sources: vec![
                ("1280".to_string(), 1080),
                ("842".to_string(), 720),
                ("360".to_string(), 360),
            ],
            default_height: 720,
        }
    }
}

impl QualityTable {
    /// Builds a table from explicit entries.
    #[must_use]
    pub fn new(
        dimensions: Vec<(String, u32)>,
        named_sources: Vec<(String, u32)>,
        default_height: u32,
    ) -> Self {
        Self {
            dimensions,
            named_sources,
            default_height,
        }
    }

    /// Height used when nothing in the URL identifies its tier.
    #[must_use]
    pub fn default_height(&self) -> u32 {
        self.default_height
    }

    /// Bucket height for a `sourceNNN` marker suffix.
    #[must_use]
    pub fn named_source_height(&self, suffix: &str) -> Option<u32> {
        self.named_sources
            .iter()
            .find(|(key, _)| key == suffix)
            .map(|(_, height)| *height)
    }

    /// Assigns a height to `candidate`.
    ///
    /// Order: dimension substring, named-source bucket, height token, default.
    #[must_use]
    pub fn height_for(&self, candidate: &Candidate) -> u32 {
        if let Some((_, height)) = self
            .dimensions
            .iter()
            .find(|(dims, _)| candidate.url.contains(dims.as_str()))
        {
            return *height;
        }
        if let Some(height) = candidate.named_height {
            return height;
        }
        HEIGHT_TOKEN_RE
            .captures(&candidate.url)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .filter(|h| (144..=4320).contains(h))
            .unwrap_or(self.default_height)
    }
}

/// Ordered URL-shape patterns; the first one that matches anything wins.
#[derive(Debug, Clone)]
pub struct PatternSet {
    table: QualityTable,
}

impl PatternSet {
    /// Creates a pattern set that tags named sources using `table`.
    #[must_use]
    pub fn new(table: QualityTable) -> Self {
        Self { table }
    }

    /// Returns the quality table.
    #[must_use]
    pub fn table(&self) -> &QualityTable {
        &self.table
    }

    /// Scans `text` and returns candidates in textual order.
    #[must_use]
    pub fn scan(&self, text: &str) -> Vec<Candidate> {
        // Script payloads often carry JSON-escaped slashes.
        let text = text.replace("\\/", "/");

        let named = self.named_sources(&text);
        if !named.is_empty() {
            return named;
        }

        let manifests: Vec<Candidate> = MANIFEST_URL_RE
            .find_iter(&text)
            .map(|m| Candidate::plain(m.as_str()))
            .collect();
        if !manifests.is_empty() {
            return manifests;
        }

        ANY_URL_RE
            .find_iter(&text)
            .map(|m| m.as_str())
            .filter(|url| has_video_extension(url))
            .map(Candidate::plain)
            .collect()
    }

    fn named_sources(&self, text: &str) -> Vec<Candidate> {
        NAMED_SOURCE_RE
            .captures_iter(text)
            .filter_map(|caps| {
                let suffix = caps.get(1)?.as_str();
                let url = caps.get(2)?.as_str();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return None;
                }
                Some(Candidate {
                    url: url.to_string(),
                    named_height: self.table.named_source_height(suffix),
                })
            })
            .collect()
    }
}

fn has_video_extension(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let path = parsed.path().to_ascii_lowercase();
    VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
