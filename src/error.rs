//! Terminal error taxonomy for a download session.
//!
//! Every fallback inside the resolver cascade, the acquisition pool and the
//! reassembler is absorbed locally. Only exhaustion of a whole step surfaces
//! one of these variants, and it reaches the caller unchanged.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`Downloader::download`](crate::Downloader::download)
/// and the individual pipeline stages.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The page URL is malformed or carries no usable identifier.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The requested quality string could not be interpreted.
    #[error("invalid quality '{quality}': expected e.g. 720p, 1080, best or worst")]
    InvalidQuality {
        /// The raw quality input.
        quality: String,
    },

    /// The page itself could not be fetched.
    #[error("failed to fetch page {url}: {reason}")]
    PageFetchFailed {
        /// The page URL.
        url: String,
        /// Transport error or HTTP status.
        reason: String,
    },

    /// Every extraction strategy came back empty.
    #[error("no stream variants found on {url} (tried {strategies_tried} strategies)")]
    NoVariantsFound {
        /// The page URL.
        url: String,
        /// Number of strategies attempted.
        strategies_tried: usize,
    },

    /// The manifest could not be fetched or is not a playlist.
    #[error("failed to fetch manifest {url}: {reason}")]
    ManifestFetchFailed {
        /// The manifest URL.
        url: String,
        /// Transport error, HTTP status, content type or parse failure.
        reason: String,
    },

    /// The manifest parsed but lists no segments.
    #[error("manifest {url} contains no segments")]
    EmptyManifest {
        /// The manifest URL.
        url: String,
    },

    /// One or more segments exhausted every extension and retry.
    #[error("{} segment(s) failed to download: {failed_indices:?}", failed_indices.len())]
    SegmentsIncomplete {
        /// Indices of the failed segments, ascending.
        failed_indices: Vec<usize>,
    },

    /// Both the muxer and the raw concatenation fallback failed.
    #[error("failed to combine segments into {path}: {reason}")]
    CombineFailed {
        /// The intended output file.
        path: PathBuf,
        /// Failure of the fallback path.
        reason: String,
    },

    /// Combine reported success but the output is missing or empty.
    #[error("output verification failed for {path}: {reason}")]
    OutputVerificationFailed {
        /// The verified path.
        path: PathBuf,
        /// Missing or zero-size.
        reason: String,
    },

    /// The session was cancelled.
    #[error("download cancelled")]
    Cancelled,

    /// Working directory or destination directory I/O failure.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl StreamError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid quality error.
    pub fn invalid_quality(quality: impl Into<String>) -> Self {
        Self::InvalidQuality {
            quality: quality.into(),
        }
    }

    /// Creates a page fetch error.
    pub fn page_fetch_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PageFetchFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a no-variants error.
    pub fn no_variants(url: impl Into<String>, strategies_tried: usize) -> Self {
        Self::NoVariantsFound {
            url: url.into(),
            strategies_tried,
        }
    }

    /// Creates a manifest fetch error.
    pub fn manifest_fetch_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ManifestFetchFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an empty manifest error.
    pub fn empty_manifest(url: impl Into<String>) -> Self {
        Self::EmptyManifest { url: url.into() }
    }

    /// Creates a segments-incomplete error; indices are sorted and deduplicated.
    pub fn segments_incomplete(mut failed_indices: Vec<usize>) -> Self {
        failed_indices.sort_unstable();
        failed_indices.dedup();
        Self::SegmentsIncomplete { failed_indices }
    }

    /// Creates a combine error.
    pub fn combine_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CombineFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an output verification error.
    pub fn verification_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::OutputVerificationFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for the cancellation variant.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the
// url or path the source error does not carry.
