//! Runtime configuration for the download pipeline.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::resolver::QualityTable;

/// Default HTTP connect timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default per-request timeout (60 seconds; segments are small).
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;

/// Default worker pool cap.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Upper bound for the worker pool cap.
pub const MAX_CONCURRENCY: usize = 32;

/// Default timeout for subprocess collaborators (script runtime, muxer).
pub const DEFAULT_SUBPROCESS_TIMEOUT_SECS: u64 = 120;

/// Segment extension candidates, tried in order.
pub const DEFAULT_SEGMENT_EXTENSIONS: [&str; 3] = [".ts", ".jpeg", ".mp4"];

/// Extension of the reassembled output file.
pub const DEFAULT_OUTPUT_EXTENSION: &str = "mp4";

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Concurrency outside `1..=MAX_CONCURRENCY`.
    #[error("invalid concurrency value {value}: must be between 1 and {MAX_CONCURRENCY}")]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// No segment extension candidates.
    #[error("segment extension list must not be empty")]
    EmptyExtensions,

    /// An extension candidate does not start with a dot.
    #[error("invalid segment extension '{0}': must start with '.'")]
    InvalidExtension(String),

    /// A timeout of zero would leave requests unbounded or instantly failing.
    #[error("timeout `{0}` must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Tunables for [`Downloader`](crate::Downloader).
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Maximum concurrent segment fetches.
    pub concurrency: usize,
    /// HTTP connect timeout.
    pub connect_timeout: Duration,
    /// Total timeout for every single HTTP request.
    pub read_timeout: Duration,
    /// Segment extension candidates, in order.
    pub segment_extensions: Vec<String>,
    /// Output file extension without the dot.
    pub output_extension: String,
    /// Dimension/label to height mapping used by the resolver.
    pub quality_table: QualityTable,
    /// Script runtime program (`node`).
    pub script_runtime: PathBuf,
    /// Muxer program (`ffmpeg`).
    pub muxer_program: PathBuf,
    /// Timeout for each subprocess invocation.
    pub subprocess_timeout: Duration,
    /// Probe sibling playlist names when the manifest fetch fails.
    pub probe_alternate_playlists: bool,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            segment_extensions: DEFAULT_SEGMENT_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            output_extension: DEFAULT_OUTPUT_EXTENSION.to_string(),
            quality_table: QualityTable::default(),
            script_runtime: PathBuf::from("node"),
            muxer_program: PathBuf::from("ffmpeg"),
            subprocess_timeout: Duration::from_secs(DEFAULT_SUBPROCESS_TIMEOUT_SECS),
            probe_alternate_playlists: false,
        }
    }
}

impl DownloaderConfig {
    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::InvalidConcurrency {
                value: self.concurrency,
            });
        }
        if self.segment_extensions.is_empty() {
            return Err(ConfigError::EmptyExtensions);
        }
        if let Some(bad) = self
            .segment_extensions
            .iter()
            .find(|ext| !ext.starts_with('.') || ext.len() < 2)
        {
            return Err(ConfigError::InvalidExtension(bad.clone()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("connect_timeout"));
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("read_timeout"));
        }
        if self.subprocess_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("subprocess_timeout"));
        }
        Ok(())
    }
}
