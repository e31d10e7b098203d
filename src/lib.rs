//! Streamgrab Core Library
//!
//! Locates the media stream hidden in an obfuscated video page and
//! reassembles it from its HLS segments into one playable file.
//!
//! # Architecture
//!
//! - [`resolver`] - Page fetch and extraction cascade into ranked variants
//! - [`manifest`] - HLS playlist loading into ordered segments
//! - [`download`] - Bounded-concurrency segment acquisition with progress
//! - [`reassemble`] - Muxer-first segment concatenation with raw fallback
//! - [`orchestrator`] - The [`Downloader`] tying the stages together
//! - [`session`] - Per-download working directory and cancellation
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use streamgrab_core::{CancelToken, Downloader, DownloaderConfig, ProgressReporter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(DownloaderConfig::default())?;
//! let output = downloader
//!     .download(
//!         "https://video.example.com/en/abc-123",
//!         "720p",
//!         Path::new("./downloads"),
//!         &ProgressReporter::disabled(),
//!         &CancelToken::new(),
//!     )
//!     .await?;
//! println!("Saved: {}", output.display());
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub mod error;
pub mod filename;
pub mod http;
pub mod manifest;
pub mod orchestrator;
pub mod process;
pub mod reassemble;
pub mod resolver;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::{ConfigError, DownloaderConfig};
pub use download::{AcquisitionPool, ProgressReporter, ProgressSnapshot, Stage};
pub use error::StreamError;
pub use manifest::{Manifest, ManifestLoader, SegmentRef};
pub use orchestrator::{Downloader, QualityRequest, SetupError, parse_quality, select_variant};
pub use reassemble::{FfmpegMuxer, MuxError, Muxer, Reassembler};
pub use resolver::{
    DecodeOutcome, NodeScriptDecoder, QualityTable, Resolver, ScriptDecoder, StreamVariant,
};
pub use session::{CancelToken, DownloadSession, Phase};
