//! Lossless concatenation through an external muxer.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::process::{ProcessError, run_captured, tokio_command};

/// Name of the concat list written next to the segments.
pub const CONCAT_LIST_FILE_NAME: &str = "concat_list.txt";

/// Why the muxer did not produce the output.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("muxer exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("failed to write concat list {path}: {source}")]
    ListFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no segments to concatenate")]
    NoSegments,
}

/// Concatenates ordered segment files into one container.
#[async_trait]
pub trait Muxer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Writes `segments`, in order, into `output`.
    async fn concat(&self, segments: &[PathBuf], output: &Path) -> Result<(), MuxError>;
}

/// [`Muxer`] running `ffmpeg -f concat -c copy`.
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    program: PathBuf,
    timeout: Duration,
}

impl FfmpegMuxer {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn concat(&self, segments: &[PathBuf], output: &Path) -> Result<(), MuxError> {
        let Some(dir) = segments.first().and_then(|first| first.parent()) else {
            return Err(MuxError::NoSegments);
        };
        let list_path = dir.join(CONCAT_LIST_FILE_NAME);
        tokio::fs::write(&list_path, concat_list(segments))
            .await
            .map_err(|source| MuxError::ListFile {
                path: list_path.clone(),
                source,
            })?;

        let mut cmd = tokio_command(&self.program);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .args(["-c", "copy"])
            .arg(output);
        debug!(program = %self.program.display(), list = %list_path.display(), "running muxer");

        let result = run_captured(cmd, None, self.timeout).await?;
        if result.status.success() {
            Ok(())
        } else {
            Err(MuxError::Failed {
                status: result.status,
                stderr: result.stderr.trim().to_string(),
            })
        }
    }
}

/// Renders the concat demuxer list, one `file '<path>'` line per segment.
#[must_use]
pub fn concat_list(segments: &[PathBuf]) -> String {
    let mut list = String::new();
    for segment in segments {
        let escaped = segment.to_string_lossy().replace('\'', "'\\''");
        let _ = writeln!(list, "file '{escaped}'");
    }
    list
}
