//! Reassembly of downloaded segments into one media file.
//!
//! The muxer is tried first; if it fails for any reason the segments are
//! concatenated byte for byte. Segment files and the concat list are removed
//! afterwards on both paths.

mod muxer;

pub use muxer::{CONCAT_LIST_FILE_NAME, FfmpegMuxer, MuxError, Muxer, concat_list};

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use crate::error::StreamError;

/// Combines ordered segment files.
pub struct Reassembler {
    muxer: Arc<dyn Muxer>,
}

impl std::fmt::Debug for Reassembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reassembler")
            .field("muxer", &self.muxer.name())
            .finish()
    }
}

impl Reassembler {
    #[must_use]
    pub fn new(muxer: Arc<dyn Muxer>) -> Self {
        Self { muxer }
    }

    /// Writes `files` (already ordered by index) into `output`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::CombineFailed`] when the muxer and the raw
    /// fallback both fail.
    #[instrument(skip_all, fields(segments = files.len(), output = %output.display()))]
    pub async fn combine(&self, files: &[PathBuf], output: &Path) -> Result<(), StreamError> {
        if files.is_empty() {
            return Err(StreamError::combine_failed(output, "no segment files"));
        }

        let result = match self.muxer.concat(files, output).await {
            Ok(()) => {
                info!(muxer = self.muxer.name(), "segments muxed");
                Ok(())
            }
            Err(error) => {
                warn!(
                    muxer = self.muxer.name(),
                    error = %error,
                    "muxer failed; falling back to raw concatenation"
                );
                match raw_concat(files, output).await {
                    Ok(bytes) => {
                        info!(bytes, "segments concatenated");
                        Ok(())
                    }
                    Err(fallback) => Err(StreamError::combine_failed(output, fallback.to_string())),
                }
            }
        };

        cleanup(files).await;
        result
    }
}

/// Appends every file to `output` in order, truncating what was there.
async fn raw_concat(files: &[PathBuf], output: &Path) -> std::io::Result<u64> {
    let file = File::create(output).await?;
    let mut writer = BufWriter::new(file);
    let mut total = 0u64;
    for path in files {
        let mut segment = File::open(path).await?;
        total += tokio::io::copy(&mut segment, &mut writer).await?;
    }
    writer.flush().await?;
    Ok(total)
}

async fn cleanup(files: &[PathBuf]) {
    let list = files
        .first()
        .and_then(|first| first.parent())
        .map(|dir| dir.join(CONCAT_LIST_FILE_NAME));

    for path in files.iter().chain(list.iter()) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!(path = %path.display(), error = %error, "failed to remove temporary file"),
        }
    }
    debug!(files = files.len(), "segment files removed");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct FailingMuxer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Muxer for FailingMuxer {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn concat(&self, _segments: &[PathBuf], output: &Path) -> Result<(), MuxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Leave partial output behind; the fallback must truncate it.
            tokio::fs::write(output, b"PARTIAL-GARBAGE").await.unwrap();
            Err(MuxError::NoSegments)
        }
    }

    fn write_segments(dir: &Path, payloads: &[&[u8]]) -> Vec<PathBuf> {
        payloads
            .iter()
            .enumerate()
            .map(|(i, payload)| {
                let path = dir.join(format!("segment_{i:05}.ts"));
                std::fs::write(&path, payload).unwrap();
                path
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fallback_concatenates_in_order_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_segments(dir.path(), &[b"aa", b"bb", b"cc"]);
        std::fs::write(dir.path().join(CONCAT_LIST_FILE_NAME), "file 'x'").unwrap();
        let output = dir.path().join("out.mp4");
        let muxer = Arc::new(FailingMuxer {
            calls: AtomicUsize::new(0),
        });

        Reassembler::new(muxer.clone())
            .combine(&files, &output)
            .await
            .unwrap();

        assert_eq!(muxer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&output).unwrap(), b"aabbcc");
        assert!(files.iter().all(|f| !f.exists()));
        assert!(!dir.path().join(CONCAT_LIST_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_missing_segment_fails_combine() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = write_segments(dir.path(), &[b"aa"]);
        files.push(dir.path().join("segment_00001.ts"));
        let muxer = Arc::new(FailingMuxer {
            calls: AtomicUsize::new(0),
        });

        let result = Reassembler::new(muxer)
            .combine(&files, &dir.path().join("out.mp4"))
            .await;
        assert!(matches!(result, Err(StreamError::CombineFailed { .. })));
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let muxer = Arc::new(FailingMuxer {
            calls: AtomicUsize::new(0),
        });
        let reassembler = Reassembler::new(muxer.clone());
        let result = tokio_test::block_on(reassembler.combine(&[], Path::new("out.mp4")));
        assert!(matches!(result, Err(StreamError::CombineFailed { .. })));
        assert_eq!(muxer.calls.load(Ordering::SeqCst), 0);
    }
}
