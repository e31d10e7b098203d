//! Per-segment HTTP fetches.

use std::path::Path;

use futures_util::StreamExt;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, trace};
use url::Url;

use crate::http::{FetchError, HttpClient, OPEN_BYTE_RANGE, RequestHeaders, read_error};
use crate::session::CancelToken;

/// Why a single segment attempt produced no payload.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("empty response body")]
    EmptyBody,

    #[error("cancelled before the request was sent")]
    Cancelled,

    #[error("IO error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl AttemptError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Fetches segment payloads with the session's request headers.
#[derive(Debug, Clone)]
pub struct SegmentClient {
    http: HttpClient,
    headers: RequestHeaders,
}

impl SegmentClient {
    #[must_use]
    pub fn new(http: HttpClient, headers: RequestHeaders) -> Self {
        Self { http, headers }
    }

    /// Fetches `url` into `dest`: first with `Range: bytes=0-`, then the
    /// identical URL without Range. Returns the bytes written.
    ///
    /// `cancel` is checked before each attempt.
    ///
    /// # Errors
    ///
    /// Returns [`AttemptError::Cancelled`] if `cancel` fired before an
    /// attempt, otherwise the error of the plain attempt when both fail.
    pub async fn fetch_to_file(
        &self,
        url: &Url,
        dest: &Path,
        cancel: &CancelToken,
    ) -> Result<u64, AttemptError> {
        for ranged in [true, false] {
            if cancel.is_cancelled() {
                return Err(AttemptError::Cancelled);
            }
            match self.attempt(url, ranged, dest).await {
                Ok(written) => return Ok(written),
                Err(error) if ranged => {
                    debug!(url = %url, error = %error, "ranged attempt failed; retrying without range");
                }
                Err(error) => return Err(error),
            }
        }
        Err(AttemptError::EmptyBody)
    }

    async fn attempt(&self, url: &Url, ranged: bool, dest: &Path) -> Result<u64, AttemptError> {
        // Each request gets its own header copy; the session headers stay untouched.
        let mut headers = self.headers.clone().accept_any();
        if ranged {
            headers = headers.with_range(OPEN_BYTE_RANGE);
        }

        let response = self.http.get(url.as_str(), headers).await?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(AttemptError::UnexpectedStatus(status.as_u16()));
        }

        let written = stream_to_file(response, url, dest).await?;
        if written == 0 {
            let _ = tokio::fs::remove_file(dest).await;
            return Err(AttemptError::EmptyBody);
        }
        trace!(url = %url, bytes = written, ranged, "segment attempt succeeded");
        Ok(written)
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    url: &Url,
    dest: &Path,
) -> Result<u64, AttemptError> {
    let file = File::create(dest)
        .await
        .map_err(|e| AttemptError::io(dest, e))?;
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| read_error(url.as_str(), e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| AttemptError::io(dest, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| AttemptError::io(dest, e))?;
    Ok(bytes_written)
}

/// Returns `url` with the extension of its last path segment replaced by
/// `extension` (which includes the dot). The query string is preserved.
#[must_use]
pub fn with_extension(url: &Url, extension: &str) -> Url {
    let mut swapped = url.clone();
    let path = url.path();
    let (dir, file) = path.rsplit_once('/').unwrap_or(("", path));
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    };
    swapped.set_path(&format!("{dir}/{stem}{extension}"));
    swapped
}
