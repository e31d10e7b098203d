//! Bounded-concurrency segment acquisition.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::{AttemptError, SegmentClient, with_extension};
use super::progress::{ProgressReporter, ProgressSnapshot};
use crate::config::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY};
use crate::error::StreamError;
use crate::manifest::SegmentRef;
use crate::session::CancelToken;

/// File name of segment `index` inside the working directory.
#[must_use]
pub fn segment_file_name(index: usize) -> String {
    format!("segment_{index:05}.ts")
}

/// Work item owned by exactly one worker.
#[derive(Debug, Clone)]
pub struct AcquisitionTask {
    pub segment: SegmentRef,
    /// Extensions tried so far, in order.
    pub attempted_extensions: Vec<String>,
}

impl AcquisitionTask {
    #[must_use]
    pub fn new(segment: SegmentRef) -> Self {
        Self {
            segment,
            attempted_extensions: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum SegmentOutcome {
    Saved(PathBuf),
    Failed,
    Cancelled,
}

/// Downloads every segment of a manifest into a working directory.
#[derive(Debug, Clone)]
pub struct AcquisitionPool {
    client: SegmentClient,
    concurrency: usize,
    extensions: Arc<[String]>,
}

impl AcquisitionPool {
    /// Creates a pool. `concurrency` is clamped to `1..=MAX_CONCURRENCY`.
    #[must_use]
    pub fn new(client: SegmentClient, concurrency: usize, extensions: Vec<String>) -> Self {
        let concurrency = if concurrency == 0 {
            DEFAULT_CONCURRENCY
        } else {
            concurrency.min(MAX_CONCURRENCY)
        };
        Self {
            client,
            concurrency,
            extensions: extensions.into(),
        }
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetches all `segments` and returns their files ordered by index.
    ///
    /// A failed segment never stops its siblings; failures are reported
    /// together once every worker has finished.
    ///
    /// # Errors
    ///
    /// - [`StreamError::SegmentsIncomplete`] with the failed indices, ascending
    /// - [`StreamError::Cancelled`] as soon as `cancel` fires
    #[instrument(skip_all, fields(segments = segments.len(), work_dir = %work_dir.display()))]
    pub async fn acquire(
        &self,
        base_url: &Url,
        segments: &[SegmentRef],
        work_dir: &Path,
        progress: &ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<Vec<PathBuf>, StreamError> {
        let total = segments.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        let workers = self.concurrency.min(total);
        debug!(workers, total, "starting acquisition pool");
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut join_set = JoinSet::new();
        let mut task_index = HashMap::with_capacity(total);

        for segment in segments {
            let index = segment.index;
            let task = AcquisitionTask::new(segment.clone());
            let semaphore = Arc::clone(&semaphore);
            let client = self.client.clone();
            let extensions = Arc::clone(&self.extensions);
            let cancel = cancel.clone();
            let base_url = base_url.clone();
            let work_dir = work_dir.to_path_buf();

            let handle = join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return SegmentOutcome::Failed;
                };
                run_task(task, &client, &base_url, &extensions, &work_dir, &cancel).await
            });
            task_index.insert(handle.id(), index);
        }

        let started = Instant::now();
        let mut completed = 0usize;
        let mut saved: Vec<(usize, PathBuf)> = Vec::with_capacity(total);
        let mut failed: Vec<usize> = Vec::new();
        progress.emit(ProgressSnapshot::downloading(0, total, started.elapsed()));

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(completed, total, "cancellation requested; aborting segment workers");
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                    return Err(StreamError::Cancelled);
                }
                next = join_set.join_next_with_id() => {
                    let Some(joined) = next else { break };
                    let (id, outcome) = match joined {
                        Ok((id, outcome)) => (id, outcome),
                        Err(join_error) => {
                            warn!(error = %join_error, "segment worker panicked");
                            (join_error.id(), SegmentOutcome::Failed)
                        }
                    };
                    let Some(index) = task_index.remove(&id) else {
                        continue;
                    };
                    match outcome {
                        SegmentOutcome::Saved(path) => saved.push((index, path)),
                        SegmentOutcome::Failed => failed.push(index),
                        SegmentOutcome::Cancelled => continue,
                    }
                    completed += 1;
                    progress.emit(ProgressSnapshot::downloading(completed, total, started.elapsed()));
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        if !failed.is_empty() {
            warn!(failed = failed.len(), total, "segments failed");
            return Err(StreamError::segments_incomplete(failed));
        }

        saved.sort_by_key(|(index, _)| *index);
        info!(
            segments = saved.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "all segments acquired"
        );
        Ok(saved.into_iter().map(|(_, path)| path).collect())
    }
}

async fn run_task(
    mut task: AcquisitionTask,
    client: &SegmentClient,
    base_url: &Url,
    extensions: &[String],
    work_dir: &Path,
    cancel: &CancelToken,
) -> SegmentOutcome {
    if cancel.is_cancelled() {
        return SegmentOutcome::Cancelled;
    }
    let index = task.segment.index;
    let url = match base_url.join(&task.segment.uri) {
        Ok(url) => url,
        Err(error) => {
            warn!(index, uri = %task.segment.uri, error = %error, "unresolvable segment URI");
            return SegmentOutcome::Failed;
        }
    };
    let dest = work_dir.join(segment_file_name(index));

    for extension in extensions {
        if cancel.is_cancelled() {
            return SegmentOutcome::Cancelled;
        }
        task.attempted_extensions.push(extension.clone());
        let candidate = with_extension(&url, extension);
        match client.fetch_to_file(&candidate, &dest, cancel).await {
            Ok(bytes) => {
                debug!(index, extension, bytes, "segment saved");
                return SegmentOutcome::Saved(dest);
            }
            Err(AttemptError::Cancelled) => return SegmentOutcome::Cancelled,
            Err(error) => debug!(index, extension, error = %error, "segment candidate failed"),
        }
    }

    let _ = tokio::fs::remove_file(&dest).await;
    warn!(
        index,
        attempted = ?task.attempted_extensions,
        "segment failed with every extension"
    );
    SegmentOutcome::Failed
}
