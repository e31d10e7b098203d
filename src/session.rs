//! Per-download session state and cancellation.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tempfile::TempDir;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use crate::error::StreamError;

const RUNNING: u8 = 0;
const CANCEL_REQUESTED: u8 = 1;
const CANCELLED: u8 = 2;

/// Prefix of per-session working directories inside the destination.
pub const WORK_DIR_PREFIX: &str = ".streamgrab-";

/// Observable state of a [`CancelToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    Running,
    CancelRequested,
    Cancelled,
}

/// Cloneable cancellation handle shared by the caller and the pipeline.
///
/// `cancel()` moves the token from running to cancel-requested and wakes
/// every waiter; the pipeline moves it to cancelled once it has stopped.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
    token: CancellationToken,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns true only for the call that made the
    /// request; later calls are no-ops.
    pub fn cancel(&self) -> bool {
        let first = self
            .state
            .compare_exchange(RUNNING, CANCEL_REQUESTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            self.token.cancel();
        }
        first
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) != RUNNING
    }

    #[must_use]
    pub fn state(&self) -> CancelState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => CancelState::Running,
            CANCEL_REQUESTED => CancelState::CancelRequested,
            _ => CancelState::Cancelled,
        }
    }

    /// Records that the pipeline observed the request and stopped.
    pub(crate) fn mark_cancelled(&self) {
        self.state.store(CANCELLED, Ordering::Release);
    }

    /// Resolves once cancellation is requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

/// Pipeline phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Resolving,
    ManifestLoading,
    Acquiring,
    Combining,
    Done,
    Cancelled,
    Failed,
}

impl Phase {
    /// Terminal phases absorb every further transition.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::ManifestLoading => "manifest-loading",
            Self::Acquiring => "acquiring",
            Self::Combining => "combining",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// State of one `download` call.
///
/// Owns a uniquely named working directory inside the destination directory.
/// The directory is removed by [`close`](Self::close) or, on any other exit
/// path, when the session is dropped.
#[derive(Debug)]
pub struct DownloadSession {
    cancel: CancelToken,
    phase: Phase,
    output_path: Option<PathBuf>,
    work_path: PathBuf,
    work_dir: Option<TempDir>,
}

impl DownloadSession {
    /// Creates `dest_dir` if needed and a fresh working directory inside it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Io`] if either directory cannot be created.
    pub async fn start(dest_dir: &Path, cancel: CancelToken) -> Result<Self, StreamError> {
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| StreamError::io(dest_dir, e))?;

        let work_dir = tempfile::Builder::new()
            .prefix(WORK_DIR_PREFIX)
            .tempdir_in(dest_dir)
            .map_err(|e| StreamError::io(dest_dir, e))?;
        let work_path = work_dir.path().to_path_buf();
        debug!(work_dir = %work_path.display(), "session working directory created");

        Ok(Self {
            cancel,
            phase: Phase::Idle,
            output_path: None,
            work_path,
            work_dir: Some(work_dir),
        })
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_path
    }

    #[must_use]
    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    pub fn set_output_path(&mut self, path: PathBuf) {
        self.output_path = Some(path);
    }

    /// Moves to `next` unless the session is already terminal.
    pub fn transition(&mut self, next: Phase) {
        if self.phase.is_terminal() {
            debug!(phase = %self.phase, ignored = %next, "session already terminal");
            return;
        }
        info!(from = %self.phase, to = %next, "phase transition");
        self.phase = next;
    }

    /// Returns `Cancelled` (and moves to the cancelled phase) if cancellation
    /// was requested.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Cancelled`] when the token is cancelled.
    pub fn ensure_running(&mut self) -> Result<(), StreamError> {
        if self.cancel.is_cancelled() {
            self.mark_cancelled();
            return Err(StreamError::Cancelled);
        }
        Ok(())
    }

    /// Records a terminal outcome for `error`.
    pub fn fail(&mut self, error: &StreamError) {
        if error.is_cancelled() {
            self.mark_cancelled();
        } else {
            self.transition(Phase::Failed);
        }
    }

    fn mark_cancelled(&mut self) {
        self.transition(Phase::Cancelled);
        self.cancel.mark_cancelled();
    }

    /// Removes the working directory. Later calls are no-ops.
    pub fn close(&mut self) {
        if let Some(dir) = self.work_dir.take()
            && let Err(error) = dir.close()
        {
            warn!(
                work_dir = %self.work_path.display(),
                error = %error,
                "failed to remove session working directory"
            );
        }
    }
}
