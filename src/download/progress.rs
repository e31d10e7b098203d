//! Progress snapshots and their fire-and-forget delivery.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

/// Coarse pipeline stage shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Resolving,
    Downloading,
    Combining,
    Complete,
}

/// Point-in-time progress of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub stage: Stage,
    /// Segments finished so far (success or failure).
    pub completed: usize,
    pub total: usize,
    pub percentage: f64,
    /// Segments per elapsed second.
    pub speed_units_per_sec: f64,
    pub eta_seconds: f64,
}

impl ProgressSnapshot {
    /// A stage marker with no segment counts.
    #[must_use]
    pub fn stage(stage: Stage, total: usize) -> Self {
        let completed = if stage == Stage::Complete { total } else { 0 };
        let percentage = if stage == Stage::Complete { 100.0 } else { 0.0 };
        Self {
            stage,
            completed,
            total,
            percentage,
            speed_units_per_sec: 0.0,
            eta_seconds: 0.0,
        }
    }

    /// Segment progress after `elapsed`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn downloading(completed: usize, total: usize, elapsed: Duration) -> Self {
        let percentage = if total == 0 {
            100.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        let secs = elapsed.as_secs_f64();
        let speed = if secs > 0.0 { completed as f64 / secs } else { 0.0 };
        let remaining = total.saturating_sub(completed) as f64;
        let eta = if speed > 0.0 { remaining / speed } else { 0.0 };
        Self {
            stage: Stage::Downloading,
            completed,
            total,
            percentage,
            speed_units_per_sec: speed,
            eta_seconds: eta,
        }
    }
}

/// Observer callback invoked on the forwarder task.
pub type ProgressCallback = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// Delivers snapshots without ever blocking the pipeline.
///
/// Snapshots go into an unbounded channel; a separate task drains it and
/// calls the observer, so a slow observer only delays its own output.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    tx: Option<UnboundedSender<ProgressSnapshot>>,
    forwarder: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Spawns a forwarder calling `callback` for every snapshot.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(callback: impl Fn(ProgressSnapshot) + Send + Sync + 'static) -> Self {
        let callback: ProgressCallback = Arc::new(callback);
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressSnapshot>();
        let forwarder = tokio::spawn(async move {
            while let Some(snapshot) = rx.recv().await {
                callback(snapshot);
            }
        });
        Self {
            tx: Some(tx),
            forwarder: Some(forwarder),
        }
    }

    /// A reporter whose snapshots are read from the returned receiver.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<ProgressSnapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                forwarder: None,
            },
            rx,
        )
    }

    /// A reporter that drops everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Queues `snapshot`. Never blocks; a gone observer is ignored.
    pub fn emit(&self, snapshot: ProgressSnapshot) {
        if let Some(tx) = &self.tx
            && tx.send(snapshot).is_err()
        {
            debug!("progress observer gone; snapshot dropped");
        }
    }

    /// Closes the channel and waits until the observer has seen everything.
    pub async fn finish(mut self) {
        self.tx.take();
        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.await;
        }
    }
}
