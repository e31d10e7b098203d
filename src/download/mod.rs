//! Segment acquisition: concurrent fetches of every manifest segment.
//!
//! # Features
//!
//! - Bounded concurrency (`min(cap, segments)` workers)
//! - Extension candidates per segment (`.ts`, `.jpeg`, `.mp4` by default)
//! - Ranged request first, plain request as fallback
//! - Partial-failure tolerance with a single aggregated error
//! - Prompt cancellation
//! - Non-blocking progress delivery

mod client;
mod pool;
mod progress;

pub use client::{AttemptError, SegmentClient, with_extension};
pub use pool::{AcquisitionPool, AcquisitionTask, segment_file_name};
pub use progress::{ProgressCallback, ProgressReporter, ProgressSnapshot, Stage};
