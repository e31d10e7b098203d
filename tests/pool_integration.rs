//! Integration tests for the segment acquisition pool.

use std::time::Duration;

use streamgrab_core::download::SegmentClient;
use streamgrab_core::{
    AcquisitionPool, CancelToken, ProgressReporter, SegmentRef, Stage, StreamError,
};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::fixtures::{dir_entries, mount_segment, segment_payload, test_http};
use support::require_mock_server;

fn segments(base: &Url, count: usize) -> Vec<SegmentRef> {
    (0..count)
        .map(|index| SegmentRef {
            index,
            uri: base.join(&format!("seg{index}.ts")).unwrap().to_string(),
        })
        .collect()
}

fn pool(concurrency: usize, extensions: &[&str]) -> AcquisitionPool {
    let http = test_http();
    let headers = http.headers();
    AcquisitionPool::new(
        SegmentClient::new(http, headers),
        concurrency,
        extensions.iter().map(ToString::to_string).collect(),
    )
}

fn base_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/vod/", server.uri())).unwrap()
}

#[tokio::test]
async fn test_files_are_returned_in_index_order_despite_jitter() {
    let server = require_mock_server!();
    let count = 6;
    for i in 0..count {
        // Earlier segments finish last.
        let delay = Duration::from_millis(((count - i) * 40) as u64);
        mount_segment(&server, &format!("/vod/seg{i}.ts"), segment_payload(i), Some(delay)).await;
    }
    let work = TempDir::new().unwrap();
    let base = base_url(&server);

    let files = pool(4, &[".ts"])
        .acquire(
            &base,
            &segments(&base, count),
            work.path(),
            &ProgressReporter::disabled(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(files.len(), count);
    for (i, file) in files.iter().enumerate() {
        assert_eq!(file, &work.path().join(format!("segment_{i:05}.ts")));
        assert_eq!(std::fs::read(file).unwrap(), segment_payload(i));
    }
}

#[tokio::test]
async fn test_failed_segments_are_reported_by_index() {
    let server = require_mock_server!();
    for i in [0, 2, 4] {
        mount_segment(&server, &format!("/vod/seg{i}.ts"), segment_payload(i), None).await;
    }
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(10)
        .mount(&server)
        .await;
    let work = TempDir::new().unwrap();
    let base = base_url(&server);

    let result = pool(2, &[".ts", ".jpeg"])
        .acquire(
            &base,
            &segments(&base, 5),
            work.path(),
            &ProgressReporter::disabled(),
            &CancelToken::new(),
        )
        .await;

    match result {
        Err(StreamError::SegmentsIncomplete { failed_indices }) => {
            assert_eq!(failed_indices, vec![1, 3]);
        }
        other => panic!("expected SegmentsIncomplete, got {other:?}"),
    }
    assert!(!work.path().join("segment_00001.ts").exists());
}

#[tokio::test]
async fn test_segment_falls_back_to_next_extension() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/vod/seg0.ts"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_segment(&server, "/vod/seg0.jpeg", segment_payload(0), None).await;
    let work = TempDir::new().unwrap();
    let base = base_url(&server);

    let files = pool(1, &[".ts", ".jpeg", ".mp4"])
        .acquire(
            &base,
            &segments(&base, 1),
            work.path(),
            &ProgressReporter::disabled(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(std::fs::read(&files[0]).unwrap(), segment_payload(0));
    assert_eq!(dir_entries(work.path()), vec!["segment_00000.ts"]);
}

#[tokio::test]
async fn test_cancel_stops_pool_promptly() {
    let server = require_mock_server!();
    for i in 0..8 {
        mount_segment(
            &server,
            &format!("/vod/seg{i}.ts"),
            segment_payload(i),
            Some(Duration::from_secs(5)),
        )
        .await;
    }
    let work = TempDir::new().unwrap();
    let base = base_url(&server);
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result = pool(4, &[".ts"])
        .acquire(
            &base,
            &segments(&base, 8),
            work.path(),
            &ProgressReporter::disabled(),
            &cancel,
        )
        .await;

    assert!(matches!(result, Err(StreamError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_already_cancelled_token_fetches_nothing() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
        .expect(0)
        .mount(&server)
        .await;
    let work = TempDir::new().unwrap();
    let base = base_url(&server);
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = pool(2, &[".ts"])
        .acquire(
            &base,
            &segments(&base, 3),
            work.path(),
            &ProgressReporter::disabled(),
            &cancel,
        )
        .await;
    assert!(matches!(result, Err(StreamError::Cancelled)));
}

#[tokio::test]
async fn test_progress_is_monotonic_and_reaches_total() {
    let server = require_mock_server!();
    let count = 10;
    for i in 0..count {
        let delay = Duration::from_millis((i % 3 * 20) as u64);
        mount_segment(&server, &format!("/vod/seg{i}.ts"), segment_payload(i), Some(delay)).await;
    }
    let work = TempDir::new().unwrap();
    let base = base_url(&server);
    let (reporter, mut rx) = ProgressReporter::channel();

    pool(3, &[".ts"])
        .acquire(
            &base,
            &segments(&base, count),
            work.path(),
            &reporter,
            &CancelToken::new(),
        )
        .await
        .unwrap();
    reporter.finish().await;

    let mut snapshots = Vec::new();
    while let Some(snapshot) = rx.recv().await {
        snapshots.push(snapshot);
    }
    assert!(snapshots.iter().all(|s| s.stage == Stage::Downloading));
    assert!(snapshots.iter().all(|s| s.total == count));
    assert!(snapshots.windows(2).all(|w| w[0].completed <= w[1].completed));
    assert!(snapshots.windows(2).all(|w| w[0].percentage <= w[1].percentage));
    let last = snapshots.last().unwrap();
    assert_eq!(last.completed, count);
    assert!((last.percentage - 100.0).abs() < f64::EPSILON);
}
