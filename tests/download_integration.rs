//! End-to-end download sessions against a mock origin.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use streamgrab_core::{CancelToken, Downloader, ProgressReporter, Stage, StreamError};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::fixtures::{
    FakeDecoder, MissingMuxer, RecordingMuxer, dir_entries, expected_stream, mount_page,
    mount_segment, mount_stream, segment_payload, test_config,
};
use support::require_mock_server;

const SEGMENTS: usize = 5;

/// Mounts a plain page at `/en/abc` advertising three variants; only the
/// 720 tier (`842x480`) and the 360 tier carry playable streams.
async fn mount_origin(server: &MockServer) {
    let html = format!(
        "<html><script>\n\
         var source1280 = '{0}/hls/abc_1280x720/index.m3u8';\n\
         var source842 = '{0}/hls/abc_842x480/index.m3u8';\n\
         var source360 = '{0}/hls/abc_640x360/index.m3u8';\n\
         </script></html>",
        server.uri()
    );
    mount_page(server, "/en/abc", html).await;
    mount_stream(server, "/hls/abc_842x480", SEGMENTS).await;
    mount_stream(server, "/hls/abc_640x360", 2).await;
}

fn downloader() -> Downloader {
    Downloader::with_collaborators(
        test_config(),
        Arc::new(FakeDecoder::missing()),
        Arc::new(MissingMuxer),
    )
    .unwrap()
}

fn page(server: &MockServer) -> String {
    format!("{}/en/abc", server.uri())
}

#[tokio::test]
async fn test_download_writes_ordered_stream_with_raw_concat() {
    let server = require_mock_server!();
    mount_origin(&server).await;
    let dest = TempDir::new().unwrap();

    let output = downloader()
        .download(
            &page(&server),
            "720p",
            dest.path(),
            &ProgressReporter::disabled(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output, dest.path().join("abc-720p.mp4"));
    assert_eq!(std::fs::read(&output).unwrap(), expected_stream(SEGMENTS));
    assert_eq!(dir_entries(dest.path()), vec!["abc-720p.mp4"]);
}

#[tokio::test]
async fn test_download_uses_muxer_when_available() {
    let server = require_mock_server!();
    mount_origin(&server).await;
    let dest = TempDir::new().unwrap();
    let muxer = Arc::new(RecordingMuxer::default());
    let downloader = Downloader::with_collaborators(
        test_config(),
        Arc::new(FakeDecoder::missing()),
        muxer.clone(),
    )
    .unwrap();

    let output = downloader
        .download(
            &page(&server),
            "720",
            dest.path(),
            &ProgressReporter::disabled(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(muxer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read(output).unwrap(), expected_stream(SEGMENTS));
}

#[tokio::test]
async fn test_repeated_download_gets_suffixed_name() {
    let server = require_mock_server!();
    mount_origin(&server).await;
    let dest = TempDir::new().unwrap();
    let downloader = downloader();

    for _ in 0..2 {
        downloader
            .download(
                &page(&server),
                "720p",
                dest.path(),
                &ProgressReporter::disabled(),
                &CancelToken::new(),
            )
            .await
            .unwrap();
    }

    assert_eq!(
        dir_entries(dest.path()),
        vec!["abc-720p.mp4", "abc-720p_2.mp4"]
    );
}

#[tokio::test]
async fn test_concurrent_sessions_write_distinct_files() {
    let server = require_mock_server!();
    mount_origin(&server).await;
    let dest = TempDir::new().unwrap();
    let downloader = downloader();
    let page = page(&server);

    let (progress_a, cancel_a) = (ProgressReporter::disabled(), CancelToken::new());
    let (progress_b, cancel_b) = (ProgressReporter::disabled(), CancelToken::new());
    let (first, second) = tokio::join!(
        downloader.download(&page, "720p", dest.path(), &progress_a, &cancel_a),
        downloader.download(&page, "720p", dest.path(), &progress_b, &cancel_b),
    );

    let (first, second) = (first.unwrap(), second.unwrap());
    assert_ne!(first, second);
    assert_eq!(std::fs::read(first).unwrap(), expected_stream(SEGMENTS));
    assert_eq!(std::fs::read(second).unwrap(), expected_stream(SEGMENTS));
}

#[tokio::test]
async fn test_nearest_quality_is_selected() {
    let server = require_mock_server!();
    mount_origin(&server).await;
    let dest = TempDir::new().unwrap();

    // 480 is 120 from 360 and 240 from 720.
    let output = downloader()
        .download(
            &page(&server),
            "480p",
            dest.path(),
            &ProgressReporter::disabled(),
            &CancelToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(output, dest.path().join("abc-360p.mp4"));
    assert_eq!(std::fs::read(output).unwrap(), expected_stream(2));
}

#[tokio::test]
async fn test_failed_segment_leaves_destination_empty() {
    let server = require_mock_server!();
    let html = format!("<script>var source842 = '{}/hls/broken_842x480/index.m3u8';</script>", server.uri());
    mount_page(&server, "/en/broken", html).await;
    Mock::given(method("GET"))
        .and(path("/hls/broken_842x480/index.m3u8"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(support::fixtures::media_playlist(3)),
        )
        .mount(&server)
        .await;
    mount_segment(&server, "/hls/broken_842x480/seg0.ts", segment_payload(0), None).await;
    mount_segment(&server, "/hls/broken_842x480/seg2.ts", segment_payload(2), None).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .with_priority(10)
        .mount(&server)
        .await;
    let dest = TempDir::new().unwrap();

    let result = downloader()
        .download(
            &format!("{}/en/broken", server.uri()),
            "720p",
            dest.path(),
            &ProgressReporter::disabled(),
            &CancelToken::new(),
        )
        .await;

    match result {
        Err(StreamError::SegmentsIncomplete { failed_indices }) => {
            assert_eq!(failed_indices, vec![1]);
        }
        other => panic!("expected SegmentsIncomplete, got {other:?}"),
    }
    assert!(dir_entries(dest.path()).is_empty());
}

#[tokio::test]
async fn test_cancel_during_acquisition_leaves_destination_unchanged() {
    let server = require_mock_server!();
    let html = format!("<script>var source842 = '{}/hls/slow_842x480/index.m3u8';</script>", server.uri());
    mount_page(&server, "/en/slow", html).await;
    Mock::given(method("GET"))
        .and(path("/hls/slow_842x480/index.m3u8"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(support::fixtures::media_playlist(6)),
        )
        .mount(&server)
        .await;
    for i in 0..6 {
        mount_segment(
            &server,
            &format!("/hls/slow_842x480/seg{i}.ts"),
            segment_payload(i),
            Some(Duration::from_secs(5)),
        )
        .await;
    }
    let dest = TempDir::new().unwrap();
    std::fs::write(dest.path().join("keep.txt"), b"existing").unwrap();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let (reporter, mut rx) = ProgressReporter::channel();
    tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            if snapshot.stage == Stage::Downloading {
                trigger.cancel();
            }
        }
    });

    let result = downloader()
        .download(
            &format!("{}/en/slow", server.uri()),
            "720p",
            dest.path(),
            &reporter,
            &cancel,
        )
        .await;
    reporter.finish().await;

    assert!(matches!(result, Err(StreamError::Cancelled)));
    assert!(cancel.is_cancelled());
    assert_eq!(dir_entries(dest.path()), vec!["keep.txt"]);
}

#[tokio::test]
async fn test_cancel_before_start_fetches_nothing() {
    let server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let dest = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = downloader()
        .download(
            &page(&server),
            "720p",
            dest.path(),
            &ProgressReporter::disabled(),
            &cancel,
        )
        .await;

    assert!(matches!(result, Err(StreamError::Cancelled)));
    assert!(dir_entries(dest.path()).is_empty());
}

#[tokio::test]
async fn test_progress_stages_arrive_in_order() {
    let server = require_mock_server!();
    mount_origin(&server).await;
    let dest = TempDir::new().unwrap();
    let (reporter, mut rx) = ProgressReporter::channel();

    downloader()
        .download(
            &page(&server),
            "720p",
            dest.path(),
            &reporter,
            &CancelToken::new(),
        )
        .await
        .unwrap();
    reporter.finish().await;

    let mut stages = Vec::new();
    while let Some(snapshot) = rx.recv().await {
        if stages.last() != Some(&snapshot.stage) {
            stages.push(snapshot.stage);
        }
    }
    assert_eq!(
        stages,
        vec![
            Stage::Resolving,
            Stage::Downloading,
            Stage::Combining,
            Stage::Complete
        ]
    );
}

#[tokio::test]
async fn test_invalid_quality_is_rejected_before_any_request() {
    let dest = TempDir::new().unwrap();
    let result = downloader()
        .download(
            "https://video.example.com/en/abc",
            "ultra",
            dest.path(),
            &ProgressReporter::disabled(),
            &CancelToken::new(),
        )
        .await;
    assert!(matches!(result, Err(StreamError::InvalidQuality { .. })));
    assert!(dir_entries(dest.path()).is_empty());
}

#[tokio::test]
async fn test_page_without_stream_reports_no_variants() {
    let server = require_mock_server!();
    mount_page(&server, "/en/empty", "<html><p>nothing</p></html>".to_string()).await;
    let dest = TempDir::new().unwrap();

    let result = downloader()
        .download(
            &format!("{}/en/empty", server.uri()),
            "720p",
            dest.path(),
            &ProgressReporter::disabled(),
            &CancelToken::new(),
        )
        .await;

    assert!(matches!(result, Err(StreamError::NoVariantsFound { .. })));
    assert!(dir_entries(dest.path()).is_empty());
}
