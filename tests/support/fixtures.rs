//! Shared fixtures: mock stream origins and fake collaborators.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use streamgrab_core::http::{HeaderProfile, HttpClient};
use streamgrab_core::process::ProcessError;
use streamgrab_core::{DecodeOutcome, DownloaderConfig, MuxError, Muxer, ScriptDecoder};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

/// Payload of segment `index`; distinct per index so ordering is observable.
pub fn segment_payload(index: usize) -> Vec<u8> {
    format!("SEGMENT-{index:03};").into_bytes()
}

/// Concatenated payloads of segments `0..count`.
pub fn expected_stream(count: usize) -> Vec<u8> {
    (0..count).flat_map(segment_payload).collect()
}

/// A VOD media playlist listing `seg{i}.ts` for `0..count`.
pub fn media_playlist(count: usize) -> String {
    let mut body = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:4\n");
    for i in 0..count {
        body.push_str(&format!("#EXTINF:4.0,\nseg{i}.ts\n"));
    }
    body.push_str("#EXT-X-ENDLIST\n");
    body
}

/// Mounts `{dir}/index.m3u8` plus `count` segments under `dir`.
pub async fn mount_stream(server: &MockServer, dir: &str, count: usize) {
    Mock::given(method("GET"))
        .and(path(format!("{dir}/index.m3u8")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", HLS_CONTENT_TYPE)
                .set_body_string(media_playlist(count)),
        )
        .mount(server)
        .await;
    for i in 0..count {
        mount_segment(server, &format!("{dir}/seg{i}.ts"), segment_payload(i), None).await;
    }
}

pub async fn mount_segment(
    server: &MockServer,
    at: &str,
    body: Vec<u8>,
    delay: Option<Duration>,
) {
    let mut response = ResponseTemplate::new(200).set_body_bytes(body);
    if let Some(delay) = delay {
        response = response.set_delay(delay);
    }
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(response)
        .mount(server)
        .await;
}

/// Mounts an HTML page at `at`.
pub async fn mount_page(server: &MockServer, at: &str, html: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string(html),
        )
        .mount(server)
        .await;
}

/// Library config with short timeouts for mock servers.
pub fn test_config() -> DownloaderConfig {
    DownloaderConfig {
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(10),
        ..DownloaderConfig::default()
    }
}

pub fn test_http() -> HttpClient {
    HttpClient::new(
        HeaderProfile::browser(),
        Duration::from_secs(5),
        Duration::from_secs(10),
    )
    .unwrap()
}

/// Files left in `dir` (names), sorted.
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Script decoder with a canned result.
pub struct FakeDecoder {
    outcome: Option<String>,
    pub calls: AtomicUsize,
}

impl FakeDecoder {
    /// Behaves as an installed runtime printing `clear`.
    pub fn available(clear: impl Into<String>) -> Self {
        Self {
            outcome: Some(clear.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Behaves as a missing runtime.
    pub fn missing() -> Self {
        Self {
            outcome: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ScriptDecoder for FakeDecoder {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn decode(&self, _packed: &str) -> DecodeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Some(clear) => DecodeOutcome::Decoded(clear.clone()),
            None => DecodeOutcome::Failed {
                stdout: String::new(),
                stderr: String::new(),
                reason: "script runtime 'node' not found".to_string(),
            },
        }
    }
}

/// Muxer that is never installed; forces the raw concatenation path.
pub struct MissingMuxer;

#[async_trait]
impl Muxer for MissingMuxer {
    fn name(&self) -> &'static str {
        "missing"
    }

    async fn concat(&self, _segments: &[PathBuf], _output: &Path) -> Result<(), MuxError> {
        Err(MuxError::Process(ProcessError::NotFound {
            program: "ffmpeg".to_string(),
        }))
    }
}

/// Muxer that concatenates in Rust and counts invocations.
#[derive(Default)]
pub struct RecordingMuxer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Muxer for RecordingMuxer {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn concat(&self, segments: &[PathBuf], output: &Path) -> Result<(), MuxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut joined = Vec::new();
        for segment in segments {
            joined.extend(tokio::fs::read(segment).await.unwrap());
        }
        tokio::fs::write(output, joined).await.unwrap();
        Ok(())
    }
}
