//! HLS manifest loading.
//!
//! A variant URL is fetched once, parsed with `m3u8-rs`, and flattened into
//! an ordered list of absolute [`SegmentRef`]s. A master playlist is followed
//! one hop to its highest-bandwidth variant.

use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist, parse_playlist_res};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::StreamError;
use crate::http::{HttpClient, RequestHeaders, read_error};

/// Media types accepted for a playlist response (compared without parameters).
pub const PLAYLIST_CONTENT_TYPES: [&str; 6] = [
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "audio/mpegurl",
    "audio/x-mpegurl",
    "text/plain",
    "application/octet-stream",
];

/// Sibling playlist names probed when the variant URL itself fails.
pub const ALTERNATE_PLAYLIST_NAMES: [&str; 5] = [
    "video.m3u8",
    "index.m3u8",
    "playlist.m3u8",
    "master.m3u8",
    "stream.m3u8",
];

/// One media segment, in playback order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    /// 0-based position; defines output order.
    pub index: usize,
    /// Absolute segment URL.
    pub uri: String,
}

/// A loaded media playlist.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// The media playlist URL actually parsed (after any master hop).
    pub url: Url,
    /// Directory of [`url`](Self::url); relative URIs resolve against it.
    pub base_url: Url,
    /// Segments with contiguous indices `0..len`.
    pub segments: Vec<SegmentRef>,
}

/// Fetches and parses variant manifests.
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    client: HttpClient,
    headers: RequestHeaders,
    probe_alternates: bool,
}

impl ManifestLoader {
    /// Creates a loader sending `headers` (cloned per request).
    #[must_use]
    pub fn new(client: HttpClient, headers: RequestHeaders) -> Self {
        Self {
            client,
            headers,
            probe_alternates: false,
        }
    }

    /// Enables probing of [`ALTERNATE_PLAYLIST_NAMES`] after a failed fetch.
    #[must_use]
    pub fn with_alternate_probing(mut self, enabled: bool) -> Self {
        self.probe_alternates = enabled;
        self
    }

    /// Loads the manifest at `variant_url`.
    ///
    /// # Errors
    ///
    /// - [`StreamError::ManifestFetchFailed`] for transport failures,
    ///   non-success status, non-playlist content type or unparseable body
    /// - [`StreamError::EmptyManifest`] when the playlist lists no segments
    #[instrument(skip(self))]
    pub async fn load(&self, variant_url: &str) -> Result<Manifest, StreamError> {
        let url = Url::parse(variant_url)
            .map_err(|e| StreamError::manifest_fetch_failed(variant_url, e.to_string()))?;

        let first_error = match self.load_from(&url).await {
            Ok(manifest) => return Ok(manifest),
            Err(error @ StreamError::ManifestFetchFailed { .. }) if self.probe_alternates => error,
            Err(error) => return Err(error),
        };

        warn!(error = %first_error, "manifest fetch failed; probing alternate playlist names");
        for name in ALTERNATE_PLAYLIST_NAMES {
            let Ok(candidate) = url.join(name) else {
                continue;
            };
            if candidate == url {
                continue;
            }
            match self.load_from(&candidate).await {
                Ok(manifest) => {
                    info!(url = %candidate, "alternate playlist found");
                    return Ok(manifest);
                }
                Err(error) => debug!(url = %candidate, error = %error, "alternate playlist failed"),
            }
        }
        Err(first_error)
    }

    async fn load_from(&self, url: &Url) -> Result<Manifest, StreamError> {
        let mut current = url.clone();
        for hop in 0..2 {
            match self.fetch_playlist(&current).await? {
                Playlist::MediaPlaylist(playlist) => return build_manifest(current, &playlist),
                Playlist::MasterPlaylist(master) if hop == 0 => {
                    current = highest_bandwidth_variant(&current, &master)?;
                    debug!(variant = %current, "following master playlist");
                }
                Playlist::MasterPlaylist(_) => {
                    return Err(StreamError::manifest_fetch_failed(
                        current.as_str(),
                        "master playlist points to another master playlist",
                    ));
                }
            }
        }
        Err(StreamError::manifest_fetch_failed(
            url.as_str(),
            "too many master playlist hops",
        ))
    }

    async fn fetch_playlist(&self, url: &Url) -> Result<Playlist, StreamError> {
        let fail = |reason: String| StreamError::manifest_fetch_failed(url.as_str(), reason);

        let response = self
            .client
            .get(url.as_str(), self.headers.clone().accept_any())
            .await
            .map_err(|e| fail(e.to_string()))?;

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            && !is_playlist_content_type(content_type)
        {
            return Err(fail(format!("unexpected content type '{content_type}'")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| fail(read_error(url.as_str(), e).to_string()))?;

        parse_playlist_res(&bytes).map_err(|e| fail(format!("unparseable playlist: {e}")))
    }
}

/// True if `content_type` (parameters ignored) is a playlist media type.
#[must_use]
pub fn is_playlist_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.is_empty() || PLAYLIST_CONTENT_TYPES.contains(&essence.as_str())
}

fn highest_bandwidth_variant(url: &Url, master: &MasterPlaylist) -> Result<Url, StreamError> {
    let best = master
        .variants
        .iter()
        .filter(|v| !v.is_i_frame)
        .max_by_key(|v| v.bandwidth)
        .ok_or_else(|| StreamError::empty_manifest(url.as_str()))?;
    url.join(&best.uri)
        .map_err(|e| StreamError::manifest_fetch_failed(url.as_str(), e.to_string()))
}

fn build_manifest(url: Url, playlist: &MediaPlaylist) -> Result<Manifest, StreamError> {
    if playlist.segments.is_empty() {
        return Err(StreamError::empty_manifest(url.as_str()));
    }

    let base_url = url
        .join(".")
        .map_err(|e| StreamError::manifest_fetch_failed(url.as_str(), e.to_string()))?;

    let segments = playlist
        .segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            url.join(&segment.uri)
                .map(|absolute| SegmentRef {
                    index,
                    uri: absolute.to_string(),
                })
                .map_err(|e| {
                    StreamError::manifest_fetch_failed(
                        url.as_str(),
                        format!("bad segment URI '{}': {e}", segment.uri),
                    )
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!(segments = segments.len(), base = %base_url, "manifest loaded");
    Ok(Manifest {
        url,
        base_url,
        segments,
    })
}
