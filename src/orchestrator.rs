//! End-to-end download of one page: resolve, select, load, acquire, combine.

use std::cmp::Reverse;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

use crate::config::{ConfigError, DownloaderConfig};
use crate::download::{AcquisitionPool, ProgressReporter, ProgressSnapshot, SegmentClient, Stage};
use crate::error::StreamError;
use crate::filename::{extract_video_id, output_file_name, promote_unique};
use crate::http::{ClientBuildError, HeaderProfile, HttpClient};
use crate::manifest::ManifestLoader;
use crate::reassemble::{FfmpegMuxer, Muxer, Reassembler};
use crate::resolver::{NodeScriptDecoder, Resolver, ScriptDecoder, StreamVariant};
use crate::session::{CancelToken, DownloadSession, Phase};

/// First numeric suffix used when the output name is taken.
const OUTPUT_SUFFIX_START: usize = 2;

/// Errors constructing a [`Downloader`].
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Client(#[from] ClientBuildError),
}

/// A parsed quality request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityRequest {
    /// Target height, matched exactly or by nearest distance.
    Height(u32),
    Best,
    Worst,
}

/// Parses `"720p"`, `"720"`, `"best"` or `"worst"` (case-insensitive).
///
/// # Errors
///
/// Returns [`StreamError::InvalidQuality`] for anything else.
pub fn parse_quality(input: &str) -> Result<QualityRequest, StreamError> {
    let normalized = input.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "best" => return Ok(QualityRequest::Best),
        "worst" => return Ok(QualityRequest::Worst),
        _ => {}
    }
    let digits = normalized.strip_suffix('p').unwrap_or(&normalized);
    match digits.parse::<u32>() {
        Ok(height) if height > 0 => Ok(QualityRequest::Height(height)),
        _ => Err(StreamError::invalid_quality(input)),
    }
}

/// Picks the variant for `request`.
///
/// Exact height match first, else the smallest absolute difference; ties go
/// to the earliest variant in `variants`.
#[must_use]
pub fn select_variant(
    variants: &[StreamVariant],
    request: QualityRequest,
) -> Option<&StreamVariant> {
    match request {
        QualityRequest::Height(target) => variants
            .iter()
            .find(|v| v.resolution_height == target)
            .or_else(|| {
                variants
                    .iter()
                    .min_by_key(|v| v.resolution_height.abs_diff(target))
            }),
        QualityRequest::Best => variants.iter().min_by_key(|v| Reverse(v.resolution_height)),
        QualityRequest::Worst => variants.iter().min_by_key(|v| v.resolution_height),
    }
}

/// Runs whole download sessions. Cheap to share; holds no per-session state.
#[derive(Debug)]
pub struct Downloader {
    config: DownloaderConfig,
    client: HttpClient,
    resolver: Resolver,
    reassembler: Reassembler,
}

impl Downloader {
    /// Creates a downloader using Node.js and ffmpeg from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] if the config is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: DownloaderConfig) -> Result<Self, SetupError> {
        let decoder = Arc::new(NodeScriptDecoder::new(
            config.script_runtime.clone(),
            config.subprocess_timeout,
        ));
        let muxer = Arc::new(FfmpegMuxer::new(
            config.muxer_program.clone(),
            config.subprocess_timeout,
        ));
        Self::with_collaborators(config, decoder, muxer)
    }

    /// Creates a downloader with explicit script decoder and muxer.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_collaborators(
        config: DownloaderConfig,
        decoder: Arc<dyn ScriptDecoder>,
        muxer: Arc<dyn Muxer>,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        let client = HttpClient::new(
            HeaderProfile::browser(),
            config.connect_timeout,
            config.read_timeout,
        )?;
        let resolver = Resolver::new(client.clone(), config.quality_table.clone(), decoder);
        Ok(Self {
            config,
            client,
            resolver,
            reassembler: Reassembler::new(muxer),
        })
    }

    #[must_use]
    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Resolves `page_url` without downloading anything.
    ///
    /// # Errors
    ///
    /// See [`Resolver::resolve`].
    pub async fn resolve(&self, page_url: &str) -> Result<Vec<StreamVariant>, StreamError> {
        self.resolver.resolve(page_url).await
    }

    /// Downloads the variant of `page_url` closest to `quality` into
    /// `dest_dir` and returns the final file path.
    ///
    /// Nothing but the final file is left in `dest_dir`, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Any [`StreamError`]; [`StreamError::Cancelled`] once `cancel` fires.
    #[instrument(skip(self, progress, cancel), fields(dest = %dest_dir.display()))]
    pub async fn download(
        &self,
        page_url: &str,
        quality: &str,
        dest_dir: &Path,
        progress: &ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<PathBuf, StreamError> {
        let request = parse_quality(quality)?;
        let page =
            Url::parse(page_url).map_err(|e| StreamError::invalid_url(page_url, e.to_string()))?;
        let id = extract_video_id(&page)
            .ok_or_else(|| StreamError::invalid_url(page_url, "no identifier in URL path"))?;

        let mut session = DownloadSession::start(dest_dir, cancel.clone()).await?;
        let result = self
            .run(&mut session, &page, &id, request, dest_dir, progress)
            .await;

        match &result {
            Ok(path) => {
                session.transition(Phase::Done);
                info!(output = %path.display(), "download complete");
            }
            Err(error) => {
                session.fail(error);
                warn!(error = %error, phase = %session.phase(), "download ended without output");
            }
        }
        session.close();
        result
    }

    async fn run(
        &self,
        session: &mut DownloadSession,
        page: &Url,
        id: &str,
        request: QualityRequest,
        dest_dir: &Path,
        progress: &ProgressReporter,
    ) -> Result<PathBuf, StreamError> {
        let cancel = session.cancel_token().clone();

        session.ensure_running()?;
        session.transition(Phase::Resolving);
        progress.emit(ProgressSnapshot::stage(Stage::Resolving, 0));
        let variants = until_cancelled(&cancel, self.resolver.resolve(page.as_str())).await?;

        session.ensure_running()?;
        let variant = select_variant(&variants, request)
            .cloned()
            .ok_or_else(|| StreamError::no_variants(page.as_str(), 0))?;
        info!(
            height = variant.resolution_height,
            url = %variant.url,
            available = variants.len(),
            "variant selected"
        );

        session.transition(Phase::ManifestLoading);
        let headers = self.client.headers().with_origin_of(page);
        let loader = ManifestLoader::new(self.client.clone(), headers.clone())
            .with_alternate_probing(self.config.probe_alternate_playlists);
        let manifest = until_cancelled(&cancel, loader.load(&variant.url)).await?;

        session.ensure_running()?;
        session.transition(Phase::Acquiring);
        let pool = AcquisitionPool::new(
            SegmentClient::new(self.client.clone(), headers),
            self.config.concurrency,
            self.config.segment_extensions.clone(),
        );
        let total = manifest.segments.len();
        let files = pool
            .acquire(
                &manifest.base_url,
                &manifest.segments,
                session.work_dir(),
                progress,
                &cancel,
            )
            .await?;

        session.ensure_running()?;
        session.transition(Phase::Combining);
        progress.emit(ProgressSnapshot::stage(Stage::Combining, total));
        let extension = self.config.output_extension.trim_start_matches('.');
        let staged = session.work_dir().join(format!("combined.{extension}"));
        until_cancelled(&cancel, self.reassembler.combine(&files, &staged)).await?;
        verify_output(&staged).await?;

        session.ensure_running()?;
        let final_name = output_file_name(id, variant.resolution_height, extension);
        // The work dir lives inside `dest_dir`, so the staged file can be linked in.
        let final_path = promote_unique(&staged, dest_dir, &final_name, OUTPUT_SUFFIX_START)
            .await
            .map_err(|e| StreamError::io(dest_dir.join(&final_name), e))?;
        session.set_output_path(final_path.clone());

        if let Err(error) = verify_output(&final_path).await {
            discard(&final_path).await;
            return Err(error);
        }

        progress.emit(ProgressSnapshot::stage(Stage::Complete, total));
        Ok(final_path)
    }
}

/// Runs `future` unless `cancel` fires first; dropping it stops the work.
async fn until_cancelled<T>(
    cancel: &CancelToken,
    future: impl Future<Output = Result<T, StreamError>>,
) -> Result<T, StreamError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(StreamError::Cancelled),
        result = future => result,
    }
}

async fn verify_output(path: &Path) -> Result<(), StreamError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(StreamError::verification_failed(path, "file is empty")),
        Err(error) => Err(StreamError::verification_failed(
            path,
            format!("file is missing: {error}"),
        )),
    }
}

async fn discard(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %error, "failed to remove unverified output");
    }
}
