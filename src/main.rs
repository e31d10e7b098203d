//! CLI entry point for streamgrab.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use streamgrab_core::{CancelToken, Downloader, DownloaderConfig, StreamError};
use tracing::{debug, error, info, warn};

mod app_config;
mod cli;
mod progress;

use app_config::FileConfig;
use cli::Args;
use progress::{ProgressMode, build_reporter};

/// Exit status for a run stopped by Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

const DEFAULT_QUALITY: &str = "720p";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if is_cancelled(&err) => {
            warn!("Download cancelled");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn is_cancelled(err: &anyhow::Error) -> bool {
    err.downcast_ref::<StreamError>()
        .is_some_and(StreamError::is_cancelled)
}

async fn run(args: Args) -> Result<()> {
    let file_config = match &args.config {
        Some(path) => app_config::load_file_config(path)?,
        None => app_config::load_default_file_config()?,
    };

    let config = build_downloader_config(&args, &file_config);
    let quality = args
        .quality
        .clone()
        .or_else(|| file_config.quality.clone())
        .unwrap_or_else(|| DEFAULT_QUALITY.to_string());
    let output_dir = args
        .output_dir
        .clone()
        .or_else(|| file_config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let downloader = Downloader::new(config).context("Invalid downloader configuration")?;

    if args.list {
        return list_variants(&downloader, &args).await;
    }

    let cancel = CancelToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() && signal_token.cancel() {
            warn!("Interrupt received; cancelling download");
        }
    });

    info!(url = %args.url, quality, output_dir = %output_dir.display(), "Streamgrab starting");

    let mode = ProgressMode::from_flags(args.json_progress, args.quiet);
    let (reporter, bar) = build_reporter(mode);
    let result = downloader
        .download(&args.url, &quality, &output_dir, &reporter, &cancel)
        .await;
    reporter.finish().await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    let path = result?;
    if args.json_progress {
        println!("{}", serde_json::json!({ "output": path }));
    } else {
        println!("{}", path.display());
    }
    Ok(())
}

async fn list_variants(downloader: &Downloader, args: &Args) -> Result<()> {
    let variants = downloader.resolve(&args.url).await?;
    if args.json_progress {
        println!("{}", serde_json::to_string(&variants)?);
    } else {
        for variant in &variants {
            println!("{}p\t{}", variant.resolution_height, variant.url);
        }
    }
    Ok(())
}

/// Command-line values win over file values; anything unset keeps the library default.
fn build_downloader_config(args: &Args, file: &FileConfig) -> DownloaderConfig {
    let mut config = DownloaderConfig::default();

    if let Some(concurrency) = args.concurrency.or(file.concurrency) {
        config.concurrency = usize::from(concurrency);
    }
    if let Some(secs) = file.connect_timeout_secs {
        config.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = file.read_timeout_secs {
        config.read_timeout = Duration::from_secs(secs);
    }
    if let Some(extensions) = &args.extensions {
        config.segment_extensions = extensions
            .iter()
            .map(|ext| ext.trim().to_string())
            .filter(|ext| !ext.is_empty())
            .collect();
    }
    if let Some(node) = args.node_path.clone().or_else(|| file.node_path.clone()) {
        config.script_runtime = node;
    }
    if let Some(ffmpeg) = args.ffmpeg_path.clone().or_else(|| file.ffmpeg_path.clone()) {
        config.muxer_program = ffmpeg;
    }
    config.probe_alternate_playlists = args.probe_playlists || file.probe_playlists.unwrap_or(false);
    config
}
