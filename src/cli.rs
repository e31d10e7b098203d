//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download the video stream embedded in a web page.
///
/// Streamgrab finds the HLS variants hidden in the page (including packed or
/// base64-encoded player scripts), downloads the selected variant's segments
/// concurrently and joins them into a single file.
#[derive(Parser, Debug)]
#[command(name = "streamgrab")]
#[command(author, version, about)]
pub struct Args {
    /// Page URL containing the video
    pub url: String,

    /// Desired quality: 1080p, 720p, 360p, best or worst [default: 720p]
    #[arg(short = 'q', long)]
    pub quality: Option<String>,

    /// Destination directory [default: current directory]
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent segment downloads (1-32) [default: 10]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub concurrency: Option<u8>,

    /// Segment extensions to try, in order
    #[arg(long, value_delimiter = ',')]
    pub extensions: Option<Vec<String>>,

    /// Node.js executable used to unpack obfuscated scripts
    #[arg(long = "node")]
    pub node_path: Option<PathBuf>,

    /// ffmpeg executable used to join segments
    #[arg(long = "ffmpeg")]
    pub ffmpeg_path: Option<PathBuf>,

    /// Try sibling playlist names (index.m3u8, master.m3u8, ...) if the manifest fails
    #[arg(long)]
    pub probe_playlists: bool,

    /// Only list available variants, do not download
    #[arg(long)]
    pub list: bool,

    /// Print progress as JSON lines on stdout instead of a progress bar
    #[arg(long)]
    pub json_progress: bool,

    /// Read defaults from this config file instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long)]
    pub quiet: bool,
}
