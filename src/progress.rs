//! Progress rendering for download runs (progress bar or JSON lines).

use std::io::Write;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use streamgrab_core::{ProgressReporter, ProgressSnapshot, Stage};

/// How progress is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProgressMode {
    Bar,
    JsonLines,
    Hidden,
}

impl ProgressMode {
    pub(crate) fn from_flags(json: bool, quiet: bool) -> Self {
        if json {
            Self::JsonLines
        } else if quiet {
            Self::Hidden
        } else {
            Self::Bar
        }
    }
}

/// Builds the reporter for `mode`. The returned bar (if any) should be
/// cleared by the caller once the run ends.
pub(crate) fn build_reporter(mode: ProgressMode) -> (ProgressReporter, Option<ProgressBar>) {
    match mode {
        ProgressMode::Hidden => (ProgressReporter::disabled(), None),
        ProgressMode::JsonLines => (ProgressReporter::new(print_json_line), None),
        ProgressMode::Bar => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            let handle = bar.clone();
            (
                ProgressReporter::new(move |snapshot| render_bar(&handle, &snapshot)),
                Some(bar),
            )
        }
    }
}

fn print_json_line(snapshot: ProgressSnapshot) {
    if let Ok(line) = serde_json::to_string(&snapshot) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }
}

fn render_bar(bar: &ProgressBar, snapshot: &ProgressSnapshot) {
    match snapshot.stage {
        Stage::Resolving => bar.set_message("Resolving stream..."),
        Stage::Downloading => {
            if bar.length() != Some(snapshot.total as u64) {
                bar.set_length(snapshot.total as u64);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner} [{bar:40}] {pos}/{len} segments {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
                );
            }
            bar.set_position(snapshot.completed as u64);
            bar.set_message(download_message(snapshot));
        }
        Stage::Combining => bar.set_message("Combining segments..."),
        Stage::Complete => bar.finish_and_clear(),
    }
}

fn download_message(snapshot: &ProgressSnapshot) -> String {
    format!(
        "{:.1}% {:.1} seg/s eta {:.0}s",
        snapshot.percentage, snapshot.speed_units_per_sec, snapshot.eta_seconds
    )
}
