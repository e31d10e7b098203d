//! Helpers shared by unit tests.

use std::time::Duration;

use crate::process::{run_captured, tokio_command};

mod sockets;

pub use sockets::mock_origin;

/// Returns `node` when a working runtime is on `PATH`, otherwise `None`.
pub async fn node_runtime() -> Option<&'static str> {
    let mut cmd = tokio_command("node");
    cmd.arg("--version");
    match run_captured(cmd, None, Duration::from_secs(10)).await {
        Ok(output) if output.status.success() => Some("node"),
        _ => {
            let test = std::thread::current().name().unwrap_or("<unnamed>").to_string();
            eprintln!("{test}: skipped, node runtime unavailable");
            None
        }
    }
}
