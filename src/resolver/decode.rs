//! Deobfuscation capabilities used by the extraction cascade.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use tracing::debug;

use crate::process::{ProcessError, run_captured, tokio_command};

/// Reads a packed expression from stdin, evaluates it and prints the result.
///
/// Packed payloads are `function(p,a,c,k,e,d){...}(...)` expressions whose
/// value is the unpacked source.
const UNPACK_SCRIPT: &str = r"
let src = '';
process.stdin.setEncoding('utf8');
process.stdin.on('data', (chunk) => { src += chunk; });
process.stdin.on('end', () => {
  try {
    const out = eval('(' + src + ')');
    process.stdout.write(String(out));
  } catch (err) {
    process.stderr.write(String(err && err.stack ? err.stack : err));
    process.exit(1);
  }
});
";

/// Result of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The runtime produced clear text.
    Decoded(String),
    /// The runtime was missing, exited non-zero, timed out or printed nothing.
    ///
    /// Whatever output it did produce is kept for the fallback scan.
    Failed {
        stdout: String,
        stderr: String,
        reason: String,
    },
}

impl DecodeOutcome {
    fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            stdout: String::new(),
            stderr: String::new(),
            reason: reason.into(),
        }
    }
}

/// Evaluates a packer's own unpacking routine.
#[async_trait]
pub trait ScriptDecoder: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Decodes `packed` to clear text. Never errors; failures are an outcome.
    async fn decode(&self, packed: &str) -> DecodeOutcome;
}

/// [`ScriptDecoder`] backed by a Node.js executable.
#[derive(Debug, Clone)]
pub struct NodeScriptDecoder {
    program: PathBuf,
    timeout: Duration,
}

impl NodeScriptDecoder {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ScriptDecoder for NodeScriptDecoder {
    fn name(&self) -> &'static str {
        "node"
    }

    async fn decode(&self, packed: &str) -> DecodeOutcome {
        let mut cmd = tokio_command(&self.program);
        cmd.arg("-e").arg(UNPACK_SCRIPT);

        let output = match run_captured(cmd, Some(packed.as_bytes()), self.timeout).await {
            Ok(output) => output,
            Err(ProcessError::NotFound { program }) => {
                debug!(program, "script runtime not installed");
                return DecodeOutcome::failed(format!("script runtime '{program}' not found"));
            }
            Err(error) => return DecodeOutcome::failed(error.to_string()),
        };

        let reason = if !output.status.success() {
            format!("script runtime exited with {}", output.status)
        } else if output.stdout.trim().is_empty() {
            "script runtime produced no output".to_string()
        } else {
            return DecodeOutcome::Decoded(output.stdout);
        };

        debug!(reason, stderr_len = output.stderr.len(), "packed payload decode failed");
        DecodeOutcome::Failed {
            stdout: output.stdout,
            stderr: output.stderr,
            reason,
        }
    }
}

/// Decodes a base64 literal as UTF-8, trying the standard alphabet first and
/// then the URL-safe one.
#[must_use]
pub fn decode_base64_literal(encoded: &str) -> Option<String> {
    let trimmed = encoded.trim();
    [STANDARD, URL_SAFE]
        .iter()
        .find_map(|engine| engine.decode(trimmed).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}
