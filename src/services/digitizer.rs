//! Embroidery digitizer behind a stable subprocess contract.
//!
//! The external generator is invoked as
//!
//! ```text
//! <program> [script] --manifest <path> --dst <path> --preview-svg <path>
//!     --direction-json <path> --direction-png <path> --canonical-hash <hash>
//! ```
//!
//! and must print one JSON line with the stitch statistics. A non-zero exit
//! or an unparseable line fails the digitize stage.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Maximum stdout or stderr captured per stream (1 MiB).
const MAX_OUTPUT_BYTES: u64 = 1024 * 1024;

/// Everything the digitizer reads and writes for one customization.
#[derive(Debug, Clone, PartialEq)]
pub struct DigitizeRequest {
    pub manifest_path: PathBuf,
    pub canonical_hash: String,
    pub dst_path: PathBuf,
    pub preview_svg_path: PathBuf,
    pub direction_json_path: PathBuf,
    pub direction_png_path: PathBuf,
}

impl DigitizeRequest {
    /// Output paths named `{canonicalHash}-{customizationId}…` under `out_dir`.
    pub fn new(out_dir: &Path, manifest_path: &Path, canonical_hash: &str, customization_id: &str) -> Self {
        let stem = format!("{canonical_hash}-{customization_id}");
        Self {
            manifest_path: manifest_path.to_path_buf(),
            canonical_hash: canonical_hash.to_string(),
            dst_path: out_dir.join(format!("{stem}.dst")),
            preview_svg_path: out_dir.join(format!("{stem}-stitch.svg")),
            direction_json_path: out_dir.join(format!("{stem}-digitize-direction-map.json")),
            direction_png_path: out_dir.join(format!("{stem}-digitize-direction-map.png")),
        }
    }

    pub fn args(&self) -> Vec<String> {
        vec![
            "--manifest".into(),
            self.manifest_path.display().to_string(),
            "--dst".into(),
            self.dst_path.display().to_string(),
            "--preview-svg".into(),
            self.preview_svg_path.display().to_string(),
            "--direction-json".into(),
            self.direction_json_path.display().to_string(),
            "--direction-png".into(),
            self.direction_png_path.display().to_string(),
            "--canonical-hash".into(),
            self.canonical_hash.clone(),
        ]
    }
}

/// Stitch statistics reported by the digitizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitizeReport {
    pub valid: bool,
    pub stitch_count: u64,
    pub jump_count: u64,
    pub trim_count: u64,
    pub color_changes: u64,
    #[serde(default)]
    pub debug_direction_png: Option<String>,
}

impl DigitizeReport {
    /// Parse the last non-empty line of the digitizer's stdout.
    pub fn parse(stdout: &str) -> Result<Self, DigitizeError> {
        let line = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| DigitizeError::MalformedOutput("empty stdout".to_string()))?;
        serde_json::from_str(line).map_err(|e| DigitizeError::MalformedOutput(format!("{e}: {line}")))
    }
}

#[async_trait]
pub trait Digitizer: Send + Sync {
    async fn digitize(&self, request: &DigitizeRequest) -> Result<DigitizeReport, DigitizeError>;
}

/// Runs the external generator as a child process.
pub struct SubprocessDigitizer {
    program: String,
    script: Option<PathBuf>,
    timeout: Duration,
}

impl SubprocessDigitizer {
    pub fn new(program: impl Into<String>, script: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            script,
            timeout,
        }
    }
}

#[async_trait]
impl Digitizer for SubprocessDigitizer {
    async fn digitize(&self, request: &DigitizeRequest) -> Result<DigitizeReport, DigitizeError> {
        let mut cmd = Command::new(&self.program);
        if let Some(script) = &self.script {
            cmd.arg(script);
        }
        cmd.args(request.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(DigitizeError::Spawn)?;
        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        // On timeout `child` is dropped and killed via kill_on_drop.
        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status.map_err(DigitizeError::Spawn)?,
            Err(_) => {
                return Err(DigitizeError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        };

        let stdout = collect_stream(stdout_task).await?;
        let stderr = collect_stream(stderr_task).await?;

        tracing::debug!(
            program = %self.program,
            exit_code = status.code().unwrap_or(-1),
            duration_ms = start.elapsed().as_millis() as u64,
            "Digitizer exited"
        );

        if !status.success() {
            return Err(DigitizeError::Exit {
                code: status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }
        DigitizeReport::parse(&stdout)
    }
}

async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        h.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

async fn collect_stream(task: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<String, DigitizeError> {
    let bytes = task
        .await
        .map_err(|e| DigitizeError::Capture(std::io::Error::other(e)))?
        .map_err(DigitizeError::Capture)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, thiserror::Error)]
pub enum DigitizeError {
    #[error("failed to run digitizer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to capture digitizer output: {0}")]
    Capture(#[source] std::io::Error),

    #[error("digitizer exited with code {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    #[error("digitizer output is not a stitch report: {0}")]
    MalformedOutput(String),

    #[error("digitizer timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}
