//! Scanner backed by an external process.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ScanOutput, Scanner, ScannerError};
use crate::config::ScannerConfig;

/// Default cap on captured bytes per output stream
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Runs the scanner binary once per request.
///
/// The manifest is written to the child's stdin while stdout and stderr are
/// drained concurrently, so a scanner that streams output before consuming
/// all of its input cannot deadlock on a full pipe. The child is killed when
/// the timeout elapses or when the calling future is dropped.
#[derive(Debug, Clone)]
pub struct CommandScanner {
    program: PathBuf,
    args: Vec<String>,
    max_output_bytes: usize,
}

impl CommandScanner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn from_config(config: &ScannerConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
            .with_max_output_bytes(config.max_output_bytes)
    }

    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }
}

#[async_trait]
impl Scanner for CommandScanner {
    async fn scan(&self, manifest: &[u8], timeout: Duration) -> Result<ScanOutput, ScannerError> {
        if manifest.is_empty() {
            return Err(ScannerError::EmptyManifest);
        }

        let started = Instant::now();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ScannerError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ScannerError::Io(io::Error::other("scanner stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScannerError::Io(io::Error::other("scanner stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ScannerError::Io(io::Error::other("scanner stderr not captured")))?;

        let limit = self.max_output_bytes;

        let write_manifest = async move {
            stdin.write_all(manifest).await?;
            stdin.shutdown().await
            // stdin dropped here, closing the pipe
        };

        let run = tokio::time::timeout(timeout, async {
            tokio::join!(
                write_manifest,
                read_bounded(stdout, limit),
                read_bounded(stderr, limit),
                child.wait()
            )
        })
        .await;

        let (stdin_result, stdout_result, stderr_result, wait_result) = match run {
            Ok(results) => results,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out scanner");
                }
                return Err(ScannerError::Timeout(timeout));
            }
        };

        let status = wait_result.map_err(ScannerError::Io)?;
        let (report, report_truncated) = stdout_result.map_err(ScannerError::Io)?;
        let (diagnostics, diagnostics_truncated) = stderr_result.map_err(ScannerError::Io)?;

        if !status.success() {
            return Err(ScannerError::NonZeroExit {
                code: status.code(),
                stderr: String::from_utf8_lossy(&diagnostics).into_owned(),
            });
        }

        if let Err(e) = stdin_result {
            // A scanner may legitimately exit before reading all input
            if e.kind() != io::ErrorKind::BrokenPipe {
                return Err(ScannerError::Stdin(e));
            }
            debug!("Scanner closed stdin before reading the whole manifest");
        }

        if report_truncated {
            return Err(ScannerError::OutputTooLarge { limit });
        }
        if diagnostics_truncated {
            debug!(limit, "Scanner diagnostics truncated");
        }

        Ok(ScanOutput {
            report,
            diagnostics,
            elapsed: started.elapsed(),
        })
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes.
///
/// Input past the limit is drained and discarded so the writer never blocks.
async fn read_bounded<R>(mut reader: R, limit: usize) -> io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut truncated = false;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok((buf, truncated));
        }
        let remaining = limit.saturating_sub(buf.len());
        if n > remaining {
            truncated = true;
        }
        if let Some(bytes) = chunk.get(..n.min(remaining)) {
            buf.extend_from_slice(bytes);
        }
    }
}
