//! Scanner invocation.
//!
//! A [`Scanner`] takes a serialized resource manifest and returns the raw
//! structured report produced by an external security scanner. The production
//! implementation is [`CommandScanner`], which runs one process per request.

mod command;

pub use command::{CommandScanner, DEFAULT_MAX_OUTPUT_BYTES};

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Raw output of a completed scan
#[derive(Debug, Clone, Default)]
pub struct ScanOutput {
    /// Structured report bytes (scanner stdout)
    pub report: Vec<u8>,
    /// Free-form diagnostic text (scanner stderr), never parsed
    pub diagnostics: Vec<u8>,
    /// Wall time spent in the scanner
    pub elapsed: Duration,
}

impl ScanOutput {
    /// Create an output carrying only a report
    pub fn from_report(report: impl Into<Vec<u8>>) -> Self {
        Self {
            report: report.into(),
            ..Default::default()
        }
    }

    /// Diagnostic output as lossy UTF-8, for logging
    pub fn diagnostics_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.diagnostics)
    }
}

/// Errors from invoking the external scanner
#[derive(Error, Debug)]
pub enum ScannerError {
    /// Nothing to scan
    #[error("manifest is empty")]
    EmptyManifest,

    /// Scanner binary could not be started
    #[error("failed to spawn scanner {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Manifest could not be written to the scanner
    #[error("failed to write manifest to scanner stdin: {0}")]
    Stdin(#[source] std::io::Error),

    /// Scanner did not finish within its time budget and was killed
    #[error("scanner timed out after {0:?}")]
    Timeout(Duration),

    /// Scanner finished unsuccessfully
    #[error("scanner exited with {}: {}", describe_exit(.code), trimmed(.stderr))]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// Report was larger than the configured capture limit
    #[error("scanner report exceeded {limit} bytes")]
    OutputTooLarge { limit: usize },

    /// Waiting on or reading from the scanner failed
    #[error("scanner I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl ScannerError {
    /// Short machine-readable classification, used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            ScannerError::EmptyManifest => "empty_manifest",
            ScannerError::Spawn { .. } => "spawn",
            ScannerError::Stdin(_) => "stdin",
            ScannerError::Timeout(_) => "timeout",
            ScannerError::NonZeroExit { .. } => "non_zero_exit",
            ScannerError::OutputTooLarge { .. } => "output_too_large",
            ScannerError::Io(_) => "io",
        }
    }
}

fn trimmed(text: &str) -> &str {
    text.trim()
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// An external scanning capability
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan one manifest, giving up after `timeout`
    async fn scan(&self, manifest: &[u8], timeout: Duration) -> Result<ScanOutput, ScannerError>;
}
