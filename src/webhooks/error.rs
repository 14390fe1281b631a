//! Error types for the admission pipeline.
//!
//! Every variant is contained in the request that raised it and maps to
//! exactly one HTTP status.

use axum::http::StatusCode;
use thiserror::Error;

use crate::report::ReportParseError;
use crate::scanner::ScannerError;

/// Per-request admission error
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// Malformed AdmissionReview envelope or embedded object
    #[error("Invalid AdmissionReview: {0}")]
    Decode(String),

    /// Scanner could not be run to completion
    #[error("Scanner invocation failed: {0}")]
    ScannerInvocation(#[from] ScannerError),

    /// Scanner output could not be interpreted
    #[error("Scan report could not be parsed: {0}")]
    ReportParse(#[from] ReportParseError),

    /// Response could not be serialized
    #[error("Failed to encode admission response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl AdmissionError {
    /// HTTP status written for this error when it is not recovered
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdmissionError::Decode(_) => StatusCode::BAD_REQUEST,
            AdmissionError::ScannerInvocation(_)
            | AdmissionError::ReportParse(_)
            | AdmissionError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure policy may turn this error into a verdict
    pub fn is_scan_failure(&self) -> bool {
        matches!(
            self,
            AdmissionError::ScannerInvocation(_) | AdmissionError::ReportParse(_)
        )
    }

    /// Short machine-readable classification, used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            AdmissionError::Decode(_) => "decode",
            AdmissionError::ScannerInvocation(e) => e.kind(),
            AdmissionError::ReportParse(e) => e.kind(),
            AdmissionError::Encode(_) => "encode",
        }
    }
}
