//! Admission protocol adapter.
//!
//! Decodes `AdmissionReview` requests, runs the security scan, applies the
//! decision policy and encodes the verdict back into an `AdmissionReview`
//! response carrying the original request UID.

mod error;
pub mod pipeline;
mod server;
mod verdict;

pub use error::AdmissionError;
pub use pipeline::{AdmissionEvent, AdmissionPhase, AdmissionPipeline, TransitionResult};
pub use server::{
    AdmissionQuery, DEADLINE_MARGIN, SCAN_PATH, VALIDATE_PATH, WebhookError, WebhookState, create_webhook_router,
    parse_go_duration, run_webhook_server, scan_timeout,
};
pub use verdict::{MAX_WARNINGS, Verdict, error_review};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
