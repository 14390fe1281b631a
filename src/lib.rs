//! kubescan-webhook library crate
//!
//! A validating admission webhook that scans every proposed resource with an
//! external security scanner and admits or denies it under a deterministic
//! policy.
//!
//! Pipeline: [`webhooks`] decodes the AdmissionReview, [`scanner`] runs the
//! scan, [`report`] interprets the findings, [`policy`] decides, and
//! [`webhooks`] encodes the response.

pub mod config;
pub mod health;
pub mod policy;
pub mod report;
pub mod scanner;
pub mod webhooks;

pub use config::{ConfigError, WebhookConfig};
pub use health::HealthState;
pub use policy::{Decision, DecisionPolicy, PolicyConfig, PolicyMode};
pub use report::{ControlFinding, ReportParseError, ScanReport, Severity};
pub use scanner::{CommandScanner, ScanOutput, Scanner, ScannerError};
pub use webhooks::{WebhookError, WebhookState, create_webhook_router, run_webhook_server};
