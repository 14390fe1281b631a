//! Admission decision policy.
//!
//! Completed scan reports are evaluated in tiers:
//! - Tier 1 (Severity): deny when a counted control is at or above the cutoff
//! - Tier 2 (Score): deny when the aggregate severity score reaches the maximum
//!
//! When a scan could not be completed, the configured [`PolicyMode`] decides
//! whether to deny, allow, or report an error to the API server.

pub mod score;
pub mod severity;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::report::{ControlFinding, ScanReport, Severity};

/// Maximum number of findings quoted in a denial message
pub const MAX_QUOTED_FINDINGS: usize = 5;

/// How scan failures are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolicyMode {
    /// Scan failures are surfaced as errors; the webhook `failurePolicy` decides
    Threshold,
    /// Scan failures admit the resource
    FailOpen,
    /// Scan failures deny the resource
    #[default]
    FailClosed,
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyMode::Threshold => write!(f, "threshold"),
            PolicyMode::FailOpen => write!(f, "fail-open"),
            PolicyMode::FailClosed => write!(f, "fail-closed"),
        }
    }
}

/// Error returned for an unrecognized policy mode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown policy mode {0:?} (expected threshold, fail-open or fail-closed)")]
pub struct UnknownPolicyMode(pub String);

impl FromStr for PolicyMode {
    type Err = UnknownPolicyMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threshold" => Ok(PolicyMode::Threshold),
            "fail-open" | "failopen" | "fail_open" => Ok(PolicyMode::FailOpen),
            "fail-closed" | "failclosed" | "fail_closed" => Ok(PolicyMode::FailClosed),
            _ => Err(UnknownPolicyMode(s.to_string())),
        }
    }
}

/// Policy settings, fixed at startup
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    pub mode: PolicyMode,
    /// Lowest severity that denies on its own
    pub severity_cutoff: Severity,
    /// Aggregate score at or above which the resource is denied
    pub max_severity_score: f64,
    /// Ignore controls with no failed resources for cutoff and score
    pub count_only_failing_controls: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            mode: PolicyMode::default(),
            severity_cutoff: Severity::Critical,
            max_severity_score: 80.0,
            count_only_failing_controls: false,
        }
    }
}

/// Outcome of evaluating a request
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Machine-friendly reason (if denied, or if admitted without a scan)
    pub reason: Option<String>,
    /// Human-readable explanation
    pub message: Option<String>,
    /// Findings surfaced to the client as admission warnings
    pub warnings: Vec<String>,
}

impl Decision {
    /// Create an allowed decision
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
            warnings: Vec::new(),
        }
    }

    /// Create a denied decision
    pub fn denied(reason: &str, message: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            warnings: Vec::new(),
        }
    }

    /// Allowed, but with an explanation attached
    pub fn allowed_with(reason: &str, message: &str) -> Self {
        Self {
            allowed: true,
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// What to do after a scan could not be completed
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Respond with this decision
    Decide(Decision),
    /// Respond with a server error
    Error,
}

/// Context for evaluating a report
pub struct EvaluationContext<'a> {
    pub report: &'a ScanReport,
    pub config: &'a PolicyConfig,
}

impl<'a> EvaluationContext<'a> {
    /// Findings that take part in the decision
    pub fn counted_findings(&self) -> impl Iterator<Item = &'a ControlFinding> + use<'a> {
        let only_failing = self.config.count_only_failing_controls;
        self.report
            .findings()
            .iter()
            .filter(move |f| !only_failing || f.is_failing())
    }

    /// Sum of severity scores over the counted findings
    pub fn aggregate_score(&self) -> f64 {
        self.counted_findings()
            .map(|f| f.summary.severity_score)
            .sum()
    }
}

/// Deterministic decision policy
#[derive(Debug, Clone, Default)]
pub struct DecisionPolicy {
    config: PolicyConfig,
}

impl DecisionPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Evaluate a completed scan report
    pub fn evaluate(&self, report: &ScanReport) -> Decision {
        let ctx = EvaluationContext {
            report,
            config: &self.config,
        };

        // Tier 1: individual findings
        let result = severity::validate(&ctx);
        if !result.allowed {
            return result;
        }

        // Tier 2: aggregate risk
        let result = score::validate(&ctx);
        if !result.allowed {
            return result;
        }

        Decision::allowed()
    }

    /// Decide what happens when the scan failed or its output was unusable
    pub fn on_scan_failure(&self, cause: &dyn fmt::Display) -> FailureOutcome {
        match self.config.mode {
            PolicyMode::Threshold => FailureOutcome::Error,
            PolicyMode::FailClosed => FailureOutcome::Decide(Decision::denied(
                "ScanFailed",
                &format!("Security scan could not be completed: {}", cause),
            )),
            PolicyMode::FailOpen => FailureOutcome::Decide(Decision::allowed_with(
                "ScanSkipped",
                &format!("Admitted without a security scan: {}", cause),
            )),
        }
    }
}

/// Render findings as `id name (severity)` for messages
pub(crate) fn quote_findings<'a>(findings: impl IntoIterator<Item = &'a ControlFinding>) -> String {
    let findings: Vec<_> = findings.into_iter().collect();
    let mut quoted: Vec<String> = findings
        .iter()
        .take(MAX_QUOTED_FINDINGS)
        .map(|f| format!("{} {} ({})", f.id, f.name, f.severity))
        .collect();
    if findings.len() > MAX_QUOTED_FINDINGS {
        quoted.push(format!("and {} more", findings.len() - MAX_QUOTED_FINDINGS));
    }
    quoted.join(", ")
}
