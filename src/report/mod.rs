//! Scan report interpretation.
//!
//! Parses the scanner's JSON output into a [`ScanReport`]. The expected shape
//! is the kubescape control report:
//!
//! ```json
//! {"controlReports": [{
//!     "control": {"id": "C-0057", "name": "...", "description": "...",
//!                 "remediation": "...", "severity": "Critical"},
//!     "summary": {"totalResourcesCount": 1, "failedResourcesCount": 1,
//!                 "excludedResourcesCount": 0, "severityScore": 95}
//! }]}
//! ```
//!
//! Malformed output never panics. Every problem is returned as a
//! [`ReportParseError`] so the caller can fall back to its failure policy.

mod severity;

pub use severity::{Severity, UnknownSeverity};

use serde::Deserialize;
use thiserror::Error;

/// Errors produced while interpreting scanner output
#[derive(Error, Debug)]
pub enum ReportParseError {
    /// Scanner produced no output at all
    #[error("scan report is empty")]
    Empty,

    /// Output ended before the JSON document was complete
    #[error("scan report is truncated at line {line}, column {column}")]
    Truncated { line: usize, column: usize },

    /// Output is not valid JSON
    #[error("scan report is not valid JSON at line {line}, column {column}: {message}")]
    Malformed {
        line: usize,
        column: usize,
        message: String,
    },

    /// Valid JSON that does not have the control report shape
    #[error("scan report has unexpected shape: {0}")]
    Schema(String),

    /// A specific field is missing, mistyped or violates an invariant
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

impl ReportParseError {
    /// Short machine-readable classification, used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            ReportParseError::Empty => "report_empty",
            ReportParseError::Truncated { .. } => "report_truncated",
            ReportParseError::Malformed { .. } => "report_malformed",
            ReportParseError::Schema(_) => "report_schema",
            ReportParseError::InvalidField { .. } => "report_invalid_field",
        }
    }

    fn invalid(field: String, reason: impl Into<String>) -> Self {
        ReportParseError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Counts and score for a single control
#[derive(Debug, Clone, PartialEq)]
pub struct FindingSummary {
    pub total_resources: u64,
    pub failed_resources: u64,
    pub excluded_resources: u64,
    pub severity_score: f64,
}

/// One evaluated control
#[derive(Debug, Clone, PartialEq)]
pub struct ControlFinding {
    pub id: String,
    pub name: String,
    pub description: String,
    pub remediation: String,
    pub severity: Severity,
    pub summary: FindingSummary,
}

impl ControlFinding {
    /// A control fails when at least one evaluated resource failed it
    pub fn is_failing(&self) -> bool {
        self.summary.failed_resources > 0
    }

    /// One-line description used in logs and admission warnings
    pub fn summary_line(&self) -> String {
        format!(
            "{} {}: severity {}, score {}, failed {}/{}",
            self.id,
            self.name,
            self.severity,
            format_score(self.summary.severity_score),
            self.summary.failed_resources,
            self.summary.total_resources
        )
    }
}

/// Normalized scanner output, in the order the scanner reported controls
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    findings: Vec<ControlFinding>,
}

impl ScanReport {
    pub fn new(findings: Vec<ControlFinding>) -> Self {
        Self { findings }
    }

    /// Parse raw scanner output
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ReportParseError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(ReportParseError::Empty);
        }

        let document: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| classify_syntax_error(&e))?;

        let root = document
            .as_object()
            .ok_or_else(|| ReportParseError::Schema("top-level value is not an object".into()))?;

        let reports = match root.get("controlReports") {
            None => {
                return Err(ReportParseError::Schema(
                    "missing field `controlReports`".into(),
                ));
            }
            Some(serde_json::Value::Null) => return Ok(Self::default()),
            Some(serde_json::Value::Array(items)) => items,
            Some(_) => {
                return Err(ReportParseError::invalid(
                    "controlReports".into(),
                    "expected an array",
                ));
            }
        };

        let findings = reports
            .iter()
            .enumerate()
            .map(|(index, item)| parse_control(index, item))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { findings })
    }

    pub fn findings(&self) -> &[ControlFinding] {
        &self.findings
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    /// Controls that failed for at least one resource
    pub fn failing(&self) -> impl Iterator<Item = &ControlFinding> {
        self.findings.iter().filter(|f| f.is_failing())
    }

    /// Sum of all per-control severity scores
    pub fn total_score(&self) -> f64 {
        self.findings.iter().map(|f| f.summary.severity_score).sum()
    }
}

/// Render a score without a trailing `.0` when it is integral
pub fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.abs() < 1e15 {
        format!("{:.0}", score)
    } else {
        format!("{:.2}", score)
    }
}

#[derive(Deserialize)]
struct RawControlReport {
    control: RawControl,
    summary: RawSummary,
}

#[derive(Deserialize)]
struct RawControl {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    remediation: String,
    severity: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSummary {
    total_resources_count: i64,
    failed_resources_count: i64,
    excluded_resources_count: i64,
    severity_score: f64,
}

fn classify_syntax_error(e: &serde_json::Error) -> ReportParseError {
    if e.is_eof() {
        ReportParseError::Truncated {
            line: e.line(),
            column: e.column(),
        }
    } else {
        ReportParseError::Malformed {
            line: e.line(),
            column: e.column(),
            message: e.to_string(),
        }
    }
}

fn parse_control(index: usize, item: &serde_json::Value) -> Result<ControlFinding, ReportParseError> {
    let path = format!("controlReports[{}]", index);

    let raw = RawControlReport::deserialize(item)
        .map_err(|e| ReportParseError::invalid(path.clone(), e.to_string()))?;

    let severity = raw
        .control
        .severity
        .parse::<Severity>()
        .map_err(|e| ReportParseError::invalid(format!("{}.control.severity", path), e.to_string()))?;

    let summary_path = format!("{}.summary", path);
    let total = non_negative(&summary_path, "totalResourcesCount", raw.summary.total_resources_count)?;
    let failed = non_negative(&summary_path, "failedResourcesCount", raw.summary.failed_resources_count)?;
    let excluded = non_negative(
        &summary_path,
        "excludedResourcesCount",
        raw.summary.excluded_resources_count,
    )?;

    let score = raw.summary.severity_score;
    if !score.is_finite() || score < 0.0 {
        return Err(ReportParseError::invalid(
            format!("{}.severityScore", summary_path),
            format!("must be a finite non-negative number, got {}", score),
        ));
    }

    if failed.saturating_add(excluded) > total {
        return Err(ReportParseError::invalid(
            summary_path,
            format!(
                "failed ({}) + excluded ({}) exceeds total resources ({})",
                failed, excluded, total
            ),
        ));
    }

    Ok(ControlFinding {
        id: raw.control.id,
        name: raw.control.name,
        description: raw.control.description,
        remediation: raw.control.remediation,
        severity,
        summary: FindingSummary {
            total_resources: total,
            failed_resources: failed,
            excluded_resources: excluded,
            severity_score: score,
        },
    })
}

fn non_negative(path: &str, field: &str, value: i64) -> Result<u64, ReportParseError> {
    u64::try_from(value).map_err(|_| {
        ReportParseError::invalid(
            format!("{}.{}", path, field),
            format!("must be non-negative, got {}", value),
        )
    })
}
