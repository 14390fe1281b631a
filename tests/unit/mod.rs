// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for kubescan-webhook.
//!
//! These tests exercise the public API of each component in isolation,
//! without running the HTTP server or any scanner process.

mod config_tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use kubescan_webhook::config::{ConfigError, WebhookConfig};
    use kubescan_webhook::policy::PolicyMode;
    use kubescan_webhook::report::Severity;

    fn load(vars: &[(&str, &str)]) -> Result<WebhookConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WebhookConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, WebhookConfig::default());
        assert_eq!(config.policy.mode, PolicyMode::FailClosed);
        assert_eq!(config.policy.severity_cutoff, Severity::Critical);
        assert_eq!(config.policy.max_severity_score, 80.0);
        assert_eq!(config.scanner.timeout, Duration::from_secs(10));
        assert_eq!(config.scanner.program.to_str(), Some("kubescape"));
        assert_eq!(config.scanner.args.first().map(String::as_str), Some("scan"));
    }

    #[test]
    fn test_policy_overrides() {
        let config = load(&[
            ("POLICY_MODE", "fail-open"),
            ("SEVERITY_CUTOFF", "high"),
            ("MAX_SEVERITY_SCORE", "42.5"),
        ])
        .unwrap();
        assert_eq!(config.policy.mode, PolicyMode::FailOpen);
        assert_eq!(config.policy.severity_cutoff, Severity::High);
        assert_eq!(config.policy.max_severity_score, 42.5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(load(&[("POLICY_MODE", "lenient")]).is_err());
        assert!(load(&[("SEVERITY_CUTOFF", "extreme")]).is_err());
        assert!(load(&[("MAX_SEVERITY_SCORE", "-1")]).is_err());
        assert!(load(&[("SCANNER_TIMEOUT_SECS", "-3")]).is_err());
        assert!(load(&[("WEBHOOK_PORT", "99999")]).is_err());
    }
}

mod report_tests {
    use kubescan_webhook::report::{ReportParseError, ScanReport, Severity};

    #[test]
    fn test_parse_kubescape_report() {
        let raw = br#"{
            "summaryDetails": {"score": 42.0},
            "controlReports": [
                {
                    "control": {"id": "C-0057", "name": "Privileged container", "severity": "Critical"},
                    "summary": {"totalResourcesCount": 1, "failedResourcesCount": 1,
                                "excludedResourcesCount": 0, "severityScore": 95}
                },
                {
                    "control": {"id": "C-0017", "name": "Immutable filesystem", "severity": "low"},
                    "summary": {"totalResourcesCount": 1, "failedResourcesCount": 0,
                                "excludedResourcesCount": 0, "severityScore": 3.5}
                }
            ]
        }"#;

        let report = ScanReport::from_slice(raw).unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report.findings()[0].severity, Severity::Critical);
        assert_eq!(report.findings()[1].severity, Severity::Low);
        assert_eq!(report.failing().count(), 1);
        assert_eq!(report.total_score(), 98.5);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(ScanReport::from_slice(b""), Err(ReportParseError::Empty)));
        assert!(matches!(
            ScanReport::from_slice(br#"{"controlReports": ["#),
            Err(ReportParseError::Truncated { .. })
        ));
        assert!(matches!(
            ScanReport::from_slice(b"]"),
            Err(ReportParseError::Malformed { .. })
        ));
        assert!(matches!(
            ScanReport::from_slice(br#"{"other": 1}"#),
            Err(ReportParseError::Schema(_))
        ));
    }
}

mod pipeline_tests {
    use kubescan_webhook::webhooks::{
        AdmissionEvent, AdmissionPhase, AdmissionPipeline, TransitionResult,
    };

    #[test]
    fn test_happy_path() {
        let mut pipeline = AdmissionPipeline::new();
        for event in [
            AdmissionEvent::EnvelopeDecoded,
            AdmissionEvent::ScanCompleted,
            AdmissionEvent::PolicyApplied,
            AdmissionEvent::ResponseEncoded,
        ] {
            assert!(matches!(
                pipeline.advance(event),
                TransitionResult::Success { .. }
            ));
        }
        assert_eq!(pipeline.phase(), AdmissionPhase::Responded);
        assert!(pipeline.phase().is_terminal());
    }

    #[test]
    fn test_no_decision_without_scan_or_skip() {
        assert!(!AdmissionPipeline::can_transition(
            AdmissionPhase::Decoded,
            AdmissionEvent::PolicyApplied
        ));
        assert!(!AdmissionPipeline::can_transition(
            AdmissionPhase::Received,
            AdmissionEvent::ResponseEncoded
        ));
    }
}

mod policy_tests {
    use kubescan_webhook::policy::{DecisionPolicy, FailureOutcome, PolicyConfig, PolicyMode};
    use kubescan_webhook::report::{ControlFinding, FindingSummary, ScanReport, Severity};

    fn finding(id: &str, severity: Severity, score: f64) -> ControlFinding {
        ControlFinding {
            id: id.to_string(),
            name: format!("Control {id}"),
            description: String::new(),
            remediation: String::new(),
            severity,
            summary: FindingSummary {
                total_resources: 1,
                failed_resources: 1,
                excluded_resources: 0,
                severity_score: score,
            },
        }
    }

    #[test]
    fn test_critical_finding_denied() {
        let policy = DecisionPolicy::default();
        let report = ScanReport::new(vec![finding("C-0057", Severity::Critical, 95.0)]);
        let decision = policy.evaluate(&report);
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("SeverityCutoffExceeded"));
    }

    #[test]
    fn test_empty_report_allowed() {
        let policy = DecisionPolicy::default();
        assert!(policy.evaluate(&ScanReport::default()).allowed);
    }

    #[test]
    fn test_failure_handling_by_mode() {
        let cause = "scanner timed out after 10s";
        for (mode, expected) in [
            (PolicyMode::Threshold, None),
            (PolicyMode::FailOpen, Some(true)),
            (PolicyMode::FailClosed, Some(false)),
        ] {
            let policy = DecisionPolicy::new(PolicyConfig {
                mode,
                ..Default::default()
            });
            let outcome = match policy.on_scan_failure(&cause) {
                FailureOutcome::Decide(decision) => Some(decision.allowed),
                FailureOutcome::Error => None,
            };
            assert_eq!(outcome, expected, "mode {mode}");
        }
    }
}
