//! Scanner failures and unusable reports under each policy mode.

use std::sync::Arc;

use axum::http::StatusCode;

use kubescan_webhook::policy::PolicyMode;
use kubescan_webhook::scanner::Scanner;

use crate::fixtures::*;
use crate::mock_scanner::{Failure, FailingScanner, StaticScanner};

async fn run(mode: PolicyMode, scanner: Arc<dyn Scanner>, uid: &str) -> (StatusCode, serde_json::Value) {
    post_review(router(config_with_mode(mode), scanner), &ReviewBuilder::pod(uid)).await
}

#[tokio::test]
async fn test_fail_closed_denies_on_timeout() {
    let scanner = Arc::new(FailingScanner::new(Failure::Timeout));
    let (status, reply) = run(PolicyMode::FailClosed, scanner, "closed-1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["response"]["uid"], "closed-1");
    assert_eq!(reply["response"]["allowed"], false);
    let message = status_message(&reply);
    assert!(message.starts_with("[ScanFailed]"), "{message}");
    assert!(message.contains("timed out"), "{message}");
}

#[tokio::test]
async fn test_fail_open_allows_on_timeout_with_warning() {
    let scanner = Arc::new(FailingScanner::new(Failure::Timeout));
    let (status, reply) = run(PolicyMode::FailOpen, scanner, "open-1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["response"]["uid"], "open-1");
    assert_eq!(reply["response"]["allowed"], true);
    let warnings = warnings(&reply);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("without a security scan"), "{:?}", warnings);
}

#[tokio::test]
async fn test_threshold_mode_reports_server_error() {
    let scanner = Arc::new(FailingScanner::new(Failure::NonZeroExit));
    let (status, reply) = run(PolicyMode::Threshold, scanner, "threshold-1").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply["response"]["uid"], "threshold-1");
    assert_eq!(reply["response"]["allowed"], false);
    let message = status_message(&reply);
    assert!(message.starts_with("[ScanError]"), "{message}");
    assert!(message.contains("failed to load policies"), "{message}");
}

#[tokio::test]
async fn test_missing_scanner_binary_follows_failure_policy() {
    let scanner = Arc::new(FailingScanner::new(Failure::Spawn));
    let (_, reply) = run(PolicyMode::FailClosed, scanner, "spawn-1").await;
    assert_eq!(reply["response"]["allowed"], false);
    assert!(status_message(&reply).contains("failed to spawn scanner"));

    let scanner = Arc::new(FailingScanner::new(Failure::Spawn));
    let (_, reply) = run(PolicyMode::FailOpen, scanner, "spawn-2").await;
    assert_eq!(reply["response"]["allowed"], true);
}

#[tokio::test]
async fn test_malformed_reports_are_scan_failures() {
    let outputs: [&[u8]; 5] = [
        b"",
        b"   \n",
        br#"{"controlReports": [{"control": {"id": "C-0057""#,
        b"Error: cluster unreachable",
        br#"{"results": []}"#,
    ];

    for output in outputs {
        let label = String::from_utf8_lossy(output).to_string();

        let scanner = Arc::new(StaticScanner::new(output.to_vec()));
        let (status, reply) = run(PolicyMode::FailClosed, scanner, "bad-1").await;
        assert_eq!(status, StatusCode::OK, "{label}");
        assert_eq!(reply["response"]["allowed"], false, "{label}");
        assert!(status_message(&reply).starts_with("[ScanFailed]"), "{label}");

        let scanner = Arc::new(StaticScanner::new(output.to_vec()));
        let (_, reply) = run(PolicyMode::FailOpen, scanner, "bad-2").await;
        assert_eq!(reply["response"]["allowed"], true, "{label}");

        let scanner = Arc::new(StaticScanner::new(output.to_vec()));
        let (status, _) = run(PolicyMode::Threshold, scanner, "bad-3").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{label}");
    }
}

#[tokio::test]
async fn test_unknown_severity_is_a_scan_failure() {
    let scanner = Arc::new(StaticScanner::with_controls(&[failing(
        "C-0057", "Catastrophic", 95.0,
    )]));
    let (_, reply) = run(PolicyMode::FailClosed, scanner, "sev-1").await;

    assert_eq!(reply["response"]["allowed"], false);
    assert!(status_message(&reply).contains("control.severity"));
}

#[tokio::test]
async fn test_failures_are_recorded_in_metrics() {
    let scanner = Arc::new(FailingScanner::new(Failure::Timeout));
    let (app, health) = router_with_health(config_with_mode(PolicyMode::FailClosed), scanner);

    post_review(app, &ReviewBuilder::pod("metrics-2")).await;

    let metrics = health.metrics.encode();
    assert!(
        metrics.contains(r#"kubescan_scan_failures_total{kind="timeout"} 1"#),
        "{metrics}"
    );
    assert!(
        metrics.contains(r#"kubescan_admissions_total{operation="CREATE",allowed="false"} 1"#),
        "{metrics}"
    );
}
