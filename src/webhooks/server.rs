//! Admission webhook server.
//!
//! Provides the HTTP endpoint that the API server calls for every CREATE or
//! UPDATE matched by the ValidatingWebhookConfiguration.
//!
//! To enable the webhook:
//! 1. Deploy cert-manager for TLS certificates
//! 2. Create a ValidatingWebhookConfiguration pointing at `/validate`
//! 3. Mount the TLS certificate secret to the pod at /etc/webhook/certs/

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Bytes,
    extract::{Query, State, rejection::QueryRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::WebhookConfig;
use crate::health::HealthState;
use crate::policy::{Decision, DecisionPolicy, FailureOutcome};
use crate::report::{ControlFinding, ScanReport};
use crate::scanner::Scanner;
use crate::webhooks::error::AdmissionError;
use crate::webhooks::pipeline::{AdmissionEvent, AdmissionPipeline, TransitionResult};
use crate::webhooks::verdict::{MAX_WARNINGS, Verdict, error_review};

/// Path of the validating endpoint
pub const VALIDATE_PATH: &str = "/validate";
/// Alternate path for the same endpoint
pub const SCAN_PATH: &str = "/scan";
/// Time reserved for writing the response out of the caller's deadline
pub const DEADLINE_MARGIN: Duration = Duration::from_millis(500);

/// Shared state for webhook handlers
pub struct WebhookState {
    pub config: Arc<WebhookConfig>,
    pub policy: DecisionPolicy,
    scanner: Arc<dyn Scanner>,
    health: Option<Arc<HealthState>>,
}

impl WebhookState {
    pub fn new(config: Arc<WebhookConfig>, scanner: Arc<dyn Scanner>) -> Self {
        let policy = DecisionPolicy::new(config.policy.clone());
        Self {
            config,
            policy,
            scanner,
            health: None,
        }
    }

    /// Record metrics into the given health state
    pub fn with_health_state(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    /// Apply the failure policy to a scan that could not be completed
    fn recover(
        &self,
        pipeline: &mut AdmissionPipeline,
        uid: &str,
        err: AdmissionError,
    ) -> Result<Decision, AdmissionError> {
        // Only scanner and report failures are subject to the failure policy
        if !err.is_scan_failure() {
            return Err(err);
        }

        error!(uid, kind = err.kind(), error = %err, "Security scan could not be completed");
        if let Some(health) = &self.health {
            health.metrics.record_scan_failure(err.kind());
        }

        match self.policy.on_scan_failure(&err) {
            FailureOutcome::Decide(decision) => {
                transition(pipeline, AdmissionEvent::ScanFailureRecovered, uid);
                if decision.allowed {
                    warn!(uid, "Admitting request without a completed scan (fail-open)");
                }
                Ok(decision)
            }
            FailureOutcome::Error => Err(err),
        }
    }
}

/// Query parameters the API server appends to the webhook URL
#[derive(Debug, Default, Deserialize)]
pub struct AdmissionQuery {
    /// Caller deadline as a Go duration, e.g. `10s`
    pub timeout: Option<String>,
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate))
        .route(SCAN_PATH, post(validate))
        .with_state(state)
}

/// Validating admission handler
async fn validate(
    State(state): State<Arc<WebhookState>>,
    query: Result<Query<AdmissionQuery>, QueryRejection>,
    body: Bytes,
) -> Response {
    let mut pipeline = AdmissionPipeline::new();

    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            warn!(error = %rejection, "Ignoring unparseable query string");
            AdmissionQuery::default()
        }
    };

    let request = match decode_request(&body) {
        Ok(request) => request,
        Err(err) => {
            error!(error = %err, "Failed to extract admission request");
            transition(&mut pipeline, AdmissionEvent::Failed, "");
            let review = AdmissionResponse::invalid(err.to_string()).into_review();
            return write_review(err.status_code(), &review);
        }
    };
    transition(&mut pipeline, AdmissionEvent::EnvelopeDecoded, &request.uid);

    let uid = request.uid.as_str();
    debug!(
        uid,
        operation = ?request.operation,
        kind = %request.kind.kind,
        namespace = ?request.namespace,
        name = %request.name,
        dry_run = request.dry_run,
        "Processing admission request"
    );

    let timeout = scan_timeout(state.config.scanner.timeout, query.timeout.as_deref());

    let decision = match evaluate(&state, &mut pipeline, &request, timeout).await {
        Ok(decision) => decision,
        Err(err) => {
            error!(uid, error = %err, "Admission request failed");
            transition(&mut pipeline, AdmissionEvent::Failed, uid);
            let review = error_review(&request, "ScanError", &err.to_string());
            return write_review(err.status_code(), &review);
        }
    };

    let verdict = Verdict::new(&request, decision);
    if verdict.allowed() {
        info!(uid, "Admission request allowed");
    } else {
        let decision = verdict.decision();
        warn!(
            uid,
            reason = decision.reason.as_deref().unwrap_or_default(),
            message = decision.message.as_deref().unwrap_or_default(),
            "Admission request denied"
        );
    }
    if let Some(health) = &state.health {
        health
            .metrics
            .record_admission(&operation_name(&request.operation), verdict.allowed());
    }

    match serde_json::to_vec(&verdict.into_review()) {
        Ok(body) => {
            transition(&mut pipeline, AdmissionEvent::ResponseEncoded, uid);
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        }
        Err(e) => {
            let err = AdmissionError::Encode(e);
            error!(uid, error = %err, "Failed to encode admission response");
            transition(&mut pipeline, AdmissionEvent::Failed, uid);
            (err.status_code(), err.to_string()).into_response()
        }
    }
}

/// Decode the AdmissionReview envelope and extract its request
fn decode_request(body: &[u8]) -> Result<AdmissionRequest<DynamicObject>, AdmissionError> {
    let review: AdmissionReview<DynamicObject> =
        serde_json::from_slice(body).map_err(|e| AdmissionError::Decode(e.to_string()))?;
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => return Err(AdmissionError::Decode(e.to_string())),
    };
    Ok(request)
}

/// Run the scan and policy for a decoded request
async fn evaluate(
    state: &WebhookState,
    pipeline: &mut AdmissionPipeline,
    request: &AdmissionRequest<DynamicObject>,
    timeout: Duration,
) -> Result<Decision, AdmissionError> {
    let uid = request.uid.as_str();

    // DELETE and CONNECT carry no new object to scan
    if matches!(request.operation, Operation::Delete | Operation::Connect) {
        transition(pipeline, AdmissionEvent::ScanSkipped, uid);
        return Ok(Decision::allowed());
    }

    let object = match &request.object {
        Some(object) => object,
        None => {
            transition(pipeline, AdmissionEvent::ScanSkipped, uid);
            return Ok(Decision::denied("InvalidRequest", "Missing object in request"));
        }
    };

    let manifest = serde_json::to_vec(object)
        .map_err(|e| AdmissionError::Decode(format!("cannot serialize object: {}", e)))?;

    let output = match state.scanner.scan(&manifest, timeout).await {
        Ok(output) => output,
        Err(e) => return state.recover(pipeline, uid, e.into()),
    };
    transition(pipeline, AdmissionEvent::ScanCompleted, uid);

    if let Some(health) = &state.health {
        health
            .metrics
            .record_scan_duration(output.elapsed.as_secs_f64());
    }
    if !output.diagnostics.is_empty() {
        debug!(uid, diagnostics = %output.diagnostics_lossy(), "Scanner diagnostics");
    }

    let report = match ScanReport::from_slice(&output.report) {
        Ok(report) => report,
        Err(e) => return state.recover(pipeline, uid, e.into()),
    };

    for finding in report.failing() {
        info!(
            uid,
            control = %finding.id,
            name = %finding.name,
            severity = %finding.severity,
            score = finding.summary.severity_score,
            "Scan finding"
        );
    }
    info!(
        uid,
        controls = report.len(),
        failing = report.failing().count(),
        score = report.total_score(),
        elapsed_ms = output.elapsed.as_millis() as u64,
        "Scan completed"
    );

    let decision = state.policy.evaluate(&report);
    transition(pipeline, AdmissionEvent::PolicyApplied, uid);

    let warnings = report
        .failing()
        .take(MAX_WARNINGS)
        .map(ControlFinding::summary_line)
        .collect();
    Ok(decision.with_warnings(warnings))
}

/// Advance the pipeline, logging the transition
fn transition(pipeline: &mut AdmissionPipeline, event: AdmissionEvent, uid: &str) {
    match pipeline.advance(event) {
        TransitionResult::Success { from, to, .. } => {
            debug!(uid, %from, %to, %event, "Admission phase transition");
        }
        TransitionResult::InvalidTransition { current, event } => {
            error!(uid, %current, %event, "Invalid admission phase transition");
        }
    }
}

/// Serialize an error envelope, falling back to plain text
fn write_review(status: StatusCode, review: &AdmissionReview<DynamicObject>) -> Response {
    match serde_json::to_vec(review) {
        Ok(body) => (status, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            let err = AdmissionError::Encode(e);
            error!(error = %err, "Failed to encode error response");
            (err.status_code(), err.to_string()).into_response()
        }
    }
}

fn operation_name(operation: &Operation) -> String {
    format!("{:?}", operation).to_uppercase()
}

/// Scanner budget for one request.
///
/// The API server appends its own deadline as `?timeout=10s`; the scan must
/// finish early enough to leave room for the response.
pub fn scan_timeout(configured: Duration, caller_deadline: Option<&str>) -> Duration {
    let deadline = caller_deadline
        .and_then(parse_go_duration)
        .filter(|d| !d.is_zero());
    match deadline {
        Some(deadline) => {
            let budget = deadline
                .checked_sub(DEADLINE_MARGIN)
                .filter(|d| !d.is_zero())
                .unwrap_or(deadline);
            configured.min(budget)
        }
        None => configured,
    }
}

/// Parse a Go-style duration such as `10s`, `1m30s` or `1.5s`
pub fn parse_go_duration(raw: &str) -> Option<Duration> {
    let mut rest = raw.trim();
    if rest.is_empty() {
        return None;
    }

    let mut seconds = 0.0_f64;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return None;
        }
        let (number, tail) = rest.split_at(number_end);
        let value: f64 = number.parse().ok()?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_end);
        let scale = match unit {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" | "µs" => 1e-6,
            "ns" => 1e-9,
            _ => return None,
        };

        seconds += value * scale;
        rest = tail;
    }

    Duration::try_from_secs_f64(seconds).ok()
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Run the webhook server with TLS
///
/// Binds to `0.0.0.0:<webhook_port>` and serves the validating endpoint.
/// TLS certificates are loaded from the configured PEM paths.
pub async fn run_webhook_server(state: Arc<WebhookState>) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;

    // Both aws-lc-rs and ring may be compiled in; pick one explicitly
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let server = state.config.server.clone();
    let app = create_webhook_router(state);

    let config = RustlsConfig::from_pem_file(&server.cert_path, &server.key_path)
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], server.webhook_port));
    info!(port = server.webhook_port, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
