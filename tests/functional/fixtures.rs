//! Builders for AdmissionReview envelopes, scan reports and routers.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use kubescan_webhook::config::WebhookConfig;
use kubescan_webhook::health::HealthState;
use kubescan_webhook::policy::PolicyMode;
use kubescan_webhook::scanner::Scanner;
use kubescan_webhook::webhooks::{VALIDATE_PATH, WebhookState, create_webhook_router};

/// Annotation read by [`crate::AnnotationScanner`] for the finding severity
pub const SEVERITY_ANNOTATION: &str = "scan.test/severity";
/// Annotation read by [`crate::AnnotationScanner`] for the finding score
pub const SCORE_ANNOTATION: &str = "scan.test/score";
/// Annotation read by [`crate::AnnotationScanner`] for an artificial delay
pub const DELAY_ANNOTATION: &str = "scan.test/delay-ms";

/// Builder for an `admission.k8s.io/v1` AdmissionReview request body.
#[derive(Debug, Clone)]
pub struct ReviewBuilder {
    uid: String,
    operation: String,
    name: String,
    namespace: String,
    annotations: Vec<(String, String)>,
    include_object: bool,
}

impl ReviewBuilder {
    /// A CREATE of a Pod in the default namespace.
    pub fn pod(uid: &str) -> Self {
        Self {
            uid: uid.to_string(),
            operation: "CREATE".to_string(),
            name: "web".to_string(),
            namespace: "default".to_string(),
            annotations: Vec::new(),
            include_object: true,
        }
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.operation = operation.to_string();
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.push((key.to_string(), value.to_string()));
        self
    }

    /// Drop `request.object`, as for a DELETE
    pub fn without_object(mut self) -> Self {
        self.include_object = false;
        self
    }

    pub fn to_value(&self) -> Value {
        let annotations: serde_json::Map<String, Value> = self
            .annotations
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let object = if self.include_object {
            json!({
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {
                    "name": self.name,
                    "namespace": self.namespace,
                    "annotations": annotations,
                },
                "spec": {
                    "containers": [{"name": "app", "image": "nginx:1.27"}]
                }
            })
        } else {
            Value::Null
        };

        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": self.uid,
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "name": self.name,
                "namespace": self.namespace,
                "operation": self.operation,
                "userInfo": {"username": "system:serviceaccount:default:deployer"},
                "object": object,
                "oldObject": null,
                "dryRun": false
            }
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.to_value()).unwrap()
    }
}

/// One control entry of a kubescape-style report.
#[derive(Debug, Clone)]
pub struct ControlSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub severity: &'static str,
    pub failed: u64,
    pub score: f64,
}

/// A failing control with one failed resource.
pub fn failing(id: &'static str, severity: &'static str, score: f64) -> ControlSpec {
    ControlSpec {
        id,
        name: "Test control",
        severity,
        failed: 1,
        score,
    }
}

/// A control that passed for every resource.
pub fn passing(id: &'static str, severity: &'static str, score: f64) -> ControlSpec {
    ControlSpec {
        failed: 0,
        ..failing(id, severity, score)
    }
}

/// Render controls as kubescape JSON output.
pub fn report_json(controls: &[ControlSpec]) -> Vec<u8> {
    let reports: Vec<Value> = controls
        .iter()
        .map(|c| {
            json!({
                "control": {
                    "id": c.id,
                    "name": c.name,
                    "description": "Checks something important",
                    "remediation": "Fix the manifest",
                    "severity": c.severity,
                },
                "summary": {
                    "totalResourcesCount": 1,
                    "failedResourcesCount": c.failed,
                    "excludedResourcesCount": 0,
                    "severityScore": c.score,
                }
            })
        })
        .collect();
    serde_json::to_vec(&json!({ "controlReports": reports })).unwrap()
}

/// Default configuration with the given policy mode.
pub fn config_with_mode(mode: PolicyMode) -> WebhookConfig {
    let mut config = WebhookConfig::default();
    config.policy.mode = mode;
    config
}

/// Router backed by the given scanner.
pub fn router(config: WebhookConfig, scanner: Arc<dyn Scanner>) -> Router {
    create_webhook_router(Arc::new(WebhookState::new(Arc::new(config), scanner)))
}

/// Router that also records metrics into the returned health state.
pub fn router_with_health(
    config: WebhookConfig,
    scanner: Arc<dyn Scanner>,
) -> (Router, Arc<HealthState>) {
    let health = Arc::new(HealthState::new());
    let state = WebhookState::new(Arc::new(config), scanner).with_health_state(health.clone());
    (create_webhook_router(Arc::new(state)), health)
}

/// POST a raw body to the given path and decode the JSON reply.
pub async fn post_raw(router: Router, uri: &str, body: Vec<u8>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// POST a review to `/validate`.
pub async fn post_review(router: Router, review: &ReviewBuilder) -> (StatusCode, Value) {
    post_raw(router, VALIDATE_PATH, review.to_bytes()).await
}

/// `response.status.message` of a reply, or empty
pub fn status_message(reply: &Value) -> &str {
    reply["response"]["status"]["message"]
        .as_str()
        .unwrap_or_default()
}

/// `response.warnings` of a reply, or empty
pub fn warnings(reply: &Value) -> Vec<String> {
    reply["response"]["warnings"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|w| w.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
