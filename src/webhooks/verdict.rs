//! Verdicts bound to the request they answer.

use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};

use crate::policy::Decision;

/// Maximum number of admission warnings attached to a response
pub const MAX_WARNINGS: usize = 10;

/// A decision tied to the decoded request it answers.
///
/// The UID is never stored separately: it is always read from the request,
/// so a verdict cannot carry a forged or missing UID.
#[derive(Debug)]
pub struct Verdict<'a> {
    request: &'a AdmissionRequest<DynamicObject>,
    decision: Decision,
}

impl<'a> Verdict<'a> {
    pub fn new(request: &'a AdmissionRequest<DynamicObject>, decision: Decision) -> Self {
        Self { request, decision }
    }

    pub fn uid(&self) -> &str {
        &self.request.uid
    }

    pub fn allowed(&self) -> bool {
        self.decision.allowed
    }

    pub fn decision(&self) -> &Decision {
        &self.decision
    }

    /// Wrap the decision in an `AdmissionReview` response envelope.
    ///
    /// kube-rs `deny()` only sets `status.message`, so the reason is embedded
    /// as `[reason] message`.
    pub fn into_review(self) -> AdmissionReview<DynamicObject> {
        let Decision {
            allowed,
            reason,
            message,
            mut warnings,
        } = self.decision;

        let mut response = AdmissionResponse::from(self.request);
        if !allowed {
            let reason = reason.unwrap_or_else(|| "Denied".to_string());
            let message = message.unwrap_or_else(|| "Denied by security scan".to_string());
            response = response.deny(format!("[{}] {}", reason, message));
        } else if let Some(message) = message {
            // Admitted with a caveat (fail-open); surface it to the client
            warnings.insert(0, message);
        }

        warnings.truncate(MAX_WARNINGS);
        if !warnings.is_empty() {
            response.warnings = Some(warnings);
        }

        response.into_review()
    }
}

/// Error envelope for a decoded request whose pipeline failed
pub fn error_review(
    request: &AdmissionRequest<DynamicObject>,
    reason: &str,
    message: &str,
) -> AdmissionReview<DynamicObject> {
    AdmissionResponse::from(request)
        .deny(format!("[{}] {}", reason, message))
        .into_review()
}
