//! Severity cutoff policy.
//!
//! Tier 1: denies when any counted control is at or above the configured
//! severity cutoff.

use super::{Decision, EvaluationContext, quote_findings};

/// Validate individual findings against the severity cutoff
pub fn validate(ctx: &EvaluationContext<'_>) -> Decision {
    let cutoff = ctx.config.severity_cutoff;
    let mut offending: Vec<_> = ctx
        .counted_findings()
        .filter(|f| f.severity >= cutoff)
        .collect();

    if offending.is_empty() {
        return Decision::allowed();
    }

    // Most severe first; stable sort keeps scanner order within a level
    offending.sort_by(|a, b| b.severity.cmp(&a.severity));

    Decision::denied(
        "SeverityCutoffExceeded",
        &format!(
            "{} control(s) at or above {} severity: {}",
            offending.len(),
            cutoff,
            quote_findings(offending)
        ),
    )
}
