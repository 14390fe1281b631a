//! Aggregate severity score policy.
//!
//! Tier 2: denies when the summed severity score of the counted controls is
//! at or above the configured maximum.

use super::{Decision, EvaluationContext, quote_findings};
use crate::report::format_score;

/// Validate the aggregate severity score
pub fn validate(ctx: &EvaluationContext<'_>) -> Decision {
    let max = ctx.config.max_severity_score;
    let score = ctx.aggregate_score();

    if score < max {
        return Decision::allowed();
    }

    let mut contributors: Vec<_> = ctx
        .counted_findings()
        .filter(|f| f.summary.severity_score > 0.0)
        .collect();
    contributors.sort_by(|a, b| b.summary.severity_score.total_cmp(&a.summary.severity_score));

    let mut message = format!(
        "Aggregate severity score {} is at or above the maximum of {}",
        format_score(score),
        format_score(max)
    );
    if !contributors.is_empty() {
        message.push_str(&format!("; top contributors: {}", quote_findings(contributors)));
    }

    Decision::denied("SeverityScoreExceeded", &message)
}
