//! Plain-text batch summary.

use super::coordinator::BatchReport;
use super::outcome::Outcome;
use std::fmt::Write;

/// Line for the outcome received at position `n`, counting from zero.
pub fn outcome_line(n: usize, outcome: &Outcome) -> String {
    let verdict = if outcome.succeeded() {
        "succeeded"
    } else {
        "failed"
    };
    format!(
        "TASK: {} --> Clone vm {} {} !",
        n, outcome.identity, verdict
    )
}

/// Every outcome in receipt order with its detail, then the totals.
pub fn render(report: &BatchReport) -> String {
    let mut out = String::new();
    for (i, outcome) in report.outcomes.iter().enumerate() {
        let _ = writeln!(out, "{}", outcome_line(i, outcome));
        let _ = writeln!(out, "    {} ({} ms)", outcome.detail, outcome.duration_ms);
    }
    let _ = writeln!(
        out,
        "batch {}: {} succeeded, {} failed{}",
        report.batch_id,
        report.succeeded(),
        report.failed(),
        if report.aborted { ", abort signalled" } else { "" }
    );
    out
}
