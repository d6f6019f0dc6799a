//! Plain-text render of a run report, for log sinks and operators.

use crate::reporting::model::{FindingKind, RunReport};
use std::fmt::Write;

pub fn render(report: &RunReport) -> String {
    let mut out = String::new();

    writeln!(&mut out, "GAUNTLET Run Report").unwrap();
    writeln!(&mut out, "===================").unwrap();
    writeln!(&mut out, "Run:        {}", report.run_id).unwrap();
    writeln!(&mut out, "Workflow:   {}", report.workflow_name).unwrap();
    writeln!(
        &mut out,
        "Iterations: {}/{} completed",
        report.iterations_completed, report.iterations_planned
    )
    .unwrap();
    writeln!(&mut out, "Errors:     {}", report.error_count).unwrap();
    writeln!(&mut out, "Records:    {}", report.records.len()).unwrap();

    if report.findings.is_empty() {
        writeln!(&mut out, "\nNo finding candidates emitted.").unwrap();
        return out;
    }

    writeln!(&mut out, "\nFinding candidates: {}", report.findings.len()).unwrap();
    for (idx, finding) in report.findings.iter().enumerate() {
        let kind = match finding.kind {
            FindingKind::UnexpectedSuccess => "unexpected success",
            FindingKind::BaselineDivergence => "baseline divergence",
            FindingKind::RaceEvidence => "race evidence",
        };
        writeln!(
            &mut out,
            "  #{} [{}] iteration {} step {} ({}): {}",
            idx + 1,
            kind,
            finding.iteration_id,
            finding.step_order,
            finding.step_name,
            finding.evidence
        )
        .unwrap();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::model::FindingCandidate;

    #[test]
    fn renders_summary_and_findings() {
        let report = RunReport {
            run_id: "run-1".to_string(),
            workflow_name: "wf".to_string(),
            started_at: String::new(),
            completed_at: String::new(),
            iterations_planned: 3,
            iterations_completed: 3,
            error_count: 1,
            findings: vec![FindingCandidate {
                run_id: "run-1".to_string(),
                iteration_id: 2,
                step_order: 1,
                step_name: "read".to_string(),
                kind: FindingKind::BaselineDivergence,
                status: Some(200),
                evidence: "status 404 vs 200".to_string(),
            }],
            records: Vec::new(),
        };

        let text = render(&report);
        assert!(text.contains("3/3 completed"));
        assert!(text.contains("baseline divergence"));
        assert!(text.contains("status 404 vs 200"));
    }
}
