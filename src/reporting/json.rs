//! JSON render of a run report for external consumers.

use crate::reporting::model::{FindingKind, RunReport};
use serde::Serialize;

#[derive(Serialize)]
struct Report<'a> {
    run_metadata: RunMetadata,
    summary: Summary,
    #[serde(flatten)]
    report: &'a RunReport,
}

#[derive(Serialize)]
struct RunMetadata {
    tool: String,
    version: String,
    generated_at: String,
    report_format: String,
}

#[derive(Serialize)]
struct Summary {
    total_findings: usize,
    unexpected_success: usize,
    baseline_divergence: usize,
    race_evidence: usize,
    records: usize,
    errors: u64,
}

pub fn render(report: &RunReport) -> anyhow::Result<String> {
    let count = |kind: FindingKind| report.findings.iter().filter(|f| f.kind == kind).count();

    let summary = Summary {
        total_findings: report.findings.len(),
        unexpected_success: count(FindingKind::UnexpectedSuccess),
        baseline_divergence: count(FindingKind::BaselineDivergence),
        race_evidence: count(FindingKind::RaceEvidence),
        records: report.records.len(),
        errors: report.error_count,
    };

    let wrapped = Report {
        run_metadata: RunMetadata {
            tool: "GAUNTLET".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: chrono::Utc::now().to_rfc3339(),
            report_format: "application/json".to_string(),
        },
        summary,
        report,
    };

    Ok(serde_json::to_string_pretty(&wrapped)?)
}
