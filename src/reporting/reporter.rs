//! Collects the record stream and finding candidates of one run.

use crate::reporting::model::{FindingCandidate, StepExecutionRecord};

#[derive(Default)]
pub struct Reporter {
    records: Vec<StepExecutionRecord>,
    findings: Vec<FindingCandidate>,
    error_count: u64,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, record: StepExecutionRecord) {
        if record.classification.is_error() {
            self.error_count += 1;
        }
        self.records.push(record);
    }

    pub fn add_finding(&mut self, finding: FindingCandidate) {
        self.findings.push(finding);
    }

    pub fn records(&self) -> &[StepExecutionRecord] {
        &self.records
    }

    pub fn findings(&self) -> &[FindingCandidate] {
        &self.findings
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn into_parts(self) -> (Vec<StepExecutionRecord>, Vec<FindingCandidate>, u64) {
        (self.records, self.findings, self.error_count)
    }
}
