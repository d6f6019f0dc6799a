//! Execution records and finding candidates handed to the external
//! gate/suppression pipeline. Records are immutable once written.

use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use serde::Serialize;
use std::collections::HashMap;

/// Verdict for one executed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Response did not match the template's failure patterns: candidate
    /// for the external scoring pipeline. Not an error.
    FindingCandidate,
    /// Response matched the failure patterns: the request was denied the
    /// way a secure target should deny it.
    NormalFailure,
    /// Network failure, timeout after retry, or unresolvable template.
    /// Never counted as a security finding.
    ExecutionError,
    /// A required extractor produced no value.
    ExtractionMissing,
    /// Concurrency-mode member exceeded its individual deadline.
    Timeout,
}

impl Classification {
    /// Errors counted into the iteration's error tally.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Classification::ExecutionError | Classification::ExtractionMissing | Classification::Timeout
        )
    }

    /// Failure from the session's point of view; drives on_success_only
    /// write policies.
    pub fn is_step_failure(self) -> bool {
        self != Classification::FindingCandidate
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl From<&HttpRequest> for RequestSnapshot {
    fn from(req: &HttpRequest) -> Self {
        Self {
            method: req.method.to_string(),
            url: req.url.to_string(),
            headers: req
                .headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
            body: req.body_text(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub body_len: usize,
    pub body_hash: String,
    pub elapsed_ms: u128,
}

impl From<&HttpResponse> for ResponseSnapshot {
    fn from(resp: &HttpResponse) -> Self {
        Self {
            status: resp.status,
            headers: resp.headers.clone(),
            body: resp.body_text(),
            body_len: resp.body_len,
            body_hash: resp.body_hash.clone(),
            elapsed_ms: resp.elapsed_ms,
        }
    }
}

/// One executed (or failed) step attempt. `attempt` 0 is the original
/// execution; repeats count up from 1. Concurrency-mode members carry
/// their member index and whether they were promoted to primary.
#[derive(Debug, Clone, Serialize)]
pub struct StepExecutionRecord {
    pub iteration_id: u64,
    pub step_order: u32,
    pub step_name: String,
    pub attempt: u32,
    pub member_index: Option<u32>,
    pub primary: bool,
    pub request: Option<RequestSnapshot>,
    pub response: Option<ResponseSnapshot>,
    pub error: Option<String>,
    pub duration_ms: u128,
    pub retries: u32,
    pub classification: Classification,
    pub started_at: String,
    pub completed_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// A response that should have been denied was not.
    UnexpectedSuccess,
    /// Baseline and mutated runs diverged under the configured rules.
    BaselineDivergence,
    /// More than one concurrency-mode member reported success.
    RaceEvidence,
}

/// Candidate finding for the external gate to score and persist.
#[derive(Debug, Clone, Serialize)]
pub struct FindingCandidate {
    pub run_id: String,
    pub iteration_id: u64,
    pub step_order: u32,
    pub step_name: String,
    pub kind: FindingKind,
    pub status: Option<u16>,
    pub evidence: String,
}

/// Full accounting of one run. Always produced, even when every step
/// failed: a run never terminates silently.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub workflow_name: String,
    pub started_at: String,
    pub completed_at: String,
    pub iterations_planned: usize,
    pub iterations_completed: usize,
    pub error_count: u64,
    pub findings: Vec<FindingCandidate>,
    pub records: Vec<StepExecutionRecord>,
}
