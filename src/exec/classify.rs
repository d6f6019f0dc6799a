//! Failure-pattern classification: decides whether a response was denied
//! the way a secure target denies it, or is a finding candidate.

use crate::http::response::HttpResponse;
use crate::reporting::model::Classification;
use crate::workflow::definition::{FailureLogic, RequestTemplate};

/// Classify a received response against the template's failure patterns.
/// With no patterns configured the HTTP status class decides: non-2xx is
/// a normal failure, 2xx is a candidate.
pub fn classify_response(resp: &HttpResponse, template: &RequestTemplate) -> Classification {
    if template.failure_patterns.is_empty() {
        return if resp.is_success() {
            Classification::FindingCandidate
        } else {
            Classification::NormalFailure
        };
    }

    let denied = match template.failure_logic {
        FailureLogic::Or => template.failure_patterns.iter().any(|p| p.is_match(resp)),
        FailureLogic::And => template.failure_patterns.iter().all(|p| p.is_match(resp)),
    };

    if denied {
        Classification::NormalFailure
    } else {
        Classification::FindingCandidate
    }
}
