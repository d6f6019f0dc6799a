//! Reporting Module
//!
//! Execution records, finding candidates, and the JSON report render
//! consumed by the external gate/suppression pipeline.

pub mod json;
pub mod model;
pub mod reporter;
pub mod text;

pub use model::{
    Classification, FindingCandidate, FindingKind, RequestSnapshot, ResponseSnapshot, RunReport,
    StepExecutionRecord,
};
pub use reporter::Reporter;
