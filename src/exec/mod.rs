//! Execution Module
//!
//! Runs one iteration through the step sequence: per-step template
//! resolution, dispatch with retry, failure-pattern classification, and
//! the two concurrency-testing modes (concurrent replay, parallel groups).

pub mod classify;
pub mod concurrency;
pub mod sequencer;

pub use classify::classify_response;
pub use concurrency::{pick_primary, run_members, MemberOutcome};
pub use sequencer::{IterationOutcome, StepSequencer};
