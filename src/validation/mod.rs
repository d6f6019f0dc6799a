//! Validation Module
//!
//! Baseline-vs-mutated execution and the structural diff that decides
//! whether the pair constitutes an access-control finding.

pub mod baseline;
pub mod diff;

pub use baseline::{run_baseline_pair, BaselinePair};
pub use diff::{diff_responses, BaselineConfig, ComparisonMode, DiffReport};
