//! Iteration Planner Module
//!
//! Expands a workflow's variable configs and account-binding strategy into
//! the ordered list of concrete variable assignments ("iterations") a run
//! executes. All combinatorial work happens here, before the first request;
//! invalid configurations are rejected fail-fast.

pub mod iteration;
pub mod planner;

pub use iteration::Iteration;
pub use planner::plan_iterations;
