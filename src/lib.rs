//! GAUNTLET — workflow execution engine for automated API security testing.
//!
//! Given a declarative sequence of HTTP request templates, the engine
//! generates variable-bound test iterations, executes them against a
//! target environment with session carryover, diffs authorized against
//! unauthorized executions to surface access-control vulnerabilities,
//! and probes race conditions by replaying or parallelizing steps.
//!
//! The engine owns no CLI, no HTTP route surface, and no persistence;
//! it consumes accounts, templates, and value pools from collaborators
//! and emits execution records and finding candidates back to them.

pub mod core;
pub mod exec;
pub mod http;
pub mod payload;
pub mod plan;
pub mod reporting;
pub mod session;
pub mod validation;
pub mod workflow;

pub use crate::core::{Account, ConfigError, Environment, RunConfig, RunContext, WorkflowEngine};
pub use crate::http::{Dispatch, HttpClient, HttpRequest, HttpResponse};
pub use crate::plan::Iteration;
pub use crate::reporting::{Classification, FindingCandidate, FindingKind, RunReport};
pub use crate::workflow::{MutationProfile, WorkflowDefinition};
