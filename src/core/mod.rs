//! Core Module
//!
//! Engine orchestration and run-wide services: fail-fast configuration
//! errors, the target environment and scope allowlist, rate limiting,
//! the bounded debug trace sink, and the run context consumed from
//! external collaborators.

pub mod context;
pub mod engine;
pub mod error;
pub mod rate_limit;
pub mod scope;
pub mod trace;

pub use context::{Account, RunConfig, RunContext};
pub use engine::WorkflowEngine;
pub use error::ConfigError;
pub use rate_limit::RateLimiter;
pub use scope::Environment;
pub use trace::{TraceBuffer, TraceEntry};
