//! Run context: everything a workflow run consumes from its collaborators,
//! plus the engine's own tuning knobs. Immutable for the duration of a run.

use crate::core::scope::Environment;
use crate::payload::pools::ValuePools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Account record consumed from the external account store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Engine tuning knobs. Defaults are conservative: modest worker pool,
/// single retry backoff, bounded plan size.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_id: String,
    /// Bounded worker pool for iterations (spec: iterations are independent).
    pub workers: usize,
    /// Hard cap on planned iterations; exceeding it is a configuration error.
    pub max_iterations: usize,
    /// Per-request deadline outside the concurrency modes.
    pub request_timeout_ms: u64,
    /// Backoff before the single transient-error retry.
    pub retry_backoff_ms: u64,
    /// Outbound requests per second, 0 = unlimited.
    pub rate_limit: u32,
    /// Trace ring capacity; 0 disables the sink.
    pub trace_capacity: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_id: "run-0".to_string(),
            workers: 4,
            max_iterations: 5_000,
            request_timeout_ms: 30_000,
            retry_backoff_ms: 250,
            rate_limit: 0,
            trace_capacity: 256,
        }
    }
}

/// Everything a run reads: target environment, account set, value pools.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub environment: Environment,
    pub accounts: Vec<Account>,
    pub pools: ValuePools,
    pub config: RunConfig,
}

impl RunContext {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            accounts: Vec::new(),
            pools: ValuePools::new(),
            config: RunConfig::default(),
        }
    }

    pub fn account(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }
}
