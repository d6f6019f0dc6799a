//! Fail-fast configuration errors. Anything in this taxonomy aborts a run
//! before the first request is sent; step-local failures are recorded on
//! execution records instead and never surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("workflow has no steps")]
    NoSteps,

    #[error("variable `{name}` maps to unknown step order {step_order}")]
    UnknownStep { name: String, step_order: u32 },

    #[error("variable `{name}` rejected: {reason}")]
    InvalidVariable { name: String, reason: String },

    #[error("variable `{0}` resolves to an empty value pool")]
    EmptyPool(String),

    #[error("anchor_attacker strategy requires attacker_account_id")]
    MissingAttackerAccount,

    #[error("attacker account `{0}` not found in the account set")]
    UnknownAttackerAccount(String),

    #[error("anchor_attacker strategy requires at least one non-attacker account")]
    NoVictimAccounts,

    #[error("iteration plan would produce {planned} iterations, cap is {cap}")]
    PlanTooLarge { planned: usize, cap: usize },

    #[error("mutation profile rejected: {0}")]
    InvalidMutation(String),

    #[error("invalid failure pattern `{pattern}`")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid environment base url `{0}`")]
    BadBaseUrl(String),
}
