//! Variable configuration: where a value comes from, which role it plays
//! under the anchor-attacker strategy, and how repeated writes are applied.

use serde::{Deserialize, Serialize};

/// Origin of a variable's value pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Named list of tester-provided values.
    Checklist,
    /// A field on an account record (e.g. user id, auth token).
    AccountField,
    /// Payload list from a security rule.
    SecurityRule,
    /// Produced at run time by an extractor on an earlier step.
    WorkflowContext,
}

/// Role of a variable under the anchor-attacker binding strategy.
/// Ignored by the other strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableRole {
    Attacker,
    Target,
    Neutral,
}

/// Semantic type of a resolved variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    /// Who the caller is (session token, user id).
    Identity,
    /// One-time-use token (CSRF token, nonce). Subject to reuse_tickets.
    FlowTicket,
    /// Identifier of a server-side object.
    ObjectId,
    Generic,
}

/// How the session context applies repeated writes to the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Keep the earliest written value.
    First,
    /// Always take the latest value.
    Overwrite,
    /// Update only when the producing step was classified non-failure.
    OnSuccessOnly,
}

/// Binds a variable into one step's request at a json-path-like address
/// (`body.order.id`, `query.user`, `headers.Authorization`, `path.2`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepVariableMapping {
    pub step_order: u32,
    pub json_path: String,
    /// Literal the template carried before the variable was bound.
    pub original_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableConfig {
    pub name: String,
    pub data_source: DataSource,
    pub role: VariableRole,
    pub var_type: VariableType,
    pub write_policy: WritePolicy,
    /// Account field to read when data_source is AccountField.
    /// Defaults to the variable name.
    pub account_field: Option<String>,
    pub mappings: Vec<StepVariableMapping>,
}

impl VariableConfig {
    /// Field name on the account record this variable reads from.
    pub fn field_name(&self) -> &str {
        self.account_field.as_deref().unwrap_or(&self.name)
    }

    /// Whether this variable binds into the given step.
    pub fn maps_to_step(&self, step_order: u32) -> bool {
        self.mappings.iter().any(|m| m.step_order == step_order)
    }
}
