//! Workflow and step definitions.

use crate::core::error::ConfigError;
use crate::http::response::HttpResponse;
use crate::session::extractor::ExtractorRule;
use crate::validation::diff::BaselineConfig;
use crate::workflow::variables::{DataSource, VariableConfig, VariableRole};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How account identities are bound to iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountBindingStrategy {
    /// Every variable iterates its full pool independently.
    Independent,
    /// One iteration per account; all account-field variables come from
    /// that single account.
    PerAccount,
    /// Attacker identity fixed, target identity rotates over the other
    /// accounts. The IDOR-testing strategy.
    AnchorAttacker,
}

/// How multiple failure patterns combine into a failure verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureLogic {
    /// Any pattern match means the request was denied as expected.
    Or,
    /// Every pattern must match for the request to count as denied.
    And,
}

/// What a failure pattern is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternTarget {
    Body,
    Status,
    Header(String),
}

/// A regex that recognizes a denied / normally-failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    pub pattern: String,
    pub target: PatternTarget,
}

impl FailurePattern {
    pub fn body(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            target: PatternTarget::Body,
        }
    }

    pub fn status(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            target: PatternTarget::Status,
        }
    }

    pub fn compile(&self) -> Result<Regex, ConfigError> {
        Regex::new(&self.pattern).map_err(|source| ConfigError::BadPattern {
            pattern: self.pattern.clone(),
            source,
        })
    }

    /// Whether this pattern matches the response. Invalid patterns are
    /// rejected at validation time; a pattern that fails to compile here
    /// is treated as non-matching.
    pub fn is_match(&self, resp: &HttpResponse) -> bool {
        let re = match self.compile() {
            Ok(re) => re,
            Err(_) => return false,
        };
        match &self.target {
            PatternTarget::Body => re.is_match(&resp.body_text()),
            PatternTarget::Status => re.is_match(&resp.status.to_string()),
            PatternTarget::Header(key) => resp
                .header(key)
                .map(|v| re.is_match(v))
                .unwrap_or(false),
        }
    }
}

/// Immutable request template for one step. String positions may carry
/// `{{name}}` placeholders resolved at execution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestTemplate {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub failure_patterns: Vec<FailurePattern>,
    #[serde(default = "default_failure_logic")]
    pub failure_logic: FailureLogic,
}

fn default_failure_logic() -> FailureLogic {
    FailureLogic::Or
}

impl RequestTemplate {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            failure_patterns: Vec::new(),
            failure_logic: FailureLogic::Or,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub order: u32,
    pub name: String,
    pub template: RequestTemplate,
}

/// Session-jar carryover configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionJarConfig {
    /// Merge Set-Cookie values from every response into the jar.
    #[serde(default)]
    pub cookie_mode: bool,
    /// Response body paths captured after each step, keyed by path.
    #[serde(default)]
    pub body_json_paths: Vec<String>,
    /// Response headers captured after each step.
    #[serde(default)]
    pub header_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub steps: Vec<StepDefinition>,
    pub account_binding_strategy: AccountBindingStrategy,
    #[serde(default)]
    pub attacker_account_id: Option<String>,
    #[serde(default)]
    pub enable_baseline: bool,
    #[serde(default)]
    pub baseline_config: Option<BaselineConfig>,
    #[serde(default)]
    pub enable_extractor: bool,
    #[serde(default)]
    pub extractor_rules: Vec<ExtractorRule>,
    #[serde(default)]
    pub enable_session_jar: bool,
    #[serde(default)]
    pub session_jar_config: SessionJarConfig,
    #[serde(default)]
    pub variable_configs: Vec<VariableConfig>,
}

impl WorkflowDefinition {
    pub fn step(&self, order: u32) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.order == order)
    }

    /// Steps in execution order.
    pub fn ordered_steps(&self) -> Vec<&StepDefinition> {
        let mut steps: Vec<&StepDefinition> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    /// Fail-fast validation run before any request is sent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps.is_empty() {
            return Err(ConfigError::NoSteps);
        }

        for var in &self.variable_configs {
            for mapping in &var.mappings {
                if self.step(mapping.step_order).is_none() {
                    return Err(ConfigError::UnknownStep {
                        name: var.name.clone(),
                        step_order: mapping.step_order,
                    });
                }
            }

            // Under anchor_attacker the attacker/target roles only make
            // sense for account-sourced variables.
            if self.account_binding_strategy == AccountBindingStrategy::AnchorAttacker
                && var.role != VariableRole::Neutral
                && var.data_source != DataSource::AccountField
            {
                return Err(ConfigError::InvalidVariable {
                    name: var.name.clone(),
                    reason: format!(
                        "role {:?} requires data_source account_field under anchor_attacker",
                        var.role
                    ),
                });
            }
        }

        if self.account_binding_strategy == AccountBindingStrategy::AnchorAttacker
            && self.attacker_account_id.is_none()
        {
            return Err(ConfigError::MissingAttackerAccount);
        }

        for step in &self.steps {
            for pattern in &step.template.failure_patterns {
                pattern.compile()?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::variables::{StepVariableMapping, VariableType, WritePolicy};

    fn workflow_with_mapping(step_order: u32) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "wf".to_string(),
            steps: vec![StepDefinition {
                order: 1,
                name: "get".to_string(),
                template: RequestTemplate::new("GET", "/orders"),
            }],
            account_binding_strategy: AccountBindingStrategy::Independent,
            attacker_account_id: None,
            enable_baseline: false,
            baseline_config: None,
            enable_extractor: false,
            extractor_rules: Vec::new(),
            enable_session_jar: false,
            session_jar_config: SessionJarConfig::default(),
            variable_configs: vec![VariableConfig {
                name: "order_id".to_string(),
                data_source: DataSource::Checklist,
                role: VariableRole::Neutral,
                var_type: VariableType::ObjectId,
                write_policy: WritePolicy::Overwrite,
                account_field: None,
                mappings: vec![StepVariableMapping {
                    step_order,
                    json_path: "query.id".to_string(),
                    original_value: None,
                }],
            }],
        }
    }

    #[test]
    fn mapping_to_existing_step_is_valid() {
        assert!(workflow_with_mapping(1).validate().is_ok());
    }

    #[test]
    fn mapping_to_unknown_step_is_rejected() {
        let err = workflow_with_mapping(7).validate().unwrap_err();
        match err {
            ConfigError::UnknownStep { step_order, .. } => assert_eq!(step_order, 7),
            other => panic!("expected UnknownStep, got {other:?}"),
        }
    }

    #[test]
    fn anchor_attacker_without_attacker_account_is_rejected() {
        let mut wf = workflow_with_mapping(1);
        wf.account_binding_strategy = AccountBindingStrategy::AnchorAttacker;
        let err = wf.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingAttackerAccount));
    }

    #[test]
    fn target_role_requires_account_source_under_anchor_attacker() {
        let mut wf = workflow_with_mapping(1);
        wf.account_binding_strategy = AccountBindingStrategy::AnchorAttacker;
        wf.attacker_account_id = Some("a1".to_string());
        wf.variable_configs[0].role = VariableRole::Target;
        let err = wf.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVariable { .. }));
    }

    #[test]
    fn failure_pattern_matches_status_and_body() {
        let resp = HttpResponse::for_test(403, b"{\"error\":\"forbidden\"}");
        assert!(FailurePattern::status("^40[13]$").is_match(&resp));
        assert!(FailurePattern::body("forbidden").is_match(&resp));
        assert!(!FailurePattern::body("welcome").is_match(&resp));
    }
}
