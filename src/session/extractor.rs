//! Extractor engine: derives named context variables from step responses.

use crate::http::response::HttpResponse;
use crate::session::context::{value_to_string, SessionContext};
use crate::session::template::lookup_path;
use crate::workflow::variables::{VariableType, WritePolicy};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Where an extractor reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorSource {
    ResponseBodyJsonpath,
    ResponseBodyRegex,
    ResponseHeader,
    ResponseStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Trim,
    Lower,
    Upper,
    Prefix(String),
    Suffix(String),
}

impl Transform {
    pub fn apply(&self, value: String) -> String {
        match self {
            Transform::Trim => value.trim().to_string(),
            Transform::Lower => value.to_lowercase(),
            Transform::Upper => value.to_uppercase(),
            Transform::Prefix(p) => format!("{p}{value}"),
            Transform::Suffix(s) => format!("{value}{s}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorRule {
    pub step_order: u32,
    pub name: String,
    pub source: ExtractorSource,
    /// Json path, regex, or header name depending on `source`. Unused for
    /// response_status.
    pub expression: String,
    #[serde(default)]
    pub transform: Option<Transform>,
    #[serde(default)]
    pub required: bool,
    #[serde(default = "default_var_type")]
    pub var_type: VariableType,
    #[serde(default = "default_write_policy")]
    pub write_policy: WritePolicy,
}

fn default_var_type() -> VariableType {
    VariableType::Generic
}

fn default_write_policy() -> WritePolicy {
    WritePolicy::Overwrite
}

/// A rule that produced no value.
#[derive(Debug, Clone)]
pub struct ExtractionFailure {
    pub rule_name: String,
    pub required: bool,
    pub reason: String,
}

/// Run every rule bound to `step_order` against the response, writing hits
/// into the context under each rule's write policy. `step_failed` is the
/// producing step's failure classification; `locked` variables are never
/// re-resolved. Returns the rules that did not match.
pub fn run_extractors(
    rules: &[ExtractorRule],
    step_order: u32,
    resp: &HttpResponse,
    ctx: &mut SessionContext,
    step_failed: bool,
    locked: &std::collections::BTreeSet<String>,
) -> Vec<ExtractionFailure> {
    let mut failures = Vec::new();

    for rule in rules.iter().filter(|r| r.step_order == step_order) {
        match evaluate(rule, resp) {
            Ok(value) => {
                let value = match &rule.transform {
                    Some(t) => t.apply(value),
                    None => value,
                };
                if locked.contains(&rule.name) {
                    tracing::debug!(variable = %rule.name, "locked variable, extractor write skipped");
                    continue;
                }
                ctx.write_variable(&rule.name, value, rule.var_type, rule.write_policy, step_failed);
            }
            Err(reason) => {
                tracing::debug!(rule = %rule.name, %reason, "extraction produced no value");
                failures.push(ExtractionFailure {
                    rule_name: rule.name.clone(),
                    required: rule.required,
                    reason,
                });
            }
        }
    }

    failures
}

fn evaluate(rule: &ExtractorRule, resp: &HttpResponse) -> Result<String, String> {
    match rule.source {
        ExtractorSource::ResponseBodyJsonpath => {
            let body = resp
                .body_json()
                .ok_or_else(|| "response body is not JSON".to_string())?;
            lookup_path(&body, &rule.expression)
                .map(value_to_string)
                .ok_or_else(|| format!("path `{}` not found", rule.expression))
        }
        ExtractorSource::ResponseBodyRegex => {
            let re = Regex::new(&rule.expression)
                .map_err(|e| format!("invalid regex `{}`: {e}", rule.expression))?;
            let body = resp.body_text();
            let caps = re
                .captures(&body)
                .ok_or_else(|| format!("regex `{}` did not match", rule.expression))?;
            // First capture group when present, whole match otherwise.
            let m = caps.get(1).or_else(|| caps.get(0));
            m.map(|m| m.as_str().to_string())
                .ok_or_else(|| "empty match".to_string())
        }
        ExtractorSource::ResponseHeader => resp
            .header(&rule.expression)
            .map(str::to_string)
            .ok_or_else(|| format!("header `{}` absent", rule.expression)),
        ExtractorSource::ResponseStatus => Ok(resp.status.to_string()),
    }
}
