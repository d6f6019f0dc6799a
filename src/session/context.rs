//! Iteration-scoped session state: the cookie/header/body-path jar plus
//! named context variables with per-variable write policies.

use crate::http::response::HttpResponse;
use crate::session::template::lookup_path;
use crate::workflow::definition::SessionJarConfig;
use crate::workflow::variables::{VariableType, WritePolicy};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ContextVariable {
    pub value: String,
    pub var_type: VariableType,
    pub write_policy: WritePolicy,
}

/// Created empty at iteration start, mutated after each step, discarded at
/// iteration end. Never shared across iterations.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    cookies: HashMap<String, String>,
    carried_headers: HashMap<String, String>,
    carried_body_values: HashMap<String, String>,
    context_variables: HashMap<String, ContextVariable>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a context variable under its policy. `step_failed` reflects the
    /// producing step's classification.
    pub fn write_variable(
        &mut self,
        name: &str,
        value: String,
        var_type: VariableType,
        write_policy: WritePolicy,
        step_failed: bool,
    ) {
        match write_policy {
            WritePolicy::First => {
                if self.context_variables.contains_key(name) {
                    return;
                }
            }
            WritePolicy::Overwrite => {}
            WritePolicy::OnSuccessOnly => {
                if step_failed {
                    return;
                }
            }
        }
        self.context_variables.insert(
            name.to_string(),
            ContextVariable {
                value,
                var_type,
                write_policy,
            },
        );
    }

    pub fn variable(&self, name: &str) -> Option<&ContextVariable> {
        self.context_variables.get(name)
    }

    pub fn variable_value(&self, name: &str) -> Option<&str> {
        self.context_variables.get(name).map(|v| v.value.as_str())
    }

    /// Variables of one semantic type, for ticket reuse.
    pub fn variables_of_type(&self, var_type: VariableType) -> Vec<(&str, &str)> {
        self.context_variables
            .iter()
            .filter(|(_, v)| v.var_type == var_type)
            .map(|(k, v)| (k.as_str(), v.value.as_str()))
            .collect()
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Cookie header value for the jar's current contents.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<(&String, &String)> = self.cookies.iter().collect();
        pairs.sort();
        Some(
            pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn carried_header(&self, key: &str) -> Option<&str> {
        self.carried_headers.get(&key.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn carried_headers(&self) -> &HashMap<String, String> {
        &self.carried_headers
    }

    pub fn carried_body_value(&self, path: &str) -> Option<&str> {
        self.carried_body_values.get(path).map(String::as_str)
    }

    pub fn carried_body_values(&self) -> &HashMap<String, String> {
        &self.carried_body_values
    }

    /// Placeholder lookup order: context variable, carried header, cookie.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.variable_value(name)
            .or_else(|| self.carried_header(name))
            .or_else(|| self.cookie(name))
    }

    /// Absorb one step's response into the jar per configuration.
    pub fn absorb_response(&mut self, resp: &HttpResponse, config: &SessionJarConfig) {
        if config.cookie_mode {
            for raw in &resp.set_cookies {
                if let Some((name, value)) = parse_set_cookie(raw) {
                    // Later same-named cookie overwrites.
                    self.cookies.insert(name, value);
                }
            }
        }

        for key in &config.header_keys {
            if let Some(value) = resp.header(key) {
                self.carried_headers
                    .insert(key.to_ascii_lowercase(), value.to_string());
            }
        }

        if !config.body_json_paths.is_empty() {
            if let Some(body) = resp.body_json() {
                for path in &config.body_json_paths {
                    if let Some(value) = lookup_path(&body, path) {
                        self.carried_body_values
                            .insert(path.clone(), value_to_string(value));
                    }
                }
            }
        }
    }
}

fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let pair = raw.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

pub(crate) fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(ctx: &mut SessionContext, name: &str, value: &str, policy: WritePolicy, failed: bool) {
        ctx.write_variable(name, value.to_string(), VariableType::Generic, policy, failed);
    }

    #[test]
    fn first_policy_keeps_the_earliest_value() {
        let mut ctx = SessionContext::new();
        write(&mut ctx, "id", "one", WritePolicy::First, false);
        write(&mut ctx, "id", "two", WritePolicy::First, false);
        assert_eq!(ctx.variable_value("id"), Some("one"));
    }

    #[test]
    fn overwrite_policy_reflects_the_latest_write() {
        let mut ctx = SessionContext::new();
        write(&mut ctx, "id", "one", WritePolicy::Overwrite, false);
        write(&mut ctx, "id", "two", WritePolicy::Overwrite, true);
        assert_eq!(ctx.variable_value("id"), Some("two"));
    }

    #[test]
    fn on_success_only_ignores_failed_steps() {
        let mut ctx = SessionContext::new();
        write(&mut ctx, "id", "one", WritePolicy::OnSuccessOnly, false);
        write(&mut ctx, "id", "two", WritePolicy::OnSuccessOnly, true);
        assert_eq!(ctx.variable_value("id"), Some("one"));
        write(&mut ctx, "id", "three", WritePolicy::OnSuccessOnly, false);
        assert_eq!(ctx.variable_value("id"), Some("three"));
    }

    #[test]
    fn later_cookie_overwrites_same_name() {
        let mut resp = HttpResponse::for_test(200, b"{}");
        resp.set_cookies = vec![
            "sid=abc; Path=/; HttpOnly".to_string(),
            "sid=def".to_string(),
            "theme=dark".to_string(),
        ];

        let mut ctx = SessionContext::new();
        let config = SessionJarConfig {
            cookie_mode: true,
            ..SessionJarConfig::default()
        };
        ctx.absorb_response(&resp, &config);

        assert_eq!(ctx.cookie("sid"), Some("def"));
        assert_eq!(ctx.cookie_header(), Some("sid=def; theme=dark".to_string()));
    }

    #[test]
    fn body_paths_and_headers_are_captured() {
        let mut resp =
            HttpResponse::for_test(200, br#"{"order":{"id":"o-77"},"total":12}"#);
        resp.headers
            .insert("x-request-id".to_string(), "req-1".to_string());

        let mut ctx = SessionContext::new();
        let config = SessionJarConfig {
            cookie_mode: false,
            body_json_paths: vec!["order.id".to_string(), "total".to_string()],
            header_keys: vec!["X-Request-Id".to_string()],
        };
        ctx.absorb_response(&resp, &config);

        assert_eq!(ctx.carried_body_value("order.id"), Some("o-77"));
        assert_eq!(ctx.carried_body_value("total"), Some("12"));
        assert_eq!(ctx.carried_header("x-request-id"), Some("req-1"));
    }
}
