//! Template resolver: materializes one step's HTTP request from the
//! immutable template, the iteration's variable assignment, and the
//! session context. Substitution precedence, highest first: explicit
//! iteration value for the step's mapping, session-jar carried value for
//! a matching header/cookie/body path, the template's original literal.

use crate::core::scope::Environment;
use crate::http::request::HttpRequest;
use crate::session::context::SessionContext;
use crate::workflow::definition::{RequestTemplate, SessionJarConfig};
use crate::workflow::variables::VariableConfig;
use regex::Regex;
use reqwest::Method;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unresolved placeholder `{{{{{0}}}}}`")]
    UnresolvedPlaceholder(String),

    #[error("bad variable address `{0}`")]
    BadAddress(String),

    #[error("invalid method `{0}`")]
    BadMethod(String),

    #[error("cannot build request url: {0}")]
    BadUrl(String),
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([A-Za-z0-9_.\-]+)\}\}").expect("placeholder regex"))
}

/// Resolve `template` for `step_order` into a sendable request.
pub fn resolve_template(
    template: &RequestTemplate,
    step_order: u32,
    variable_configs: &[VariableConfig],
    values: &BTreeMap<String, String>,
    ctx: &SessionContext,
    jar: Option<&SessionJarConfig>,
    env: &Environment,
) -> Result<HttpRequest, TemplateError> {
    let mut path = template.path.clone();
    let mut headers = template.headers.clone();
    let mut query = template.query.clone();
    let mut body = template.body.clone();
    let mut mapped: HashSet<String> = HashSet::new();

    // ---- EXPLICIT ITERATION VALUES ----
    for var in variable_configs {
        for mapping in var.mappings.iter().filter(|m| m.step_order == step_order) {
            let Some(value) = values.get(&var.name) else {
                continue;
            };
            apply_address(
                &mapping.json_path,
                value,
                &mut path,
                &mut headers,
                &mut query,
                &mut body,
            )?;
            mapped.insert(mapping.json_path.clone());
        }
    }

    // ---- SESSION-JAR CARRYOVER ----
    if let Some(jar) = jar {
        for (key, value) in headers.iter_mut() {
            let address = format!("headers.{key}");
            if mapped.contains(&address) {
                continue;
            }
            if let Some(carried) = ctx.carried_header(key) {
                *value = carried.to_string();
            }
        }

        if let Some(body) = body.as_mut() {
            for (bpath, carried) in ctx.carried_body_values() {
                let address = format!("body.{bpath}");
                if mapped.contains(&address) {
                    continue;
                }
                if lookup_path(body, bpath).is_some() {
                    set_path(body, bpath, Value::String(carried.clone()));
                }
            }
        }

        if jar.cookie_mode && !mapped.contains("headers.Cookie") {
            if let Some(cookie) = ctx.cookie_header() {
                set_pair(&mut headers, "Cookie", &cookie);
            }
        }
    }

    // ---- PLACEHOLDER RESOLUTION ----
    let resolve_name = |name: &str| -> Option<String> {
        if let Some(v) = values.get(name) {
            // A workflow_context variable plans as its own placeholder;
            // fall through to the session context for those.
            if v != &format!("{{{{{name}}}}}") {
                return Some(v.clone());
            }
        }
        ctx.lookup(name).map(str::to_string)
    };

    path = fill_placeholders(&path, &resolve_name)?;
    for (_, value) in query.iter_mut() {
        *value = fill_placeholders(value, &resolve_name)?;
    }
    for (_, value) in headers.iter_mut() {
        *value = fill_placeholders(value, &resolve_name)?;
    }
    if let Some(body) = body.as_mut() {
        fill_body_placeholders(body, &resolve_name)?;
    }

    // ---- MATERIALIZE ----
    let method = Method::from_bytes(template.method.as_bytes())
        .map_err(|_| TemplateError::BadMethod(template.method.clone()))?;
    let mut url = env
        .resolve(&path)
        .map_err(|e| TemplateError::BadUrl(e.to_string()))?;
    for (key, value) in &query {
        url.query_pairs_mut().append_pair(key, value);
    }

    let mut request = HttpRequest::new(method, url);
    for (key, value) in &headers {
        request.set_header(key, value);
    }
    if let Some(body) = body {
        let text = match &body {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if request.header("content-type").is_none() {
            request.set_header("Content-Type", "application/json");
        }
        request.set_body(text);
    }

    Ok(request)
}

/// Write `value` at a step-scoped address: `body.*`, `query.<key>`,
/// `headers.<key>`, `path.<1-based segment index>`.
fn apply_address(
    address: &str,
    value: &str,
    path: &mut String,
    headers: &mut Vec<(String, String)>,
    query: &mut Vec<(String, String)>,
    body: &mut Option<Value>,
) -> Result<(), TemplateError> {
    let (location, rest) = address
        .split_once('.')
        .ok_or_else(|| TemplateError::BadAddress(address.to_string()))?;

    match location {
        "body" => {
            let root = body.get_or_insert_with(|| Value::Object(serde_json::Map::new()));
            if !set_path(root, rest, Value::String(value.to_string())) {
                return Err(TemplateError::BadAddress(address.to_string()));
            }
        }
        "query" => set_pair(query, rest, value),
        "headers" => set_pair(headers, rest, value),
        "path" => {
            let index: usize = rest
                .parse()
                .map_err(|_| TemplateError::BadAddress(address.to_string()))?;
            let mut segments: Vec<&str> = path.split('/').collect();
            let mut seen = 0usize;
            let mut hit = None;
            for (i, seg) in segments.iter().enumerate() {
                if seg.is_empty() {
                    continue;
                }
                seen += 1;
                if seen == index {
                    hit = Some(i);
                    break;
                }
            }
            let i = hit.ok_or_else(|| TemplateError::BadAddress(address.to_string()))?;
            segments[i] = value;
            *path = segments.join("/");
        }
        _ => return Err(TemplateError::BadAddress(address.to_string())),
    }
    Ok(())
}

fn set_pair(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    for (k, v) in pairs.iter_mut() {
        if k.eq_ignore_ascii_case(key) {
            *v = value.to_string();
            return;
        }
    }
    pairs.push((key.to_string(), value.to_string()));
}

fn fill_placeholders(
    input: &str,
    resolve: &dyn Fn(&str) -> Option<String>,
) -> Result<String, TemplateError> {
    let re = placeholder_re();
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in re.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0");
        let name = &caps[1];
        let value = resolve(name)
            .ok_or_else(|| TemplateError::UnresolvedPlaceholder(name.to_string()))?;
        out.push_str(&input[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

fn fill_body_placeholders(
    value: &mut Value,
    resolve: &dyn Fn(&str) -> Option<String>,
) -> Result<(), TemplateError> {
    match value {
        Value::String(s) => {
            *s = fill_placeholders(s, resolve)?;
        }
        Value::Array(items) => {
            for item in items {
                fill_body_placeholders(item, resolve)?;
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                fill_body_placeholders(v, resolve)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Dot-path lookup over a JSON value. Accepts an optional `$.` prefix;
/// numeric segments index arrays.
pub(crate) fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Dot-path write. Missing object keys are created; array indices must
/// already exist. Returns false when the path cannot be written.
pub(crate) fn set_path(root: &mut Value, path: &str, new_value: Value) -> bool {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return false;
    }

    let mut current = root;
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        match current {
            Value::Object(map) => {
                if last {
                    map.insert(segment.to_string(), new_value);
                    return true;
                }
                current = map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(serde_json::Map::new()));
            }
            Value::Array(items) => {
                let Ok(index) = segment.parse::<usize>() else {
                    return false;
                };
                let Some(slot) = items.get_mut(index) else {
                    return false;
                };
                if last {
                    *slot = new_value;
                    return true;
                }
                current = slot;
            }
            _ => return false,
        }
    }
    false
}
