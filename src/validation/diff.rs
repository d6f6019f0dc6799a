//! Structural response diffing under configurable tolerance. Decides
//! whether a baseline/mutated pair constitutes an access-control finding.

use crate::http::response::HttpResponse;
use crate::session::template::lookup_path;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    StatusAndBody,
    StatusOnly,
    BodyOnly,
    /// Use the individual compare_* flags as given.
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    pub comparison_mode: ComparisonMode,
    #[serde(default)]
    pub compare_status: bool,
    #[serde(default)]
    pub compare_body_structure: bool,
    #[serde(default)]
    pub compare_business_code: bool,
    #[serde(default)]
    pub business_code_path: Option<String>,
    /// Dot-paths whose differences never count.
    #[serde(default)]
    pub ignore_fields: Vec<String>,
    /// Dot-paths where any difference always yields a finding.
    #[serde(default)]
    pub critical_fields: Vec<String>,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            comparison_mode: ComparisonMode::StatusAndBody,
            compare_status: true,
            compare_body_structure: true,
            compare_business_code: false,
            business_code_path: None,
            ignore_fields: Vec::new(),
            critical_fields: Vec::new(),
        }
    }
}

impl BaselineConfig {
    fn status_enabled(&self) -> bool {
        match self.comparison_mode {
            ComparisonMode::StatusAndBody | ComparisonMode::StatusOnly => true,
            ComparisonMode::BodyOnly => false,
            ComparisonMode::Custom => self.compare_status,
        }
    }

    fn body_enabled(&self) -> bool {
        match self.comparison_mode {
            ComparisonMode::StatusAndBody | ComparisonMode::BodyOnly => true,
            ComparisonMode::StatusOnly => false,
            ComparisonMode::Custom => self.compare_body_structure,
        }
    }

    fn business_code_enabled(&self) -> bool {
        self.compare_business_code && self.business_code_path.is_some()
    }
}

/// Outcome of diffing a baseline response against a mutated response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffReport {
    pub status_diff: Option<(u16, u16)>,
    /// Paths where body shape diverged, ignore_fields already applied.
    pub structure_diffs: Vec<String>,
    pub business_code_diff: Option<(String, String)>,
    /// Critical-path differences; any entry forces a finding.
    pub critical_diffs: Vec<String>,
}

impl DiffReport {
    /// True when any configured comparison axis differs.
    pub fn is_divergent(&self) -> bool {
        !self.critical_diffs.is_empty()
            || self.status_diff.is_some()
            || !self.structure_diffs.is_empty()
            || self.business_code_diff.is_some()
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some((b, m)) = self.status_diff {
            parts.push(format!("status {b} vs {m}"));
        }
        if !self.structure_diffs.is_empty() {
            parts.push(format!("body structure at [{}]", self.structure_diffs.join(", ")));
        }
        if let Some((b, m)) = &self.business_code_diff {
            parts.push(format!("business code `{b}` vs `{m}`"));
        }
        if !self.critical_diffs.is_empty() {
            parts.push(format!("critical fields [{}]", self.critical_diffs.join(", ")));
        }
        parts.join("; ")
    }
}

/// Diff two final responses under the configured rules.
pub fn diff_responses(
    baseline: &HttpResponse,
    mutated: &HttpResponse,
    config: &BaselineConfig,
) -> DiffReport {
    let mut report = DiffReport::default();

    let baseline_body = baseline.body_json();
    let mutated_body = mutated.body_json();

    // Critical fields are checked first and unconditionally.
    for path in &config.critical_fields {
        let b = baseline_body.as_ref().and_then(|v| lookup_path(v, path));
        let m = mutated_body.as_ref().and_then(|v| lookup_path(v, path));
        if b != m {
            report.critical_diffs.push(path.clone());
        }
    }

    if config.status_enabled() && baseline.status != mutated.status {
        report.status_diff = Some((baseline.status, mutated.status));
    }

    if config.body_enabled() {
        match (&baseline_body, &mutated_body) {
            (Some(b), Some(m)) => {
                collect_structure_diffs(b, m, "", &config.ignore_fields, &mut report.structure_diffs);
            }
            (None, None) => {
                // Non-JSON bodies compare by hash.
                if baseline.body_hash != mutated.body_hash {
                    report.structure_diffs.push("<body>".to_string());
                }
            }
            _ => report.structure_diffs.push("<body>".to_string()),
        }
    }

    if config.business_code_enabled() {
        let path = config.business_code_path.as_deref().unwrap_or_default();
        let b = baseline_body
            .as_ref()
            .and_then(|v| lookup_path(v, path))
            .map(value_text);
        let m = mutated_body
            .as_ref()
            .and_then(|v| lookup_path(v, path))
            .map(value_text);
        if b != m {
            report.business_code_diff = Some((
                b.unwrap_or_else(|| "<absent>".to_string()),
                m.unwrap_or_else(|| "<absent>".to_string()),
            ));
        }
    }

    report
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn ignored(path: &str, ignore_fields: &[String]) -> bool {
    ignore_fields.iter().any(|ignore| {
        path == ignore || path.starts_with(&format!("{ignore}."))
    })
}

/// Structural comparison: same keys and shapes, values themselves are not
/// compared. Dynamic content (ids, timestamps) therefore never diffs unless
/// it changes the shape.
fn collect_structure_diffs(
    baseline: &Value,
    mutated: &Value,
    path: &str,
    ignore_fields: &[String],
    out: &mut Vec<String>,
) {
    if !path.is_empty() && ignored(path, ignore_fields) {
        return;
    }

    match (baseline, mutated) {
        (Value::Object(b), Value::Object(m)) => {
            for (key, bv) in b {
                let child = join_path(path, key);
                match m.get(key) {
                    Some(mv) => collect_structure_diffs(bv, mv, &child, ignore_fields, out),
                    None => {
                        if !ignored(&child, ignore_fields) {
                            out.push(child);
                        }
                    }
                }
            }
            for key in m.keys() {
                if !b.contains_key(key) {
                    let child = join_path(path, key);
                    if !ignored(&child, ignore_fields) {
                        out.push(child);
                    }
                }
            }
        }
        (Value::Array(b), Value::Array(m)) => {
            if b.len() != m.len() {
                out.push(if path.is_empty() { "<root>".to_string() } else { path.to_string() });
                return;
            }
            for (i, (bv, mv)) in b.iter().zip(m).enumerate() {
                let child = join_path(path, &i.to_string());
                collect_structure_diffs(bv, mv, &child, ignore_fields, out);
            }
        }
        (b, m) => {
            // Leaf: only a type change is structural.
            if std::mem::discriminant(b) != std::mem::discriminant(m) {
                out.push(if path.is_empty() { "<root>".to_string() } else { path.to_string() });
            }
        }
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}
