//! Resolved value pools handed to the iteration planner: checklist value
//! lists and security-rule payload lists, keyed by variable name. Content
//! generation lives upstream; the engine only substitutes.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct ValuePools {
    checklists: HashMap<String, Vec<String>>,
    security_rules: HashMap<String, Vec<String>>,
}

impl ValuePools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_checklist(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.checklists.insert(name.into(), values);
    }

    pub fn insert_security_rule(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.security_rules.insert(name.into(), values);
    }

    pub fn checklist(&self, name: &str) -> Option<&[String]> {
        self.checklists.get(name).map(Vec::as_slice)
    }

    pub fn security_rule(&self, name: &str) -> Option<&[String]> {
        self.security_rules.get(name).map(Vec::as_slice)
    }

    /// Load a checklist from a newline-delimited file, named after the file.
    pub fn load_checklist_file<P: AsRef<Path>>(&mut self, path: P) -> anyhow::Result<()> {
        let content = fs::read_to_string(&path)?;
        let values: Vec<String> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.to_string())
            .collect();

        let name = path
            .as_ref()
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "checklist".to_string());

        self.insert_checklist(name, values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_are_keyed_by_name() {
        let mut pools = ValuePools::new();
        pools.insert_checklist("order_id", vec!["1".into(), "2".into()]);
        pools.insert_security_rule("payload", vec!["../../etc/passwd".into()]);

        assert_eq!(pools.checklist("order_id").unwrap().len(), 2);
        assert_eq!(pools.security_rule("payload").unwrap().len(), 1);
        assert!(pools.checklist("missing").is_none());
    }
}
