//! Target environment: the base URL every step path is resolved against,
//! plus the host allowlist outbound requests are confined to.

use crate::core::error::ConfigError;
use url::Url;

#[derive(Debug, Clone)]
pub struct Environment {
    base_url: Url,
    allowed_hosts: Vec<String>,
}

impl Environment {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(base_url).map_err(|_| ConfigError::BadBaseUrl(base_url.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::BadBaseUrl(base_url.to_string()))?
            .to_string();

        Ok(Self {
            base_url: url,
            allowed_hosts: vec![host],
        })
    }

    /// Allow requests to an additional host (e.g. an auth subdomain).
    pub fn allow_host(&mut self, host: impl Into<String>) {
        self.allowed_hosts.push(host.into());
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve a step path (absolute URL or path relative to the base)
    /// into a concrete request URL.
    pub fn resolve(&self, path: &str) -> anyhow::Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            Ok(Url::parse(path)?)
        } else {
            Ok(self.base_url.join(path)?)
        }
    }

    pub fn is_in_scope(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => self.allowed_hosts.iter().any(|h| h == host),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_paths_against_base() {
        let env = Environment::new("https://api.example.test/v1/").unwrap();
        let url = env.resolve("orders/42").unwrap();
        assert_eq!(url.as_str(), "https://api.example.test/v1/orders/42");
    }

    #[test]
    fn foreign_hosts_are_out_of_scope() {
        let env = Environment::new("https://api.example.test").unwrap();
        assert!(env.is_in_scope(&Url::parse("https://api.example.test/x").unwrap()));
        assert!(!env.is_in_scope(&Url::parse("https://evil.example.test/x").unwrap()));
    }

    #[test]
    fn extra_hosts_can_be_allowed() {
        let mut env = Environment::new("https://api.example.test").unwrap();
        env.allow_host("auth.example.test");
        assert!(env.is_in_scope(&Url::parse("https://auth.example.test/token").unwrap()));
    }
}
