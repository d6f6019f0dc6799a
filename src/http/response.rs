//! Response snapshot captured for every executed request. Carries the raw
//! Set-Cookie values separately because the header map collapses repeats.

use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names lowercased by the transport.
    pub headers: HashMap<String, String>,
    /// Every Set-Cookie value, in arrival order.
    pub set_cookies: Vec<String>,
    pub body: Vec<u8>,
    pub body_len: usize,
    pub body_hash: String,
    pub elapsed_ms: u128,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8 (lossy).
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Body parsed as JSON, if it is JSON.
    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    #[cfg(test)]
    pub fn for_test(status: u16, body: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(body);
        Self {
            status,
            headers: HashMap::new(),
            set_cookies: Vec::new(),
            body: body.to_vec(),
            body_len: body.len(),
            body_hash: format!("{:x}", hasher.finalize()),
            elapsed_ms: 0,
        }
    }
}
