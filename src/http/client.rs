//! HTTP transport with scope enforcement, rate limiting, and per-request
//! timeouts. `Dispatch` is the seam the sequencer and concurrency runner
//! send through; tests substitute a scripted implementation.

use crate::core::rate_limit::RateLimiter;
use crate::core::scope::Environment;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, redirect::Policy, Client};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, req: HttpRequest) -> Result<HttpResponse>;
}

pub struct HttpClient {
    client: Client,
    env: Environment,
    limiter: RateLimiter,
}

impl HttpClient {
    pub fn new(env: Environment, limiter: RateLimiter, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            env,
            limiter,
        })
    }
}

#[async_trait]
impl Dispatch for HttpClient {
    async fn dispatch(&self, req: HttpRequest) -> Result<HttpResponse> {
        self.limiter.acquire().await;

        if !self.env.is_in_scope(&req.url) {
            anyhow::bail!("blocked out-of-scope request: {}", req.url);
        }

        let start = Instant::now();

        let mut request = self
            .client
            .request(req.method, req.url.clone())
            .headers(req.headers.clone());
        if let Some(body) = req.body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        let mut headers = HashMap::new();
        let mut set_cookies = Vec::new();
        for (k, v) in response.headers().iter() {
            let value = v.to_str().unwrap_or("").to_string();
            if *k == header::SET_COOKIE {
                set_cookies.push(value.clone());
            }
            headers.insert(k.as_str().to_ascii_lowercase(), value);
        }

        let body = response.bytes().await.unwrap_or_default().to_vec();
        let body_len = body.len();

        let mut hasher = Sha256::new();
        hasher.update(&body);
        let body_hash = format!("{:x}", hasher.finalize());

        Ok(HttpResponse {
            status,
            headers,
            set_cookies,
            body,
            body_len,
            body_hash,
            elapsed_ms: start.elapsed().as_millis(),
        })
    }
}
