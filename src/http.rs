//! The HTTP session (C3): a thin wrapper over an already-authenticated
//! `reqwest::Client` that classifies responses per spec.md §4.3/§7 and
//! counts requests with an atomic counter, the way `ProxyState` in the
//! teacher holds one shared `reqwest::Client` built once in
//! `proxy::server::start_proxy` and reused across every forwarded
//! request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CrawlError;

/// Classification of one HTTP response, per spec.md §4.3.
#[derive(Debug)]
pub enum Outcome {
    Success { body: bytes::Bytes },
    AuthExpired,
    Throttled { retry_after_secs: Option<u64> },
    PermanentFailure { status: u16, body: String },
    Transient(String),
}

/// Abstracts the transport so C4/C5/C6 can be exercised against a
/// `wiremock` server in tests without going through a real
/// authenticated session.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str) -> Outcome;
    fn request_count(&self) -> u64;
}

/// The production implementation: an authenticated `reqwest::Client`
/// handed in by the out-of-scope credential/OAuth layer (spec.md §1).
pub struct ReqwestSession {
    client: reqwest::Client,
    timeout: Duration,
    counter: AtomicU64,
}

impl ReqwestSession {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            counter: AtomicU64::new(0),
        }
    }

    /// Build a client with sane pooling defaults, mirroring
    /// `proxy::server::start_proxy`'s `reqwest::Client::builder()` call.
    pub fn build_default(timeout: Duration) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self::new(client, timeout))
    }
}

#[async_trait]
impl HttpClient for ReqwestSession {
    async fn get(&self, url: &str) -> Outcome {
        self.counter.fetch_add(1, Ordering::Relaxed);

        let response = match tokio::time::timeout(self.timeout, self.client.get(url).send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => return Outcome::Transient(e.to_string()),
            Err(_) => return Outcome::Transient("request timed out".to_string()),
        };

        let status = response.status();

        if status.is_success() {
            return match response.bytes().await {
                Ok(body) => Outcome::Success { body },
                Err(e) => Outcome::Transient(e.to_string()),
            };
        }

        if status.as_u16() == 401 {
            return Outcome::AuthExpired;
        }

        if status.as_u16() == 429 || status.is_server_error() {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Outcome::Throttled { retry_after_secs };
        }

        let body = response.text().await.unwrap_or_default();
        Outcome::PermanentFailure {
            status: status.as_u16(),
            body,
        }
    }

    fn request_count(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }
}
