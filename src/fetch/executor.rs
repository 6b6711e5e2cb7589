//! Fetch executor: one network lookup per call.
//!
//! Performs a single GET against the profile page for a handle, with a hard
//! per-attempt timeout, and delegates the document to the configured
//! [`PageParser`]. No retries here; retry policy lives entirely in the
//! scheduler, which keeps this component stateless.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;

use crate::config::SharedConfig;
use crate::fetch::parser::{PageParser, ProfileData};

#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// Upstream signalled throttling (429 or an auth/consent redirect).
    #[error("upstream rate limit")]
    RateLimited,

    /// Timeout, connection failure, or an unexpected response.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outcome of one lookup attempt.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Found(ProfileData),
    /// The lookup succeeded but the target has no data. Not an error and
    /// never counted against the breaker.
    NotFound,
}

/// The seam the scheduler dispatches through; mocked in tests.
#[async_trait]
pub trait FetchExecutor: Send + Sync {
    async fn execute(&self, key: &str) -> Result<FetchOutcome, FetchError>;
}

/// Production executor backed by a shared HTTP client.
pub struct PageFetcher {
    client: Client,
    parser: Box<dyn PageParser>,
    config: SharedConfig,
}

impl PageFetcher {
    pub fn new(config: SharedConfig, parser: Box<dyn PageParser>) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("handle-cache/", env!("CARGO_PKG_VERSION")))
            .gzip(true)
            .build()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            parser,
            config,
        })
    }

    fn profile_url(template: &str, key: &str) -> String {
        let handle = key.trim_start_matches('@');
        template.replace("{handle}", &encode_handle(handle))
    }
}

#[async_trait]
impl FetchExecutor for PageFetcher {
    async fn execute(&self, key: &str) -> Result<FetchOutcome, FetchError> {
        let fetch_cfg = self.config.read().await.fetch.clone();
        let url = Self::profile_url(&fetch_cfg.profile_url_template, key);

        debug!(key, url, "Fetching profile page");

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(fetch_cfg.timeout_secs))
            .header("Accept-Language", &fetch_cfg.accept_language)
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }

        // Being bounced to a login or consent page is throttling in
        // disguise: the page exists but the upstream refuses to serve it.
        let final_url = response.url().as_str();
        if final_url.contains("accounts.google.com") || final_url.contains("consent.") {
            return Err(FetchError::RateLimited);
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(FetchOutcome::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Transport(format!("HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|err| FetchError::Transport(err.to_string()))?;

        match self.parser.parse(&body) {
            Some(profile) => Ok(FetchOutcome::Found(profile)),
            None => Ok(FetchOutcome::NotFound),
        }
    }
}

/// Percent-encode a handle for use in a URL path segment.
fn encode_handle(handle: &str) -> String {
    let mut encoded = String::with_capacity(handle.len());
    for byte in handle.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            other => {
                encoded.push_str(&format!("%{other:02X}"));
            }
        }
    }
    encoded
}
