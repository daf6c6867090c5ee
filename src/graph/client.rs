//! HTTP client for the Graph API batch endpoint
//!
//! A batch call is a single `POST /` with a form body carrying the access
//! token and a JSON array of requests. The API caps a batch at
//! [`GRAPH_MAX_BATCH_SIZE`] entries, so longer request lists are split into
//! chunks sent one after the other.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;

use super::{BatchApi, BatchReply, BatchRequest};
use crate::config::{Config, GRAPH_MAX_BATCH_SIZE};
use crate::utils::error::ApiError;
use crate::utils::retry::{with_retry_if, RetryConfig};

/// Graph error codes meaning the token itself is unusable
const AUTH_ERROR_CODES: &[i64] = &[102, 190];

/// Batched Graph API client
pub struct GraphClient {
    /// HTTP client with configured timeout and compression
    client: Client,

    /// API root, e.g. `https://graph.facebook.com`
    base_url: String,

    access_token: Option<String>,

    /// Requests per POST
    max_batch_size: usize,

    /// Retry policy for transient failures of a whole POST
    retry: RetryConfig,

    /// Rate limiter to control request frequency
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

/// `{"error": {...}}` envelope of a failed call
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: GraphErrorBody,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

impl GraphClient {
    /// Create a client with default timeout and retry settings
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Transport` if the HTTP client cannot be created
    pub fn new(base_url: &str, access_token: Option<String>) -> Result<Self, ApiError> {
        Self::with_config(
            base_url,
            access_token,
            Duration::from_secs(30),
            RetryConfig::default(),
            2,
        )
    }

    /// Create a client with explicit timeout, retry policy and rate
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Transport` if the HTTP client cannot be created
    pub fn with_config(
        base_url: &str,
        access_token: Option<String>,
        timeout: Duration,
        retry: RetryConfig,
        requests_per_second: u32,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .gzip(true)
            .user_agent(concat!("sciabaca/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            max_batch_size: GRAPH_MAX_BATCH_SIZE,
            retry,
            rate_limiter,
        })
    }

    /// Build a client from a configuration snapshot
    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        let client = Self::with_config(
            &config.graph.base_url,
            config.graph.access_token.clone(),
            config.request_timeout(),
            RetryConfig::new(config.crawler.max_retries),
            config.crawler.rate_limit.ceil().max(1.0) as u32,
        )?;
        Ok(client.with_max_batch_size(config.graph.max_batch_size))
    }

    /// Override the chunk size, clamped to the API maximum
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.clamp(1, GRAPH_MAX_BATCH_SIZE);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn token(&self) -> Result<&str, ApiError> {
        self.access_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ApiError::MissingCredentials)
    }

    /// Send one chunk as a single POST
    async fn post_chunk(&self, chunk: &[BatchRequest]) -> Result<Vec<Option<BatchReply>>, ApiError> {
        let token = self.token()?;
        let batch = serde_json::to_string(chunk)?;

        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(format!("{}/", self.base_url))
            .form(&[
                ("access_token", token),
                ("batch", batch.as_str()),
                ("include_headers", "false"),
            ])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(Self::classify_error(status.as_u16(), &text));
        }

        let replies: Vec<Option<BatchReply>> = serde_json::from_str(&text)?;
        if replies.len() != chunk.len() {
            return Err(ApiError::ReplyMismatch {
                sent: chunk.len(),
                received: replies.len(),
            });
        }

        Ok(replies)
    }

    /// Map a failed call to an error, separating rejected credentials from
    /// other API errors
    fn classify_error(status: u16, body: &str) -> ApiError {
        let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();

        let message = parsed
            .as_ref()
            .map(|e| e.error.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.chars().take(200).collect());

        let auth_code = parsed
            .as_ref()
            .and_then(|e| e.error.code)
            .is_some_and(|code| AUTH_ERROR_CODES.contains(&code));

        if matches!(status, 401 | 403) || auth_code {
            if let Some(kind) = parsed.as_ref().and_then(|e| e.error.kind.as_deref()) {
                return ApiError::AuthRejected(format!("{kind}: {message}"));
            }
            return ApiError::AuthRejected(message);
        }

        ApiError::Api { status, message }
    }
}

#[async_trait]
impl BatchApi for GraphClient {
    async fn batch_call(
        &self,
        requests: &[BatchRequest],
    ) -> Result<Vec<Option<BatchReply>>, ApiError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = requests.len().div_ceil(self.max_batch_size);
        let mut replies = Vec::with_capacity(requests.len());

        for (index, chunk) in requests.chunks(self.max_batch_size).enumerate() {
            tracing::debug!(
                chunk = index + 1,
                chunks,
                batch_size = chunk.len(),
                "Sending batch call"
            );

            let part = with_retry_if(
                &self.retry,
                || self.post_chunk(chunk),
                ApiError::is_recoverable,
            )
            .await?;
            replies.extend(part);
        }

        Ok(replies)
    }
}
