//! Rate-limit-aware HTTP transport for platform adapters
//!
//! Maps HTTP status codes onto [`PlatformError`] and feeds the platform's
//! `X-RateLimit-*` headers back into its [`RateLimiter`]. Request slots are
//! acquired by the caller (normally via [`RateLimiter::retry`]), not here.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::PlatformError;
use crate::ratelimit::RateLimiter;

const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// JSON-over-HTTP client bound to one platform's limiter
#[derive(Debug, Clone)]
pub struct RateLimitedHttpClient {
    client: Client,
    base_url: String,
    headers: HeaderMap,
    limiter: Arc<RateLimiter>,
}

impl RateLimitedHttpClient {
    /// Create a client with a 30 second request timeout
    pub fn new(base_url: impl Into<String>, limiter: Arc<RateLimiter>) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PlatformError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url, limiter))
    }

    /// Create a client around an existing reqwest `Client`
    pub fn with_client(client: Client, base_url: impl Into<String>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            headers: HeaderMap::new(),
            limiter,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_bearer_token(mut self, token: &str) -> Result<Self, PlatformError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| PlatformError::AuthenticationFailed("token is not a valid header value".to_string()))?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .headers(self.headers.clone())
    }

    /// GET `path` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let response = self.send(self.request(Method::GET, path), path).await?;
        decode(response).await
    }

    /// POST a JSON body to `path` and decode the JSON response
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, PlatformError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.request(Method::POST, path).json(body), path)
            .await?;
        decode(response).await
    }

    /// PUT a JSON body to `path` and decode the JSON response
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, PlatformError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.request(Method::PUT, path).json(body), path)
            .await?;
        decode(response).await
    }

    /// GET `path` and report only whether it answered with a 2xx status
    pub async fn probe(&self, path: &str) -> bool {
        match self.request(Method::GET, path).send().await {
            Ok(response) => {
                self.observe_rate_headers(response.headers());
                response.status().is_success()
            }
            Err(e) => {
                debug!(platform = self.limiter.platform(), path, error = %e, "Probe failed");
                false
            }
        }
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> Result<Response, PlatformError> {
        debug!(platform = self.limiter.platform(), path, "Sending HTTP request");

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                PlatformError::TransientNetwork(format!("request timed out: {}", e))
            } else if e.is_connect() {
                PlatformError::TransientNetwork(format!("connection failed: {}", e))
            } else {
                PlatformError::TransientNetwork(e.to_string())
            }
        })?;

        self.observe_rate_headers(response.headers());

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let platform = self.limiter.platform();
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = parse_retry_after(response.headers());
                warn!(platform, path, retry_after_ms = retry_after.map(|d| d.as_millis() as u64), "Rate limited by platform");
                Err(PlatformError::RateLimited { retry_after })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(platform, path, status = status.as_u16(), "Unauthorized");
                Err(PlatformError::AuthenticationFailed(format!(
                    "{} responded {}",
                    platform, status
                )))
            }
            StatusCode::NOT_FOUND => {
                debug!(platform, path, "Resource not found (404)");
                Err(PlatformError::NotFound(path.to_string()))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                let body = response.text().await.unwrap_or_default();
                Err(PlatformError::Validation(if body.is_empty() {
                    status.to_string()
                } else {
                    body
                }))
            }
            status if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT => {
                warn!(platform, path, status = status.as_u16(), "Server error");
                Err(PlatformError::TransientNetwork(format!("server responded {}", status)))
            }
            status => {
                warn!(platform, path, status = status.as_u16(), "Unexpected status");
                Err(PlatformError::Internal(format!("unexpected status {}", status)))
            }
        }
    }

    fn observe_rate_headers(&self, headers: &HeaderMap) {
        let remaining = header_number::<u32>(headers, RATE_LIMIT_REMAINING);
        if let Some(remaining) = remaining {
            let limit = header_number::<u32>(headers, RATE_LIMIT_LIMIT).unwrap_or(0);
            let reset_in = header_number::<f64>(headers, RATE_LIMIT_RESET)
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64);
            self.limiter.report_rate_headers(limit, remaining, reset_in);
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, PlatformError> {
    let body = response
        .bytes()
        .await
        .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
    serde_json::from_slice(&body)
        .map_err(|e| PlatformError::Internal(format!("Invalid JSON response: {}", e)))
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Retry-After in delta-seconds form; HTTP-date values are ignored
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_number::<f64>(headers, RETRY_AFTER.as_str())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
