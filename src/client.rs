//! Blocking JSON-over-HTTP client shared by the model-serving collaborators.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// POSTs JSON to a single endpoint, retrying rate limits and transient failures.
#[derive(Clone)]
pub struct JsonEndpoint {
    client: Client,
    endpoint: String,
    max_retries: usize,
}

impl JsonEndpoint {
    /// Builds a client for `endpoint`; `max_retries` counts total attempts.
    pub fn new(endpoint: String, timeout: Duration, max_retries: usize) -> Result<Self> {
        anyhow::ensure!(
            endpoint.starts_with("http://") || endpoint.starts_with("https://"),
            "endpoint must be an http(s) URL, got {endpoint:?}"
        );
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            max_retries: max_retries.max(1),
        })
    }

    /// Target URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends `body` and decodes the response as `R`.
    pub fn post<B, R>(&self, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut attempt = 0usize;
        loop {
            match self.client.post(&self.endpoint).json(body).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json()
                            .with_context(|| format!("failed to parse response from {}", self.endpoint));
                    }
                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(endpoint = %self.endpoint, %status, attempt, "retrying upstream request");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    anyhow::bail!("request to {} failed ({}): {}", self.endpoint, status, body);
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        warn!(endpoint = %self.endpoint, error = %err, attempt, "retrying upstream request");
                        thread::sleep(retry_backoff(attempt));
                        continue;
                    }
                    return Err(err).with_context(|| format!("request to {} failed", self.endpoint));
                }
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.min(5) as u32;
    Duration::from_millis(100 * (1 << capped))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_endpoints() {
        assert!(JsonEndpoint::new("localhost:9000".into(), Duration::from_secs(1), 1).is_err());
    }

    #[test]
    fn trims_trailing_slash() {
        let client =
            JsonEndpoint::new("http://127.0.0.1:9000/score/".into(), Duration::from_secs(1), 0)
                .unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:9000/score");
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(retry_backoff(1), Duration::from_millis(200));
        assert_eq!(retry_backoff(9), retry_backoff(5));
    }
}
