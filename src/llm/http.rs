//! HTTP plumbing shared by the hosted completion clients.

use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{MendError, Result};

/// How many times a completion request is sent, and how long to back off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// A policy that sends once and never backs off.
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << doublings)
    }
}

/// A failed exchange, and whether sending it again could help.
#[derive(Debug)]
pub(crate) struct Rejection {
    pub(crate) error: MendError,
    pub(crate) retryable: bool,
}

/// Maps a non-success status to an error. `api_message` is the message the
/// provider put in its error body, when the body could be parsed.
pub(crate) fn status_rejection(
    provider: &str,
    key_var: &str,
    status: StatusCode,
    api_message: Option<String>,
    body: &str,
) -> Rejection {
    match status {
        StatusCode::UNAUTHORIZED => Rejection {
            error: MendError::llm(format!("Authentication failed. Check your {key_var}.")),
            retryable: false,
        },
        StatusCode::TOO_MANY_REQUESTS => Rejection {
            error: MendError::llm("Rate limited. Please wait and try again."),
            retryable: true,
        },
        _ => {
            let error = match api_message {
                Some(message) => MendError::llm(format!("{provider} API error: {message}")),
                None => MendError::llm(format!("{provider} API error ({status}): {body}")),
            };
            Rejection {
                error,
                retryable: status.is_server_error(),
            }
        }
    }
}

fn transport_rejection(provider: &str, e: &reqwest::Error) -> Rejection {
    let error = if e.is_timeout() {
        MendError::llm("Request timed out. Try again.")
    } else if e.is_connect() {
        MendError::llm(format!(
            "Failed to connect to the {provider} endpoint. Check your network."
        ))
    } else {
        MendError::llm(format!("Request failed: {e}"))
    };
    Rejection {
        error,
        retryable: e.is_timeout() || e.is_connect(),
    }
}

pub(crate) fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| MendError::llm(format!("Failed to create HTTP client: {e}")))
}

/// Sends the request produced by `build` until it succeeds, fails for good,
/// or `policy` runs out. Returns the body of the successful response.
pub(crate) async fn send_with_retry<B, R>(
    provider: &'static str,
    policy: RetryPolicy,
    build: B,
    reject: R,
) -> Result<String>
where
    B: Fn() -> RequestBuilder,
    R: Fn(StatusCode, &str) -> Rejection,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        debug!(provider, attempt, max_attempts, "Sending completion request");

        let rejection = match build().send().await {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| MendError::llm(format!("Failed to read response: {e}")))?;
                if status.is_success() {
                    return Ok(body);
                }
                reject(status, &body)
            }
            Err(e) => transport_rejection(provider, &e),
        };

        if !rejection.retryable || attempt >= max_attempts {
            return Err(rejection.error);
        }

        let delay = policy.delay_after(attempt);
        warn!(
            provider,
            attempt,
            ?delay,
            error = %rejection.error,
            "Completion request failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
