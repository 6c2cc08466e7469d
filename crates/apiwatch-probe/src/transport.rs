//! Bounded retry around a single HTTP send.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): base, 2×base, 4×base...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::PUT | Method::DELETE | Method::TRACE
    )
}

pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

/// Send `req`, retrying idempotent requests on transient failures. The
/// last response or error is returned as-is once retries run out.
pub async fn send_with_retry(
    req: RequestBuilder,
    method: &Method,
    policy: &RetryPolicy,
) -> reqwest::Result<Response> {
    let retries = if is_idempotent(method) {
        policy.max_retries
    } else {
        0
    };

    let mut attempt = 0;
    loop {
        // Streaming bodies cannot be cloned; those requests get one try.
        let Some(next) = (attempt < retries).then(|| req.try_clone()).flatten() else {
            return req.send().await;
        };

        match next.send().await {
            Ok(resp) if !is_transient_status(resp.status()) => return Ok(resp),
            Ok(resp) => {
                debug!(status = resp.status().as_u16(), attempt, "transient status, retrying");
            }
            Err(e) if is_transient_error(&e) => {
                debug!(error = %e, attempt, "transient transport error, retrying");
            }
            Err(e) => return Err(e),
        }

        tokio::time::sleep(policy.backoff(attempt)).await;
        attempt += 1;
    }
}
