//! Failure alerts. Best-effort: callers log errors and move on.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{ProbeError, ProbeResult};
use crate::result::{CheckResult, Reason};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_failure(&self, result: &CheckResult) -> ProbeResult<()>;
}

/// Emits the alert as an error-level log event.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_failure(&self, result: &CheckResult) -> ProbeResult<()> {
        error!(
            endpoint = %result.endpoint,
            reason = %result.reason,
            details = %result.details,
            "endpoint check failed"
        );
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct FailurePayload<'a> {
    endpoint: &'a str,
    reason: Reason,
    details: &'a str,
    elapsed_ms: u64,
    timestamp_ms: u64,
}

/// POSTs a JSON alert to a webhook.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(http: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_failure(&self, result: &CheckResult) -> ProbeResult<()> {
        let payload = FailurePayload {
            endpoint: &result.endpoint,
            reason: result.reason,
            details: &result.details,
            elapsed_ms: result.elapsed_ms(),
            timestamp_ms: result.checked_at_ms,
        };
        let resp = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProbeError::Notify(format!(
                "webhook returned {}",
                status.as_u16()
            )));
        }
        debug!(endpoint = %result.endpoint, "failure alert delivered");
        Ok(())
    }
}
