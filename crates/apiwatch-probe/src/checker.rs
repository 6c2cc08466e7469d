//! One probe attempt: bind, authenticate, send, evaluate.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::WWW_AUTHENTICATE;
use tracing::debug;

use apiwatch_auth::AuthResolver;
use apiwatch_config::{EndpointConfig, MonitorConfig, non_blank};

use crate::binder::DataBinder;
use crate::error::{ProbeError, ProbeResult};
use crate::evaluate::{Observation, Verdict, evaluate, needs_body};
use crate::result::CheckResult;
use crate::transport::{RetryPolicy, send_with_retry};

/// Runs a single check against an endpoint.
///
/// Errors are faults (binding, auth, transport, body parsing); the
/// scheduler turns them into `Exception` results.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, endpoint: &EndpointConfig) -> ProbeResult<CheckResult>;
}

pub struct HttpChecker {
    http: reqwest::Client,
    config: Arc<MonitorConfig>,
    binder: Arc<DataBinder>,
    auth: Arc<AuthResolver>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpChecker {
    pub fn new(
        http: reqwest::Client,
        config: Arc<MonitorConfig>,
        binder: Arc<DataBinder>,
        auth: Arc<AuthResolver>,
    ) -> ProbeResult<Self> {
        let timeout = config.timeout()?;
        Ok(Self {
            http,
            config,
            binder,
            auth,
            timeout,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[async_trait]
impl Probe for HttpChecker {
    async fn check(&self, endpoint: &EndpointConfig) -> ProbeResult<CheckResult> {
        let bound = self.binder.bind(endpoint).await?;

        let profile = self
            .config
            .auth_ref_for(endpoint)
            .and_then(|name| self.config.auth_profile(name));
        let resolved = self.auth.materialize(&endpoint.auth, profile).await?;
        let credential = self.auth.credential(&resolved).await?;
        debug!(
            endpoint = %endpoint.name,
            auth_type = resolved.kind.as_deref().unwrap_or("None"),
            has_client_id = non_blank(resolved.client_id.as_deref()).is_some(),
            has_client_secret = non_blank(resolved.client_secret.as_deref()).is_some(),
            has_auth_header = credential.is_some(),
            "auth materialized"
        );

        let method_name = endpoint.method();
        let method = Method::from_bytes(method_name.as_bytes())
            .map_err(|_| ProbeError::InvalidMethod(method_name.clone()))?;

        let mut req = bound.apply(
            self.http
                .request(method.clone(), &bound.url)
                .timeout(self.timeout),
        );
        if let Some((name, value)) = credential {
            req = req.header(name, value);
        }

        let started = Instant::now();
        let resp = send_with_retry(req, &method, &self.retry).await?;
        let elapsed = started.elapsed();

        let status = resp.status().as_u16();
        let www_authenticate = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let rule = &endpoint.success;
        let body = if !rule.status_codes.contains(&status) {
            // Diagnostics only; a body that cannot be read is left out.
            resp.text().await.ok()
        } else if needs_body(rule) {
            Some(resp.text().await?)
        } else {
            None
        };

        let observation = Observation {
            status,
            www_authenticate: www_authenticate.as_deref(),
            elapsed,
            body: body.as_deref(),
        };
        let result = match evaluate(rule, &observation)? {
            Verdict::Pass => CheckResult::ok(&endpoint.name, elapsed, status),
            Verdict::Fail { reason, details } => {
                CheckResult::fail(&endpoint.name, reason, details, elapsed, Some(status))
            }
        };

        debug!(
            endpoint = %endpoint.name,
            status,
            elapsed_ms = result.elapsed_ms(),
            reason = %result.reason,
            "probe evaluated"
        );
        Ok(result)
    }
}
