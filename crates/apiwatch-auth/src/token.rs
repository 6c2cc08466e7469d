//! OAuth2 client-credentials token cache.
//!
//! Tokens are keyed by `token_url|client_id|scope|resource`. Each key owns
//! its own slot behind a mutex: callers for the same credential set queue
//! behind one refresh, callers for other keys only touch the outer map
//! briefly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use apiwatch_config::{AuthConfig, non_blank};

use crate::error::{AuthError, AuthResult};

/// Cached tokens are refreshed once they are this close to expiry.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(120);

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Longest lifetime trusted from an issuer.
const MAX_EXPIRES_IN: u64 = 24 * 3600;

/// Time limit on a token grant unless [`TokenCache::with_timeout`] says otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

type Slot = Arc<Mutex<Option<CachedToken>>>;

pub struct TokenCache {
    http: reqwest::Client,
    timeout: Duration,
    slots: RwLock<HashMap<String, Slot>>,
}

impl TokenCache {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Bound each token request. The slot stays locked for the whole fetch,
    /// so this also bounds how long other callers for the key wait.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn cache_key(cfg: &AuthConfig) -> String {
        format!(
            "{}|{}|{}|{}",
            cfg.token_url.as_deref().unwrap_or_default(),
            cfg.client_id.as_deref().unwrap_or_default(),
            cfg.scope.as_deref().unwrap_or_default(),
            cfg.resource.as_deref().unwrap_or_default(),
        )
    }

    async fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(key) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Return a bearer token for the credential set, fetching a new one
    /// when nothing is cached or the cached token expires within
    /// [`REFRESH_MARGIN`].
    pub async fn get_token(&self, cfg: &AuthConfig) -> AuthResult<String> {
        let key = Self::cache_key(cfg);
        let slot = self.slot(&key).await;
        let mut cached = slot.lock().await;

        if let Some(entry) = cached.as_ref() {
            if entry.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(entry.token.clone());
            }
        }

        let (token, expires_in) = self.fetch(cfg).await?;
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        });
        info!(
            token_url = cfg.token_url.as_deref().unwrap_or_default(),
            expires_in, "access token refreshed"
        );
        Ok(token)
    }

    async fn fetch(&self, cfg: &AuthConfig) -> AuthResult<(String, u64)> {
        let token_url = non_blank(cfg.token_url.as_deref()).ok_or(AuthError::MissingTokenUrl)?;

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", cfg.client_id.as_deref().unwrap_or_default()),
            ("client_secret", cfg.client_secret.as_deref().unwrap_or_default()),
        ];
        if let Some(scope) = non_blank(cfg.scope.as_deref()) {
            form.push(("scope", scope));
        } else if let Some(resource) = non_blank(cfg.resource.as_deref()) {
            form.push(("resource", resource));
        }

        debug!(%token_url, "requesting client-credentials token");
        let resp = self
            .http
            .post(token_url)
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AuthError::TokenRequest {
                status: status.as_u16(),
                body,
            });
        }

        parse_token_response(&body)
    }
}

/// Extract `access_token` and `expires_in` from a token endpoint response.
/// Some issuers send `expires_in` as a string; lifetimes past a day are
/// capped.
fn parse_token_response(body: &str) -> AuthResult<(String, u64)> {
    let doc: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| AuthError::InvalidTokenResponse(e.to_string()))?;

    let token = doc
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AuthError::InvalidTokenResponse("missing access_token".to_string()))?
        .to_string();

    let expires_in = match doc.get("expires_in") {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .unwrap_or(DEFAULT_EXPIRES_IN)
    .min(MAX_EXPIRES_IN);

    Ok((token, expires_in))
}
