//! Key Vault style secret store over REST.
//!
//! `GET {url}/secrets/{name}[/{version}]?api-version=...` with a bearer token
//! from the shared [`TokenCache`]; the secret is the `value` field of the
//! JSON response.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use apiwatch_config::{AuthConfig, VaultConfig};

use crate::error::{AuthError, AuthResult};
use crate::secrets::{SecretResolver, VaultClient};
use crate::token::TokenCache;

pub struct KeyVaultClient {
    http: reqwest::Client,
    base_url: String,
    api_version: String,
    credentials: AuthConfig,
    tokens: Arc<TokenCache>,
    timeout: Duration,
}

impl KeyVaultClient {
    /// Build a client from config. The vault's own client credentials may use
    /// `env:` indirection but not `kv:`. Secret reads share the token
    /// cache's request timeout.
    pub async fn from_config(
        cfg: &VaultConfig,
        http: reqwest::Client,
        tokens: Arc<TokenCache>,
    ) -> AuthResult<Self> {
        let plain = SecretResolver::without_vault();
        let credentials = AuthConfig {
            kind: Some("OAuth2".to_string()),
            token_url: Some(cfg.token_url.clone()),
            client_id: plain.resolve(Some(&cfg.client_id)).await?,
            client_secret: plain.resolve(Some(&cfg.client_secret)).await?,
            scope: Some(cfg.scope.clone()),
            ..Default::default()
        };
        Ok(Self {
            http,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            api_version: cfg.api_version.clone(),
            credentials,
            timeout: tokens.timeout(),
            tokens,
        })
    }

    fn secret_url(&self, name: &str, version: Option<&str>) -> String {
        match version {
            Some(version) => format!("{}/secrets/{name}/{version}", self.base_url),
            None => format!("{}/secrets/{name}", self.base_url),
        }
    }
}

#[async_trait]
impl VaultClient for KeyVaultClient {
    async fn get_secret(&self, name: &str, version: Option<&str>) -> AuthResult<String> {
        let vault_err = |message: String| AuthError::Vault {
            name: name.to_string(),
            message,
        };

        let token = self.tokens.get_token(&self.credentials).await?;
        let url = self.secret_url(name, version);
        debug!(%name, version = version.unwrap_or("latest"), "fetching vault secret");

        let resp = self
            .http
            .get(&url)
            .query(&[("api-version", self.api_version.as_str())])
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(vault_err(format!("status {}", status.as_u16())));
        }

        let doc: serde_json::Value = resp.json().await?;
        doc.get("value")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| vault_err("response has no value".to_string()))
    }
}
