//! Effective auth for one probe: merge, resolve, and turn into a header.

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderName, HeaderValue};
use tracing::debug;

use apiwatch_config::{AuthConfig, non_blank};

use crate::error::{AuthError, AuthResult};
use crate::secrets::SecretResolver;
use crate::token::TokenCache;

/// Header used for API keys unless the config names another.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Supported credential types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    None,
    ApiKey,
    OAuth2,
}

impl AuthKind {
    /// Parse a type tag case-insensitively. Unknown tags mean no auth.
    pub fn parse(tag: Option<&str>) -> Self {
        let tag = tag.unwrap_or("none").trim().to_ascii_lowercase();
        match tag.as_str() {
            "apikey" | "api_key" | "api-key" => AuthKind::ApiKey,
            "oauth2" | "oauth" | "aad" | "bearer" => AuthKind::OAuth2,
            "none" | "" => AuthKind::None,
            other => {
                debug!(auth_type = other, "unknown auth type, sending without credentials");
                AuthKind::None
            }
        }
    }
}

/// Layer endpoint auth over a profile field by field. Non-blank endpoint
/// values win, then profile values; the type defaults to `None`.
pub fn merge(endpoint: &AuthConfig, profile: Option<&AuthConfig>) -> AuthConfig {
    fn take(endpoint: &Option<String>, profile: Option<&Option<String>>) -> Option<String> {
        non_blank(endpoint.as_deref())
            .or_else(|| profile.and_then(|p| p.as_deref()))
            .map(str::to_string)
    }

    let mut merged = AuthConfig {
        kind: take(&endpoint.kind, profile.map(|p| &p.kind)),
        header: take(&endpoint.header, profile.map(|p| &p.header)),
        value: take(&endpoint.value, profile.map(|p| &p.value)),
        token_url: take(&endpoint.token_url, profile.map(|p| &p.token_url)),
        client_id: take(&endpoint.client_id, profile.map(|p| &p.client_id)),
        client_secret: take(&endpoint.client_secret, profile.map(|p| &p.client_secret)),
        scope: take(&endpoint.scope, profile.map(|p| &p.scope)),
        resource: take(&endpoint.resource, profile.map(|p| &p.resource)),
    };
    if non_blank(merged.kind.as_deref()).is_none() {
        merged.kind = Some("None".to_string());
    }
    merged
}

/// Turns endpoint + profile auth into a request header.
pub struct AuthResolver {
    secrets: Arc<SecretResolver>,
    tokens: Arc<TokenCache>,
}

impl AuthResolver {
    pub fn new(secrets: Arc<SecretResolver>, tokens: Arc<TokenCache>) -> Self {
        Self { secrets, tokens }
    }

    pub fn secrets(&self) -> &Arc<SecretResolver> {
        &self.secrets
    }

    /// Merge and secret-resolve. The result is built fresh per attempt and
    /// never stored.
    pub async fn materialize(
        &self,
        endpoint: &AuthConfig,
        profile: Option<&AuthConfig>,
    ) -> AuthResult<AuthConfig> {
        let merged = merge(endpoint, profile);
        self.secrets.resolve_auth(&merged).await
    }

    /// The header carrying the credential, if the auth type sets one.
    pub async fn credential(
        &self,
        resolved: &AuthConfig,
    ) -> AuthResult<Option<(HeaderName, HeaderValue)>> {
        match AuthKind::parse(resolved.kind.as_deref()) {
            AuthKind::None => Ok(None),
            AuthKind::ApiKey => {
                let Some(value) = non_blank(resolved.value.as_deref()) else {
                    return Ok(None);
                };
                let name = non_blank(resolved.header.as_deref()).unwrap_or(DEFAULT_API_KEY_HEADER);
                let name = HeaderName::from_bytes(name.trim().as_bytes())
                    .map_err(|e| AuthError::InvalidHeader(e.to_string()))?;
                let mut value = HeaderValue::from_str(value)
                    .map_err(|e| AuthError::InvalidHeader(e.to_string()))?;
                value.set_sensitive(true);
                Ok(Some((name, value)))
            }
            AuthKind::OAuth2 => {
                let token = self.tokens.get_token(resolved).await?;
                if token.trim().is_empty() {
                    return Ok(None);
                }
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| AuthError::InvalidHeader(e.to_string()))?;
                value.set_sensitive(true);
                Ok(Some((AUTHORIZATION, value)))
            }
        }
    }
}
