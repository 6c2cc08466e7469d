//! Secret indirection.
//!
//! Config values may point elsewhere instead of carrying a secret inline:
//!
//! | Form | Resolved from |
//! |---|---|
//! | `env:NAME` | process environment, read on every call |
//! | `kv:name` / `kv:name#version` | the vault, cached for the process lifetime |
//! | anything else | used literally |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use apiwatch_config::AuthConfig;

use crate::error::AuthResult;

/// Read access to a secret vault.
#[async_trait]
pub trait VaultClient: Send + Sync {
    async fn get_secret(&self, name: &str, version: Option<&str>) -> AuthResult<String>;
}

/// Resolves `env:` / `kv:` references, caching vault hits by reference.
pub struct SecretResolver {
    vault: Option<Arc<dyn VaultClient>>,
    /// `name#version` → secret value. Vault secrets are immutable per version.
    cache: RwLock<HashMap<String, String>>,
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

impl SecretResolver {
    pub fn new(vault: Option<Arc<dyn VaultClient>>) -> Self {
        Self {
            vault,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// A resolver that only understands `env:` and literals.
    pub fn without_vault() -> Self {
        Self::new(None)
    }

    /// Resolve one value. Absent or blank input is returned unchanged;
    /// `kv:` references resolve to `None` when no vault is configured.
    pub async fn resolve(&self, value: Option<&str>) -> AuthResult<Option<String>> {
        let Some(value) = value else {
            return Ok(None);
        };
        if value.trim().is_empty() {
            return Ok(Some(value.to_string()));
        }

        if let Some(name) = strip_prefix_ignore_case(value, "env:") {
            return Ok(std::env::var(name).ok());
        }

        if let Some(reference) = strip_prefix_ignore_case(value, "kv:") {
            let Some(vault) = &self.vault else {
                debug!(%reference, "vault reference without a configured vault");
                return Ok(None);
            };

            if let Some(hit) = self.cache.read().await.get(reference) {
                return Ok(Some(hit.clone()));
            }

            let (name, version) = match reference.split_once('#') {
                Some((name, version)) => (name, Some(version)),
                None => (reference, None),
            };
            let secret = vault.get_secret(name, version).await?;
            self.cache
                .write()
                .await
                .insert(reference.to_string(), secret.clone());
            debug!(%name, "vault secret cached");
            return Ok(Some(secret));
        }

        Ok(Some(value.to_string()))
    }

    /// Resolve the secret-bearing fields of an auth config (value, client
    /// id, client secret); every other field is copied as-is.
    pub async fn resolve_auth(&self, cfg: &AuthConfig) -> AuthResult<AuthConfig> {
        Ok(AuthConfig {
            value: self.resolve(cfg.value.as_deref()).await?,
            client_id: self.resolve(cfg.client_id.as_deref()).await?,
            client_secret: self.resolve(cfg.client_secret.as_deref()).await?,
            ..cfg.clone()
        })
    }
}
