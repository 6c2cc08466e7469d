//! Component wiring.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use apiwatch_auth::{AuthResolver, KeyVaultClient, SecretResolver, TokenCache, VaultClient};
use apiwatch_config::{MonitorConfig, parse_duration};
use apiwatch_probe::{
    DataBinder, FanoutSink, HttpChecker, LogNotifier, Notifier, ResultSink, SqlDataSources,
    SqlResultSink, StoreSink, WebhookNotifier,
};
use apiwatch_store::EventStore;

const USER_AGENT: &str = concat!("apiwatch/", env!("CARGO_PKG_VERSION"));

/// Everything a probe needs, shared by all endpoint loops.
pub struct Engine {
    pub config: Arc<MonitorConfig>,
    pub http: reqwest::Client,
    pub sources: Arc<SqlDataSources>,
    pub checker: Arc<HttpChecker>,
}

impl Engine {
    pub async fn build(config: MonitorConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;
        let config = Arc::new(config);
        let timeout = config.timeout()?;

        // Client-wide ceiling; probe and webhook requests set their own.
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;

        let tokens = Arc::new(TokenCache::new(http.clone()).with_timeout(timeout));
        let vault: Option<Arc<dyn VaultClient>> = match &config.vault {
            Some(cfg) => {
                let client = KeyVaultClient::from_config(cfg, http.clone(), tokens.clone())
                    .await
                    .context("failed to set up vault client")?;
                info!(url = %cfg.url, "vault configured");
                let client: Arc<dyn VaultClient> = Arc::new(client);
                Some(client)
            }
            None => None,
        };
        let secrets = Arc::new(SecretResolver::new(vault));
        let auth = Arc::new(AuthResolver::new(secrets.clone(), tokens));

        let sources = Arc::new(SqlDataSources::new(config.clone(), secrets));
        let binder = Arc::new(DataBinder::new(sources.clone()));
        let checker = HttpChecker::new(http.clone(), config.clone(), binder, auth)?;

        Ok(Self {
            config,
            http,
            sources,
            checker: Arc::new(checker),
        })
    }

    /// The redb store, plus the relational mirror when one is configured.
    pub fn sink(&self, store: EventStore) -> anyhow::Result<Arc<dyn ResultSink>> {
        let env = self.config.default_environment.clone();
        let local: Arc<dyn ResultSink> = Arc::new(StoreSink::new(store, env.clone()));

        let Some(mirror) = &self.config.sql_sink else {
            return Ok(local);
        };
        let sql: Arc<dyn ResultSink> = Arc::new(SqlResultSink::new(
            self.sources.clone(),
            mirror.data_source.clone(),
            mirror.table.clone(),
            env,
        )?);
        info!(data_source = %mirror.data_source, table = %mirror.table, "relational result mirror enabled");
        Ok(Arc::new(FanoutSink::new(vec![local, sql])))
    }

    pub fn notifier(&self) -> anyhow::Result<Arc<dyn Notifier>> {
        let Some(url) = self.config.notify.webhook_url.as_deref() else {
            return Ok(Arc::new(LogNotifier));
        };
        let timeout: Duration = parse_duration(&self.config.notify.timeout)
            .with_context(|| format!("invalid notify.timeout '{}'", self.config.notify.timeout))?;
        info!(%url, "webhook notifications enabled");
        Ok(Arc::new(WebhookNotifier::new(self.http.clone(), url, timeout)))
    }
}

pub fn open_store(path: &Path) -> anyhow::Result<EventStore> {
    let store = EventStore::open(path)
        .with_context(|| format!("failed to open event store {}", path.display()))?;
    info!(path = %path.display(), "event store opened");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use apiwatch_config::{DataSourceConfig, SqlSinkConfig};

    use super::*;

    #[tokio::test]
    async fn builds_from_minimal_config() {
        let config = MonitorConfig::from_toml(
            r#"
[[endpoints]]
name = "health"
url = "http://127.0.0.1:1/health"
"#,
        )
        .unwrap();
        let engine = Engine::build(config).await.unwrap();
        let store = EventStore::open_in_memory().unwrap();
        assert!(engine.sink(store).is_ok());
        assert!(engine.notifier().is_ok());
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let config = MonitorConfig {
            default_timeout: "soon".to_string(),
            ..Default::default()
        };
        assert!(Engine::build(config).await.is_err());
    }

    #[tokio::test]
    async fn bad_mirror_table_is_rejected() {
        let mut data_sources = BTreeMap::new();
        data_sources.insert(
            "reports".to_string(),
            DataSourceConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
        );
        let config = MonitorConfig {
            data_sources,
            sql_sink: Some(SqlSinkConfig {
                data_source: "reports".to_string(),
                table: "x; drop".to_string(),
            }),
            ..Default::default()
        };
        let engine = Engine::build(config).await.unwrap();
        assert!(engine.sink(EventStore::open_in_memory().unwrap()).is_err());
    }

    #[test]
    fn open_store_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir.path().join("events.redb")).unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }
}
