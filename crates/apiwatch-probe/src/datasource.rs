//! Relational data sources behind the [`ScalarQuery`] seam.
//!
//! One lazily connected `sqlx` Any pool per configured source. Connection
//! URLs go through the secret resolver before the pool is built, so they
//! may be `env:` or `kv:` references.

use std::collections::HashMap;
use std::sync::{Arc, Once};

use async_trait::async_trait;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::AnyPool;
use sqlx::Row;
use tokio::sync::RwLock;
use tracing::{debug, info};

use apiwatch_auth::SecretResolver;
use apiwatch_config::MonitorConfig;

use crate::binder::ScalarQuery;
use crate::error::{ProbeError, ProbeResult};

static DRIVERS: Once = Once::new();

/// Bind-parameter style for a connection URL: `$1` for postgres, `?` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholders {
    Dollar,
    Question,
}

impl Placeholders {
    pub fn for_url(url: &str) -> Self {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        if scheme == "postgres" || scheme == "postgresql" {
            Placeholders::Dollar
        } else {
            Placeholders::Question
        }
    }

    /// Placeholder for the 1-based parameter `n`.
    pub fn nth(self, n: usize) -> String {
        match self {
            Placeholders::Dollar => format!("${n}"),
            Placeholders::Question => "?".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct SqlPool {
    pub pool: AnyPool,
    pub placeholders: Placeholders,
}

pub struct SqlDataSources {
    config: Arc<MonitorConfig>,
    secrets: Arc<SecretResolver>,
    /// Lowercased source name → pool.
    pools: RwLock<HashMap<String, SqlPool>>,
}

impl SqlDataSources {
    pub fn new(config: Arc<MonitorConfig>, secrets: Arc<SecretResolver>) -> Self {
        DRIVERS.call_once(sqlx::any::install_default_drivers);
        Self {
            config,
            secrets,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// The pool for a data source, built on first use.
    pub async fn pool(&self, name: &str) -> ProbeResult<SqlPool> {
        let key = name.to_lowercase();
        if let Some(pool) = self.pools.read().await.get(&key) {
            return Ok(pool.clone());
        }

        let source = self
            .config
            .data_source(name)
            .ok_or_else(|| ProbeError::DataSourceNotFound(name.to_string()))?;
        let url = self
            .secrets
            .resolve(Some(&source.url))
            .await?
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ProbeError::DataSource {
                data_source: name.to_string(),
                message: "connection url resolved to nothing".to_string(),
            })?;

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }
        let pool = AnyPoolOptions::new()
            .max_connections(source.max_connections.max(1))
            .connect_lazy(&url)
            .map_err(|e| ProbeError::DataSource {
                data_source: name.to_string(),
                message: e.to_string(),
            })?;
        let entry = SqlPool {
            pool,
            placeholders: Placeholders::for_url(&url),
        };
        pools.insert(key, entry.clone());
        info!(data_source = %name, max_connections = source.max_connections, "data source pool created");
        Ok(entry)
    }
}

/// Render the first column of a row as text. NULL becomes empty.
fn scalar_text(row: &AnyRow) -> Result<String, sqlx::Error> {
    if row.columns().is_empty() {
        return Ok(String::new());
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(0) {
        return Ok(v.unwrap_or_default());
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(0) {
        return Ok(v.map(|n| n.to_string()).unwrap_or_default());
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(0) {
        return Ok(v.map(|n| n.to_string()).unwrap_or_default());
    }
    row.try_get::<Option<bool>, _>(0)
        .map(|v| v.map(|b| b.to_string()).unwrap_or_default())
}

#[async_trait]
impl ScalarQuery for SqlDataSources {
    async fn execute_scalar(&self, data_source: &str, sql: &str) -> ProbeResult<String> {
        let query_err = |e: sqlx::Error| ProbeError::Query {
            data_source: data_source.to_string(),
            query: sql.to_string(),
            message: e.to_string(),
        };

        let SqlPool { pool, .. } = self.pool(data_source).await?;
        let row = sqlx::query(sql)
            .fetch_optional(&pool)
            .await
            .map_err(query_err)?;
        let value = match row {
            Some(row) => scalar_text(&row).map_err(query_err)?,
            None => String::new(),
        };
        debug!(%data_source, "scalar query executed");
        Ok(value)
    }
}
