//! Durable recording of check results.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use apiwatch_config::{EndpointConfig, non_blank};
use apiwatch_store::{CheckEvent, EventStore};

use crate::datasource::SqlDataSources;
use crate::error::{ProbeError, ProbeResult};
use crate::result::CheckResult;

static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .unwrap_or_else(|e| panic!("table name pattern: {e}"))
});

const EVENT_COLUMNS: [&str; 12] = [
    "endpoint_name",
    "environment",
    "url",
    "http_method",
    "checked_at_ms",
    "is_success",
    "http_status",
    "reason",
    "details",
    "latency_ms",
    "json_pointer",
    "expected_value",
];

/// Appends one event per check.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record(
        &self,
        endpoint: &EndpointConfig,
        result: &CheckResult,
        http_status: Option<u16>,
    ) -> ProbeResult<()>;
}

/// The persisted form of a result.
pub fn check_event(
    endpoint: &EndpointConfig,
    default_environment: &str,
    result: &CheckResult,
    http_status: Option<u16>,
) -> CheckEvent {
    CheckEvent {
        endpoint_name: endpoint.name.clone(),
        environment: non_blank(endpoint.environment.as_deref())
            .unwrap_or(default_environment)
            .to_string(),
        url: endpoint.display_url().to_string(),
        http_method: endpoint.method(),
        checked_at_ms: result.checked_at_ms,
        is_success: result.is_success(),
        http_status,
        reason: result.reason.to_string(),
        details: (!result.details.is_empty()).then(|| result.details.clone()),
        latency_ms: result.elapsed_ms(),
        json_pointer: endpoint.success.json_pointer.clone(),
        expected_value: endpoint.success.expected_value.clone(),
    }
}

/// Records into the local redb event store.
pub struct StoreSink {
    store: EventStore,
    default_environment: String,
}

impl StoreSink {
    pub fn new(store: EventStore, default_environment: impl Into<String>) -> Self {
        Self {
            store,
            default_environment: default_environment.into(),
        }
    }
}

#[async_trait]
impl ResultSink for StoreSink {
    async fn record(
        &self,
        endpoint: &EndpointConfig,
        result: &CheckResult,
        http_status: Option<u16>,
    ) -> ProbeResult<()> {
        let event = check_event(endpoint, &self.default_environment, result, http_status);
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.append(&event))
            .await
            .map_err(|e| ProbeError::Sink(format!("store task failed: {e}")))??;
        Ok(())
    }
}

/// Mirrors events into a relational table.
pub struct SqlResultSink {
    sources: Arc<SqlDataSources>,
    data_source: String,
    table: String,
    default_environment: String,
}

impl SqlResultSink {
    pub fn new(
        sources: Arc<SqlDataSources>,
        data_source: impl Into<String>,
        table: impl Into<String>,
        default_environment: impl Into<String>,
    ) -> ProbeResult<Self> {
        let table = table.into();
        if !TABLE_NAME.is_match(&table) {
            return Err(ProbeError::Sink(format!("invalid table name '{table}'")));
        }
        Ok(Self {
            sources,
            data_source: data_source.into(),
            table,
            default_environment: default_environment.into(),
        })
    }
}

#[async_trait]
impl ResultSink for SqlResultSink {
    async fn record(
        &self,
        endpoint: &EndpointConfig,
        result: &CheckResult,
        http_status: Option<u16>,
    ) -> ProbeResult<()> {
        let event = check_event(endpoint, &self.default_environment, result, http_status);
        let pool = self.sources.pool(&self.data_source).await?;

        let placeholders = (1..=EVENT_COLUMNS.len())
            .map(|n| pool.placeholders.nth(n))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.table,
            EVENT_COLUMNS.join(", ")
        );

        sqlx::query(&sql)
            .bind(event.endpoint_name)
            .bind(event.environment)
            .bind(event.url)
            .bind(event.http_method)
            .bind(event.checked_at_ms as i64)
            .bind(event.is_success)
            .bind(event.http_status.map(i64::from))
            .bind(event.reason)
            .bind(event.details)
            .bind(event.latency_ms as i64)
            .bind(event.json_pointer)
            .bind(event.expected_value)
            .execute(&pool.pool)
            .await
            .map_err(|e| ProbeError::Sink(format!("insert into {}: {e}", self.table)))?;

        debug!(endpoint = %endpoint.name, table = %self.table, "event mirrored");
        Ok(())
    }
}

/// Records into every inner sink; a failing sink does not skip the rest.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ResultSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl ResultSink for FanoutSink {
    async fn record(
        &self,
        endpoint: &EndpointConfig,
        result: &CheckResult,
        http_status: Option<u16>,
    ) -> ProbeResult<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.record(endpoint, result, http_status).await {
                warn!(endpoint = %endpoint.name, error = %e, "sink failed");
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProbeError::Sink(failures.join("; ")))
        }
    }
}
