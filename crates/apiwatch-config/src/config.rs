//! `apiwatch.toml` configuration parser.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};

/// Endpoint loops never run more often than this, whatever the config says.
pub const MIN_INTERVAL: Duration = Duration::from_secs(5);

const HTTP_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "TRACE",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_timeout")]
    pub default_timeout: String,
    #[serde(default = "default_environment")]
    pub default_environment: String,
    /// Profile used by endpoints that set no `auth_ref` of their own.
    #[serde(default)]
    pub default_auth_ref: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub auth_profiles: BTreeMap<String, AuthConfig>,
    #[serde(default)]
    pub data_sources: BTreeMap<String, DataSourceConfig>,
    #[serde(default)]
    pub vault: Option<VaultConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sql_sink: Option<SqlSinkConfig>,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub auth_ref: Option<String>,
    #[serde(default)]
    pub success: SuccessRule,
    #[serde(default)]
    pub binding: Option<DataBinding>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout(),
            default_environment: default_environment(),
            default_auth_ref: None,
            endpoints: Vec::new(),
            auth_profiles: BTreeMap::new(),
            data_sources: BTreeMap::new(),
            vault: None,
            store: StoreConfig::default(),
            sql_sink: None,
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            method: default_method(),
            interval: default_interval(),
            environment: None,
            auth: AuthConfig::default(),
            auth_ref: None,
            success: SuccessRule::default(),
            binding: None,
            tags: BTreeMap::new(),
        }
    }
}

/// Credential material, either a shared profile or a per-endpoint override.
///
/// Every field is optional so that endpoint values can be layered over a
/// profile field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// `None`, `ApiKey` or `OAuth2` (matched case-insensitively).
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub resource: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessRule {
    #[serde(default = "default_status_codes")]
    pub status_codes: Vec<u16>,
    /// RFC 6901 pointer into the response body, e.g. `/status`.
    #[serde(default)]
    pub json_pointer: Option<String>,
    #[serde(default)]
    pub expected_value: Option<String>,
    #[serde(default)]
    pub max_latency_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
}

impl Default for SuccessRule {
    fn default() -> Self {
        Self {
            status_codes: default_status_codes(),
            json_pointer: None,
            expected_value: None,
            max_latency_ms: None,
            case_insensitive: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataBinding {
    #[serde(default)]
    pub data_source: Option<String>,
    /// Each query's `name` becomes a `{name}` placeholder.
    #[serde(default)]
    pub queries: Vec<QuerySpec>,
    #[serde(default)]
    pub url_template: Option<String>,
    #[serde(default)]
    pub body_template: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySpec {
    pub name: String,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// sqlx connection URL; may be an `env:` or `kv:` reference.
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub url: String,
    #[serde(default = "default_vault_api_version")]
    pub api_version: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_vault_scope")]
    pub scope: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlSinkConfig {
    pub data_source: String,
    #[serde(default = "default_sink_table")]
    pub table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notify_timeout")]
    pub timeout: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout: default_notify_timeout(),
        }
    }
}

fn default_timeout() -> String {
    "10s".to_string()
}

fn default_environment() -> String {
    "Prod".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_interval() -> String {
    "300s".to_string()
}

fn default_status_codes() -> Vec<u16> {
    vec![200]
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    4
}

fn default_vault_api_version() -> String {
    "7.4".to_string()
}

fn default_vault_scope() -> String {
    "https://vault.azure.net/.default".to_string()
}

fn default_store_path() -> String {
    "apiwatch.redb".to_string()
}

fn default_sink_table() -> String {
    "api_check_event".to_string()
}

fn default_notify_timeout() -> String {
    "5s".to_string()
}

fn lookup<'a, V>(map: &'a BTreeMap<String, V>, name: &str) -> Option<&'a V> {
    map.get(name).or_else(|| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

fn duration_field(field: &str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

impl MonitorConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Per-attempt HTTP timeout.
    pub fn timeout(&self) -> ConfigResult<Duration> {
        duration_field("default_timeout", &self.default_timeout)
    }

    /// Case-insensitive auth profile lookup.
    pub fn auth_profile(&self, name: &str) -> Option<&AuthConfig> {
        lookup(&self.auth_profiles, name)
    }

    /// Case-insensitive data source lookup.
    pub fn data_source(&self, name: &str) -> Option<&DataSourceConfig> {
        lookup(&self.data_sources, name)
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints
            .iter()
            .find(|ep| ep.name.eq_ignore_ascii_case(name))
    }

    /// The profile reference in effect for an endpoint, if any.
    pub fn auth_ref_for<'a>(&'a self, endpoint: &'a EndpointConfig) -> Option<&'a str> {
        non_blank(endpoint.auth_ref.as_deref()).or_else(|| non_blank(self.default_auth_ref.as_deref()))
    }

    /// Environment tag recorded with an endpoint's events.
    pub fn environment_for<'a>(&'a self, endpoint: &'a EndpointConfig) -> &'a str {
        non_blank(endpoint.environment.as_deref()).unwrap_or(&self.default_environment)
    }

    /// Check cross references and value formats.
    pub fn validate(&self) -> ConfigResult<()> {
        self.timeout()?;
        duration_field("notify.timeout", &self.notify.timeout)?;

        if let Some(name) = non_blank(self.default_auth_ref.as_deref()) {
            if self.auth_profile(name).is_none() {
                return Err(ConfigError::UnknownAuthProfile {
                    name: name.to_string(),
                    referrer: "default_auth_ref".to_string(),
                });
            }
        }

        if let Some(sink) = &self.sql_sink {
            if self.data_source(&sink.data_source).is_none() {
                return Err(ConfigError::UnknownDataSource {
                    name: sink.data_source.clone(),
                    referrer: "sql_sink".to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for (index, ep) in self.endpoints.iter().enumerate() {
            let invalid = |message: String| ConfigError::InvalidEndpoint { index, message };

            if ep.name.trim().is_empty() {
                return Err(invalid("name must not be empty".to_string()));
            }
            if !seen.insert(ep.name.to_ascii_lowercase()) {
                return Err(ConfigError::DuplicateEndpoint(ep.name.clone()));
            }
            if ep.url.trim().is_empty() && ep.binding.as_ref().and_then(|b| b.url_template.as_ref()).is_none() {
                return Err(invalid(format!("'{}' has no url", ep.name)));
            }
            if !HTTP_METHODS.contains(&ep.method.to_ascii_uppercase().as_str()) {
                return Err(invalid(format!("'{}' has unknown method {}", ep.name, ep.method)));
            }
            duration_field(&format!("endpoints.{}.interval", ep.name), &ep.interval)?;

            if ep.success.status_codes.is_empty() {
                return Err(invalid(format!("'{}' accepts no status codes", ep.name)));
            }
            if let Some(pointer) = non_blank(ep.success.json_pointer.as_deref()) {
                if !pointer.starts_with('/') {
                    return Err(invalid(format!(
                        "'{}' json_pointer must start with '/'",
                        ep.name
                    )));
                }
            }

            if let Some(name) = non_blank(ep.auth_ref.as_deref()) {
                if self.auth_profile(name).is_none() {
                    return Err(ConfigError::UnknownAuthProfile {
                        name: name.to_string(),
                        referrer: ep.name.clone(),
                    });
                }
            }

            if let Some(source) = ep
                .binding
                .as_ref()
                .and_then(|b| non_blank(b.data_source.as_deref()))
            {
                if self.data_source(source).is_none() {
                    return Err(ConfigError::UnknownDataSource {
                        name: source.to_string(),
                        referrer: ep.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

impl EndpointConfig {
    /// Configured polling interval, never below [`MIN_INTERVAL`].
    ///
    /// Unparseable values fall back to the 300s default; `validate` rejects
    /// them before any loop starts.
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval)
            .unwrap_or(Duration::from_secs(300))
            .max(MIN_INTERVAL)
    }

    pub fn method(&self) -> String {
        self.method.trim().to_ascii_uppercase()
    }

    /// The URL recorded with events: the binding template when present.
    pub fn display_url(&self) -> &str {
        self.binding
            .as_ref()
            .and_then(|b| b.url_template.as_deref())
            .unwrap_or(&self.url)
    }
}

/// `Some(s)` only when `s` contains something other than whitespace.
pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
