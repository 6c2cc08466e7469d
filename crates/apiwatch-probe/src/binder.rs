//! Data binding: live query values substituted into request templates.
//!
//! A binding runs its named scalar queries against one data source and
//! substitutes the results into `{token}` placeholders. URL substitutions
//! are percent-encoded; body and header substitutions are raw text.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::{Captures, Regex};
use reqwest::RequestBuilder;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use apiwatch_config::{DataBinding, EndpointConfig, non_blank};

use crate::error::ProbeResult;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z0-9_]+)\}").unwrap_or_else(|e| panic!("placeholder pattern: {e}"))
});

/// Unreserved characters (RFC 3986) stay as they are.
const URL_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Runs a single-value query against a named data source.
#[async_trait]
pub trait ScalarQuery: Send + Sync {
    async fn execute_scalar(&self, data_source: &str, sql: &str) -> ProbeResult<String>;
}

/// Query results keyed case-insensitively by query name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMap(HashMap<String, String>);

impl TokenMap {
    pub fn insert(&mut self, name: &str, value: String) {
        self.0.insert(name.to_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for TokenMap {
    fn from(pairs: [(&str, &str); N]) -> Self {
        let mut map = TokenMap::default();
        for (name, value) in pairs {
            map.insert(name, value.to_string());
        }
        map
    }
}

/// Replace every `{token}` in `template`. Unknown tokens become empty.
pub fn substitute(template: &str, tokens: &TokenMap, encode: bool) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let value = tokens.get(&caps[1]).unwrap_or_default();
            if encode {
                utf8_percent_encode(value, URL_VALUE).to_string()
            } else {
                value.to_string()
            }
        })
        .into_owned()
}

/// A request after binding: what to send, before auth is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundRequest {
    pub url: String,
    /// JSON request body.
    pub body: Option<String>,
    pub headers: Vec<(String, String)>,
}

impl BoundRequest {
    pub fn unbound(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Default::default()
        }
    }

    /// Apply the bound body and headers to an outgoing request.
    pub fn apply(&self, mut req: RequestBuilder) -> RequestBuilder {
        if let Some(body) = &self.body {
            req = req
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        req
    }
}

pub struct DataBinder {
    queries: Arc<dyn ScalarQuery>,
}

impl DataBinder {
    pub fn new(queries: Arc<dyn ScalarQuery>) -> Self {
        Self { queries }
    }

    /// Run the binding's queries. A binding without a data source or
    /// without queries yields no tokens.
    pub async fn tokens(&self, binding: &DataBinding) -> ProbeResult<TokenMap> {
        let mut tokens = TokenMap::default();
        let Some(source) = non_blank(binding.data_source.as_deref()) else {
            return Ok(tokens);
        };
        for query in &binding.queries {
            let value = self.queries.execute_scalar(source, &query.sql).await?;
            tokens.insert(&query.name, value);
        }
        debug!(data_source = %source, tokens = tokens.len(), "binding queries executed");
        Ok(tokens)
    }

    /// Materialize the URL, body, and headers for one attempt.
    pub async fn bind(&self, endpoint: &EndpointConfig) -> ProbeResult<BoundRequest> {
        let Some(binding) = &endpoint.binding else {
            return Ok(BoundRequest::unbound(&endpoint.url));
        };

        let tokens = self.tokens(binding).await?;
        let template = non_blank(binding.url_template.as_deref()).unwrap_or(&endpoint.url);

        Ok(BoundRequest {
            url: substitute(template, &tokens, true),
            body: binding
                .body_template
                .as_deref()
                .map(|body| substitute(body, &tokens, false)),
            headers: binding
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), substitute(value, &tokens, false)))
                .collect(),
        })
    }
}
