//! JSON-over-HTTP source adapter
//!
//! Endpoint and query templates take `{key}` placeholders filled from the
//! call params. Failure classification:
//!
//! | Outcome                         | Result                     |
//! |---------------------------------|----------------------------|
//! | 2xx                             | complete payload           |
//! | 206                             | partial payload            |
//! | 408, 429, 5xx, network, timeout | `AdapterError::Transient`  |
//! | other 4xx, 3xx, bad JSON        | `AdapterError::Permanent`  |

use async_trait::async_trait;
use fisc_core::{
    AdapterError, CallParams, ConfigError, FetchOutcome, FiscError, SourceAdapter, SourceSettings,
};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HttpSourceAdapter {
    source_id: String,
    client: Client,
    base_url: Url,
    endpoint: String,
    query: BTreeMap<String, String>,
    timeout: Duration,
}

impl HttpSourceAdapter {
    pub fn from_settings(settings: &SourceSettings) -> Result<Self, FiscError> {
        let field = format!("sources.{}.base_url", settings.id);
        let base = settings
            .base_url
            .as_deref()
            .ok_or_else(|| ConfigError::invalid(&field, "required for http sources"))?;
        let base_url = Url::parse(base).map_err(|e| ConfigError::invalid(&field, e.to_string()))?;

        let client = Client::builder()
            .timeout(settings.timeout())
            .user_agent(concat!("fisc-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FiscError::Source(format!("http client for `{}`: {}", settings.id, e)))?;

        Ok(Self {
            source_id: settings.id.clone(),
            client,
            base_url,
            endpoint: settings.endpoint.clone(),
            query: settings.query.clone(),
            timeout: settings.timeout(),
        })
    }

    /// Share one connection pool between adapters
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn build_url(&self, params: &CallParams) -> Result<Url, AdapterError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                AdapterError::Permanent(format!("base url `{}` cannot take a path", self.base_url))
            })?;
            segments.pop_if_empty();
            for template in self.endpoint.split('/').filter(|s| !s.is_empty()) {
                let segment = fill(template, params).ok_or_else(|| {
                    AdapterError::Permanent(format!(
                        "endpoint `{}` has unbound params",
                        self.endpoint
                    ))
                })?;
                segments.push(&segment);
            }
        }

        let pairs: Vec<(String, String)> = self
            .query
            .iter()
            .filter_map(|(name, template)| fill(template, params).map(|v| (name.clone(), v)))
            .collect();
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<FetchOutcome, AdapterError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if let Some(error) = classify_status(status) {
            return Err(error);
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Transient(format!("body timed out: {}", e))
                } else {
                    AdapterError::Permanent(format!("malformed response: {}", e))
                }
            })?;

        Ok(match status {
            StatusCode::PARTIAL_CONTENT => FetchOutcome::partial(payload),
            _ => FetchOutcome::complete(payload),
        })
    }
}

#[async_trait]
impl SourceAdapter for HttpSourceAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(
        &self,
        params: &CallParams,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, AdapterError> {
        let url = self.build_url(params)?;
        debug!(source_id = %self.source_id, %url, "GET");
        tokio::select! {
            // Dropping the request future closes its connection
            _ = cancel.cancelled() => Err(AdapterError::Transient("cancelled".to_string())),
            outcome = self.get(url) => outcome,
        }
    }
}

fn classify_status(status: StatusCode) -> Option<AdapterError> {
    if status.is_success() {
        return None;
    }
    let reason = format!("HTTP {}", status.as_u16());
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Some(AdapterError::Transient(reason))
    } else {
        Some(AdapterError::Permanent(reason))
    }
}

fn classify_send_error(e: reqwest::Error) -> AdapterError {
    if e.is_builder() || e.is_redirect() {
        AdapterError::Permanent(e.to_string())
    } else if e.is_timeout() {
        AdapterError::Transient(format!("timed out: {}", e))
    } else {
        AdapterError::Transient(e.to_string())
    }
}

/// Replace `{key}` placeholders; `None` when a placeholder has no param
fn fill(template: &str, params: &CallParams) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let close = rest[open..].find('}')? + open;
        out.push_str(&rest[..open]);
        let key = &rest[open + 1..close];
        out.push_str(&param_text(params.get(key)?));
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> CallParams {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_fill_templates() {
        let p = params(&[("cnpj", json!("11222333000181")), ("ibge_code", json!(31))]);
        assert_eq!(fill("fornecedores/{cnpj}", &p).as_deref(), Some("fornecedores/11222333000181"));
        assert_eq!(fill("{ibge_code}", &p).as_deref(), Some("31"));
        assert_eq!(fill("{uf}", &p), None);
        assert_eq!(fill("fixed", &p).as_deref(), Some("fixed"));
    }

    #[test]
    fn test_build_url_encodes_and_drops_unbound_query() {
        let mut settings = SourceSettings::new("compras", &["contracts"])
            .http("https://api.example.gov.br/v1/", "contratos/{uf}");
        settings.query.insert("cnpj".into(), "{cnpj}".into());
        settings.query.insert("pagina".into(), "1".into());
        let adapter = HttpSourceAdapter::from_settings(&settings).unwrap();

        let url = adapter
            .build_url(&params(&[("uf", json!("MG"))]))
            .unwrap();
        assert_eq!(url.as_str(), "https://api.example.gov.br/v1/contratos/MG?pagina=1");

        let err = adapter.build_url(&CallParams::new()).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK).is_none());
        assert!(classify_status(StatusCode::PARTIAL_CONTENT).is_none());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE).unwrap().is_transient());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS).unwrap().is_transient());
        assert!(!classify_status(StatusCode::NOT_FOUND).unwrap().is_transient());
    }

    #[test]
    fn test_missing_base_url_is_a_config_error() {
        let settings = SourceSettings::new("broken", &["contracts"]);
        let err = HttpSourceAdapter::from_settings(&settings).unwrap_err();
        assert!(err.to_string().starts_with("CONFIG/"));
    }
}
