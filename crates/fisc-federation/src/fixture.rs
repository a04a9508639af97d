//! Static source adapters, for offline runs and tests
//!
//! A fixture directory holds one `<source_id>.json` file per source. A file
//! is either the payload itself, or an object with a `responses` list whose
//! entries pair `params` with the `payload` to serve when every listed param
//! matches the call:
//!
//! ```json
//! { "responses": [ { "params": { "uf": "MG" }, "payload": [ ... ] } ],
//!   "default": [ ... ] }
//! ```

use async_trait::async_trait;
use fisc_core::{AdapterError, CallParams, FetchOutcome, FiscError, SourceAdapter};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What a static adapter does when called
#[derive(Debug, Clone, PartialEq)]
pub enum FixtureBehavior {
    Respond(Value),
    RespondPartial(Value),
    Fail(AdapterError),
    /// Serve by params, falling back to `default`
    Keyed {
        responses: Vec<(CallParams, Value)>,
        default: Option<Value>,
    },
}

#[derive(Debug, Deserialize)]
struct FixtureFile {
    responses: Vec<FixtureResponse>,
    #[serde(default)]
    default: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FixtureResponse {
    #[serde(default)]
    params: CallParams,
    payload: Value,
}

#[derive(Debug)]
pub struct StaticSourceAdapter {
    source_id: String,
    behavior: FixtureBehavior,
    delay: Duration,
    timeout: Duration,
    calls: AtomicU32,
}

impl StaticSourceAdapter {
    pub fn new(source_id: impl Into<String>, behavior: FixtureBehavior) -> Self {
        Self {
            source_id: source_id.into(),
            behavior,
            delay: Duration::ZERO,
            timeout: Duration::from_secs(30),
            calls: AtomicU32::new(0),
        }
    }

    pub fn responding(source_id: impl Into<String>, payload: Value) -> Self {
        Self::new(source_id, FixtureBehavior::Respond(payload))
    }

    pub fn failing(source_id: impl Into<String>, error: AdapterError) -> Self {
        Self::new(source_id, FixtureBehavior::Fail(error))
    }

    /// Parse a fixture document (plain payload or keyed responses)
    pub fn from_json(source_id: impl Into<String>, document: Value) -> Self {
        let behavior = match document.get("responses") {
            Some(_) => match serde_json::from_value::<FixtureFile>(document.clone()) {
                Ok(file) => FixtureBehavior::Keyed {
                    responses: file
                        .responses
                        .into_iter()
                        .map(|r| (r.params, r.payload))
                        .collect(),
                    default: file.default,
                },
                Err(_) => FixtureBehavior::Respond(document),
            },
            None => FixtureBehavior::Respond(document),
        };
        Self::new(source_id, behavior)
    }

    /// Simulated network latency per call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetches started so far
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, params: &CallParams) -> Result<FetchOutcome, AdapterError> {
        match &self.behavior {
            FixtureBehavior::Respond(payload) => Ok(FetchOutcome::complete(payload.clone())),
            FixtureBehavior::RespondPartial(payload) => Ok(FetchOutcome::partial(payload.clone())),
            FixtureBehavior::Fail(error) => Err(error.clone()),
            FixtureBehavior::Keyed { responses, default } => responses
                .iter()
                .find(|(wanted, _)| wanted.iter().all(|(k, v)| params.get(k) == Some(v)))
                .map(|(_, payload)| payload)
                .or(default.as_ref())
                .map(|payload| FetchOutcome::complete(payload.clone()))
                .ok_or_else(|| AdapterError::Permanent("no fixture for params".to_string())),
        }
    }
}

#[async_trait]
impl SourceAdapter for StaticSourceAdapter {
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
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(AdapterError::Transient("cancelled".to_string()));
                }
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        self.respond(params)
    }
}

/// One adapter per `*.json` file in `dir`, named by file stem
pub fn load_fixture_dir(dir: impl AsRef<Path>) -> Result<Vec<StaticSourceAdapter>, FiscError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| FiscError::Source(format!("cannot read {}: {}", dir.display(), e)))?;

    let mut paths: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut adapters = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(source_id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let content = std::fs::read_to_string(&path)
            .map_err(|e| FiscError::Source(format!("cannot read {}: {}", path.display(), e)))?;
        let document: Value = serde_json::from_str(&content)
            .map_err(|e| FiscError::Serialize(format!("{}: {}", path.display(), e)))?;
        debug!(source_id, path = %path.display(), "Fixture loaded");
        adapters.push(StaticSourceAdapter::from_json(source_id, document));
    }
    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_keyed_fixture_matches_params() {
        let adapter = StaticSourceAdapter::from_json(
            "ibge",
            json!({
                "responses": [
                    { "params": { "uf": "MG" }, "payload": { "populacao": 20 } },
                    { "params": { "uf": "SP" }, "payload": { "populacao": 44 } }
                ],
                "default": { "populacao": 0 }
            }),
        );
        let token = CancellationToken::new();
        let mut params = CallParams::new();
        params.insert("uf".into(), json!("SP"));
        let sp = adapter.fetch(&params, &token).await.unwrap();
        assert_eq!(sp.payload, json!({ "populacao": 44 }));

        params.insert("uf".into(), json!("AC"));
        let other = adapter.fetch(&params, &token).await.unwrap();
        assert_eq!(other.payload, json!({ "populacao": 0 }));
        assert_eq!(adapter.call_count(), 2);
    }

    #[tokio::test]
    async fn test_plain_document_is_served_as_is() {
        let adapter = StaticSourceAdapter::from_json("ceis", json!([{ "cnpj": "1" }]));
        let out = adapter
            .fetch(&CallParams::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!out.partial);
        assert_eq!(out.payload, json!([{ "cnpj": "1" }]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_honours_cancellation() {
        let adapter = StaticSourceAdapter::responding("slow", json!([]))
            .with_delay(Duration::from_secs(60));
        let token = CancellationToken::new();
        token.cancel();
        let err = adapter.fetch(&CallParams::new(), &token).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_load_fixture_dir() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .unwrap()
            .parent()
            .unwrap()
            .join("testing/fixtures/sources");
        let adapters = load_fixture_dir(&dir).unwrap();
        assert!(adapters.iter().any(|a| a.source_id() == "compras_gov"));
    }
}
