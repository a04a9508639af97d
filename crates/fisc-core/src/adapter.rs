//! Source Adapter: single contract for every external data source
use crate::data_model::CallParams;
use crate::error::AdapterError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Payload returned by a successful fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub payload: Value,
    /// Source answered but signalled truncated or incomplete data
    pub partial: bool,
}

impl FetchOutcome {
    pub fn complete(payload: Value) -> Self {
        Self {
            payload,
            partial: false,
        }
    }

    pub fn partial(payload: Value) -> Self {
        Self {
            payload,
            partial: true,
        }
    }
}

/// Uniform wrapper around one external source.
///
/// Implementations are stateless and shared across concurrent calls. They must:
/// - never block past [`SourceAdapter::timeout`];
/// - return promptly once `cancel` fires, releasing any connection;
/// - classify failures: network errors, timeouts and 5xx are
///   [`AdapterError::Transient`]; 4xx and unparseable bodies are
///   [`AdapterError::Permanent`].
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry id of the source (ex: "portal_transparencia.contratos")
    fn source_id(&self) -> &str;

    /// Upper bound for a single attempt
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Fetch data for one call
    async fn fetch(
        &self,
        params: &CallParams,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, AdapterError>;
}
