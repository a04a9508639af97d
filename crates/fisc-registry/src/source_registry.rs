//! Source Registry: descriptors from configuration plus bound adapters
use fisc_core::{EngineConfig, SourceAdapter, SourceSettings};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no source `{0}` in the registry")]
    UnknownSource(String),

    #[error("source `{0}` already has an adapter")]
    DuplicateAdapter(String),
}

/// Adapters are stateless and shared across investigations.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, SourceSettings>,
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<SourceSettings>) -> Self {
        Self {
            sources: sources.into_iter().map(|s| (s.id.clone(), s)).collect(),
            adapters: HashMap::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.sources.clone())
    }

    /// Bind an adapter to the source with the same id
    pub fn register_adapter(
        &mut self,
        adapter: Arc<dyn SourceAdapter>,
    ) -> Result<(), RegistryError> {
        let id = adapter.source_id().to_string();
        if !self.sources.contains_key(&id) {
            return Err(RegistryError::UnknownSource(id));
        }
        if self.adapters.contains_key(&id) {
            return Err(RegistryError::DuplicateAdapter(id));
        }
        debug!(source_id = %id, "Adapter registered");
        self.adapters.insert(id, adapter);
        Ok(())
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Result<Self, RegistryError> {
        self.register_adapter(adapter)?;
        Ok(self)
    }

    pub fn descriptor(&self, id: &str) -> Option<&SourceSettings> {
        self.sources.get(id)
    }

    /// All descriptors, ordered by id
    pub fn descriptors(&self) -> impl Iterator<Item = &SourceSettings> {
        self.sources.values()
    }

    pub fn adapter(&self, id: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(id).cloned()
    }

    pub fn has_adapter(&self, id: &str) -> bool {
        self.adapters.contains_key(id)
    }

    /// Sources whose `provides` list contains the key, ordered by id
    pub fn providers_of(&self, key: &str) -> Vec<&SourceSettings> {
        self.sources
            .values()
            .filter(|s| s.provides.iter().any(|p| p == key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut bound: Vec<&String> = self.adapters.keys().collect();
        bound.sort();
        f.debug_struct("SourceRegistry")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("adapters", &bound)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fisc_core::{AdapterError, CallParams, FetchOutcome};
    use tokio_util::sync::CancellationToken;

    struct Named(&'static str);

    #[async_trait]
    impl SourceAdapter for Named {
        fn source_id(&self) -> &str {
            self.0
        }

        async fn fetch(
            &self,
            _params: &CallParams,
            _cancel: &CancellationToken,
        ) -> Result<FetchOutcome, AdapterError> {
            Ok(FetchOutcome::complete(serde_json::json!([])))
        }
    }

    fn registry() -> SourceRegistry {
        SourceRegistry::new(vec![
            SourceSettings::new("receita_cnpj", &["suppliers"]).provides(&["cnpj"]),
            SourceSettings::new("portal_contratos", &["contracts"]).provides(&["cnpj", "org_code"]),
            SourceSettings::new("ceis", &["sanctions"]).requires(&["cnpj"]),
        ])
    }

    #[test]
    fn test_register_adapter() {
        let mut reg = registry();
        reg.register_adapter(Arc::new(Named("ceis"))).unwrap();
        assert!(reg.has_adapter("ceis"));
        assert!(!reg.has_adapter("receita_cnpj"));
        assert_eq!(
            reg.register_adapter(Arc::new(Named("ceis"))),
            Err(RegistryError::DuplicateAdapter("ceis".into()))
        );
        assert_eq!(
            reg.register_adapter(Arc::new(Named("nope"))),
            Err(RegistryError::UnknownSource("nope".into()))
        );
    }

    #[test]
    fn test_providers_are_ordered() {
        let reg = registry();
        let ids: Vec<&str> = reg.providers_of("cnpj").iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["portal_contratos", "receita_cnpj"]);
        assert!(reg.providers_of("uf").is_empty());
    }
}
