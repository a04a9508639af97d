//! Investigator: one query through every stage of the pipeline
//!
//! ```text
//! analyze → plan → for each stage: bind → execute → harvest → merge → score
//! ```
//!
//! Shared state (circuit breakers, rate budget, response cache) is built once
//! per `Investigator`; run concurrent investigations through one instance, or
//! hand the same `Arc`s to several through the builder.

use crate::report::{
    InvestigationRequest, InvestigationResult, InvestigationStatus, SourceHealth, SourceReport,
    StageReport,
};
use fisc_anomaly::AnomalyScorer;
use fisc_core::{
    ConfigError, EngineConfig, InvestigationContext, SourceAdapter, SourceAdapterResult,
    SourceStatus, Stage, ENGINE_VERSION,
};
use fisc_federation::{DataFederationExecutor, ResponseCache};
use fisc_graph::EntityGraphBuilder;
use fisc_in::{GrammarError, IntentClassifier, QueryAnalyzer};
use fisc_planner::{bind_stage, ExecutionPlanner, StageOutputs};
use fisc_registry::{CapabilityMatrix, RegistryError, SourceRegistry};
use fisc_resilience::{CircuitBreakers, RateLimiter};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("CONFIG/{0}")]
    Config(#[from] ConfigError),

    #[error("REGISTRY/{0}")]
    Registry(#[from] RegistryError),

    #[error("GRAMMAR/{0}")]
    Grammar(#[from] GrammarError),
}

// ============================================================================
// BUILDER
// ============================================================================

pub struct InvestigatorBuilder {
    config: EngineConfig,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    classifier: Option<IntentClassifier>,
    matrix: Option<CapabilityMatrix>,
    breakers: Option<Arc<CircuitBreakers>>,
    limiter: Option<Arc<RateLimiter>>,
}

impl InvestigatorBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            adapters: Vec::new(),
            classifier: None,
            matrix: None,
            breakers: None,
            limiter: None,
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn with_adapters(
        mut self,
        adapters: impl IntoIterator<Item = Arc<dyn SourceAdapter>>,
    ) -> Self {
        self.adapters.extend(adapters);
        self
    }

    /// Classifier with a learned model; defaults to the built-in grammar
    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_matrix(mut self, matrix: CapabilityMatrix) -> Self {
        self.matrix = Some(matrix);
        self
    }

    /// Circuit state shared with other investigators
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakers>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Rate budget shared with other investigators (or backed by a shared store)
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn build(self) -> Result<Investigator, EngineError> {
        self.config.validate()?;

        let mut registry = SourceRegistry::from_config(&self.config);
        for adapter in self.adapters {
            registry.register_adapter(adapter)?;
        }
        let registry = Arc::new(registry);

        let analyzer = match self.classifier {
            Some(classifier) => QueryAnalyzer::new(classifier),
            None => QueryAnalyzer::builtin()?,
        };
        let mut planner = ExecutionPlanner::new(self.config.investigation.clone());
        if let Some(matrix) = self.matrix {
            planner = planner.with_matrix(matrix);
        }

        let breakers = self
            .breakers
            .unwrap_or_else(|| Arc::new(CircuitBreakers::new(self.config.circuit_breaker.clone())));
        let limiter = self
            .limiter
            .unwrap_or_else(|| Arc::new(RateLimiter::from_config(&self.config)));

        let mut executor = DataFederationExecutor::new(
            registry.clone(),
            breakers.clone(),
            limiter.clone(),
            &self.config,
        );
        if let Some(cache) = ResponseCache::from_settings(&self.config.cache) {
            executor = executor.with_cache(Arc::new(cache));
        }

        info!(
            sources = registry.len(),
            pool_size = executor.pool_size(),
            "Investigator ready"
        );

        Ok(Investigator {
            scorer: AnomalyScorer::from_config(&self.config),
            config: self.config,
            registry,
            breakers,
            limiter,
            analyzer,
            planner,
            executor,
        })
    }
}

// ============================================================================
// INVESTIGATOR
// ============================================================================

pub struct Investigator {
    config: EngineConfig,
    registry: Arc<SourceRegistry>,
    breakers: Arc<CircuitBreakers>,
    limiter: Arc<RateLimiter>,
    analyzer: QueryAnalyzer,
    planner: ExecutionPlanner,
    executor: DataFederationExecutor,
    scorer: AnomalyScorer,
}

impl Investigator {
    pub fn builder(config: EngineConfig) -> InvestigatorBuilder {
        InvestigatorBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Run one investigation under the configured total budget
    pub async fn investigate(&self, request: InvestigationRequest) -> InvestigationResult {
        let ctx = InvestigationContext::new(
            request.session_id.clone(),
            self.config.investigation.total_budget(),
        );
        self.investigate_with(&ctx, request).await
    }

    /// Run under a caller-owned context; cancelling it stops outstanding calls
    pub async fn investigate_with(
        &self,
        ctx: &InvestigationContext,
        request: InvestigationRequest,
    ) -> InvestigationResult {
        let started = Instant::now();
        let query = request.to_query();
        let analysis = self.analyzer.analyze(&query).await;
        let plan = self.planner.plan(
            &analysis.intent,
            &analysis.entities,
            &self.registry,
            ctx.remaining(),
        );
        info!(
            investigation_id = %ctx.investigation_id,
            intent = %plan.intent,
            stages = plan.stages.len(),
            calls = plan.call_count(),
            "Investigation started"
        );

        let max_fanout = self.config.investigation.max_fanout;
        let mut builder = EntityGraphBuilder::new();
        let mut outputs = StageOutputs::new();
        let mut sources = Vec::new();
        let mut stages = Vec::new();
        let mut degraded = false;
        let mut failure = plan
            .is_empty()
            .then(|| format!("no source available for intent `{}`", plan.intent));

        for stage in &plan.stages {
            if failure.is_some() {
                break;
            }
            if ctx.cancellation().is_cancelled() {
                failure = Some("investigation cancelled".to_string());
                break;
            }

            let bound = bind_stage(stage, &outputs, max_fanout);
            let runnable = Stage {
                index: stage.index,
                calls: bound.calls,
                deadline: stage.deadline.min(ctx.remaining()),
                required: stage.required,
            };
            let outcome = self.executor.execute(&runnable, &ctx.stage_token()).await;

            let mut results = outcome.results.clone();
            results.extend(bound.unresolved.iter().map(|(call, reason)| {
                SourceAdapterResult::failure(call, SourceStatus::PermanentError, reason)
            }));

            for result in results.iter().filter(|r| r.status.is_usable()) {
                if let Some(source) = self.registry.descriptor(&result.source_id) {
                    outputs.harvest(result, &source.provides);
                }
            }
            let merged = builder.merge_all(&results);

            let usable = results.iter().filter(|r| r.status.is_usable()).count();
            let all_failed = !results.is_empty() && usable == 0;
            degraded |= outcome.is_degraded() || !bound.unresolved.is_empty();

            stages.push(StageReport {
                index: stage.index,
                required: stage.required,
                calls: results.len(),
                usable,
                unresolved: bound.unresolved.len(),
                deadline: runnable.deadline,
                deadline_exceeded: outcome.deadline_exceeded,
                elapsed: outcome.elapsed,
                records_merged: merged.mapped,
            });
            sources.extend(results.iter().map(|r| SourceReport::from_result(stage.index, r)));

            if stage.required && all_failed {
                warn!(
                    investigation_id = %ctx.investigation_id,
                    stage = stage.index,
                    "Every source of a required stage failed"
                );
                failure = Some(format!(
                    "every source of required stage {} failed",
                    stage.index
                ));
            }
        }
        if failure.is_none() && ctx.cancellation().is_cancelled() {
            failure = Some("investigation cancelled".to_string());
        }

        let status = match (&failure, degraded) {
            (Some(_), _) => InvestigationStatus::Failed,
            (None, true) => InvestigationStatus::Degraded,
            (None, false) => InvestigationStatus::Completed,
        };

        let graph = builder.into_graph();
        let report = self
            .scorer
            .score(&graph)
            .with_partial(status != InvestigationStatus::Completed);
        let mut summary = graph.summary();
        summary.partial = report.partial;

        let elapsed = started.elapsed();
        info!(
            investigation_id = %ctx.investigation_id,
            status = %status,
            nodes = summary.node_count,
            findings = report.findings.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Investigation finished"
        );

        InvestigationResult {
            investigation_id: ctx.investigation_id.clone(),
            session_id: ctx.session_id.clone(),
            query: request.query,
            status,
            degraded: status != InvestigationStatus::Completed,
            failure_reason: failure,
            intent: analysis.intent,
            entities: analysis.entities,
            graph: summary,
            findings: report.findings,
            inequality: report.inequality,
            contracts_scored: report.contracts_scored,
            sources_consulted: sources,
            skipped_sources: plan.skipped,
            stages,
            started_at: ctx.started_at,
            elapsed,
            engine_version: ENGINE_VERSION.to_string(),
            entity_graph: graph,
        }
    }

    /// Circuit state and remaining rate budget per registered source
    pub async fn source_health(&self) -> Vec<SourceHealth> {
        let mut health = Vec::with_capacity(self.registry.len());
        for source in self.registry.descriptors() {
            health.push(SourceHealth {
                source_id: source.id.clone(),
                has_adapter: self.registry.has_adapter(&source.id),
                circuit: self.breakers.get(&source.id).snapshot(),
                rate_remaining: self.limiter.remaining(&source.id).await,
            });
        }
        health
    }
}

impl std::fmt::Debug for Investigator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Investigator")
            .field("registry", &self.registry)
            .field("executor", &self.executor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fisc_core::{AdapterError, SourceSettings};
    use fisc_federation::StaticSourceAdapter;
    use serde_json::json;

    fn config() -> EngineConfig {
        EngineConfig::with_sources(vec![SourceSettings::new("compras_gov", &["contracts"])])
    }

    #[test]
    fn test_unknown_adapter_is_rejected() {
        let err = Investigator::builder(config())
            .with_adapter(Arc::new(StaticSourceAdapter::responding("siafi", json!([]))))
            .build()
            .unwrap_err();
        assert!(err.to_string().starts_with("REGISTRY/"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = config();
        config.investigation.worker_pool_size = 0;
        let err = Investigator::builder(config).build().unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_adapter_means_failed() {
        let investigator = Investigator::builder(config()).build().unwrap();
        let result = investigator
            .investigate(InvestigationRequest::new("contratos do ministério da saúde"))
            .await;
        assert_eq!(result.status, InvestigationStatus::Failed);
        assert!(result.degraded);
        assert_eq!(result.skipped_sources[0].source_id, "compras_gov");
        assert!(result.sources_consulted.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_health_lists_every_source() {
        let investigator = Investigator::builder(config())
            .with_adapter(Arc::new(StaticSourceAdapter::failing(
                "compras_gov",
                AdapterError::Permanent("HTTP 404".into()),
            )))
            .build()
            .unwrap();
        let health = investigator.source_health().await;
        assert_eq!(health.len(), 1);
        assert!(health[0].has_adapter);
        assert_eq!(health[0].circuit.failure_count, 0);
    }
}
