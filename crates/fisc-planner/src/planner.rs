//! Execution Planner: capability selection, dependency layering, deadlines
//!
//! 1. Keep sources whose capabilities serve the intent and that have an adapter.
//! 2. A required key not bound by the query's entities must come from a
//!    provider source in an earlier stage; providers are pulled in even when
//!    they do not serve the intent themselves.
//! 3. A source's stage is one past the deepest provider it needs.
//! 4. Within a stage calls run by priority (desc), then source id.

use fisc_core::{
    CallParams, EntityKind, ExecutionPlan, ExtractedEntity, Intent, InvestigationSettings,
    SkippedSource, SourceCall, SourceSettings, Stage,
};
use fisc_registry::{CapabilityMatrix, SourceRegistry};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info};

/// Parameter sets derived from entities.
///
/// The first value of each entity kind goes into the base set. When a kind
/// appears more than once (two regions to compare), the first such kind fans
/// out: one set per distinct value, at most `max_fanout`.
pub fn entity_params(entities: &[ExtractedEntity], max_fanout: usize) -> Vec<CallParams> {
    let mut by_kind: BTreeMap<EntityKind, Vec<&ExtractedEntity>> = BTreeMap::new();
    for entity in entities {
        let values = by_kind.entry(entity.kind).or_default();
        if !values.iter().any(|e| e.value == entity.value) {
            values.push(entity);
        }
    }

    let mut base = CallParams::new();
    for values in by_kind.values() {
        for (key, value) in values[0].value.param_bindings() {
            base.insert(key.to_string(), value);
        }
    }

    let Some(repeated) = by_kind.values().find(|v| v.len() > 1) else {
        return vec![base];
    };

    repeated
        .iter()
        .take(max_fanout.max(1))
        .map(|entity| {
            let mut params = base.clone();
            for (key, value) in entity.value.param_bindings() {
                params.insert(key.to_string(), value);
            }
            params
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct ExecutionPlanner {
    matrix: CapabilityMatrix,
    settings: InvestigationSettings,
}

/// Stage level of a source and the providers it depends on
type Resolution = Result<(usize, Vec<String>), String>;

struct Resolver<'a> {
    registry: &'a SourceRegistry,
    bound: BTreeSet<String>,
    resolved: BTreeMap<String, Resolution>,
    visiting: BTreeSet<String>,
}

impl<'a> Resolver<'a> {
    fn resolve(&mut self, source: &SourceSettings) -> Resolution {
        if let Some(done) = self.resolved.get(&source.id) {
            return done.clone();
        }
        if !self.visiting.insert(source.id.clone()) {
            return Err("dependency cycle".to_string());
        }
        let result = self.compute(source);
        self.visiting.remove(&source.id);
        self.resolved.insert(source.id.clone(), result.clone());
        result
    }

    fn compute(&mut self, source: &SourceSettings) -> Resolution {
        let mut level = 0;
        let mut providers = Vec::new();
        for key in &source.requires {
            if self.bound.contains(key) {
                continue;
            }
            let (provider_level, provider) = self.best_provider(key, &source.id)?;
            level = level.max(provider_level + 1);
            if !providers.contains(&provider) {
                providers.push(provider);
            }
        }
        Ok((level, providers))
    }

    /// Shallowest provider; ties go to higher priority, then lower id
    fn best_provider(&mut self, key: &str, requester: &str) -> Result<(usize, String), String> {
        let candidates: Vec<SourceSettings> = self
            .registry
            .providers_of(key)
            .into_iter()
            .filter(|p| p.id != requester && self.registry.has_adapter(&p.id))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(format!("unsatisfiable requirement `{}`", key));
        }

        let mut best: Option<(usize, Reverse<u8>, String)> = None;
        for provider in candidates {
            if let Ok((level, _)) = self.resolve(&provider) {
                let candidate = (level, Reverse(provider.priority), provider.id.clone());
                if best.as_ref().map_or(true, |b| candidate < *b) {
                    best = Some(candidate);
                }
            }
        }
        best.map(|(level, _, id)| (level, id))
            .ok_or_else(|| format!("no usable provider for `{}`", key))
    }
}

impl ExecutionPlanner {
    pub fn new(settings: InvestigationSettings) -> Self {
        Self {
            matrix: CapabilityMatrix::default(),
            settings,
        }
    }

    pub fn with_matrix(mut self, matrix: CapabilityMatrix) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn matrix(&self) -> &CapabilityMatrix {
        &self.matrix
    }

    /// Build the plan for one investigation with `budget` left to spend
    pub fn plan(
        &self,
        intent: &Intent,
        entities: &[ExtractedEntity],
        registry: &SourceRegistry,
        budget: Duration,
    ) -> ExecutionPlan {
        let mut skipped = Vec::new();
        let mut selected = Vec::new();

        for source in registry.descriptors() {
            if !self.matrix.serves(intent.kind, &source.capabilities) {
                continue;
            }
            if !registry.has_adapter(&source.id) {
                skipped.push(skip(&source.id, "no adapter registered"));
                continue;
            }
            selected.push(source);
        }

        let param_sets = entity_params(entities, self.settings.max_fanout);
        let base = param_sets.first().cloned().unwrap_or_default();

        let mut resolver = Resolver {
            registry,
            bound: base.keys().cloned().collect(),
            resolved: BTreeMap::new(),
            visiting: BTreeSet::new(),
        };

        let mut pending = Vec::new();
        for source in &selected {
            match resolver.resolve(source) {
                Ok(_) => pending.push(source.id.clone()),
                Err(reason) => skipped.push(skip(&source.id, &reason)),
            }
        }

        // Close over providers, recording each source's level
        let mut levels: BTreeMap<String, usize> = BTreeMap::new();
        while let Some(id) = pending.pop() {
            if levels.contains_key(&id) {
                continue;
            }
            if let Some(Ok((level, providers))) = resolver.resolved.get(&id) {
                levels.insert(id.clone(), *level);
                pending.extend(providers.iter().cloned());
            }
        }

        let max_stages = self.settings.max_stages;
        levels.retain(|id, level| {
            let keep = *level < max_stages;
            if !keep {
                skipped.push(skip(id, "exceeds max_stages"));
            }
            keep
        });

        let stage_count = levels.values().max().map_or(0, |m| m + 1);
        let deadline = self.stage_deadline(budget, stage_count);

        let mut stages = Vec::with_capacity(stage_count);
        for index in 0..stage_count {
            let mut sources: Vec<&SourceSettings> = levels
                .iter()
                .filter(|(_, level)| **level == index)
                .filter_map(|(id, _)| registry.descriptor(id))
                .collect();
            sources.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

            let mut calls = Vec::new();
            for source in &sources {
                let depends_on: Vec<String> = source
                    .requires
                    .iter()
                    .filter(|k| !resolver.bound.contains(*k))
                    .cloned()
                    .collect();
                if depends_on.is_empty() && param_sets.len() > 1 {
                    for (n, params) in param_sets.iter().enumerate() {
                        calls.push(
                            SourceCall::new(&source.id, params.clone())
                                .with_call_id(format!("{}#{}", source.id, n + 1)),
                        );
                    }
                } else {
                    calls.push(
                        SourceCall::new(&source.id, base.clone()).with_depends_on(depends_on),
                    );
                }
            }

            stages.push(Stage {
                index,
                calls,
                deadline,
                required: index == 0 || sources.iter().any(|s| s.required),
            });
        }

        skipped.sort_by(|a: &SkippedSource, b| a.source_id.cmp(&b.source_id));
        for s in &skipped {
            debug!(source_id = %s.source_id, reason = %s.reason, "Source skipped");
        }

        let plan = ExecutionPlan {
            intent: intent.kind,
            stages,
            skipped,
            total_budget: budget,
        };
        info!(
            intent = %intent.kind,
            stages = plan.stages.len(),
            calls = plan.call_count(),
            skipped = plan.skipped.len(),
            "Plan built"
        );
        plan
    }

    /// min(configured stage deadline, budget split evenly across stages)
    fn stage_deadline(&self, budget: Duration, stage_count: usize) -> Duration {
        let share = budget / (stage_count.max(1) as u32);
        match self.settings.stage_deadline() {
            Some(configured) => configured.min(share),
            None => share,
        }
    }
}

fn skip(source_id: &str, reason: &str) -> SkippedSource {
    SkippedSource {
        source_id: source_id.to_string(),
        reason: reason.to_string(),
    }
}
