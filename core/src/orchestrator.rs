//! Batch orchestrator — one calculation run, start to finish.
//!
//! RUN PHASES (fixed, never reordered):
//!   1. COLLECTING_INPUTS  rule set, assignments, metric rows, prior density.
//!                         Bulk, paginated loads. Configuration errors stop
//!                         the run here, before any entity is evaluated.
//!   2. EVALUATING         per-entity dual-path evaluation on a worker pool.
//!                         Entities are independent; all of them append to
//!                         one shared confidence surface.
//!   3. CONSOLIDATING      exactly once, after every entity has finished.
//!   4. COMPLETE           entity results and batch summary persisted together
//!                         in one store commit, the lifecycle advanced one
//!                         step. Density updates and training signals follow
//!                         as best-effort writes.
//!   FAILED                from any phase. The lifecycle state never moves,
//!                         and a FAILED batch carries no entity results.
//!
//! Best-effort writes run inline, after the COMPLETE commit and before
//! `run_calculation` returns: the SQLite store owns a single connection
//! that cannot be shared with another thread. They are off the critical
//! path in the sense that matters: their failure never touches the batch.

use crate::{
    batch::{BatchSummary, CalculationBatch, DualPathMeta, EntityResult, RunPhase},
    comparator::{DualPathComparator, PreparedVariant},
    config::CalcConfig,
    consolidator::{Consolidation, ExecutionMode, SurfaceConsolidator},
    error::{CalcError, CalcResult},
    evaluator::EntityContext,
    metrics::{AssignedEntity, MetricAggregator, MetricRow, RowScope},
    rule_set::RuleSet,
    store::{load_all_pages, CalculationStore},
    surface::{ConfidenceSurface, Density},
    types::BatchId,
};
use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// What `run_calculation` hands back to its caller.
#[derive(Debug, Clone, Serialize)]
pub struct CalculationOutcome {
    pub batch_id: BatchId,
    pub entity_count: usize,
    pub total_payout: f64,
    /// None (N/A) when the batch had no entities.
    pub concordance_rate: Option<f64>,
    pub per_entity_results: Vec<EntityResult>,
    pub summary: BatchSummary,
}

/// Run one calculation with the given store and configuration.
pub fn run_calculation<S: CalculationStore + ?Sized>(
    store: &S,
    config: &CalcConfig,
    tenant_id: &str,
    period_id: &str,
    rule_set_id: &str,
) -> CalcResult<CalculationOutcome> {
    BatchOrchestrator::new(store, config).run_calculation(tenant_id, period_id, rule_set_id)
}

pub struct BatchOrchestrator<'a, S: CalculationStore + ?Sized> {
    store: &'a S,
    config: &'a CalcConfig,
}

/// Everything loaded in COLLECTING_INPUTS.
struct RunInputs {
    rule_set: RuleSet,
    entities: Vec<AssignedEntity>,
    rows: Vec<MetricRow>,
    prior: Density,
}

/// A validated rule set with each variant's intents and signatures
/// computed once. Holds at least one variant.
struct PreparedRuleSet {
    rule_set: RuleSet,
    variants: Vec<PreparedVariant>,
}

impl PreparedRuleSet {
    fn new(rule_set: RuleSet) -> Self {
        let variants = rule_set.variants.iter().map(PreparedVariant::new).collect();
        Self { rule_set, variants }
    }

    fn select(&self, attributes: &BTreeMap<String, String>) -> &PreparedVariant {
        let index = self.rule_set.variant_index_for(attributes).unwrap_or(0);
        &self.variants[index]
    }
}

/// Committed rows indexed by scope id. Built once, read by every worker.
struct RowIndex<'r> {
    entity: HashMap<&'r str, Vec<&'r MetricRow>>,
    location: HashMap<&'r str, Vec<&'r MetricRow>>,
}

impl<'r> RowIndex<'r> {
    fn new(rows: &'r [MetricRow]) -> Self {
        let mut entity: HashMap<&str, Vec<&MetricRow>> = HashMap::new();
        let mut location: HashMap<&str, Vec<&MetricRow>> = HashMap::new();
        for row in rows {
            let index = match row.scope {
                RowScope::Entity   => &mut entity,
                RowScope::Location => &mut location,
            };
            index.entry(row.scope_id.as_str()).or_default().push(row);
        }
        Self { entity, location }
    }

    fn entity_rows(&self, entity_id: &str) -> &[&'r MetricRow] {
        self.entity.get(entity_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn location_rows(&self, location_id: &str) -> &[&'r MetricRow] {
        self.location.get(location_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl<'a, S: CalculationStore + ?Sized> BatchOrchestrator<'a, S> {
    pub fn new(store: &'a S, config: &'a CalcConfig) -> Self {
        Self { store, config }
    }

    /// Run a full batch. Either completes with a summary or fails outright,
    /// leaving the batch record in FAILED with the reason.
    pub fn run_calculation(
        &self,
        tenant_id: &str,
        period_id: &str,
        rule_set_id: &str,
    ) -> CalcResult<CalculationOutcome> {
        let batch_id = uuid::Uuid::new_v4().to_string();
        let mut batch = CalculationBatch::new(batch_id, tenant_id, period_id, rule_set_id);
        log::info!(
            "batch={} starting: tenant={tenant_id} period={period_id} rule_set={rule_set_id}",
            batch.batch_id
        );

        match self.execute(&mut batch) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                log::error!("batch={} failed: {err}", batch.batch_id);
                batch.fail(err.to_string());
                if let Err(persist_err) = self.store.persist_batch_summary(&batch) {
                    log::error!(
                        "batch={} could not record FAILED state: {persist_err}",
                        batch.batch_id
                    );
                }
                Err(err)
            }
        }
    }

    fn execute(&self, batch: &mut CalculationBatch) -> CalcResult<CalculationOutcome> {
        self.store.persist_batch_summary(batch)?;

        // ── COLLECTING_INPUTS ──────────────────────────────────────
        let inputs = self.collect_inputs(batch)?;
        let prepared = PreparedRuleSet::new(inputs.rule_set);
        let rows = RowIndex::new(&inputs.rows);
        let aggregator = MetricAggregator::new(&self.config.aggregation);

        // ── EVALUATING ─────────────────────────────────────────────
        batch.enter(RunPhase::Evaluating);
        batch.entity_count = inputs.entities.len();
        let surface = ConfidenceSurface::new(inputs.prior);
        let results = self.evaluate_all(&inputs.entities, &prepared, &rows, &aggregator, &surface)?;

        // ── CONSOLIDATING ──────────────────────────────────────────
        // The worker pool has joined: every entity's writes are in.
        batch.enter(RunPhase::Consolidating);
        let consolidation = SurfaceConsolidator::new(&self.config.density).consolidate(
            surface.seal(),
            &batch.batch_id,
            &batch.tenant_id,
        );
        batch.summary = summarize(&results, &consolidation);

        // ── COMPLETE ───────────────────────────────────────────────
        let mut completed = batch.clone();
        completed.enter(RunPhase::Complete);
        completed.advance_lifecycle().ok_or_else(|| CalcError::Persistence {
            what:   "calculation batch",
            reason: format!("lifecycle state {} cannot advance", batch.lifecycle_state.as_str()),
        })?;
        completed.completed_at = Some(Utc::now());
        self.store.persist_completed_batch(&completed, &results)?;
        *batch = completed;

        log::info!(
            "batch={} complete: {} entities, total {:.2}, concordance {}, {} anomalies",
            batch.batch_id,
            batch.entity_count,
            batch.summary.total_payout,
            batch
                .summary
                .concordance_rate
                .map(|r| format!("{:.1}%", r * 100.0))
                .unwrap_or_else(|| "N/A".to_string()),
            batch.summary.anomaly_count,
        );

        self.dispatch_best_effort(batch, &consolidation);

        Ok(CalculationOutcome {
            batch_id:           batch.batch_id.clone(),
            entity_count:       batch.entity_count,
            total_payout:       batch.summary.total_payout,
            concordance_rate:   batch.summary.concordance_rate,
            per_entity_results: results,
            summary:            batch.summary.clone(),
        })
    }

    fn collect_inputs(&self, batch: &CalculationBatch) -> CalcResult<RunInputs> {
        let rule_set = self
            .store
            .load_rule_set(&batch.rule_set_id)?
            .ok_or_else(|| CalcError::RuleSetNotFound { rule_set_id: batch.rule_set_id.clone() })?
            .validated()?;

        let page_size = self.config.batch.page_size;
        let entities = load_all_pages(page_size, |page| {
            self.store.load_assigned_entities(&batch.rule_set_id, &batch.tenant_id, page)
        })?;
        let rows = load_all_pages(page_size, |page| {
            self.store.load_committed_metric_rows(&batch.tenant_id, &batch.period_id, page)
        })?;
        let prior = self.store.load_prior_density(&batch.tenant_id)?;

        log::info!(
            "batch={} inputs: {} variants, {} components, {} entities, {} metric rows, {} prior patterns",
            batch.batch_id,
            rule_set.variants.len(),
            rule_set.component_count(),
            entities.len(),
            rows.len(),
            prior.len(),
        );

        Ok(RunInputs { rule_set, entities, rows, prior })
    }

    fn evaluate_all(
        &self,
        entities: &[AssignedEntity],
        prepared: &PreparedRuleSet,
        rows: &RowIndex<'_>,
        aggregator: &MetricAggregator,
        surface: &ConfidenceSurface,
    ) -> CalcResult<Vec<EntityResult>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.batch.worker_threads)
            .build()
            .map_err(|e| CalcError::WorkerPool(e.to_string()))?;

        let comparator = DualPathComparator::new(surface);
        // `collect` preserves entity order and is the join barrier.
        let results = pool.install(|| {
            entities
                .par_iter()
                .map(|entity| evaluate_entity(entity, prepared, rows, aggregator, &comparator))
                .collect()
        });
        Ok(results)
    }

    /// Density updates and training signals never fail the run. Called only
    /// once the COMPLETE batch is committed.
    fn dispatch_best_effort(&self, batch: &CalculationBatch, consolidation: &Consolidation) {
        if let Err(e) = self.store.persist_density_updates(&batch.tenant_id, &consolidation.updates) {
            log::warn!("batch={} density update persistence failed: {e}", batch.batch_id);
        }
        if let Err(e) = self.store.persist_training_signals(&consolidation.training_signals) {
            log::warn!("batch={} training signal persistence failed: {e}", batch.batch_id);
        }
    }
}

fn evaluate_entity(
    entity: &AssignedEntity,
    prepared: &PreparedRuleSet,
    rows: &RowIndex<'_>,
    aggregator: &MetricAggregator,
    comparator: &DualPathComparator<'_>,
) -> EntityResult {
    let entity_rows = rows.entity_rows(&entity.entity_id);
    let location = entity
        .location_id
        .clone()
        .or_else(|| aggregator.location_key(entity_rows));
    let location_rows = location.as_deref().map(|l| rows.location_rows(l)).unwrap_or(&[]);
    let metrics = aggregator.aggregate(entity_rows, location_rows);

    let variant = prepared.select(&entity.attributes);
    let ctx = EntityContext { metrics: &metrics, attributes: &entity.attributes };
    let outcome = comparator.compare(&entity.entity_id, variant, ctx);

    for degraded in outcome.path_a.results.iter().filter(|r| r.is_degraded()) {
        log::warn!(
            "entity={} component {} degraded to 0: {}",
            entity.entity_id,
            degraded.component_id,
            degraded.explanation.error.as_deref().unwrap_or("unknown error"),
        );
    }

    let component_mismatches = outcome.component_mismatches();
    EntityResult {
        entity_id:    entity.entity_id.clone(),
        variant_id:   variant.variant_id.clone(),
        total_payout: outcome.path_a.total,
        components:   outcome.path_a.results,
        dual_path: DualPathMeta {
            matched:      outcome.matched,
            path_b_total: outcome.path_b.total,
            component_mismatches,
            traces:       outcome.path_b.traces,
        },
    }
}

fn summarize(results: &[EntityResult], consolidation: &Consolidation) -> BatchSummary {
    let entity_count = results.len();
    let entities_matched = results.iter().filter(|r| r.dual_path.matched).count();
    BatchSummary {
        total_payout: results.iter().map(|r| r.total_payout).sum(),
        entity_count,
        entities_matched,
        entities_mismatched: entity_count - entities_matched,
        concordance_rate: (entity_count > 0)
            .then(|| entities_matched as f64 / entity_count as f64),
        components_compared: consolidation.events_total,
        components_matched: consolidation.events_matched,
        component_concordance: consolidation.component_concordance(),
        entities_with_errors: results.iter().filter(|r| r.degraded_components() > 0).count(),
        patterns_consolidated: consolidation.updates.len(),
        anomaly_count: consolidation.anomaly_count(),
        shadow_patterns: consolidation.mode_count(ExecutionMode::Shadow),
        verify_patterns: consolidation.mode_count(ExecutionMode::Verify),
        trusted_patterns: consolidation.mode_count(ExecutionMode::Trusted),
    }
}
