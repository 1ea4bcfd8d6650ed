//! Intent executor — path B.
//!
//! Evaluates intents in ordinal order. Each intent receives the running
//! list of earlier payouts (`prior_results`) so an operation may build on
//! a prior component's output. Numerics must equal path A for the same
//! configuration and metrics.

use crate::{
    error::{EvalError, EvalResult},
    evaluator::EntityContext,
    intent::{Boundaries, ComponentIntent, GridSelector, InputSource, IntentOperation},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IntentTrace {
    pub component_id: String,
    pub index: usize,
    pub payout: f64,
    pub inputs: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_branch: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    /// How many prior payouts were visible to this intent.
    pub prior_results_seen: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Path B output for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PathBOutcome {
    pub traces: Vec<IntentTrace>,
    /// Payout per intent, in ordinal order.
    pub prior_results: Vec<f64>,
    pub total: f64,
}

pub fn execute_intents(intents: &[ComponentIntent], ctx: EntityContext<'_>) -> PathBOutcome {
    let mut ordered: Vec<&ComponentIntent> = intents.iter().collect();
    ordered.sort_by_key(|i| (i.ordinal, i.index));

    let mut prior_results: Vec<f64> = Vec::with_capacity(ordered.len());
    let mut traces = Vec::with_capacity(ordered.len());

    for intent in ordered {
        let trace = execute_intent(intent, ctx, &prior_results).unwrap_or_else(|e| IntentTrace {
            component_id:       intent.component_id.clone(),
            index:              intent.index,
            prior_results_seen: prior_results.len(),
            error:              Some(e.to_string()),
            ..Default::default()
        });
        prior_results.push(trace.payout);
        traces.push(trace);
    }

    let total = prior_results.iter().sum();
    PathBOutcome { traces, prior_results, total }
}

pub fn execute_intent(
    intent: &ComponentIntent,
    ctx: EntityContext<'_>,
    prior_results: &[f64],
) -> EvalResult<IntentTrace> {
    let mut trace = IntentTrace {
        component_id:       intent.component_id.clone(),
        index:              intent.index,
        prior_results_seen: prior_results.len(),
        ..Default::default()
    };
    if !intent.enabled {
        return Ok(trace);
    }

    let mut inputs = Inputs { ctx, prior_results, used: &mut trace.inputs };

    trace.payout = match &intent.operation {
        IntentOperation::BoundedLookup { input, boundaries, outputs } => {
            let value = inputs.resolve(input)?;
            let branch = branch_of(boundaries, value)?;
            trace.branch = Some(branch);
            *outputs.get(branch).ok_or(EvalError::EmptyTable)?
        }
        IntentOperation::GridLookup {
            row_input,
            row_boundaries,
            column_input,
            column_boundaries,
            selector,
            grids,
        } => {
            let row_value = inputs.resolve(row_input)?;
            let column_value = inputs.resolve(column_input)?;
            let (key, grid) = pick_grid(selector, grids, ctx.attributes)?;
            let row = branch_of(row_boundaries, row_value)?;
            let column = branch_of(column_boundaries, column_value)?;
            trace.grid = Some(key);
            trace.branch = Some(row);
            trace.column_branch = Some(column);
            grid.get(row)
                .and_then(|cells| cells.get(column))
                .copied()
                .ok_or(EvalError::EmptyTable)?
        }
        IntentOperation::ScalarMultiply { input, rate, floor } => {
            let value = inputs.resolve(input)?;
            trace.rate = Some(*rate);
            match floor {
                Some(f) if value < *f => 0.0,
                _ => rate * value,
            }
        }
        IntentOperation::ConditionalRate { condition, boundaries, rates, base } => {
            let condition_value = inputs.resolve(condition)?;
            let base_value = inputs.resolve(base)?;
            let branch = branch_of(boundaries, condition_value)?;
            let rate = *rates.get(branch).ok_or(EvalError::EmptyTable)?;
            trace.branch = Some(branch);
            trace.rate = Some(rate);
            rate * base_value
        }
    };

    Ok(trace)
}

struct Inputs<'a, 'c> {
    ctx: EntityContext<'c>,
    prior_results: &'a [f64],
    used: &'a mut BTreeMap<String, f64>,
}

impl Inputs<'_, '_> {
    fn resolve(&mut self, source: &InputSource) -> EvalResult<f64> {
        match source {
            InputSource::Metric { name } => {
                let value = self.ctx.metrics.get(name).unwrap_or(0.0);
                if !value.is_finite() {
                    return Err(EvalError::NonFiniteMetric { metric: name.clone(), value });
                }
                self.used.insert(name.clone(), value);
                Ok(value)
            }
            InputSource::PriorComponent { index } => {
                let value = *self
                    .prior_results
                    .get(*index)
                    .ok_or(EvalError::PriorResultOutOfRange { index: *index })?;
                self.used.insert(format!("prior[{index}]"), value);
                Ok(value)
            }
            InputSource::Constant { value } => Ok(*value),
        }
    }
}

/// Branch = number of lower boundaries at or below `value`, minus one,
/// floored at the first branch.
fn branch_of(boundaries: &Boundaries, value: f64) -> EvalResult<usize> {
    if boundaries.lower.is_empty() {
        return Err(EvalError::EmptyTable);
    }
    let above = boundaries.lower.partition_point(|lower| *lower <= value);
    Ok(above.saturating_sub(1))
}

fn pick_grid<'g>(
    selector: &GridSelector,
    grids: &'g BTreeMap<String, Vec<Vec<f64>>>,
    attributes: &BTreeMap<String, String>,
) -> EvalResult<(String, &'g Vec<Vec<f64>>)> {
    let requested = selector.attribute.as_deref().and_then(|a| attributes.get(a));
    let candidates = [requested, selector.fallback.as_ref()];
    for key in candidates.into_iter().flatten() {
        if let Some(grid) = grids.get(key) {
            return Ok((key.clone(), grid));
        }
    }
    match grids.iter().next() {
        Some((key, grid)) if grids.len() == 1 => Ok((key.clone(), grid)),
        _ => Err(EvalError::GridNotFound {
            key: requested.cloned().unwrap_or_else(|| "<none>".to_string()),
        }),
    }
}
