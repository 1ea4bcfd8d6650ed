//! Component evaluator — path A.
//!
//! Pure functions of (component, entity metrics) → payout + explanation.
//! Components are evaluated in ordinal order; a disabled component pays 0.
//! A missing metric reads as 0 and is listed in the explanation.

use crate::{
    error::{EvalError, EvalResult},
    metrics::MetricMap,
    rule_set::{Bounded, Component, ComponentConfig, ComponentKind, MatrixLookupConfig},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What an evaluator sees for one entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityContext<'a> {
    pub metrics: &'a MetricMap,
    pub attributes: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Clamp {
    /// Value below the first band's min.
    Below,
    /// Value at or above the last band's max.
    Above,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchedBand {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clamped: Option<Clamp>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Explanation {
    /// Metric name → value actually used.
    pub inputs: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<MatchedBand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_column: Option<MatchedBand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_metrics: Vec<String>,
    /// Percentage base fell below its minimum threshold.
    #[serde(default)]
    pub gated: bool,
    #[serde(default)]
    pub disabled: bool,
    /// Contained evaluation failure; the payout degraded to 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentResult {
    pub component_id: String,
    pub component_name: String,
    pub kind: ComponentKind,
    pub ordinal: u32,
    pub payout: f64,
    pub explanation: Explanation,
}

impl ComponentResult {
    fn new(component: &Component, payout: f64, explanation: Explanation) -> Self {
        Self {
            component_id:   component.id.clone(),
            component_name: component.name.clone(),
            kind:           component.config.kind(),
            ordinal:        component.ordinal,
            payout,
            explanation,
        }
    }

    /// A component whose evaluation failed: pays 0, carries the reason.
    pub fn degraded(component: &Component, err: &EvalError) -> Self {
        let explanation = Explanation { error: Some(err.to_string()), ..Default::default() };
        Self::new(component, 0.0, explanation)
    }

    pub fn is_degraded(&self) -> bool {
        self.explanation.error.is_some()
    }
}

/// Path A output for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PathAOutcome {
    pub results: Vec<ComponentResult>,
    pub total: f64,
}

/// Evaluate a variant's components (already sorted by ordinal).
/// A component that fails is contained: it pays 0 and is flagged.
pub fn evaluate_components(components: &[Component], ctx: EntityContext<'_>) -> PathAOutcome {
    let results: Vec<ComponentResult> = components
        .iter()
        .map(|c| evaluate_component(c, ctx).unwrap_or_else(|e| ComponentResult::degraded(c, &e)))
        .collect();
    let total = results.iter().map(|r| r.payout).sum();
    PathAOutcome { results, total }
}

pub fn evaluate_component(component: &Component, ctx: EntityContext<'_>) -> EvalResult<ComponentResult> {
    if !component.enabled {
        let explanation = Explanation { disabled: true, ..Default::default() };
        return Ok(ComponentResult::new(component, 0.0, explanation));
    }

    let mut ex = Explanation::default();
    let payout = match &component.config {
        ComponentConfig::TierLookup(c) => {
            let value = read_metric(ctx.metrics, &c.metric, &mut ex)?;
            let matched = resolve_band(&c.tiers, value).ok_or(EvalError::EmptyTable)?;
            let payout = c.tiers[matched.index].value;
            ex.matched = Some(matched);
            payout
        }
        ComponentConfig::MatrixLookup(c) => {
            let row_value = read_metric(ctx.metrics, &c.row_metric, &mut ex)?;
            let col_value = read_metric(ctx.metrics, &c.column_metric, &mut ex)?;
            let (grid_key, grid) = select_grid(c, ctx.attributes)?;
            let row = resolve_band(&c.row_bands, row_value).ok_or(EvalError::EmptyTable)?;
            let col = resolve_band(&c.column_bands, col_value).ok_or(EvalError::EmptyTable)?;
            let payout = grid
                .get(row.index)
                .and_then(|r| r.get(col.index))
                .copied()
                .ok_or(EvalError::EmptyTable)?;
            ex.grid = Some(grid_key.to_string());
            ex.matched = Some(row);
            ex.matched_column = Some(col);
            payout
        }
        ComponentConfig::Percentage(c) => {
            let base = read_metric(ctx.metrics, &c.metric, &mut ex)?;
            ex.rate = Some(c.rate);
            if c.min_threshold.is_some_and(|t| base < t) {
                ex.gated = true;
                0.0
            } else {
                c.rate * base
            }
        }
        ComponentConfig::ConditionalPercentage(c) => {
            let condition = read_metric(ctx.metrics, &c.condition_metric, &mut ex)?;
            let base = read_metric(ctx.metrics, &c.base_metric, &mut ex)?;
            let matched = resolve_band(&c.buckets, condition).ok_or(EvalError::EmptyTable)?;
            let rate = c.buckets[matched.index].rate;
            ex.matched = Some(matched);
            ex.rate = Some(rate);
            rate * base
        }
        ComponentConfig::PercentageWithGate(c) => {
            let gate = read_metric(ctx.metrics, &c.gate_metric, &mut ex)?;
            let primary = read_metric(ctx.metrics, &c.primary_metric, &mut ex)?;
            let matched = resolve_band(&c.buckets, gate).ok_or(EvalError::EmptyTable)?;
            let rate = c.buckets[matched.index].rate;
            ex.matched = Some(matched);
            ex.rate = Some(rate);
            rate * primary
        }
        ComponentConfig::FlatPercentage(c) => {
            let value = read_metric(ctx.metrics, &c.metric, &mut ex)?;
            ex.rate = Some(c.rate);
            c.rate * value
        }
    };

    Ok(ComponentResult::new(component, payout, ex))
}

/// Select the band containing `value` under the half-open `[min, max)` rule.
///
/// Total over the real line for validated bands: values below the first
/// band clamp to it, values past the last band's max clamp to the top band,
/// and a value in a gap between bands falls to the band below the gap.
pub fn resolve_band<B: Bounded>(bands: &[B], value: f64) -> Option<MatchedBand> {
    let first = bands.first()?;
    let matched = |index: usize, clamped: Option<Clamp>| MatchedBand {
        index,
        label: bands[index].label().map(str::to_string),
        clamped,
    };

    if let Some(i) = bands
        .iter()
        .position(|b| value >= b.min() && b.max().is_none_or(|max| value < max))
    {
        return Some(matched(i, None));
    }
    if value < first.min() {
        return Some(matched(0, Some(Clamp::Below)));
    }

    let mut index = 0;
    for (i, band) in bands.iter().enumerate() {
        if band.min() <= value {
            index = i;
        }
    }
    let last = bands.len() - 1;
    let clamped = (index == last).then_some(Clamp::Above);
    Some(matched(index, clamped))
}

fn read_metric(metrics: &MetricMap, name: &str, ex: &mut Explanation) -> EvalResult<f64> {
    let read = metrics.read(name);
    if read.missing {
        ex.missing_metrics.push(name.to_string());
    } else if !read.value.is_finite() {
        return Err(EvalError::NonFiniteMetric { metric: name.to_string(), value: read.value });
    }
    ex.inputs.insert(name.to_string(), read.value);
    Ok(read.value)
}

/// Resolve which grid applies to this entity before indexing.
fn select_grid<'c>(
    c: &'c MatrixLookupConfig,
    attributes: &BTreeMap<String, String>,
) -> EvalResult<(&'c str, &'c Vec<Vec<f64>>)> {
    let wanted = c.grid_attribute.as_ref().and_then(|a| attributes.get(a));
    if let Some((key, grid)) = wanted.and_then(|w| c.grids.get_key_value(w.as_str())) {
        return Ok((key.as_str(), grid));
    }
    if let Some((key, grid)) = c.default_grid.as_ref().and_then(|d| c.grids.get_key_value(d.as_str())) {
        return Ok((key.as_str(), grid));
    }
    if c.grids.len() == 1 {
        if let Some((key, grid)) = c.grids.iter().next() {
            return Ok((key.as_str(), grid));
        }
    }
    Err(EvalError::GridNotFound {
        key: wanted.cloned().unwrap_or_else(|| "<none>".to_string()),
    })
}
