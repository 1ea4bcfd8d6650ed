//! Intent transformer — component definitions to declarative intents.
//!
//! An intent carries the same configuration as its component, reshaped into
//! a small set of generic operations (bounded lookup, grid lookup, scalar
//! multiply, conditional rate) plus its ordinal index. Intents are consumed
//! by the executor (path B), which shares no evaluation code with path A.
//!
//! Inputs are named by `InputSource`, so an operation may read a metric,
//! a constant, or the payout of an earlier component.

use crate::rule_set::{Bounded, Component, ComponentConfig, ComponentKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum InputSource {
    Metric { name: String },
    /// Payout of the component at this ordinal index. Must be earlier.
    PriorComponent { index: usize },
    Constant { value: f64 },
}

impl InputSource {
    fn metric(name: &str) -> Self {
        Self::Metric { name: name.to_string() }
    }
}

/// Ascending lower boundaries; branch `i` covers `[lower[i], lower[i+1])`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Boundaries {
    pub lower: Vec<f64>,
    pub labels: Vec<Option<String>>,
}

impl Boundaries {
    fn from_bands<B: Bounded>(bands: &[B]) -> Self {
        Self {
            lower:  bands.iter().map(|b| b.min()).collect(),
            labels: bands.iter().map(|b| b.label().map(str::to_string)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GridSelector {
    pub attribute: Option<String>,
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IntentOperation {
    /// Output the value attached to the branch the input falls in.
    BoundedLookup {
        input: InputSource,
        boundaries: Boundaries,
        outputs: Vec<f64>,
    },
    /// Two independent branch selections index one grid.
    GridLookup {
        row_input: InputSource,
        row_boundaries: Boundaries,
        column_input: InputSource,
        column_boundaries: Boundaries,
        selector: GridSelector,
        grids: BTreeMap<String, Vec<Vec<f64>>>,
    },
    /// `rate × input`, zero when the input is below `floor`.
    ScalarMultiply {
        input: InputSource,
        rate: f64,
        floor: Option<f64>,
    },
    /// Rate picked by the condition's branch, applied to `base`.
    ConditionalRate {
        condition: InputSource,
        boundaries: Boundaries,
        rates: Vec<f64>,
        base: InputSource,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentIntent {
    pub component_id: String,
    pub kind: ComponentKind,
    pub ordinal: u32,
    /// Position in evaluation order; `PriorComponent` indexes refer to it.
    pub index: usize,
    pub enabled: bool,
    pub operation: IntentOperation,
}

/// Transform a variant's components (sorted by ordinal) into intents.
pub fn transform_components(components: &[Component]) -> Vec<ComponentIntent> {
    components
        .iter()
        .enumerate()
        .map(|(index, c)| transform_component(c, index))
        .collect()
}

pub fn transform_component(component: &Component, index: usize) -> ComponentIntent {
    let operation = match &component.config {
        ComponentConfig::TierLookup(c) => IntentOperation::BoundedLookup {
            input:      InputSource::metric(&c.metric),
            boundaries: Boundaries::from_bands(&c.tiers),
            outputs:    c.tiers.iter().map(|t| t.value).collect(),
        },
        ComponentConfig::MatrixLookup(c) => IntentOperation::GridLookup {
            row_input:         InputSource::metric(&c.row_metric),
            row_boundaries:    Boundaries::from_bands(&c.row_bands),
            column_input:      InputSource::metric(&c.column_metric),
            column_boundaries: Boundaries::from_bands(&c.column_bands),
            selector: GridSelector {
                attribute: c.grid_attribute.clone(),
                fallback:  c.default_grid.clone(),
            },
            grids: c.grids.clone(),
        },
        ComponentConfig::Percentage(c) => IntentOperation::ScalarMultiply {
            input: InputSource::metric(&c.metric),
            rate:  c.rate,
            floor: c.min_threshold,
        },
        ComponentConfig::FlatPercentage(c) => IntentOperation::ScalarMultiply {
            input: InputSource::metric(&c.metric),
            rate:  c.rate,
            floor: None,
        },
        ComponentConfig::ConditionalPercentage(c) => IntentOperation::ConditionalRate {
            condition:  InputSource::metric(&c.condition_metric),
            boundaries: Boundaries::from_bands(&c.buckets),
            rates:      c.buckets.iter().map(|b| b.rate).collect(),
            base:       InputSource::metric(&c.base_metric),
        },
        ComponentConfig::PercentageWithGate(c) => IntentOperation::ConditionalRate {
            condition:  InputSource::metric(&c.gate_metric),
            boundaries: Boundaries::from_bands(&c.buckets),
            rates:      c.buckets.iter().map(|b| b.rate).collect(),
            base:       InputSource::metric(&c.primary_metric),
        },
    };

    ComponentIntent {
        component_id: component.id.clone(),
        kind:         component.config.kind(),
        ordinal:      component.ordinal,
        index,
        enabled:      component.enabled,
        operation,
    }
}
