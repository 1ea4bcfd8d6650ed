//! Rule set definitions: variants, components and their typed configuration.
//!
//! RULES:
//!   - A RuleSet is immutable once loaded for a run.
//!   - Ordinals are unique within a variant and define evaluation order.
//!   - Bands are validated here, at load time. Evaluators assume monotonic
//!     bands and never re-check them.

use crate::error::{CalcError, CalcResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSet {
    pub id: String,
    pub name: String,
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub eligibility: Option<Eligibility>,
    /// Applies when no eligibility rule matches.
    #[serde(default)]
    pub default: bool,
    pub components: Vec<Component>,
}

/// `attribute == equals` on the assigned entity's attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Eligibility {
    pub attribute: String,
    pub equals: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    pub id: String,
    pub name: String,
    pub ordinal: u32,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub config: ComponentConfig,
}

fn enabled_by_default() -> bool {
    true
}

/// Type-specific configuration. The serde tag doubles as the component's
/// type tag, so `(type, configuration)` serialize as one value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComponentConfig {
    TierLookup(TierLookupConfig),
    MatrixLookup(MatrixLookupConfig),
    Percentage(PercentageConfig),
    ConditionalPercentage(ConditionalPercentageConfig),
    PercentageWithGate(PercentageWithGateConfig),
    FlatPercentage(FlatPercentageConfig),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    TierLookup,
    MatrixLookup,
    Percentage,
    ConditionalPercentage,
    PercentageWithGate,
    FlatPercentage,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 6] = [
        Self::TierLookup,
        Self::MatrixLookup,
        Self::Percentage,
        Self::ConditionalPercentage,
        Self::PercentageWithGate,
        Self::FlatPercentage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TierLookup            => "tier_lookup",
            Self::MatrixLookup          => "matrix_lookup",
            Self::Percentage            => "percentage",
            Self::ConditionalPercentage => "conditional_percentage",
            Self::PercentageWithGate    => "percentage_with_gate",
            Self::FlatPercentage        => "flat_percentage",
        }
    }
}

impl ComponentConfig {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::TierLookup(_)            => ComponentKind::TierLookup,
            Self::MatrixLookup(_)          => ComponentKind::MatrixLookup,
            Self::Percentage(_)            => ComponentKind::Percentage,
            Self::ConditionalPercentage(_) => ComponentKind::ConditionalPercentage,
            Self::PercentageWithGate(_)    => ComponentKind::PercentageWithGate,
            Self::FlatPercentage(_)        => ComponentKind::FlatPercentage,
        }
    }
}

// ── Bands ──────────────────────────────────────────────────────────

/// Anything with a half-open `[min, max)` interval. `max == None` is +∞.
pub trait Bounded {
    fn min(&self) -> f64;
    fn max(&self) -> Option<f64>;
    fn label(&self) -> Option<&str>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Band {
    pub min: f64,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A band paying a flat value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tier {
    pub min: f64,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub value: f64,
}

/// A band carrying a rate (0.05 == 5%).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateBucket {
    pub min: f64,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub rate: f64,
}

macro_rules! impl_bounded {
    ($($ty:ty),*) => {$(
        impl Bounded for $ty {
            fn min(&self) -> f64 { self.min }
            fn max(&self) -> Option<f64> { self.max }
            fn label(&self) -> Option<&str> { self.label.as_deref() }
        }
    )*};
}

impl_bounded!(Band, Tier, RateBucket);

// ── Per-type configuration ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierLookupConfig {
    pub metric: String,
    pub tiers: Vec<Tier>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatrixLookupConfig {
    pub row_metric: String,
    pub column_metric: String,
    pub row_bands: Vec<Band>,
    pub column_bands: Vec<Band>,
    /// Grid per sub-population, indexed `[row][column]`.
    pub grids: BTreeMap<String, Vec<Vec<f64>>>,
    /// Entity attribute whose value selects the grid.
    #[serde(default)]
    pub grid_attribute: Option<String>,
    #[serde(default)]
    pub default_grid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PercentageConfig {
    pub metric: String,
    pub rate: f64,
    /// Base values strictly below this pay nothing.
    #[serde(default)]
    pub min_threshold: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionalPercentageConfig {
    /// Metric that selects the bucket.
    pub condition_metric: String,
    /// Amount the bucket's rate is applied to.
    pub base_metric: String,
    pub buckets: Vec<RateBucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PercentageWithGateConfig {
    /// Secondary metric; its bucket selects the rate.
    pub gate_metric: String,
    /// Primary metric the selected rate is applied to.
    pub primary_metric: String,
    pub buckets: Vec<RateBucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlatPercentageConfig {
    pub metric: String,
    pub rate: f64,
}

// ── Loading and validation ─────────────────────────────────────────

impl RuleSet {
    /// Validate the whole rule set and return it with every variant's
    /// components sorted by ordinal. Any problem is a configuration error
    /// that fails the run before an entity is evaluated.
    pub fn validated(mut self) -> CalcResult<Self> {
        if self.variants.is_empty() {
            return Err(CalcError::NoVariants { rule_set_id: self.id });
        }
        for variant in &mut self.variants {
            variant.validate()?;
            variant.components.sort_by_key(|c| c.ordinal);
        }
        Ok(self)
    }

    /// The first variant whose eligibility matches, else the variant
    /// flagged `default`, else the first variant.
    pub fn variant_for(&self, attributes: &BTreeMap<String, String>) -> Option<&Variant> {
        self.variant_index_for(attributes).map(|i| &self.variants[i])
    }

    pub fn variant_index_for(&self, attributes: &BTreeMap<String, String>) -> Option<usize> {
        self.variants
            .iter()
            .position(|v| v.eligibility.as_ref().is_some_and(|e| e.matches(attributes)))
            .or_else(|| self.variants.iter().position(|v| v.default))
            .or_else(|| (!self.variants.is_empty()).then_some(0))
    }

    pub fn component_count(&self) -> usize {
        self.variants.iter().map(|v| v.components.len()).sum()
    }
}

impl Eligibility {
    pub fn matches(&self, attributes: &BTreeMap<String, String>) -> bool {
        attributes.get(&self.attribute).is_some_and(|v| *v == self.equals)
    }
}

impl Variant {
    fn validate(&self) -> CalcResult<()> {
        if self.components.is_empty() {
            return Err(CalcError::EmptyComponents { variant_id: self.id.clone() });
        }
        let mut seen = BTreeSet::new();
        for component in &self.components {
            if !seen.insert(component.ordinal) {
                return Err(CalcError::DuplicateOrdinal {
                    variant_id: self.id.clone(),
                    ordinal:    component.ordinal,
                });
            }
            component.validate()?;
        }
        Ok(())
    }
}

impl Component {
    pub fn validate(&self) -> CalcResult<()> {
        let id = self.id.as_str();
        match &self.config {
            ComponentConfig::TierLookup(c) => {
                validate_bands(id, &c.tiers)?;
                for tier in &c.tiers {
                    validate_amount(id, "tier value", tier.value)?;
                }
            }
            ComponentConfig::MatrixLookup(c) => {
                validate_bands(id, &c.row_bands)?;
                validate_bands(id, &c.column_bands)?;
                validate_grids(id, c)?;
            }
            ComponentConfig::Percentage(c) => {
                validate_rate(id, c.rate)?;
                if let Some(t) = c.min_threshold {
                    validate_amount(id, "min_threshold", t)?;
                }
            }
            ComponentConfig::ConditionalPercentage(c) => {
                validate_bands(id, &c.buckets)?;
                for b in &c.buckets {
                    validate_rate(id, b.rate)?;
                }
            }
            ComponentConfig::PercentageWithGate(c) => {
                validate_bands(id, &c.buckets)?;
                for b in &c.buckets {
                    validate_rate(id, b.rate)?;
                }
            }
            ComponentConfig::FlatPercentage(c) => validate_rate(id, c.rate)?,
        }
        Ok(())
    }
}

fn invalid(component_id: &str, detail: String) -> CalcError {
    CalcError::InvalidConfiguration { component_id: component_id.to_string(), detail }
}

fn non_monotonic(component_id: &str, detail: String) -> CalcError {
    CalcError::NonMonotonicBands { component_id: component_id.to_string(), detail }
}

/// Bands must be non-empty, ordered by non-decreasing `min`, each with
/// `min < max`, non-overlapping, and only the last may be unbounded.
pub fn validate_bands<B: Bounded>(component_id: &str, bands: &[B]) -> CalcResult<()> {
    if bands.is_empty() {
        return Err(invalid(component_id, "no bands configured".into()));
    }
    for (i, band) in bands.iter().enumerate() {
        if !band.min().is_finite() {
            return Err(invalid(component_id, format!("band {i} has a non-finite min")));
        }
        match band.max() {
            Some(max) if !(max > band.min()) => {
                return Err(non_monotonic(
                    component_id,
                    format!("band {i} has max {max} <= min {}", band.min()),
                ));
            }
            None if i + 1 < bands.len() => {
                return Err(non_monotonic(
                    component_id,
                    format!("band {i} is unbounded but is not the last band"),
                ));
            }
            _ => {}
        }
        if let Some(next) = bands.get(i + 1) {
            if next.min() < band.min() {
                return Err(non_monotonic(
                    component_id,
                    format!("band {} min {} is below band {i} min {}", i + 1, next.min(), band.min()),
                ));
            }
            if band.max().is_some_and(|max| max > next.min()) {
                return Err(non_monotonic(
                    component_id,
                    format!("band {i} overlaps band {}", i + 1),
                ));
            }
        }
    }
    Ok(())
}

fn validate_rate(component_id: &str, rate: f64) -> CalcResult<()> {
    if !rate.is_finite() || rate < 0.0 {
        return Err(invalid(component_id, format!("rate {rate} must be a finite, non-negative number")));
    }
    Ok(())
}

fn validate_amount(component_id: &str, what: &str, value: f64) -> CalcResult<()> {
    if !value.is_finite() {
        return Err(invalid(component_id, format!("{what} {value} is not finite")));
    }
    Ok(())
}

fn validate_grids(component_id: &str, c: &MatrixLookupConfig) -> CalcResult<()> {
    if c.grids.is_empty() {
        return Err(invalid(component_id, "no grids configured".into()));
    }
    if let Some(default) = &c.default_grid {
        if !c.grids.contains_key(default) {
            return Err(invalid(component_id, format!("default grid '{default}' is not defined")));
        }
    }
    for (key, grid) in &c.grids {
        if grid.len() != c.row_bands.len() {
            return Err(invalid(
                component_id,
                format!("grid '{key}' has {} rows, expected {}", grid.len(), c.row_bands.len()),
            ));
        }
        for (r, row) in grid.iter().enumerate() {
            if row.len() != c.column_bands.len() {
                return Err(invalid(
                    component_id,
                    format!(
                        "grid '{key}' row {r} has {} columns, expected {}",
                        row.len(),
                        c.column_bands.len()
                    ),
                ));
            }
            for value in row {
                validate_amount(component_id, "grid value", *value)?;
            }
        }
    }
    Ok(())
}
