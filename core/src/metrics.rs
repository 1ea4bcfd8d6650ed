//! Metric aggregation — raw committed rows to one flat MetricMap per entity.
//!
//! RULES:
//!   - Additive fields are summed across rows, in load order.
//!   - Identity-like fields (configured `first_wins_fields`) keep the first
//!     occurrence and are never summed.
//!   - Entity rows contribute `field` and `category.field`.
//!     Location rows contribute `location.field` and `location.category.field`.
//!   - The `location.` namespace belongs to location rows. Entity-row keys
//!     that would land in it (category `location`, or a dotted field name)
//!     are dropped with a warning, never summed into the location's values.
//!   - A MetricMap is never mutated once built.

use crate::{
    config::AggregationConfig,
    types::{EntityId, LocationId},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const LOCATION_PREFIX: &str = "location";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RowScope {
    Entity,
    Location,
}

impl RowScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity   => "entity",
            Self::Location => "location",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "entity"   => Some(Self::Entity),
            "location" => Some(Self::Location),
            _ => None,
        }
    }
}

/// One committed data row, tagged with its sheet/category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRow {
    pub scope: RowScope,
    /// Entity id or location id, depending on `scope`.
    pub scope_id: String,
    pub category: String,
    pub values: BTreeMap<String, f64>,
}

/// An entity assigned to a rule set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignedEntity {
    pub entity_id: EntityId,
    #[serde(default)]
    pub location_id: Option<LocationId>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Metric name → value for one entity in one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricMap {
    values: BTreeMap<String, f64>,
}

/// A metric read at an evaluator call site.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricRead {
    pub value: f64,
    pub missing: bool,
}

impl MetricMap {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Missing metrics read as 0.
    pub fn read(&self, name: &str) -> MetricRead {
        match self.values.get(name) {
            Some(v) => MetricRead { value: *v, missing: false },
            None    => MetricRead { value: 0.0, missing: true },
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for MetricMap {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self { values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect() }
    }
}

pub struct MetricAggregator {
    first_wins: BTreeSet<String>,
    location_key_field: Option<String>,
}

impl MetricAggregator {
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            first_wins: config.first_wins_fields.iter().cloned().collect(),
            location_key_field: config.location_key_field.clone(),
        }
    }

    pub fn is_first_wins(&self, field: &str) -> bool {
        self.first_wins.contains(field)
    }

    /// Collapse an entity's rows (and its location's rows) into one map.
    pub fn aggregate(&self, entity_rows: &[&MetricRow], location_rows: &[&MetricRow]) -> MetricMap {
        let mut values: BTreeMap<String, f64> = BTreeMap::new();
        for row in entity_rows {
            self.fold_row(&mut values, row, None);
        }
        for row in location_rows {
            self.fold_row(&mut values, row, Some(LOCATION_PREFIX));
        }
        MetricMap { values }
    }

    /// The entity's location key from its own rows, first occurrence wins.
    pub fn location_key(&self, entity_rows: &[&MetricRow]) -> Option<LocationId> {
        let field = self.location_key_field.as_deref()?;
        entity_rows
            .iter()
            .find_map(|row| row.values.get(field))
            .map(|v| format_key(*v))
    }

    fn fold_row(&self, values: &mut BTreeMap<String, f64>, row: &MetricRow, prefix: Option<&str>) {
        let mut shadowed = 0usize;
        for (field, value) in &row.values {
            let plain = match prefix {
                Some(p) => format!("{p}.{field}"),
                None    => field.clone(),
            };
            let qualified = match prefix {
                Some(p) => format!("{p}.{}.{field}", row.category),
                None    => format!("{}.{field}", row.category),
            };
            for key in [plain, qualified] {
                if prefix.is_none() && in_location_namespace(&key) {
                    shadowed += 1;
                    continue;
                }
                if self.is_first_wins(field) {
                    values.entry(key).or_insert(*value);
                } else {
                    *values.entry(key).or_insert(0.0) += *value;
                }
            }
        }
        if shadowed > 0 {
            log::warn!(
                "entity {} row '{}': {shadowed} key(s) fall in the reserved '{LOCATION_PREFIX}.' namespace, dropped",
                row.scope_id,
                row.category
            );
        }
    }
}

fn in_location_namespace(key: &str) -> bool {
    key.strip_prefix(LOCATION_PREFIX).is_some_and(|rest| rest.starts_with('.'))
}

/// Numeric identity fields render without a trailing ".0".
fn format_key(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}
