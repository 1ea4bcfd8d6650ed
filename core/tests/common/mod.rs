//! Shared fixtures for the integration tests.
//!
//! Not every test file uses every helper.
#![allow(dead_code)]

use compcalc_core::{
    batch::{CalculationBatch, EntityResult},
    consolidator::{DensityUpdate, TrainingSignal},
    error::{CalcError, CalcResult},
    metrics::{AssignedEntity, MetricRow, RowScope},
    rule_set::{
        Band, Component, ComponentConfig, Eligibility, FlatPercentageConfig, MatrixLookupConfig,
        PercentageConfig, PercentageWithGateConfig, RateBucket, RuleSet, Tier, TierLookupConfig,
        Variant,
    },
    store::{CalculationStore, Page},
    surface::Density,
};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

pub const TENANT: &str = "tenant-test";
pub const PERIOD: &str = "2024-01";
pub const RULE_SET: &str = "rs-retail";

pub fn band(min: f64, max: Option<f64>) -> Band {
    Band { min, max, label: None }
}

pub fn labelled(min: f64, max: Option<f64>, label: &str) -> Band {
    Band { min, max, label: Some(label.to_string()) }
}

pub fn tier(min: f64, max: Option<f64>, value: f64) -> Tier {
    Tier { min, max, label: None, value }
}

pub fn bucket(min: f64, max: Option<f64>, rate: f64) -> RateBucket {
    RateBucket { min, max, label: None, rate }
}

pub fn component(id: &str, ordinal: u32, config: ComponentConfig) -> Component {
    Component { id: id.to_string(), name: id.to_string(), ordinal, enabled: true, config }
}

/// `[0,100)→0, [100,105)→150, [105,110)→300, [110,∞)→500`.
pub fn attainment_tiers(metric: &str) -> ComponentConfig {
    ComponentConfig::TierLookup(TierLookupConfig {
        metric: metric.to_string(),
        tiers: vec![
            tier(0.0, Some(100.0), 0.0),
            tier(100.0, Some(105.0), 150.0),
            tier(105.0, Some(110.0), 300.0),
            tier(110.0, None, 500.0),
        ],
    })
}

/// Rows `[0,80),[80,100),[100,120),[120,∞)`, columns Low/Medium/High.
pub fn optical_matrix() -> ComponentConfig {
    let mut grids = BTreeMap::new();
    grids.insert(
        "certified".to_string(),
        vec![
            vec![0.0, 0.0, 0.0],
            vec![200.0, 300.0, 400.0],
            vec![500.0, 800.0, 1100.0],
            vec![1000.0, 1300.0, 1800.0],
        ],
    );
    grids.insert(
        "non_certified".to_string(),
        vec![
            vec![0.0, 0.0, 0.0],
            vec![100.0, 150.0, 200.0],
            vec![250.0, 400.0, 550.0],
            vec![500.0, 650.0, 900.0],
        ],
    );
    ComponentConfig::MatrixLookup(MatrixLookupConfig {
        row_metric:    "attainment".into(),
        column_metric: "location.store_volume".into(),
        row_bands: vec![
            band(0.0, Some(80.0)),
            band(80.0, Some(100.0)),
            band(100.0, Some(120.0)),
            band(120.0, None),
        ],
        column_bands: vec![
            labelled(0.0, Some(60_000.0), "Low"),
            labelled(60_000.0, Some(100_000.0), "Medium"),
            labelled(100_000.0, None, "High"),
        ],
        grids,
        grid_attribute: Some("certification".into()),
        default_grid:   Some("non_certified".into()),
    })
}

/// `<100% → 3%`, `≥100% → 5%` on the location's attainment.
pub fn services_gate() -> ComponentConfig {
    ComponentConfig::PercentageWithGate(PercentageWithGateConfig {
        gate_metric:    "location.attainment".into(),
        primary_metric: "services_sales".into(),
        buckets: vec![bucket(0.0, Some(100.0), 0.03), bucket(100.0, None, 0.05)],
    })
}

pub fn retail_rule_set() -> RuleSet {
    RuleSet {
        id:   RULE_SET.into(),
        name: "Retail Plan".into(),
        variants: vec![
            Variant {
                id:   "certified".into(),
                name: "Certified".into(),
                eligibility: Some(Eligibility {
                    attribute: "certification".into(),
                    equals:    "certified".into(),
                }),
                default: false,
                components: vec![
                    component("optical", 1, optical_matrix()),
                    component("services", 2, services_gate()),
                ],
            },
            Variant {
                id:          "standard".into(),
                name:        "Standard".into(),
                eligibility: None,
                default:     true,
                components: vec![
                    component("store-attainment", 1, attainment_tiers("location.attainment")),
                    component(
                        "warranty",
                        2,
                        ComponentConfig::Percentage(PercentageConfig {
                            metric:        "warranty_sales".into(),
                            rate:          0.04,
                            min_threshold: Some(500.0),
                        }),
                    ),
                    component(
                        "accessories",
                        3,
                        ComponentConfig::FlatPercentage(FlatPercentageConfig {
                            metric: "accessory_sales".into(),
                            rate:   0.02,
                        }),
                    ),
                ],
            },
        ],
    }
}

pub fn entity(id: &str, location: Option<&str>, attributes: &[(&str, &str)]) -> AssignedEntity {
    AssignedEntity {
        entity_id:   id.to_string(),
        location_id: location.map(str::to_string),
        attributes: attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

pub fn row(scope: RowScope, scope_id: &str, category: &str, values: &[(&str, f64)]) -> MetricRow {
    MetricRow {
        scope,
        scope_id: scope_id.to_string(),
        category: category.to_string(),
        values:   values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
    }
}

/// Three entities with known payouts: E1 = 440, E2 = 207, E3 = 0.
pub fn retail_population() -> (Vec<AssignedEntity>, Vec<MetricRow>) {
    let entities = vec![
        entity("E1", None, &[("certification", "certified")]),
        entity("E2", Some("S-12"), &[]),
        entity("E3", None, &[]),
    ];
    let rows = vec![
        row(RowScope::Entity, "E1", "sales", &[("store_id", 12.0), ("attainment", 92.0), ("services_sales", 2800.0)]),
        row(RowScope::Entity, "E2", "sales", &[("warranty_sales", 650.0), ("accessory_sales", 1000.0)]),
        row(RowScope::Entity, "E2", "sales", &[("warranty_sales", 150.0), ("accessory_sales", 250.0)]),
        row(RowScope::Entity, "E3", "sales", &[("store_id", 7.0), ("warranty_sales", 300.0)]),
        row(RowScope::Entity, "E3", "sales", &[("store_id", 7.0), ("warranty_sales", 100.0)]),
        row(RowScope::Location, "12", "store", &[("attainment", 105.0), ("store_volume", 75_000.0)]),
        row(RowScope::Location, "S-12", "store", &[("attainment", 101.8), ("store_volume", 40_000.0)]),
        row(RowScope::Location, "7", "store", &[("attainment", 97.1), ("store_volume", 30_000.0)]),
    ];
    (entities, rows)
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// In-memory `CalculationStore` with switchable failures.
#[derive(Default)]
pub struct MemoryStore {
    pub rule_sets: Vec<RuleSet>,
    pub entities: Vec<AssignedEntity>,
    pub rows: Vec<MetricRow>,
    pub prior: Density,

    pub fail_completion: bool,
    pub fail_density: bool,
    pub fail_signals: bool,

    pub batches: RefCell<Vec<CalculationBatch>>,
    pub results: RefCell<Vec<EntityResult>>,
    pub density_updates: RefCell<Vec<DensityUpdate>>,
    pub signals: RefCell<Vec<TrainingSignal>>,
    pub entity_page_requests: Cell<usize>,
    /// Every successful write, in call order.
    pub writes: RefCell<Vec<&'static str>>,
}

impl MemoryStore {
    pub fn retail() -> Self {
        let (entities, rows) = retail_population();
        Self { rule_sets: vec![retail_rule_set()], entities, rows, ..Default::default() }
    }

    pub fn last_batch(&self) -> CalculationBatch {
        self.batches.borrow().last().cloned().expect("at least one batch persisted")
    }
}

fn page_of<T: Clone>(items: &[T], page: Page) -> Vec<T> {
    items.iter().skip(page.offset).take(page.limit).cloned().collect()
}

fn refused(what: &'static str) -> CalcError {
    CalcError::Persistence { what, reason: "store unavailable".into() }
}

impl CalculationStore for MemoryStore {
    fn load_rule_set(&self, rule_set_id: &str) -> CalcResult<Option<RuleSet>> {
        Ok(self.rule_sets.iter().find(|r| r.id == rule_set_id).cloned())
    }

    fn load_assigned_entities(&self, _: &str, _: &str, page: Page) -> CalcResult<Vec<AssignedEntity>> {
        self.entity_page_requests.set(self.entity_page_requests.get() + 1);
        Ok(page_of(&self.entities, page))
    }

    fn load_committed_metric_rows(&self, _: &str, _: &str, page: Page) -> CalcResult<Vec<MetricRow>> {
        Ok(page_of(&self.rows, page))
    }

    fn load_prior_density(&self, _: &str) -> CalcResult<Density> {
        Ok(self.prior.clone())
    }

    fn persist_batch_summary(&self, batch: &CalculationBatch) -> CalcResult<()> {
        self.batches.borrow_mut().push(batch.clone());
        self.writes.borrow_mut().push("batch");
        Ok(())
    }

    fn persist_completed_batch(
        &self,
        batch: &CalculationBatch,
        results: &[EntityResult],
    ) -> CalcResult<()> {
        if self.fail_completion {
            return Err(refused("completed batch"));
        }
        self.batches.borrow_mut().push(batch.clone());
        self.results.borrow_mut().extend_from_slice(results);
        self.writes.borrow_mut().push("completed");
        Ok(())
    }

    fn persist_density_updates(&self, _: &str, updates: &[DensityUpdate]) -> CalcResult<()> {
        if self.fail_density {
            return Err(refused("density updates"));
        }
        self.density_updates.borrow_mut().extend_from_slice(updates);
        self.writes.borrow_mut().push("density");
        Ok(())
    }

    fn persist_training_signals(&self, signals: &[TrainingSignal]) -> CalcResult<()> {
        if self.fail_signals {
            return Err(refused("training signals"));
        }
        self.signals.borrow_mut().extend_from_slice(signals);
        self.writes.borrow_mut().push("signals");
        Ok(())
    }
}
