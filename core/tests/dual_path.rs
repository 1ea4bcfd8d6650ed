//! Path A / path B equivalence.
//!
//! Randomized valid configurations for every component type, evaluated by
//! both paths against randomized metrics. The two must agree bit for bit.

mod common;

use common::*;
use compcalc_core::{
    evaluator::{evaluate_components, EntityContext},
    executor::{execute_intent, execute_intents},
    intent::{transform_components, ComponentIntent, InputSource, IntentOperation},
    metrics::MetricMap,
    rule_set::{
        Band, Bounded, Component, ComponentConfig, ComponentKind, ConditionalPercentageConfig,
        FlatPercentageConfig, MatrixLookupConfig, PercentageConfig, PercentageWithGateConfig,
        RateBucket, Tier, TierLookupConfig,
    },
    types::payouts_match,
};
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use std::collections::BTreeMap;

const CASES_PER_KIND: usize = 1_000;

/// `(min, max)` pairs for a valid band table: ascending, non-overlapping,
/// possibly gapped, only the last possibly unbounded.
fn random_bounds(rng: &mut Pcg64Mcg) -> Vec<(f64, Option<f64>)> {
    let n = rng.gen_range(1..=5);
    let mut min = rng.gen_range(-100.0..100.0_f64).round();
    let mut bounds = Vec::with_capacity(n);
    for i in 0..n {
        let width = rng.gen_range(1.0..50.0_f64).round();
        let max = min + width;
        let last = i + 1 == n;
        bounds.push((min, if last && rng.gen_bool(0.5) { None } else { Some(max) }));
        let gap = if rng.gen_bool(0.3) { rng.gen_range(1.0..20.0_f64).round() } else { 0.0 };
        min = max + gap;
    }
    bounds
}

fn random_bands(rng: &mut Pcg64Mcg) -> Vec<Band> {
    random_bounds(rng).into_iter().map(|(min, max)| band(min, max)).collect()
}

fn random_tiers(rng: &mut Pcg64Mcg) -> Vec<Tier> {
    random_bounds(rng)
        .into_iter()
        .map(|(min, max)| tier(min, max, rng.gen_range(0.0..2_000.0_f64).round()))
        .collect()
}

fn random_buckets(rng: &mut Pcg64Mcg) -> Vec<RateBucket> {
    random_bounds(rng)
        .into_iter()
        .map(|(min, max)| bucket(min, max, rng.gen_range(0.0..0.2)))
        .collect()
}

fn random_rate(rng: &mut Pcg64Mcg) -> f64 {
    rng.gen_range(0.0..0.25)
}

fn random_config(kind: ComponentKind, rng: &mut Pcg64Mcg) -> ComponentConfig {
    match kind {
        ComponentKind::TierLookup => ComponentConfig::TierLookup(TierLookupConfig {
            metric: "m0".into(),
            tiers:  random_tiers(rng),
        }),
        ComponentKind::MatrixLookup => {
            let row_bands = random_bands(rng);
            let column_bands = random_bands(rng);
            let mut grids = BTreeMap::new();
            for key in ["a", "b"].iter().take(rng.gen_range(1..=2)) {
                let grid: Vec<Vec<f64>> = (0..row_bands.len())
                    .map(|_| {
                        (0..column_bands.len())
                            .map(|_| rng.gen_range(0.0..1_500.0_f64).round())
                            .collect::<Vec<f64>>()
                    })
                    .collect();
                grids.insert(key.to_string(), grid);
            }
            ComponentConfig::MatrixLookup(MatrixLookupConfig {
                row_metric:     "m0".into(),
                column_metric:  "m1".into(),
                row_bands,
                column_bands,
                grids,
                grid_attribute: rng.gen_bool(0.7).then(|| "grid".to_string()),
                default_grid:   rng.gen_bool(0.5).then(|| "a".to_string()),
            })
        }
        ComponentKind::Percentage => ComponentConfig::Percentage(PercentageConfig {
            metric:        "m0".into(),
            rate:          random_rate(rng),
            min_threshold: rng.gen_bool(0.5).then(|| rng.gen_range(-50.0..150.0_f64).round()),
        }),
        ComponentKind::ConditionalPercentage => {
            ComponentConfig::ConditionalPercentage(ConditionalPercentageConfig {
                condition_metric: "m0".into(),
                base_metric:      "m1".into(),
                buckets:          random_buckets(rng),
            })
        }
        ComponentKind::PercentageWithGate => {
            ComponentConfig::PercentageWithGate(PercentageWithGateConfig {
                gate_metric:    "m0".into(),
                primary_metric: "m1".into(),
                buckets:        random_buckets(rng),
            })
        }
        ComponentKind::FlatPercentage => ComponentConfig::FlatPercentage(FlatPercentageConfig {
            metric: "m0".into(),
            rate:   random_rate(rng),
        }),
    }
}

/// Band edges of the config, so metric draws often land exactly on them.
fn edges(config: &ComponentConfig) -> Vec<f64> {
    fn of<B: Bounded>(bands: &[B]) -> Vec<f64> {
        bands.iter().flat_map(|b| [Some(b.min()), b.max()]).flatten().collect()
    }
    match config {
        ComponentConfig::TierLookup(c) => of(&c.tiers),
        ComponentConfig::MatrixLookup(c) => [of(&c.row_bands), of(&c.column_bands)].concat(),
        ComponentConfig::Percentage(c) => c.min_threshold.into_iter().collect(),
        ComponentConfig::ConditionalPercentage(c) => of(&c.buckets),
        ComponentConfig::PercentageWithGate(c) => of(&c.buckets),
        ComponentConfig::FlatPercentage(_) => Vec::new(),
    }
}

fn random_value(rng: &mut Pcg64Mcg, edges: &[f64]) -> f64 {
    let roll = rng.gen_range(0..40);
    match roll {
        0..=15 if !edges.is_empty() => *edges.choose(rng).unwrap_or(&0.0),
        16..=19 => rng.gen_range(-1e6..-1e3),
        20..=23 => rng.gen_range(1e3..1e6),
        24 => f64::NAN,
        _ => rng.gen_range(-200.0..400.0),
    }
}

fn random_metrics(rng: &mut Pcg64Mcg, edges: &[f64]) -> MetricMap {
    let mut values = Vec::new();
    for name in ["m0", "m1"] {
        if rng.gen_bool(0.9) {
            values.push((name, random_value(rng, edges)));
        }
    }
    values.into_iter().collect()
}

fn random_attributes(rng: &mut Pcg64Mcg) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    match rng.gen_range(0..4) {
        0 => {}
        1 => {
            attributes.insert("grid".to_string(), "a".to_string());
        }
        2 => {
            attributes.insert("grid".to_string(), "b".to_string());
        }
        _ => {
            attributes.insert("grid".to_string(), "unknown".to_string());
        }
    }
    attributes
}

#[test]
fn both_paths_agree_on_randomized_configurations() {
    let mut rng = Pcg64Mcg::seed_from_u64(0xC0FF_EE00_D00D_F00D);

    for kind in ComponentKind::ALL {
        for case in 0..CASES_PER_KIND {
            let mut c = component("c", 1, random_config(kind, &mut rng));
            c.enabled = rng.gen_bool(0.95);
            c.validate().unwrap_or_else(|e| panic!("{kind:?} case {case} generated invalid: {e}"));

            let components = vec![c];
            let intents = transform_components(&components);
            let edge_values = edges(&components[0].config);

            for _ in 0..4 {
                let metrics = random_metrics(&mut rng, &edge_values);
                let attributes = random_attributes(&mut rng);
                let ctx = EntityContext { metrics: &metrics, attributes: &attributes };

                let a = evaluate_components(&components, ctx);
                let b = execute_intents(&intents, ctx);

                assert_eq!(
                    a.results[0].payout.to_bits(),
                    b.prior_results[0].to_bits(),
                    "{kind:?} case {case}: path A {} vs path B {}\n  config: {:?}\n  metrics: {:?}\n  attributes: {:?}",
                    a.results[0].payout,
                    b.prior_results[0],
                    components[0].config,
                    metrics,
                    attributes,
                );
                assert!(payouts_match(a.total, b.total));
            }
        }
    }
}

#[test]
fn both_paths_agree_on_a_full_variant() {
    let rule_set = retail_rule_set().validated().unwrap();
    let (entities, _) = retail_population();
    let metrics: MetricMap = [
        ("attainment", 92.0),
        ("location.store_volume", 75_000.0),
        ("location.attainment", 101.8),
        ("services_sales", 2800.0),
        ("warranty_sales", 800.0),
        ("accessory_sales", 1250.0),
    ]
    .into_iter()
    .collect();

    for entity in &entities {
        let variant = rule_set.variant_for(&entity.attributes).unwrap();
        let ctx = EntityContext { metrics: &metrics, attributes: &entity.attributes };
        let a = evaluate_components(&variant.components, ctx);
        let b = execute_intents(&transform_components(&variant.components), ctx);
        assert_eq!(a.total.to_bits(), b.total.to_bits(), "entity {}", entity.entity_id);
        let a_payouts: Vec<f64> = a.results.iter().map(|r| r.payout).collect();
        assert_eq!(a_payouts, b.prior_results);
    }
}

#[test]
fn execution_order_follows_ordinals_not_slice_order() {
    let components: Vec<Component> = retail_rule_set()
        .validated()
        .unwrap()
        .variants
        .into_iter()
        .find(|v| v.id == "standard")
        .unwrap()
        .components;
    let metrics: MetricMap = [
        ("location.attainment", 106.0),
        ("warranty_sales", 800.0),
        ("accessory_sales", 1250.0),
    ]
    .into_iter()
    .collect();
    let attributes = BTreeMap::new();
    let ctx = EntityContext { metrics: &metrics, attributes: &attributes };

    let intents = transform_components(&components);
    let expected = execute_intents(&intents, ctx);

    let mut rng = Pcg64Mcg::seed_from_u64(7);
    for _ in 0..20 {
        let mut shuffled = intents.clone();
        shuffled.shuffle(&mut rng);
        let got = execute_intents(&shuffled, ctx);
        assert_eq!(got.prior_results, expected.prior_results);
        assert_eq!(got.total.to_bits(), expected.total.to_bits());
        let order: Vec<&str> = got.traces.iter().map(|t| t.component_id.as_str()).collect();
        assert_eq!(order, ["store-attainment", "warranty", "accessories"]);
    }
}

#[test]
fn intents_can_read_earlier_payouts() {
    let components = vec![component("base", 1, attainment_tiers("attainment"))];
    let mut intents = transform_components(&components);
    intents.push(ComponentIntent {
        component_id: "kicker".into(),
        kind:         ComponentKind::FlatPercentage,
        ordinal:      2,
        index:        1,
        enabled:      true,
        operation: IntentOperation::ScalarMultiply {
            input: InputSource::PriorComponent { index: 0 },
            rate:  0.1,
            floor: None,
        },
    });

    let metrics: MetricMap = [("attainment", 107.0)].into_iter().collect();
    let attributes = BTreeMap::new();
    let ctx = EntityContext { metrics: &metrics, attributes: &attributes };

    let outcome = execute_intents(&intents, ctx);
    assert_eq!(outcome.prior_results[0], 300.0);
    assert!(approx(outcome.prior_results[1], 30.0));
    assert!(approx(outcome.total, 330.0));
    assert_eq!(outcome.traces[1].prior_results_seen, 1);
    assert_eq!(outcome.traces[1].inputs.get("prior[0]"), Some(&300.0));
}

#[test]
fn forward_reference_to_a_later_payout_is_contained() {
    let intent = ComponentIntent {
        component_id: "early".into(),
        kind:         ComponentKind::FlatPercentage,
        ordinal:      1,
        index:        0,
        enabled:      true,
        operation: IntentOperation::ScalarMultiply {
            input: InputSource::PriorComponent { index: 3 },
            rate:  0.5,
            floor: None,
        },
    };
    let metrics = MetricMap::default();
    let attributes = BTreeMap::new();
    let ctx = EntityContext { metrics: &metrics, attributes: &attributes };

    assert!(execute_intent(&intent, ctx, &[]).is_err());

    let outcome = execute_intents(&[intent], ctx);
    assert_eq!(outcome.total, 0.0);
    assert!(outcome.traces[0].error.is_some());
}
