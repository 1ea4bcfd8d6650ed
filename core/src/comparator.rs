//! Dual-path comparator.
//!
//! For each entity: run path A (evaluator) and path B (intent executor),
//! compare totals and every component's payout within MATCH_TOLERANCE, and
//! write one confidence event per component to the surface regardless of
//! the entity-level outcome.

use crate::{
    evaluator::{evaluate_components, EntityContext, PathAOutcome},
    executor::{execute_intents, PathBOutcome},
    intent::{transform_components, ComponentIntent},
    rule_set::{Component, Variant},
    signature::pattern_signature,
    surface::{ConfidenceEvent, ConfidenceSurface},
    types::{payouts_match, PatternSignature},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A variant with its intents and signatures computed once per run,
/// outside the per-entity loop.
#[derive(Debug, Clone)]
pub struct PreparedVariant {
    pub variant_id: String,
    pub components: Vec<Component>,
    pub intents: Vec<ComponentIntent>,
    pub signatures: Vec<PatternSignature>,
}

impl PreparedVariant {
    pub fn new(variant: &Variant) -> Self {
        Self {
            variant_id: variant.id.clone(),
            components: variant.components.clone(),
            intents:    transform_components(&variant.components),
            signatures: variant.components.iter().map(|c| pattern_signature(&c.config)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentComparison {
    pub component_id: String,
    pub pattern_signature: PatternSignature,
    pub path_a: f64,
    pub path_b: f64,
    pub matched: bool,
}

#[derive(Debug, Clone)]
pub struct DualPathOutcome {
    pub path_a: PathAOutcome,
    pub path_b: PathBOutcome,
    /// `|total A − total B| < MATCH_TOLERANCE`.
    pub matched: bool,
    pub components: Vec<ComponentComparison>,
}

impl DualPathOutcome {
    pub fn component_mismatches(&self) -> usize {
        self.components.iter().filter(|c| !c.matched).count()
    }
}

pub struct DualPathComparator<'s> {
    surface: &'s ConfidenceSurface,
}

impl<'s> DualPathComparator<'s> {
    pub fn new(surface: &'s ConfidenceSurface) -> Self {
        Self { surface }
    }

    pub fn compare(
        &self,
        entity_id: &str,
        variant: &PreparedVariant,
        ctx: EntityContext<'_>,
    ) -> DualPathOutcome {
        let path_a = evaluate_components(&variant.components, ctx);
        let path_b = execute_intents(&variant.intents, ctx);
        let matched = payouts_match(path_a.total, path_b.total);

        let components: Vec<ComponentComparison> = path_a
            .results
            .iter()
            .zip(&variant.signatures)
            .enumerate()
            .map(|(i, (result, signature))| {
                // A missing path B result never agrees.
                let (path_b_payout, matched) = match path_b.prior_results.get(i) {
                    Some(b) => (*b, payouts_match(result.payout, *b)),
                    None    => (0.0, false),
                };
                ComponentComparison {
                    component_id:      result.component_id.clone(),
                    pattern_signature: signature.clone(),
                    path_a:            result.payout,
                    path_b:            path_b_payout,
                    matched,
                }
            })
            .collect();

        let now = Utc::now();
        let events = components
            .iter()
            .map(|c| ConfidenceEvent {
                pattern_signature: c.pattern_signature.clone(),
                entity_id:         entity_id.to_string(),
                component_id:      c.component_id.clone(),
                matched:           c.matched,
                value:             if c.matched { 1.0 } else { 0.0 },
                delta:             (c.path_a - c.path_b).abs(),
                timestamp:         now,
            })
            .collect();
        self.surface.append(events);

        if !matched {
            log::warn!(
                "entity={entity_id} dual-path mismatch: path A {:.2} vs path B {:.2}",
                path_a.total,
                path_b.total
            );
        }

        DualPathOutcome { path_a, path_b, matched, components }
    }
}
