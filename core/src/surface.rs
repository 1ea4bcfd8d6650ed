//! Confidence surface — the one piece of shared mutable state in a batch.
//!
//! RULES:
//!   - Created fresh per batch from the persisted prior density, cleaned
//!     once on the way in: scores clamp to [0, 1], non-finite ones drop.
//!   - The prior is read-only for the whole run; no locking needed to read it.
//!   - During evaluation the surface only appends events. It never scores.
//!   - `seal()` consumes the surface, so no write can race consolidation.

use crate::types::{EntityId, PatternSignature};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Pattern signature → running confidence score in [0, 1].
pub type Density = BTreeMap<PatternSignature, f64>;

/// Clamp scores into [0, 1] and drop non-finite ones. A dropped pattern
/// is treated as unseen and starts again from the initial density.
pub fn clean_density(density: Density) -> Density {
    density
        .into_iter()
        .filter_map(|(signature, score)| {
            if score.is_finite() {
                Some((signature, score.clamp(0.0, 1.0)))
            } else {
                log::warn!("dropping non-finite prior density {score} for {signature}");
                None
            }
        })
        .collect()
}

/// One component, one entity, one dual-path comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceEvent {
    pub pattern_signature: PatternSignature,
    pub entity_id: EntityId,
    pub component_id: String,
    pub matched: bool,
    /// 1.0 for a match, 0.0 for a mismatch.
    pub value: f64,
    /// |path A − path B| for this component.
    pub delta: f64,
    pub timestamp: DateTime<Utc>,
}

pub struct ConfidenceSurface {
    prior: Density,
    log: Mutex<Vec<ConfidenceEvent>>,
}

impl ConfidenceSurface {
    pub fn new(prior: Density) -> Self {
        Self { prior: clean_density(prior), log: Mutex::new(Vec::new()) }
    }

    pub fn prior(&self) -> &Density {
        &self.prior
    }

    pub fn prior_density(&self, signature: &str) -> Option<f64> {
        self.prior.get(signature).copied()
    }

    /// Append one entity's events under a single lock acquisition.
    pub fn append(&self, events: Vec<ConfidenceEvent>) {
        if events.is_empty() {
            return;
        }
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.extend(events);
    }

    pub fn event_count(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Close the surface for writes and hand the log to consolidation.
    pub fn seal(self) -> SealedSurface {
        let events = self.log.into_inner().unwrap_or_else(PoisonError::into_inner);
        SealedSurface { prior: self.prior, events }
    }
}

/// A surface whose write phase is over.
#[derive(Debug, Clone)]
pub struct SealedSurface {
    pub prior: Density,
    pub events: Vec<ConfidenceEvent>,
}
