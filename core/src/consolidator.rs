//! Surface consolidator — the write log reduced to density updates.
//!
//! Runs exactly once per batch, after every entity's writes are in.
//!
//! Density blending is an exponential moving average:
//!
//!   new = (1 − α) · prior + α · match_ratio        α = density.decay
//!
//! which is monotonic in the run's outcome: an all-match run can only raise
//! (or keep) a pattern's density, an all-mismatch run can only lower it.
//! Patterns with no persisted prior start from `initial_density`.
//!
//! The execution mode is advisory. Both paths always run today.

use crate::{
    config::DensityConfig,
    surface::SealedSurface,
    types::{BatchId, PatternSignature, TenantId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Low confidence or anomalous: always dual-path.
    Shadow,
    /// Middling confidence: dual-path, no special handling.
    Verify,
    /// High confidence: path B could be skipped in future runs.
    Trusted,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shadow  => "shadow",
            Self::Verify  => "verify",
            Self::Trusted => "trusted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "shadow"  => Some(Self::Shadow),
            "verify"  => Some(Self::Verify),
            "trusted" => Some(Self::Trusted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DensityUpdate {
    pub pattern_signature: PatternSignature,
    /// Persisted density before this run, if the pattern had one.
    pub prior_density: Option<f64>,
    pub new_density: f64,
    pub observations: usize,
    pub matches: usize,
    pub match_ratio: f64,
    pub anomalous: bool,
    pub execution_mode: ExecutionMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingSignal {
    pub signal_type: String,
    pub batch_id: BatchId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub pattern_signature: Option<PatternSignature>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

pub const SIGNAL_CONCORDANCE: &str = "dual_path_concordance";
pub const SIGNAL_ANOMALY: &str = "density_anomaly";

#[derive(Debug, Clone, Default)]
pub struct Consolidation {
    /// One update per pattern seen this run, ordered by signature.
    pub updates: Vec<DensityUpdate>,
    pub training_signals: Vec<TrainingSignal>,
    pub events_total: usize,
    pub events_matched: usize,
}

impl Consolidation {
    pub fn anomalies(&self) -> impl Iterator<Item = &DensityUpdate> {
        self.updates.iter().filter(|u| u.anomalous)
    }

    pub fn anomaly_count(&self) -> usize {
        self.anomalies().count()
    }

    pub fn mode_count(&self, mode: ExecutionMode) -> usize {
        self.updates.iter().filter(|u| u.execution_mode == mode).count()
    }

    /// Component-level concordance; None when nothing was compared.
    pub fn component_concordance(&self) -> Option<f64> {
        (self.events_total > 0).then(|| self.events_matched as f64 / self.events_total as f64)
    }
}

pub struct SurfaceConsolidator<'c> {
    config: &'c DensityConfig,
}

impl<'c> SurfaceConsolidator<'c> {
    pub fn new(config: &'c DensityConfig) -> Self {
        Self { config }
    }

    pub fn consolidate(
        &self,
        sealed: SealedSurface,
        batch_id: &str,
        tenant_id: &str,
    ) -> Consolidation {
        // (observations, matches) per pattern.
        let mut grouped: BTreeMap<PatternSignature, (usize, usize)> = BTreeMap::new();
        for event in &sealed.events {
            let entry = grouped.entry(event.pattern_signature.clone()).or_insert((0, 0));
            entry.0 += 1;
            if event.matched {
                entry.1 += 1;
            }
        }

        let updates: Vec<DensityUpdate> = grouped
            .into_iter()
            .map(|(signature, (observations, matches))| {
                let prior = sealed.prior.get(&signature).copied();
                self.update_for(signature, prior, observations, matches)
            })
            .collect();

        let events_total = sealed.events.len();
        let events_matched = sealed.events.iter().filter(|e| e.matched).count();

        let now = Utc::now();
        let mut training_signals = vec![TrainingSignal {
            signal_type:       SIGNAL_CONCORDANCE.to_string(),
            batch_id:          batch_id.to_string(),
            tenant_id:         tenant_id.to_string(),
            pattern_signature: None,
            payload: serde_json::json!({
                "components_compared": events_total,
                "components_matched":  events_matched,
                "concordance":         ratio(events_matched, events_total),
                "patterns":            updates.len(),
                "anomalies":           updates.iter().filter(|u| u.anomalous).count(),
            }),
            created_at: now,
        }];

        for update in updates.iter().filter(|u| u.anomalous) {
            log::warn!(
                "batch={batch_id} density anomaly on {}: match ratio {:.3} vs prior {:.3}",
                update.pattern_signature,
                update.match_ratio,
                update.prior_density.unwrap_or(self.config.initial_density),
            );
            training_signals.push(TrainingSignal {
                signal_type:       SIGNAL_ANOMALY.to_string(),
                batch_id:          batch_id.to_string(),
                tenant_id:         tenant_id.to_string(),
                pattern_signature: Some(update.pattern_signature.clone()),
                payload: serde_json::json!({
                    "prior_density": update.prior_density,
                    "match_ratio":   update.match_ratio,
                    "new_density":   update.new_density,
                    "observations":  update.observations,
                }),
                created_at: now,
            });
        }

        for update in &updates {
            log::debug!(
                "batch={batch_id} pattern {} density {:.3} -> {:.3} ({})",
                update.pattern_signature,
                update.prior_density.unwrap_or(self.config.initial_density),
                update.new_density,
                update.execution_mode.as_str(),
            );
        }

        Consolidation { updates, training_signals, events_total, events_matched }
    }

    fn update_for(
        &self,
        signature: PatternSignature,
        prior: Option<f64>,
        observations: usize,
        matches: usize,
    ) -> DensityUpdate {
        let match_ratio = ratio(matches, observations).unwrap_or(1.0);
        // Priors arrive cleaned by the surface: finite and within [0, 1].
        let base = prior.unwrap_or(self.config.initial_density);
        let alpha = self.config.decay;
        // Rounding must not push the blend outside [prior, ratio].
        let (lo, hi) = (base.min(match_ratio), base.max(match_ratio));
        let new_density = ((1.0 - alpha) * base + alpha * match_ratio).clamp(lo, hi);

        let anomalous = prior.is_some_and(|p| p - match_ratio > self.config.anomaly_threshold);

        let execution_mode = if anomalous || new_density < self.config.shadow_threshold {
            ExecutionMode::Shadow
        } else if new_density >= self.config.trusted_threshold {
            ExecutionMode::Trusted
        } else {
            ExecutionMode::Verify
        };

        DensityUpdate {
            pattern_signature: signature,
            prior_density: prior,
            new_density,
            observations,
            matches,
            match_ratio,
            anomalous,
            execution_mode,
        }
    }
}

fn ratio(part: usize, whole: usize) -> Option<f64> {
    (whole > 0).then(|| part as f64 / whole as f64)
}
