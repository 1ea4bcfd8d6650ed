//! Calculation batch records and per-entity results.
//!
//! Lifecycle state and run phase are tracked separately:
//!   - `LifecycleState` is the batch's business lifecycle. A successful run
//!     advances it by exactly one step (DRAFT → PREVIEW).
//!   - `RunPhase` is the orchestrator's state machine for this run.
//!     A failed run ends in FAILED with the lifecycle state untouched.

use crate::{
    evaluator::ComponentResult,
    executor::IntentTrace,
    types::{BatchId, EntityId, PeriodId, TenantId},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Draft,
    Preview,
    Reconcile,
    Official,
    PendingApproval,
    Approved,
    Posted,
    Closed,
    Paid,
    Published,
}

impl LifecycleState {
    /// The next state, or None at the end of the lifecycle.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Draft           => Some(Self::Preview),
            Self::Preview         => Some(Self::Reconcile),
            Self::Reconcile       => Some(Self::Official),
            Self::Official        => Some(Self::PendingApproval),
            Self::PendingApproval => Some(Self::Approved),
            Self::Approved        => Some(Self::Posted),
            Self::Posted          => Some(Self::Closed),
            Self::Closed          => Some(Self::Paid),
            Self::Paid            => Some(Self::Published),
            Self::Published       => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft           => "DRAFT",
            Self::Preview         => "PREVIEW",
            Self::Reconcile       => "RECONCILE",
            Self::Official        => "OFFICIAL",
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::Approved        => "APPROVED",
            Self::Posted          => "POSTED",
            Self::Closed          => "CLOSED",
            Self::Paid            => "PAID",
            Self::Published       => "PUBLISHED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::Draft,
            Self::Preview,
            Self::Reconcile,
            Self::Official,
            Self::PendingApproval,
            Self::Approved,
            Self::Posted,
            Self::Closed,
            Self::Paid,
            Self::Published,
        ]
        .into_iter()
        .find(|state| state.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    CollectingInputs,
    Evaluating,
    Consolidating,
    Complete,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectingInputs => "COLLECTING_INPUTS",
            Self::Evaluating       => "EVALUATING",
            Self::Consolidating    => "CONSOLIDATING",
            Self::Complete         => "COMPLETE",
            Self::Failed           => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::CollectingInputs,
            Self::Evaluating,
            Self::Consolidating,
            Self::Complete,
            Self::Failed,
        ]
        .into_iter()
        .find(|phase| phase.as_str() == s)
    }

    /// Legal orchestrator transitions. FAILED is reachable from any
    /// non-terminal phase.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (Self::CollectingInputs, Self::Evaluating)
                | (Self::Evaluating, Self::Consolidating)
                | (Self::Consolidating, Self::Complete)
                | (Self::CollectingInputs | Self::Evaluating | Self::Consolidating, Self::Failed)
        )
    }
}

/// Dual-path metadata carried on each entity result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DualPathMeta {
    pub matched: bool,
    pub path_b_total: f64,
    pub component_mismatches: usize,
    pub traces: Vec<IntentTrace>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityResult {
    pub entity_id: EntityId,
    pub variant_id: String,
    /// Path A results; authoritative for persistence.
    pub components: Vec<ComponentResult>,
    pub total_payout: f64,
    pub dual_path: DualPathMeta,
}

impl EntityResult {
    /// Components whose evaluation failed and degraded to 0.
    pub fn degraded_components(&self) -> usize {
        self.components.iter().filter(|c| c.is_degraded()).count()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchSummary {
    pub total_payout: f64,
    pub entity_count: usize,
    pub entities_matched: usize,
    pub entities_mismatched: usize,
    /// Fraction of entities whose totals agreed. None (N/A) for an empty batch.
    pub concordance_rate: Option<f64>,
    pub components_compared: usize,
    pub components_matched: usize,
    pub component_concordance: Option<f64>,
    pub entities_with_errors: usize,
    pub patterns_consolidated: usize,
    pub anomaly_count: usize,
    pub shadow_patterns: usize,
    pub verify_patterns: usize,
    pub trusted_patterns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalculationBatch {
    pub batch_id: BatchId,
    pub tenant_id: TenantId,
    pub period_id: PeriodId,
    pub rule_set_id: String,
    pub lifecycle_state: LifecycleState,
    pub run_phase: RunPhase,
    pub entity_count: usize,
    pub summary: BatchSummary,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CalculationBatch {
    pub fn new(batch_id: BatchId, tenant_id: &str, period_id: &str, rule_set_id: &str) -> Self {
        Self {
            batch_id,
            tenant_id:       tenant_id.to_string(),
            period_id:       period_id.to_string(),
            rule_set_id:     rule_set_id.to_string(),
            lifecycle_state: LifecycleState::Draft,
            run_phase:       RunPhase::CollectingInputs,
            entity_count:    0,
            summary:         BatchSummary::default(),
            failure_reason:  None,
            created_at:      Utc::now(),
            completed_at:    None,
        }
    }

    /// Move the run to `next`. Illegal transitions are a programming error.
    pub fn enter(&mut self, next: RunPhase) {
        assert!(
            self.run_phase.can_transition_to(next),
            "illegal run phase transition {} -> {}",
            self.run_phase.as_str(),
            next.as_str()
        );
        log::info!("batch={} phase {} -> {}", self.batch_id, self.run_phase.as_str(), next.as_str());
        self.run_phase = next;
    }

    pub fn fail(&mut self, reason: String) {
        if self.run_phase != RunPhase::Failed {
            self.enter(RunPhase::Failed);
        }
        self.failure_reason = Some(reason);
        self.completed_at = Some(Utc::now());
    }

    /// Advance the lifecycle exactly one step. Returns the new state.
    pub fn advance_lifecycle(&mut self) -> Option<LifecycleState> {
        let next = self.lifecycle_state.next()?;
        self.lifecycle_state = next;
        Some(next)
    }
}
