//! SQLite persistence layer — the data-access collaborator.
//!
//! RULE: Only the store talks to the database.
//! The orchestrator depends on the `CalculationStore` trait; `CalcStore`
//! is its SQLite implementation. Loads are bulk and paginated and happen
//! outside the per-entity loop.

use crate::{
    batch::{CalculationBatch, EntityResult},
    consolidator::{DensityUpdate, TrainingSignal},
    error::CalcResult,
    metrics::{AssignedEntity, MetricRow},
    rule_set::RuleSet,
    surface::Density,
};
use rusqlite::Connection;

mod density;
mod metrics;
mod results;
mod rule_set;

/// One page of a paginated load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    pub fn next(self) -> Self {
        Self { offset: self.offset + self.limit, limit: self.limit }
    }
}

/// Drain a paginated load until a short page comes back.
pub fn load_all_pages<T>(
    page_size: usize,
    mut fetch: impl FnMut(Page) -> CalcResult<Vec<T>>,
) -> CalcResult<Vec<T>> {
    let mut page = Page::first(page_size.max(1));
    let mut all = Vec::new();
    loop {
        let rows = fetch(page)?;
        let short = rows.len() < page.limit;
        all.extend(rows);
        if short {
            return Ok(all);
        }
        page = page.next();
    }
}

/// Everything the calculation core reads from or writes to persistence.
pub trait CalculationStore {
    fn load_rule_set(&self, rule_set_id: &str) -> CalcResult<Option<RuleSet>>;

    fn load_assigned_entities(
        &self,
        rule_set_id: &str,
        tenant_id: &str,
        page: Page,
    ) -> CalcResult<Vec<AssignedEntity>>;

    fn load_committed_metric_rows(
        &self,
        tenant_id: &str,
        period_id: &str,
        page: Page,
    ) -> CalcResult<Vec<MetricRow>>;

    fn load_prior_density(&self, tenant_id: &str) -> CalcResult<Density>;

    /// Batch state changes before completion, and the FAILED record.
    fn persist_batch_summary(&self, batch: &CalculationBatch) -> CalcResult<()>;

    /// The COMPLETE batch and its entity results, atomically. A failure
    /// here leaves no entity results behind for the batch.
    fn persist_completed_batch(
        &self,
        batch: &CalculationBatch,
        results: &[EntityResult],
    ) -> CalcResult<()>;

    /// Best-effort: failures are logged by the caller, never fatal.
    fn persist_density_updates(&self, tenant_id: &str, updates: &[DensityUpdate]) -> CalcResult<()>;

    /// Best-effort: failures are logged by the caller, never fatal.
    fn persist_training_signals(&self, signals: &[TrainingSignal]) -> CalcResult<()>;
}

pub struct CalcStore {
    conn: Connection,
}

impl CalcStore {
    pub fn open(path: &str) -> CalcResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode only matters for real files; in-memory databases ignore it.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> CalcResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> CalcResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }
}

impl CalculationStore for CalcStore {
    fn load_rule_set(&self, rule_set_id: &str) -> CalcResult<Option<RuleSet>> {
        self.rule_set_by_id(rule_set_id)
    }

    fn load_assigned_entities(
        &self,
        rule_set_id: &str,
        tenant_id: &str,
        page: Page,
    ) -> CalcResult<Vec<AssignedEntity>> {
        self.assigned_entities_page(rule_set_id, tenant_id, page)
    }

    fn load_committed_metric_rows(
        &self,
        tenant_id: &str,
        period_id: &str,
        page: Page,
    ) -> CalcResult<Vec<MetricRow>> {
        self.committed_rows_page(tenant_id, period_id, page)
    }

    fn load_prior_density(&self, tenant_id: &str) -> CalcResult<Density> {
        self.density_for_tenant(tenant_id)
    }

    fn persist_batch_summary(&self, batch: &CalculationBatch) -> CalcResult<()> {
        self.upsert_batch(batch)
    }

    fn persist_completed_batch(
        &self,
        batch: &CalculationBatch,
        results: &[EntityResult],
    ) -> CalcResult<()> {
        self.commit_completed_batch(batch, results)
    }

    fn persist_density_updates(&self, tenant_id: &str, updates: &[DensityUpdate]) -> CalcResult<()> {
        self.apply_density_updates(tenant_id, updates)
    }

    fn persist_training_signals(&self, signals: &[TrainingSignal]) -> CalcResult<()> {
        self.insert_training_signals(signals)
    }
}
