//! Store methods for calculation batches and entity results.

use crate::{
    batch::{BatchSummary, CalculationBatch, DualPathMeta, EntityResult, LifecycleState, RunPhase},
    error::{CalcError, CalcResult},
    evaluator::ComponentResult,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::CalcStore;

impl CalcStore {
    /// Parent row of `entity_result`, so it is updated in place, never replaced.
    pub fn upsert_batch(&self, batch: &CalculationBatch) -> CalcResult<()> {
        write_batch(&self.conn, batch)
    }

    /// Write a finished batch and its entity results in one transaction:
    /// either both land or neither does.
    pub fn commit_completed_batch(
        &self,
        batch: &CalculationBatch,
        results: &[EntityResult],
    ) -> CalcResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        write_batch(&tx, batch)?;
        write_entity_results(&tx, &batch.batch_id, results)?;
        tx.commit()?;
        Ok(())
    }

    pub fn batch_by_id(&self, batch_id: &str) -> CalcResult<Option<CalculationBatch>> {
        let raw = self
            .conn
            .query_row(
                "SELECT batch_id, tenant_id, period_id, rule_set_id, lifecycle_state, run_phase,
                        entity_count, summary_json, failure_reason, created_at, completed_at
                 FROM calculation_batch WHERE batch_id = ?1",
                params![batch_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, Option<String>>(10)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            batch_id,
            tenant_id,
            period_id,
            rule_set_id,
            lifecycle,
            phase,
            entity_count,
            summary_json,
            failure_reason,
            created_at,
            completed_at,
        )) = raw
        else {
            return Ok(None);
        };

        let summary: BatchSummary = serde_json::from_str(&summary_json)?;
        Ok(Some(CalculationBatch {
            batch_id,
            tenant_id,
            period_id,
            rule_set_id,
            lifecycle_state: LifecycleState::parse(&lifecycle)
                .ok_or_else(|| corrupt(format!("unknown lifecycle state '{lifecycle}'")))?,
            run_phase: RunPhase::parse(&phase)
                .ok_or_else(|| corrupt(format!("unknown run phase '{phase}'")))?,
            entity_count: entity_count as usize,
            summary,
            failure_reason,
            created_at: parse_time(&created_at)?,
            completed_at: completed_at.as_deref().map(parse_time).transpose()?,
        }))
    }

    pub fn entity_results_for_batch(&self, batch_id: &str) -> CalcResult<Vec<EntityResult>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, variant_id, total_payout, components_json, dual_path_json
             FROM entity_result WHERE batch_id = ?1
             ORDER BY entity_id ASC",
        )?;
        let raw = stmt
            .query_map(params![batch_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(entity_id, variant_id, total_payout, components_json, dual_path_json)| {
                let components: Vec<ComponentResult> = serde_json::from_str(&components_json)?;
                let dual_path: DualPathMeta = serde_json::from_str(&dual_path_json)?;
                Ok(EntityResult { entity_id, variant_id, components, total_payout, dual_path })
            })
            .collect()
    }

    pub fn entity_result_count(&self, batch_id: &str) -> CalcResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entity_result WHERE batch_id = ?1",
            params![batch_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn corrupt(reason: String) -> CalcError {
    CalcError::Persistence { what: "calculation batch", reason }
}

fn parse_time(s: &str) -> CalcResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(format!("bad timestamp '{s}': {e}")))
}

fn write_batch(conn: &Connection, batch: &CalculationBatch) -> CalcResult<()> {
    conn.execute(
        "INSERT INTO calculation_batch (
            batch_id, tenant_id, period_id, rule_set_id, lifecycle_state, run_phase,
            entity_count, total_payout, concordance_rate, summary_json, failure_reason,
            created_at, completed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT (batch_id) DO UPDATE SET
            lifecycle_state  = excluded.lifecycle_state,
            run_phase        = excluded.run_phase,
            entity_count     = excluded.entity_count,
            total_payout     = excluded.total_payout,
            concordance_rate = excluded.concordance_rate,
            summary_json     = excluded.summary_json,
            failure_reason   = excluded.failure_reason,
            completed_at     = excluded.completed_at",
        params![
            batch.batch_id,
            batch.tenant_id,
            batch.period_id,
            batch.rule_set_id,
            batch.lifecycle_state.as_str(),
            batch.run_phase.as_str(),
            batch.entity_count as i64,
            batch.summary.total_payout,
            batch.summary.concordance_rate,
            serde_json::to_string(&batch.summary)?,
            batch.failure_reason,
            batch.created_at.to_rfc3339(),
            batch.completed_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

fn write_entity_results(conn: &Connection, batch_id: &str, results: &[EntityResult]) -> CalcResult<()> {
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO entity_result (
            batch_id, entity_id, variant_id, total_payout, dual_path_match,
            path_b_total, components_json, dual_path_json
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for r in results {
        stmt.execute(params![
            batch_id,
            r.entity_id,
            r.variant_id,
            r.total_payout,
            r.dual_path.matched as i64,
            r.dual_path.path_b_total,
            serde_json::to_string(&r.components)?,
            serde_json::to_string(&r.dual_path)?,
        ])?;
    }
    Ok(())
}
