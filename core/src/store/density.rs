//! Store methods for pattern density and training signals.

use crate::{
    consolidator::{DensityUpdate, TrainingSignal},
    error::CalcResult,
    surface::{clean_density, Density},
};
use chrono::Utc;
use rusqlite::params;

use super::CalcStore;

impl CalcStore {
    pub fn density_for_tenant(&self, tenant_id: &str) -> CalcResult<Density> {
        let mut stmt = self.conn.prepare(
            "SELECT pattern_signature, density FROM pattern_density WHERE tenant_id = ?1",
        )?;
        let density = stmt
            .query_map(params![tenant_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .collect::<Result<Density, _>>()?;
        Ok(clean_density(density))
    }

    /// Seed a density directly (imports and tests).
    pub fn seed_density(&self, tenant_id: &str, signature: &str, density: f64) -> CalcResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO pattern_density
                (tenant_id, pattern_signature, density, execution_mode, observations, updated_at)
             VALUES (?1, ?2, ?3, 'verify', 0, ?4)",
            params![tenant_id, signature, density, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Upsert each pattern's density and append to its history.
    pub fn apply_density_updates(&self, tenant_id: &str, updates: &[DensityUpdate]) -> CalcResult<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        for u in updates {
            tx.execute(
                "INSERT INTO pattern_density
                    (tenant_id, pattern_signature, density, execution_mode, observations, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (tenant_id, pattern_signature) DO UPDATE SET
                    density        = excluded.density,
                    execution_mode = excluded.execution_mode,
                    observations   = pattern_density.observations + excluded.observations,
                    updated_at     = excluded.updated_at",
                params![
                    tenant_id,
                    u.pattern_signature,
                    u.new_density,
                    u.execution_mode.as_str(),
                    u.observations as i64,
                    now,
                ],
            )?;
            tx.execute(
                "INSERT INTO density_history
                    (tenant_id, pattern_signature, prior_density, new_density, match_ratio, anomalous, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tenant_id,
                    u.pattern_signature,
                    u.prior_density,
                    u.new_density,
                    u.match_ratio,
                    u.anomalous as i64,
                    now,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_training_signals(&self, signals: &[TrainingSignal]) -> CalcResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for s in signals {
            tx.execute(
                "INSERT INTO training_signal
                    (tenant_id, batch_id, signal_type, pattern_signature, payload_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    s.tenant_id,
                    s.batch_id,
                    s.signal_type,
                    s.pattern_signature,
                    serde_json::to_string(&s.payload)?,
                    s.created_at.to_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ── Test / summary helpers ────────────────────────────────────────

    /// Number of training signals of a type for a batch (for tests).
    pub fn training_signal_count(&self, batch_id: &str, signal_type: &str) -> CalcResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM training_signal WHERE batch_id = ?1 AND signal_type = ?2",
            params![batch_id, signal_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of density history rows flagged anomalous (for tests).
    pub fn anomalous_history_count(&self, tenant_id: &str) -> CalcResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM density_history WHERE tenant_id = ?1 AND anomalous = 1",
            params![tenant_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
