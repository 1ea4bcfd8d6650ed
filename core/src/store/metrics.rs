//! Store methods for entity assignments and committed metric rows.

use crate::{
    error::{CalcError, CalcResult},
    metrics::{AssignedEntity, MetricRow, RowScope},
};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;

use super::{CalcStore, Page};

impl CalcStore {
    pub fn assign_entity(
        &self,
        rule_set_id: &str,
        tenant_id: &str,
        entity: &AssignedEntity,
    ) -> CalcResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO entity_assignment
                (rule_set_id, tenant_id, entity_id, location_id, attributes_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rule_set_id,
                tenant_id,
                entity.entity_id,
                entity.location_id,
                serde_json::to_string(&entity.attributes)?,
            ],
        )?;
        Ok(())
    }

    /// Replace every metric row of a tenant's period in one transaction.
    /// Re-importing the same rows leaves the period unchanged.
    pub fn replace_metric_rows(
        &self,
        tenant_id: &str,
        period_id: &str,
        rows: &[MetricRow],
    ) -> CalcResult<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM metric_row WHERE tenant_id = ?1 AND period_id = ?2",
            params![tenant_id, period_id],
        )?;
        for row in rows {
            write_metric_row(&tx, tenant_id, period_id, row)?;
        }
        tx.commit()?;
        Ok(removed)
    }

    pub fn metric_row_count(&self, tenant_id: &str, period_id: &str) -> CalcResult<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM metric_row WHERE tenant_id = ?1 AND period_id = ?2",
            params![tenant_id, period_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn assigned_entities_page(
        &self,
        rule_set_id: &str,
        tenant_id: &str,
        page: Page,
    ) -> CalcResult<Vec<AssignedEntity>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity_id, location_id, attributes_json FROM entity_assignment
             WHERE rule_set_id = ?1 AND tenant_id = ?2
             ORDER BY id ASC LIMIT ?3 OFFSET ?4",
        )?;
        let raw = stmt
            .query_map(
                params![rule_set_id, tenant_id, page.limit as i64, page.offset as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(entity_id, location_id, attributes_json)| {
                let attributes: BTreeMap<String, String> = serde_json::from_str(&attributes_json)?;
                Ok(AssignedEntity { entity_id, location_id, attributes })
            })
            .collect()
    }

    pub fn committed_rows_page(
        &self,
        tenant_id: &str,
        period_id: &str,
        page: Page,
    ) -> CalcResult<Vec<MetricRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT scope, scope_id, category, values_json FROM metric_row
             WHERE tenant_id = ?1 AND period_id = ?2 AND committed = 1
             ORDER BY id ASC LIMIT ?3 OFFSET ?4",
        )?;
        let raw = stmt
            .query_map(
                params![tenant_id, period_id, page.limit as i64, page.offset as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(scope, scope_id, category, values_json)| {
                let scope = RowScope::parse(&scope).ok_or_else(|| CalcError::Persistence {
                    what:   "metric rows",
                    reason: format!("unknown row scope '{scope}'"),
                })?;
                let values: BTreeMap<String, f64> = serde_json::from_str(&values_json)?;
                Ok(MetricRow { scope, scope_id, category, values })
            })
            .collect()
    }
}

fn write_metric_row(conn: &Connection, tenant_id: &str, period_id: &str, row: &MetricRow) -> CalcResult<()> {
    conn.execute(
        "INSERT INTO metric_row (tenant_id, period_id, scope, scope_id, category, values_json, committed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
        params![
            tenant_id,
            period_id,
            row.scope.as_str(),
            row.scope_id,
            row.category,
            serde_json::to_string(&row.values)?,
        ],
    )?;
    Ok(())
}
