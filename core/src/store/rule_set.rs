//! Store methods for rule set definitions.

use crate::{error::CalcResult, rule_set::RuleSet};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::CalcStore;

impl CalcStore {
    /// Insert a rule set definition for a tenant, or update it in place.
    /// Assignments reference the row, so it is never deleted and re-created.
    pub fn insert_rule_set(&self, tenant_id: &str, rule_set: &RuleSet) -> CalcResult<()> {
        let json = serde_json::to_string(rule_set)?;
        self.conn.execute(
            "INSERT INTO rule_set (rule_set_id, tenant_id, name, definition_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (rule_set_id) DO UPDATE SET
                tenant_id       = excluded.tenant_id,
                name            = excluded.name,
                definition_json = excluded.definition_json",
            params![rule_set.id, tenant_id, rule_set.name, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// The stored definition, unvalidated. Validation happens in the
    /// orchestrator so that it can fail the batch with a clear reason.
    pub fn rule_set_by_id(&self, rule_set_id: &str) -> CalcResult<Option<RuleSet>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT definition_json FROM rule_set WHERE rule_set_id = ?1",
                params![rule_set_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }
}
