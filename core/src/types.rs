//! Shared primitive types used across the calculation core.

/// The tenant that owns rule sets, metrics and density history.
pub type TenantId = String;

/// A compensation period (e.g. "2024-01").
pub type PeriodId = String;

/// A stable identifier for a payee (employee, location).
pub type EntityId = String;

/// A location key that entity rows may roll up to.
pub type LocationId = String;

/// The canonical calculation batch identifier.
pub type BatchId = String;

/// Identifier for a component's type + configuration shape.
/// Stable across entities, variants and runs.
pub type PatternSignature = String;

/// Absolute currency-unit tolerance under which two payouts agree.
pub const MATCH_TOLERANCE: f64 = 0.01;

/// True when two payouts agree within [`MATCH_TOLERANCE`].
pub fn payouts_match(a: f64, b: f64) -> bool {
    (a - b).abs() < MATCH_TOLERANCE
}
