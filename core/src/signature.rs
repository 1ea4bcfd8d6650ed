//! Pattern signatures — a stable identifier for a component's shape.
//!
//! The signature is a function of `(type, configuration)` only. Component
//! id, display name, ordinal and enabled flag do not participate, so the
//! same rule applied to any number of entities (or repeated across
//! variants) yields one signature.

use crate::{rule_set::ComponentConfig, types::PatternSignature};

/// `<type>:<blake3 hex of the canonical configuration>`.
pub fn pattern_signature(config: &ComponentConfig) -> PatternSignature {
    let digest = blake3::hash(&canonical_bytes(config));
    format!("{}:{}", config.kind().as_str(), digest.to_hex())
}

/// Canonical serialization: struct fields serialize in declaration order
/// and grids live in a BTreeMap, so equal configurations produce equal
/// bytes. Negative zero is folded into zero first.
fn canonical_bytes(config: &ComponentConfig) -> Vec<u8> {
    let mut value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
    normalize_zeros(&mut value);
    value.to_string().into_bytes()
}

fn normalize_zeros(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Number(n) => {
            if n.as_f64() == Some(0.0) {
                *n = serde_json::Number::from(0);
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(normalize_zeros),
        serde_json::Value::Object(map) => map.values_mut().for_each(normalize_zeros),
        _ => {}
    }
}
