//! Per-Tenant Egress Transformation
//!
//! Each downstream tenant may declare a per-symbol transformation applied to
//! flattened records before delivery. The application order is contractual:
//!
//! 1. Value rules (arithmetic on numeric fields)
//! 2. Renames
//! 3. Removals
//! 4. Overrides (with the `("timestamp", "current")` wall-clock sentinel)

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::market_data::FlatMarketData;

// =============================================================================
// Configuration Types
// =============================================================================

/// A tenant's transformation config, keyed by symbol.
///
/// Loaded once at connection upgrade and immutable for the connection's
/// lifetime. A tenant without a config gets records passed through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Per-symbol transformation rules.
    #[serde(default)]
    pub symbols: HashMap<String, SymbolConfig>,
}

/// Transformation rules for a single symbol.
///
/// Rename entries are applied in map iteration order; configs must be
/// collision-free (no rename target that is also a rename source).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolConfig {
    /// Field renames, old name to new name.
    #[serde(default)]
    pub rename_fields: HashMap<String, String>,
    /// Arithmetic rules applied to numeric fields.
    #[serde(default)]
    pub value_rules: HashMap<String, ValueRule>,
    /// Literal overrides written after all other steps.
    #[serde(default)]
    pub override_fields: HashMap<String, Value>,
    /// Fields deleted from the output.
    #[serde(default)]
    pub remove_fields: Vec<String>,
    /// Accepted on the wire for config compatibility; no transform step
    /// consumes it.
    #[serde(default)]
    pub use_current_ts: bool,
}

/// An arithmetic rule for a single field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRule {
    /// The operation to apply.
    pub op: ValueOp,
    /// The operand.
    pub value: f64,
}

/// Supported value-rule operations. Unrecognized operations deserialize to
/// [`ValueOp::Unknown`] and leave the field unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueOp {
    /// `x + v`
    Add,
    /// `x - v`
    Subtract,
    /// `x * v`
    Multiply,
    /// `x / v`; a zero operand leaves the field unchanged.
    Divide,
    /// No-op fallback for unrecognized operations.
    #[serde(other)]
    Unknown,
}

impl ValueRule {
    /// Apply the rule to a numeric field value.
    #[must_use]
    pub fn apply(&self, x: f64) -> f64 {
        match self.op {
            ValueOp::Add => x + self.value,
            ValueOp::Subtract => x - self.value,
            ValueOp::Multiply => x * self.value,
            ValueOp::Divide if self.value != 0.0 => x / self.value,
            ValueOp::Divide | ValueOp::Unknown => x,
        }
    }
}

// =============================================================================
// Transform Pipeline
// =============================================================================

/// Sentinel override value that writes the current wall clock.
const CURRENT_TIMESTAMP_SENTINEL: &str = "current";

/// Apply a symbol's transformation to a flattened record, in the contractual
/// order: value rules, renames, removals, overrides.
///
/// Non-numeric or missing fields named by value rules pass through untouched.
pub fn apply_transform(flat: &mut FlatMarketData, config: &SymbolConfig) {
    for (field, rule) in &config.value_rules {
        if let Some(x) = flat.get(field).and_then(Value::as_f64) {
            flat.insert(field.clone(), Value::from(rule.apply(x)));
        }
    }

    for (old, new) in &config.rename_fields {
        if let Some(value) = flat.remove(old) {
            flat.insert(new.clone(), value);
        }
    }

    for field in &config.remove_fields {
        flat.remove(field);
    }

    for (key, value) in &config.override_fields {
        if key == "timestamp" && value.as_str() == Some(CURRENT_TIMESTAMP_SENTINEL) {
            flat.insert(key.clone(), Value::from(Utc::now().timestamp_millis()));
        } else {
            flat.insert(key.clone(), value.clone());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::market_data::{MarketData, normalize};

    fn flat_from(pairs: &[(&str, Value)]) -> FlatMarketData {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn value_rule_operations() {
        let apply = |op, value, x| ValueRule { op, value }.apply(x);
        assert!((apply(ValueOp::Add, 2.0, 3.0) - 5.0).abs() < f64::EPSILON);
        assert!((apply(ValueOp::Subtract, 2.0, 3.0) - 1.0).abs() < f64::EPSILON);
        assert!((apply(ValueOp::Multiply, 2.0, 3.0) - 6.0).abs() < f64::EPSILON);
        assert!((apply(ValueOp::Divide, 2.0, 3.0) - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn divide_by_zero_leaves_value_unchanged() {
        let mut flat = flat_from(&[("bid", json!(1.25))]);
        let config = SymbolConfig {
            value_rules: HashMap::from([(
                "bid".to_string(),
                ValueRule {
                    op: ValueOp::Divide,
                    value: 0.0,
                },
            )]),
            ..SymbolConfig::default()
        };

        apply_transform(&mut flat, &config);
        assert_eq!(flat["bid"], json!(1.25));
    }

    #[test]
    fn unknown_op_deserializes_and_is_identity() {
        let rule: ValueRule = serde_json::from_str(r#"{"op":"modulo","value":3.0}"#).unwrap();
        assert_eq!(rule.op, ValueOp::Unknown);
        assert!((rule.apply(7.0) - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn value_rules_skip_non_numeric_fields() {
        let mut flat = flat_from(&[("bid", json!("not a number"))]);
        let config = SymbolConfig {
            value_rules: HashMap::from([(
                "bid".to_string(),
                ValueRule {
                    op: ValueOp::Multiply,
                    value: 2.0,
                },
            )]),
            ..SymbolConfig::default()
        };

        apply_transform(&mut flat, &config);
        assert_eq!(flat["bid"], json!("not a number"));
    }

    #[test]
    fn rename_is_idempotent_on_already_renamed_map() {
        let config = SymbolConfig {
            rename_fields: HashMap::from([("raw".to_string(), "r2".to_string())]),
            ..SymbolConfig::default()
        };

        let mut flat = flat_from(&[("r2", json!("value"))]);
        let before = flat.clone();
        apply_transform(&mut flat, &config);
        assert_eq!(flat, before);
    }

    #[test]
    fn full_pipeline_over_normalized_record() {
        let item = MarketData {
            name: "USDSGD".to_string(),
            timestamp: 10,
            exchange: "X".to_string(),
            data: json!({"data": {"bid": 1.25, "raw": "r"}})
                .as_object()
                .unwrap()
                .clone(),
        };
        let config = SymbolConfig {
            value_rules: HashMap::from([(
                "bid".to_string(),
                ValueRule {
                    op: ValueOp::Multiply,
                    value: 2.0,
                },
            )]),
            rename_fields: HashMap::from([("raw".to_string(), "r2".to_string())]),
            remove_fields: vec!["exchange".to_string()],
            override_fields: HashMap::from([("venue".to_string(), json!("Z"))]),
            use_current_ts: false,
        };

        let mut flat = normalize(&item);
        apply_transform(&mut flat, &config);

        assert_eq!(flat["symbol"], json!("USDSGD"));
        assert_eq!(flat["timestamp"], json!(10));
        assert_eq!(flat["bid"], json!(2.5));
        assert_eq!(flat["r2"], json!("r"));
        assert_eq!(flat["venue"], json!("Z"));
        assert!(!flat.contains_key("exchange"));
        assert!(!flat.contains_key("raw"));
    }

    #[test]
    fn timestamp_override_writes_wall_clock_millis() {
        let mut flat = flat_from(&[("timestamp", json!(10))]);
        let config = SymbolConfig {
            override_fields: HashMap::from([("timestamp".to_string(), json!("current"))]),
            ..SymbolConfig::default()
        };

        let before = Utc::now().timestamp_millis();
        apply_transform(&mut flat, &config);
        let after = Utc::now().timestamp_millis();

        let written = flat["timestamp"].as_i64().expect("millisecond integer");
        assert!(written >= before && written <= after);
    }

    #[test]
    fn override_on_other_keys_is_literal() {
        let mut flat = FlatMarketData::new();
        let config = SymbolConfig {
            override_fields: HashMap::from([("venue".to_string(), json!("current"))]),
            ..SymbolConfig::default()
        };

        apply_transform(&mut flat, &config);
        // The sentinel only applies to the "timestamp" key.
        assert_eq!(flat["venue"], json!("current"));
    }

    #[test]
    fn config_deserializes_with_missing_sections() {
        let config: SymbolConfig =
            serde_json::from_str(r#"{"remove_fields":["a"]}"#).unwrap();
        assert!(config.rename_fields.is_empty());
        assert!(config.value_rules.is_empty());
        assert_eq!(config.remove_fields, vec!["a".to_string()]);
        assert!(!config.use_current_ts);
    }
}
