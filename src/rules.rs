//! Per-field validation rules with simple and extended encodings.
//!
//! The four conditional rules (`required_if`, `required_unless`,
//! `prohibited_if`, `prohibited_unless`) and the two relational rules
//! (`unique`, `exists`) each have two isomorphic wire encodings: a bare
//! string naming a field or table, and a structured object carrying an
//! operator, a comparison value and optional qualifiers. Both deserialize
//! into one tagged union; conversion between the forms is total and
//! preserves already-entered data whenever the simple form can represent it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blueprint::{Cardinality, DataType};
use crate::error::SchemaError;

/// Comparison operator used by conditional rules and field comparisons.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ComparisonOp {
    #[default]
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

/// Extended form of a conditional rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConditionSpec {
    /// Field the condition inspects.
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<ComparisonOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<Value>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Value>,
}

/// Conditional rule: bare field name or structured condition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConditionRule {
    Simple(String),
    Extended(ConditionSpec),
}

impl ConditionRule {
    /// The simple representation, if switching modes would lose nothing.
    ///
    /// Succeeds only when the extended form carries a bare field with a
    /// defaulted (`==`) operator and no value or qualifiers.
    pub fn as_simple(&self) -> Option<&str> {
        match self {
            ConditionRule::Simple(s) => Some(s),
            ConditionRule::Extended(spec) => {
                let default_op = matches!(spec.operator, None | Some(ComparisonOp::Eq));
                if default_op
                    && spec.value.is_none()
                    && spec.except.is_none()
                    && spec.where_clause.is_none()
                {
                    Some(&spec.field)
                } else {
                    None
                }
            }
        }
    }

    /// Value shown in simple mode: the bare field, or empty when degraded.
    pub fn simple_form(&self) -> String {
        self.as_simple().unwrap_or("").to_string()
    }

    /// The structured representation. Total: a bare string becomes
    /// `{field, operator: "=="}`.
    pub fn to_extended(&self) -> ConditionSpec {
        match self {
            ConditionRule::Simple(s) => ConditionSpec {
                field: s.clone(),
                operator: Some(ComparisonOp::Eq),
                ..ConditionSpec::default()
            },
            ConditionRule::Extended(spec) => spec.clone(),
        }
    }
}

/// Extended form of a relational (`unique`/`exists`) rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TableSpec {
    /// Table (or collection) the lookup runs against.
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except: Option<Value>,
    #[serde(default, rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Value>,
}

/// Relational rule: bare table name or structured lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TableRule {
    Simple(String),
    Extended(TableSpec),
}

impl TableRule {
    pub fn as_simple(&self) -> Option<&str> {
        match self {
            TableRule::Simple(s) => Some(s),
            TableRule::Extended(spec) => {
                if spec.except.is_none() && spec.where_clause.is_none() {
                    Some(&spec.table)
                } else {
                    None
                }
            }
        }
    }

    pub fn simple_form(&self) -> String {
        self.as_simple().unwrap_or("").to_string()
    }

    pub fn to_extended(&self) -> TableSpec {
        match self {
            TableRule::Simple(s) => TableSpec {
                table: s.clone(),
                ..TableSpec::default()
            },
            TableRule::Extended(spec) => spec.clone(),
        }
    }
}

/// Compare the owning field against a sibling field or a constant.
///
/// Exactly one of `field` / `value` must be populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FieldComparison {
    #[serde(default)]
    pub operator: ComparisonOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FieldComparison {
    pub fn validate(&self) -> Result<(), SchemaError> {
        match (&self.field, &self.value) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            (Some(_), Some(_)) => Err(SchemaError::RuleShape {
                rule: "field_comparison".to_string(),
                reason: "field and value are mutually exclusive".to_string(),
            }),
            (None, None) => Err(SchemaError::RuleShape {
                rule: "field_comparison".to_string(),
                reason: "one of field or value is required".to_string(),
            }),
        }
    }
}

/// Bag of optional validation rules attached to one path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ValidationRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_min_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_max_items: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_unique: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_if: Option<ConditionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_unless: Option<ConditionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prohibited_if: Option<ConditionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prohibited_unless: Option<ConditionRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique: Option<TableRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exists: Option<TableRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_comparison: Option<FieldComparison>,
}

/// One inapplicable or malformed rule, surfaced at the field level.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleViolation {
    pub rule: &'static str,
    pub reason: String,
}

impl ValidationRules {
    pub fn is_empty(&self) -> bool {
        self == &ValidationRules::default()
    }

    /// All rules that are malformed or inapplicable for a field of the given
    /// type and cardinality.
    pub fn violations(&self, data_type: DataType, cardinality: Cardinality) -> Vec<RuleViolation> {
        let mut out = Vec::new();
        let bounded = data_type.is_textual() || data_type.is_numeric() || data_type.is_temporal();

        for (rule, bound) in [("min", &self.min), ("max", &self.max)] {
            if let Some(value) = bound {
                if !bounded {
                    out.push(RuleViolation {
                        rule,
                        reason: format!("not applicable to {} fields", data_type),
                    });
                } else if let Err(reason) = check_bound_literal(data_type, value) {
                    out.push(RuleViolation { rule, reason });
                }
            }
        }

        if let Some(pattern) = &self.pattern {
            if !data_type.is_textual() {
                out.push(RuleViolation {
                    rule: "pattern",
                    reason: format!("not applicable to {} fields", data_type),
                });
            } else if let Err(e) = regex::Regex::new(pattern) {
                out.push(RuleViolation {
                    rule: "pattern",
                    reason: format!("invalid regular expression: {}", e),
                });
            }
        }

        if cardinality != Cardinality::Many {
            for (rule, set) in [
                ("array_min_items", self.array_min_items.is_some()),
                ("array_max_items", self.array_max_items.is_some()),
                ("array_unique", self.array_unique.is_some()),
            ] {
                if set {
                    out.push(RuleViolation {
                        rule,
                        reason: "only applicable to many-cardinality fields".to_string(),
                    });
                }
            }
        }

        if let (Some(min), Some(max)) = (self.array_min_items, self.array_max_items) {
            if min > max {
                out.push(RuleViolation {
                    rule: "array_min_items",
                    reason: format!("minimum {} exceeds maximum {}", min, max),
                });
            }
        }

        if let Some(cmp) = &self.field_comparison {
            if let Err(SchemaError::RuleShape { reason, .. }) = cmp.validate() {
                out.push(RuleViolation {
                    rule: "field_comparison",
                    reason,
                });
            }
        }

        out
    }

    /// Reject with the first violation, for callers that gate a submission.
    pub fn validate_for(
        &self,
        data_type: DataType,
        cardinality: Cardinality,
    ) -> Result<(), SchemaError> {
        match self.violations(data_type, cardinality).into_iter().next() {
            None => Ok(()),
            Some(v) => Err(SchemaError::RuleShape {
                rule: v.rule.to_string(),
                reason: v.reason,
            }),
        }
    }
}

/// A min/max literal must be typed like the field it bounds.
fn check_bound_literal(data_type: DataType, value: &Value) -> Result<(), String> {
    match data_type {
        DataType::Int => value
            .as_i64()
            .map(|_| ())
            .ok_or_else(|| "expected an integer bound".to_string()),
        DataType::Float => value
            .as_f64()
            .map(|_| ())
            .ok_or_else(|| "expected a numeric bound".to_string()),
        DataType::String | DataType::Text => value
            .as_u64()
            .map(|_| ())
            .ok_or_else(|| "expected a length bound".to_string()),
        DataType::Date => match value.as_str() {
            Some(s) if chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() => Ok(()),
            _ => Err("expected a YYYY-MM-DD bound".to_string()),
        },
        DataType::Datetime => match value.as_str() {
            Some(s) if chrono::DateTime::parse_from_rfc3339(s).is_ok() => Ok(()),
            _ => Err("expected an RFC 3339 bound".to_string()),
        },
        _ => Err(format!("not applicable to {} fields", data_type)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unique_simple_to_extended_and_back() {
        let rule = TableRule::Simple("entries".to_string());
        let extended = rule.to_extended();
        assert_eq!(extended.table, "entries");
        assert!(extended.except.is_none());

        let back = TableRule::Extended(extended);
        assert_eq!(back.as_simple(), Some("entries"));
    }

    #[test]
    fn test_condition_round_trip_when_representable() {
        let rule = ConditionRule::Simple("status".to_string());
        let extended = ConditionRule::Extended(rule.to_extended());
        assert_eq!(extended.as_simple(), Some("status"));
        assert_eq!(
            ConditionRule::Simple(extended.simple_form()).to_extended(),
            rule.to_extended()
        );
    }

    #[test]
    fn test_condition_degrades_to_empty_simple() {
        let rule = ConditionRule::Extended(ConditionSpec {
            field: "status".to_string(),
            operator: Some(ComparisonOp::Ne),
            value: Some(json!("draft")),
            ..ConditionSpec::default()
        });
        assert_eq!(rule.as_simple(), None);
        assert_eq!(rule.simple_form(), "");
        // The richer data survives in extended form.
        assert_eq!(rule.to_extended().value, Some(json!("draft")));
    }

    #[test]
    fn test_untagged_wire_forms() {
        let simple: ConditionRule = serde_json::from_value(json!("status")).unwrap();
        assert_eq!(simple, ConditionRule::Simple("status".to_string()));

        let extended: ConditionRule =
            serde_json::from_value(json!({"field": "status", "operator": "!=", "value": 1}))
                .unwrap();
        match extended {
            ConditionRule::Extended(spec) => {
                assert_eq!(spec.operator, Some(ComparisonOp::Ne));
                assert_eq!(spec.value, Some(json!(1)));
            }
            other => panic!("expected extended form, got {:?}", other),
        }
    }

    #[test]
    fn test_field_comparison_exactly_one_of() {
        let both = FieldComparison {
            operator: ComparisonOp::Ge,
            field: Some("starts_at".to_string()),
            value: Some(json!(0)),
        };
        assert!(both.validate().is_err());

        let neither = FieldComparison::default();
        assert!(neither.validate().is_err());

        let field_only = FieldComparison {
            operator: ComparisonOp::Ge,
            field: Some("starts_at".to_string()),
            value: None,
        };
        assert!(field_only.validate().is_ok());
    }

    #[test]
    fn test_array_rules_gated_by_cardinality() {
        let rules = ValidationRules {
            array_min_items: Some(1),
            ..ValidationRules::default()
        };
        assert!(rules
            .validate_for(DataType::String, Cardinality::One)
            .is_err());
        assert!(rules
            .validate_for(DataType::String, Cardinality::Many)
            .is_ok());
    }

    #[test]
    fn test_bound_literals_typed_by_field() {
        let rules = ValidationRules {
            min: Some(json!("2024-01-01")),
            ..ValidationRules::default()
        };
        assert!(rules.validate_for(DataType::Date, Cardinality::One).is_ok());
        assert!(rules.validate_for(DataType::Int, Cardinality::One).is_err());

        let rules = ValidationRules {
            pattern: Some("[".to_string()),
            ..ValidationRules::default()
        };
        let err = rules
            .validate_for(DataType::String, Cardinality::One)
            .unwrap_err();
        assert!(matches!(err, SchemaError::RuleShape { .. }));
    }

    #[test]
    fn test_pattern_rejected_on_numeric_field() {
        let rules = ValidationRules {
            pattern: Some("^a+$".to_string()),
            ..ValidationRules::default()
        };
        assert!(rules.validate_for(DataType::Int, Cardinality::One).is_err());
    }
}
