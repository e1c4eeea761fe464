use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value::{DataType, ParameterValue};
use crate::ParamError;

/// A write-time validation rule attached to a parameter definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationRule {
    /// Numeric/decimal values must fall within `[min, max]` (inclusive).
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<Decimal>,
    },
    /// String values must match the regex.
    Pattern { regex: String },
    /// String values must be one of the listed variants.
    Enum { values: Vec<String> },
}

/// Declares a parameter: its type, its built-in default, and the rules any
/// written value must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDefinition {
    /// Globally unique parameter name (e.g. `maxRefundAgeDays`).
    pub name: String,
    pub data_type: DataType,
    /// Built-in default returned when no record exists at any level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ParameterValue>,
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
    #[serde(default)]
    pub description: String,
}

impl ParameterDefinition {
    /// Create a definition with no rules and no default.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            default: None,
            rules: Vec::new(),
            description: String::new(),
        }
    }

    /// Set the built-in default.
    #[must_use]
    pub fn with_default(mut self, default: ParameterValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Append a validation rule.
    #[must_use]
    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Set the human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Validate a candidate value against the declared type and rules.
    pub fn validate(&self, value: &ParameterValue) -> Result<(), ParamError> {
        if value.data_type() != self.data_type {
            return Err(ParamError::Invalid {
                name: self.name.clone(),
                reason: format!(
                    "expected {:?}, got {:?}",
                    self.data_type,
                    value.data_type()
                ),
            });
        }

        for rule in &self.rules {
            match rule {
                ValidationRule::Range { min, max } => {
                    let Some(n) = value.as_decimal() else {
                        return Err(ParamError::Invalid {
                            name: self.name.clone(),
                            reason: "RANGE rule requires a numeric value".into(),
                        });
                    };
                    if let Some(min) = min
                        && n < *min
                    {
                        return Err(ParamError::Invalid {
                            name: self.name.clone(),
                            reason: format!("{n} is below minimum {min}"),
                        });
                    }
                    if let Some(max) = max
                        && n > *max
                    {
                        return Err(ParamError::Invalid {
                            name: self.name.clone(),
                            reason: format!("{n} is above maximum {max}"),
                        });
                    }
                }
                ValidationRule::Pattern { regex } => {
                    let Some(s) = value.as_str() else {
                        return Err(ParamError::Invalid {
                            name: self.name.clone(),
                            reason: "PATTERN rule requires a string value".into(),
                        });
                    };
                    let re = Regex::new(regex).map_err(|e| ParamError::Invalid {
                        name: self.name.clone(),
                        reason: format!("invalid pattern in definition: {e}"),
                    })?;
                    if !re.is_match(s) {
                        return Err(ParamError::Invalid {
                            name: self.name.clone(),
                            reason: format!("{s:?} does not match pattern {regex:?}"),
                        });
                    }
                }
                ValidationRule::Enum { values } => {
                    let Some(s) = value.as_str() else {
                        return Err(ParamError::Invalid {
                            name: self.name.clone(),
                            reason: "ENUM rule requires a string value".into(),
                        });
                    };
                    if !values.iter().any(|v| v == s) {
                        return Err(ParamError::Invalid {
                            name: self.name.clone(),
                            reason: format!("{s:?} is not one of {values:?}"),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn type_mismatch_is_rejected() {
        let def = ParameterDefinition::new("maxRefundAgeDays", DataType::Number);
        let err = def
            .validate(&ParameterValue::String("90".into()))
            .unwrap_err();
        assert!(matches!(err, ParamError::Invalid { .. }));
    }

    #[test]
    fn range_rule_enforced() {
        let def = ParameterDefinition::new("maxRefundAgeDays", DataType::Number).with_rule(
            ValidationRule::Range {
                min: Some(Decimal::from(1)),
                max: Some(Decimal::from(365)),
            },
        );

        assert!(def.validate(&ParameterValue::Number(90)).is_ok());
        assert!(def.validate(&ParameterValue::Number(0)).is_err());
        assert!(def.validate(&ParameterValue::Number(400)).is_err());
    }

    #[test]
    fn range_rule_on_decimals() {
        let def = ParameterDefinition::new("feeRate", DataType::Decimal).with_rule(
            ValidationRule::Range {
                min: Some(Decimal::ZERO),
                max: Some(Decimal::ONE),
            },
        );

        assert!(
            def.validate(&ParameterValue::Decimal(Decimal::from_str("0.029").unwrap()))
                .is_ok()
        );
        assert!(
            def.validate(&ParameterValue::Decimal(Decimal::from_str("1.1").unwrap()))
                .is_err()
        );
    }

    #[test]
    fn pattern_rule_enforced() {
        let def = ParameterDefinition::new("settlementCurrency", DataType::String)
            .with_rule(ValidationRule::Pattern {
                regex: "^[A-Z]{3}$".into(),
            });

        assert!(def.validate(&ParameterValue::String("USD".into())).is_ok());
        assert!(def.validate(&ParameterValue::String("usd".into())).is_err());
    }

    #[test]
    fn enum_rule_enforced() {
        let def = ParameterDefinition::new("approvalFallback", DataType::String).with_rule(
            ValidationRule::Enum {
                values: vec!["auto-approve".into(), "auto-reject".into()],
            },
        );

        assert!(
            def.validate(&ParameterValue::String("auto-reject".into()))
                .is_ok()
        );
        assert!(
            def.validate(&ParameterValue::String("escalate".into()))
                .is_err()
        );
    }

    #[test]
    fn builder_accumulates() {
        let def = ParameterDefinition::new("x", DataType::Number)
            .with_default(ParameterValue::Number(5))
            .with_rule(ValidationRule::Range {
                min: Some(Decimal::ZERO),
                max: None,
            })
            .with_description("testing");
        assert_eq!(def.rules.len(), 1);
        assert_eq!(def.default, Some(ParameterValue::Number(5)));
        assert_eq!(def.description, "testing");
    }
}
