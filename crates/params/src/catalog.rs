//! Well-known parameter names and their definitions.
//!
//! These are the policy knobs the refund pipeline consults. Deployments
//! register them at startup and override per level through the parameter
//! API.

use rust_decimal::Decimal;

use crate::definition::{ParameterDefinition, ValidationRule};
use crate::value::{DataType, ParameterValue};

/// Maximum age of a transaction, in days, for it to remain refundable.
pub const MAX_REFUND_AGE_DAYS: &str = "maxRefundAgeDays";

/// Optional per-refund cap in minor units. Zero disables the cap.
pub const MAX_REFUND_AMOUNT: &str = "maxRefundAmount";

/// Refunds at or above this amount (minor units) require approval.
/// Zero means every refund requires approval; a negative value disables the
/// threshold entirely.
pub const APPROVAL_THRESHOLD: &str = "approvalThreshold";

/// Ordered approval levels a gated refund walks through.
pub const APPROVAL_LEVELS: &str = "approvalLevels";

/// Hours until an undecided approval escalates to the next level.
pub const ESCALATION_HOURS: &str = "escalationHours";

/// What happens when escalation runs past the last level.
pub const APPROVAL_FALLBACK: &str = "approvalFallback";

/// Whether refunds must carry a machine-readable reason code.
pub const REASON_CODE_REQUIRED: &str = "reasonCodeRequired";

/// The standard definitions every deployment registers.
#[must_use]
pub fn standard_definitions() -> Vec<ParameterDefinition> {
    vec![
        ParameterDefinition::new(MAX_REFUND_AGE_DAYS, DataType::Number)
            .with_default(ParameterValue::Number(90))
            .with_rule(ValidationRule::Range {
                min: Some(Decimal::ONE),
                max: Some(Decimal::from(3650)),
            })
            .with_description("Days since capture during which a transaction is refundable"),
        ParameterDefinition::new(MAX_REFUND_AMOUNT, DataType::Number)
            .with_default(ParameterValue::Number(0))
            .with_rule(ValidationRule::Range {
                min: Some(Decimal::ZERO),
                max: None,
            })
            .with_description("Per-refund cap in minor units; 0 disables the cap"),
        ParameterDefinition::new(APPROVAL_THRESHOLD, DataType::Number)
            .with_default(ParameterValue::Number(-1))
            .with_description(
                "Refunds at or above this amount require approval; negative disables",
            ),
        ParameterDefinition::new(APPROVAL_LEVELS, DataType::Array)
            .with_default(ParameterValue::Array(vec![
                serde_json::json!("L1"),
                serde_json::json!("L2"),
            ]))
            .with_description("Ordered approver levels for gated refunds"),
        ParameterDefinition::new(ESCALATION_HOURS, DataType::Number)
            .with_default(ParameterValue::Number(4))
            .with_rule(ValidationRule::Range {
                min: Some(Decimal::ONE),
                max: Some(Decimal::from(720)),
            })
            .with_description("Hours before an undecided approval escalates"),
        ParameterDefinition::new(APPROVAL_FALLBACK, DataType::String)
            .with_default(ParameterValue::String("auto-reject".into()))
            .with_rule(ValidationRule::Enum {
                values: vec!["auto-approve".into(), "auto-reject".into()],
            })
            .with_description("Behavior when escalation passes the final level"),
        ParameterDefinition::new(REASON_CODE_REQUIRED, DataType::Boolean)
            .with_default(ParameterValue::Boolean(false))
            .with_description("Whether refunds must carry a reason code"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_have_defaults() {
        for def in standard_definitions() {
            assert!(
                def.default.is_some(),
                "{} should declare a default",
                def.name
            );
        }
    }

    #[test]
    fn defaults_pass_their_own_rules() {
        for def in standard_definitions() {
            let default = def.default.clone().unwrap();
            def.validate(&default)
                .unwrap_or_else(|e| panic!("default for {} invalid: {e}", def.name));
        }
    }

    #[test]
    fn names_are_distinct() {
        let defs = standard_definitions();
        let mut names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), defs.len());
    }
}
