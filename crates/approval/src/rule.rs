use std::time::Duration;

use serde::{Deserialize, Serialize};

use refundry_core::{RefundMethod, RefundRequest};

/// Declarative condition deciding whether a rule applies to a refund.
///
/// Unset fields are wildcards; set fields must all match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Minimum amount in minor units (inclusive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_at_least: Option<i64>,
    /// Restrict to these refund methods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<RefundMethod>>,
    /// Restrict to these reason codes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_codes: Option<Vec<String>>,
    /// Restrict to these ISO-4217 currencies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currencies: Option<Vec<String>>,
}

impl RuleCondition {
    /// `true` when every set field matches the refund.
    #[must_use]
    pub fn matches(&self, refund: &RefundRequest) -> bool {
        if let Some(min) = self.amount_at_least
            && refund.amount.amount < min
        {
            return false;
        }
        if let Some(methods) = &self.methods
            && !methods.contains(&refund.refund_method)
        {
            return false;
        }
        if let Some(codes) = &self.reason_codes {
            match &refund.reason_code {
                Some(code) if codes.contains(code) => {}
                _ => return false,
            }
        }
        if let Some(currencies) = &self.currencies
            && !currencies
                .iter()
                .any(|c| c == refund.amount.currency.as_str())
        {
            return false;
        }
        true
    }
}

/// An explicit approval rule configured alongside the parameter threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub name: String,
    pub condition: RuleCondition,
    /// Ordered approver levels this rule demands.
    pub required_levels: Vec<String>,
    /// Undecided requests escalate after this long at each level.
    #[serde(with = "humantime_secs")]
    pub escalate_after: Duration,
}

/// The gate a matched rule (or the threshold) imposes on a refund.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalPlan {
    /// Name of the rule that matched (`"approvalThreshold"` for the
    /// parameter-driven gate).
    pub rule: String,
    pub required_levels: Vec<String>,
    pub escalate_after: Duration,
}

/// Serialize durations as whole seconds.
mod humantime_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refundry_core::{
        money::Currency, GatewayKind, MerchantId, Money, TransactionId,
    };

    fn refund(amount: i64, method: RefundMethod) -> RefundRequest {
        RefundRequest::new(
            TransactionId::from("T1"),
            MerchantId::from("m-1"),
            Money::new(amount, Currency::parse("USD").unwrap()),
            method,
            GatewayKind::Stripe,
            "customer_request",
        )
    }

    #[test]
    fn empty_condition_matches_everything() {
        let cond = RuleCondition::default();
        assert!(cond.matches(&refund(1, RefundMethod::Balance)));
    }

    #[test]
    fn amount_floor() {
        let cond = RuleCondition {
            amount_at_least: Some(10_000),
            ..RuleCondition::default()
        };
        assert!(!cond.matches(&refund(9_999, RefundMethod::OriginalPayment)));
        assert!(cond.matches(&refund(10_000, RefundMethod::OriginalPayment)));
    }

    #[test]
    fn method_restriction() {
        let cond = RuleCondition {
            methods: Some(vec![RefundMethod::Other]),
            ..RuleCondition::default()
        };
        assert!(cond.matches(&refund(100, RefundMethod::Other)));
        assert!(!cond.matches(&refund(100, RefundMethod::Balance)));
    }

    #[test]
    fn reason_code_restriction_requires_code() {
        let cond = RuleCondition {
            reason_codes: Some(vec!["fraud".into()]),
            ..RuleCondition::default()
        };
        assert!(!cond.matches(&refund(100, RefundMethod::Balance)));
        let with_code = refund(100, RefundMethod::Balance).with_reason_code("fraud");
        assert!(cond.matches(&with_code));
    }

    #[test]
    fn currency_restriction() {
        let cond = RuleCondition {
            currencies: Some(vec!["EUR".into()]),
            ..RuleCondition::default()
        };
        assert!(!cond.matches(&refund(100, RefundMethod::Balance)));
    }

    #[test]
    fn rule_serde_roundtrip() {
        let rule = ApprovalRule {
            name: "large-ach-refunds".into(),
            condition: RuleCondition {
                amount_at_least: Some(50_000),
                methods: Some(vec![RefundMethod::Other]),
                reason_codes: None,
                currencies: None,
            },
            required_levels: vec!["L1".into(), "L2".into()],
            escalate_after: Duration::from_secs(4 * 3600),
        };
        let json = serde_json::to_string(&rule).unwrap();
        let back: ApprovalRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.escalate_after, Duration::from_secs(14_400));
        assert_eq!(back.required_levels.len(), 2);
    }
}
