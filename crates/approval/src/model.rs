use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use refundry_core::{ApprovalId, MerchantId, RefundId};

/// Lifecycle state of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalRequestStatus {
    /// Short stable tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for ApprovalRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approver: String,
    /// Level the decision was made at.
    pub level: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// A refund's approval request walking its required levels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub approval_id: ApprovalId,
    pub refund_id: RefundId,
    pub merchant_id: MerchantId,
    /// Name of the rule (or threshold) that gated the refund.
    pub rule: String,
    /// Index into `required_levels` of the level currently deciding.
    pub current_level: usize,
    pub required_levels: Vec<String>,
    pub decisions: Vec<ApprovalDecision>,
    /// When the current level escalates if undecided.
    pub escalation_deadline: DateTime<Utc>,
    /// Seconds an undecided level waits before escalating; used to compute
    /// each fresh deadline.
    pub escalate_after_secs: u64,
    /// How many times the request has escalated.
    #[serde(default)]
    pub escalations: u32,
    pub status: ApprovalRequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRequest {
    /// Name of the level currently deciding.
    #[must_use]
    pub fn current_level_name(&self) -> &str {
        self.required_levels
            .get(self.current_level)
            .map_or("", String::as_str)
    }

    /// `true` when the current level is the last required one.
    #[must_use]
    pub fn at_final_level(&self) -> bool {
        self.current_level + 1 >= self.required_levels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(levels: &[&str], current: usize) -> ApprovalRequest {
        ApprovalRequest {
            approval_id: ApprovalId::from("apr_1"),
            refund_id: RefundId::from("rfd_1"),
            merchant_id: MerchantId::from("m-1"),
            rule: "threshold".into(),
            current_level: current,
            required_levels: levels.iter().map(|s| (*s).to_owned()).collect(),
            decisions: Vec::new(),
            escalation_deadline: Utc::now(),
            escalate_after_secs: 14_400,
            escalations: 0,
            status: ApprovalRequestStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn level_helpers() {
        let r = request(&["L1", "L2"], 0);
        assert_eq!(r.current_level_name(), "L1");
        assert!(!r.at_final_level());

        let r = request(&["L1", "L2"], 1);
        assert_eq!(r.current_level_name(), "L2");
        assert!(r.at_final_level());
    }

    #[test]
    fn serde_roundtrip() {
        let r = request(&["L1"], 0);
        let json = serde_json::to_string(&r).unwrap();
        let back: ApprovalRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, ApprovalRequestStatus::Pending);
        assert_eq!(back.required_levels, vec!["L1"]);
    }
}
