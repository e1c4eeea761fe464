use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, instrument, warn};

use refundry_core::{ApprovalId, MerchantId, RefundId, RefundRequest};
use refundry_params::{catalog, ParameterResolver};
use refundry_state::{KeyKind, StateKey, StateStore};

use crate::model::{ApprovalDecision, ApprovalRequest, ApprovalRequestStatus};
use crate::rule::{ApprovalPlan, ApprovalRule};
use crate::ApprovalError;

/// Outcome of a recorded decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// Approved at the final level; the refund may proceed.
    Approved,
    /// Rejected at some level; the refund is rejected.
    Rejected,
    /// Approved at a non-final level; the next level now decides.
    Advanced { next_level: String },
}

/// What happened to one request during an escalation sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// Moved to the next level with a fresh deadline.
    Escalated { to_level: String },
    /// Ran past the last level; the configured fallback approved it.
    AutoApproved,
    /// Ran past the last level; the configured fallback rejected it.
    AutoRejected,
}

/// One escalated request, returned from [`ApprovalEngine::tick`].
#[derive(Debug, Clone)]
pub struct Escalation {
    pub request: ApprovalRequest,
    pub outcome: EscalationOutcome,
}

/// Evaluates approval gates and drives requests through their levels.
pub struct ApprovalEngine {
    state: Arc<dyn StateStore>,
    params: Arc<ParameterResolver>,
    rules: Vec<ApprovalRule>,
}

impl ApprovalEngine {
    /// Create an engine with the given explicit rules.
    pub fn new(
        state: Arc<dyn StateStore>,
        params: Arc<ParameterResolver>,
        rules: Vec<ApprovalRule>,
    ) -> Self {
        Self {
            state,
            params,
            rules,
        }
    }

    fn request_key(approval_id: &ApprovalId) -> StateKey {
        StateKey::global(KeyKind::Approval, approval_id.as_str())
    }

    fn pending_key(refund_id: &RefundId) -> StateKey {
        StateKey::global(KeyKind::PendingApprovals, refund_id.as_str())
    }

    /// Decide whether a refund needs approval and with what plan.
    ///
    /// Explicit rules are consulted first (first match wins); when none
    /// match, `threshold_tripped` (layer-5 compliance output) gates the
    /// parameter-driven plan.
    pub async fn plan(
        &self,
        refund: &RefundRequest,
        threshold_tripped: bool,
    ) -> Result<Option<ApprovalPlan>, ApprovalError> {
        if let Some(rule) = self.rules.iter().find(|r| r.condition.matches(refund)) {
            return Ok(Some(ApprovalPlan {
                rule: rule.name.clone(),
                required_levels: rule.required_levels.clone(),
                escalate_after: rule.escalate_after,
            }));
        }

        if !threshold_tripped {
            return Ok(None);
        }

        let levels = self
            .params
            .resolve(catalog::APPROVAL_LEVELS, &refund.merchant_id)
            .await?
            .value;
        let levels: Vec<String> = match levels {
            refundry_params::ParameterValue::Array(values) => values
                .into_iter()
                .filter_map(|v| v.as_str().map(ToOwned::to_owned))
                .collect(),
            _ => Vec::new(),
        };
        let levels = if levels.is_empty() {
            vec!["L1".to_owned()]
        } else {
            levels
        };

        let hours = self
            .params
            .resolve(catalog::ESCALATION_HOURS, &refund.merchant_id)
            .await?
            .value
            .as_i64()
            .unwrap_or(4)
            .max(1);
        let escalate_after = Duration::from_secs(u64::try_from(hours).unwrap_or(4) * 3600);

        Ok(Some(ApprovalPlan {
            rule: catalog::APPROVAL_THRESHOLD.to_owned(),
            required_levels: levels,
            escalate_after,
        }))
    }

    /// Open an approval request for a refund under the given plan.
    #[instrument(skip(self, refund, plan), fields(refund_id = %refund.refund_id, rule = %plan.rule))]
    pub async fn open(
        &self,
        refund: &RefundRequest,
        plan: &ApprovalPlan,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let now = Utc::now();
        let escalate_after_secs = plan.escalate_after.as_secs();
        let request = ApprovalRequest {
            approval_id: ApprovalId::generate(),
            refund_id: refund.refund_id.clone(),
            merchant_id: refund.merchant_id.clone(),
            rule: plan.rule.clone(),
            current_level: 0,
            required_levels: plan.required_levels.clone(),
            decisions: Vec::new(),
            escalation_deadline: now + to_delta(plan.escalate_after),
            escalate_after_secs,
            escalations: 0,
            status: ApprovalRequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        self.persist(&request).await?;
        self.state
            .set(
                &Self::pending_key(&request.refund_id),
                request.approval_id.as_str(),
                None,
            )
            .await
            .map_err(|e| ApprovalError::State(e.to_string()))?;
        self.index_deadline(&request).await?;

        info!(approval_id = %request.approval_id, "approval request opened");
        Ok(request)
    }

    /// Load an approval request.
    pub async fn get(&self, approval_id: &ApprovalId) -> Result<ApprovalRequest, ApprovalError> {
        let raw = self
            .state
            .get(&Self::request_key(approval_id))
            .await
            .map_err(|e| ApprovalError::State(e.to_string()))?
            .ok_or_else(|| ApprovalError::NotFound(approval_id.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| ApprovalError::Serialization(e.to_string()))
    }

    /// Find the pending approval for a refund, if any.
    pub async fn pending_for_refund(
        &self,
        refund_id: &RefundId,
    ) -> Result<Option<ApprovalRequest>, ApprovalError> {
        let Some(approval_id) = self
            .state
            .get(&Self::pending_key(refund_id))
            .await
            .map_err(|e| ApprovalError::State(e.to_string()))?
        else {
            return Ok(None);
        };
        Ok(Some(self.get(&ApprovalId::from(approval_id)).await?))
    }

    /// Record a decision by an approver at their level.
    #[instrument(skip(self), fields(approval_id = %approval_id, approver, approve))]
    pub async fn decide(
        &self,
        approval_id: &ApprovalId,
        approver: &str,
        approver_level: &str,
        approve: bool,
        comment: Option<String>,
    ) -> Result<(ApprovalRequest, DecisionOutcome), ApprovalError> {
        let mut request = self.get(approval_id).await?;

        if request.status != ApprovalRequestStatus::Pending {
            return Err(ApprovalError::AlreadyDecided(request.status.to_string()));
        }
        if request.current_level_name() != approver_level {
            return Err(ApprovalError::WrongLevel {
                approver_level: approver_level.to_owned(),
                current_level: request.current_level_name().to_owned(),
            });
        }

        let now = Utc::now();
        request.decisions.push(ApprovalDecision {
            approver: approver.to_owned(),
            level: approver_level.to_owned(),
            approved: approve,
            comment,
            decided_at: now,
        });
        request.updated_at = now;

        let outcome = if !approve {
            request.status = ApprovalRequestStatus::Rejected;
            self.close(&mut request).await?;
            DecisionOutcome::Rejected
        } else if request.at_final_level() {
            request.status = ApprovalRequestStatus::Approved;
            self.close(&mut request).await?;
            DecisionOutcome::Approved
        } else {
            request.current_level += 1;
            request.escalation_deadline =
                now + to_delta(Duration::from_secs(request.escalate_after_secs));
            self.persist(&request).await?;
            self.index_deadline(&request).await?;
            DecisionOutcome::Advanced {
                next_level: request.current_level_name().to_owned(),
            }
        };

        debug!(?outcome, "approval decision recorded");
        Ok((request, outcome))
    }

    /// Abandon the pending approval for a refund (the refund was canceled).
    ///
    /// Records a system rejection so the audit trail shows why the request
    /// closed. A refund with no pending approval is a no-op.
    #[instrument(skip(self), fields(refund_id = %refund_id))]
    pub async fn abandon(&self, refund_id: &RefundId) -> Result<(), ApprovalError> {
        let Some(mut request) = self.pending_for_refund(refund_id).await? else {
            return Ok(());
        };

        let now = Utc::now();
        request.decisions.push(ApprovalDecision {
            approver: "system".into(),
            level: request.current_level_name().to_owned(),
            approved: false,
            comment: Some("refund canceled".into()),
            decided_at: now,
        });
        request.status = ApprovalRequestStatus::Rejected;
        request.updated_at = now;
        self.close(&mut request).await
    }

    /// Sweep requests past their escalation deadline.
    ///
    /// Each one either advances a level with a fresh deadline, or — past the
    /// last level — resolves via the merchant's configured fallback.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<Escalation>, ApprovalError> {
        let expired = self
            .state
            .get_expired_deadlines(now.timestamp_millis())
            .await
            .map_err(|e| ApprovalError::State(e.to_string()))?;

        let mut escalations = Vec::new();
        for canonical in expired {
            let Some(approval_id) = parse_approval_key(&canonical) else {
                continue;
            };
            let approval_id = ApprovalId::from(approval_id);

            let mut request = match self.get(&approval_id).await {
                Ok(request) => request,
                Err(ApprovalError::NotFound(_)) => {
                    // Stale index entry; drop it.
                    let _ = self
                        .state
                        .remove_deadline_index(&Self::request_key(&approval_id))
                        .await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if request.status != ApprovalRequestStatus::Pending
                || request.escalation_deadline > now
            {
                continue;
            }

            request.escalations += 1;
            request.updated_at = now;

            let outcome = if request.at_final_level() {
                let fallback = self
                    .params
                    .resolve(catalog::APPROVAL_FALLBACK, &request.merchant_id)
                    .await?
                    .value;
                let auto_approve = fallback.as_str() == Some("auto-approve");
                if auto_approve {
                    request.status = ApprovalRequestStatus::Approved;
                    self.close(&mut request).await?;
                    EscalationOutcome::AutoApproved
                } else {
                    request.status = ApprovalRequestStatus::Rejected;
                    self.close(&mut request).await?;
                    EscalationOutcome::AutoRejected
                }
            } else {
                request.current_level += 1;
                request.escalation_deadline =
                    now + to_delta(Duration::from_secs(request.escalate_after_secs));
                self.persist(&request).await?;
                self.index_deadline(&request).await?;
                EscalationOutcome::Escalated {
                    to_level: request.current_level_name().to_owned(),
                }
            };

            warn!(
                approval_id = %request.approval_id,
                refund_id = %request.refund_id,
                ?outcome,
                "approval escalated"
            );
            escalations.push(Escalation { request, outcome });
        }

        Ok(escalations)
    }

    async fn persist(&self, request: &ApprovalRequest) -> Result<(), ApprovalError> {
        let raw = serde_json::to_string(request)
            .map_err(|e| ApprovalError::Serialization(e.to_string()))?;
        self.state
            .set(&Self::request_key(&request.approval_id), &raw, None)
            .await
            .map_err(|e| ApprovalError::State(e.to_string()))
    }

    async fn index_deadline(&self, request: &ApprovalRequest) -> Result<(), ApprovalError> {
        self.state
            .index_deadline(
                &Self::request_key(&request.approval_id),
                request.escalation_deadline.timestamp_millis(),
            )
            .await
            .map_err(|e| ApprovalError::State(e.to_string()))
    }

    /// Persist a decided request and drop its indexes.
    async fn close(&self, request: &mut ApprovalRequest) -> Result<(), ApprovalError> {
        self.persist(request).await?;
        self.state
            .remove_deadline_index(&Self::request_key(&request.approval_id))
            .await
            .map_err(|e| ApprovalError::State(e.to_string()))?;
        self.state
            .delete(&Self::pending_key(&request.refund_id))
            .await
            .map_err(|e| ApprovalError::State(e.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for ApprovalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalEngine")
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

/// Convert a std duration to a chrono delta, saturating on overflow.
fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// Extract the approval id from a canonical `global:approval:<id>` key.
fn parse_approval_key(canonical: &str) -> Option<&str> {
    let mut parts = canonical.splitn(3, ':');
    let _scope = parts.next()?;
    let kind = parts.next()?;
    let id = parts.next()?;
    (kind == KeyKind::Approval.as_str()).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use refundry_core::{
        money::Currency, GatewayKind, MerchantId, Money, RefundMethod, TransactionId,
    };
    use refundry_params::{ParameterResolverConfig, StaticHierarchy};
    use refundry_state_memory::MemoryStateStore;

    fn refund(amount: i64) -> RefundRequest {
        RefundRequest::new(
            TransactionId::from("T1"),
            MerchantId::from("m-1"),
            Money::new(amount, Currency::parse("USD").unwrap()),
            RefundMethod::OriginalPayment,
            GatewayKind::Stripe,
            "customer_request",
        )
    }

    fn engine_with_rules(rules: Vec<ApprovalRule>) -> ApprovalEngine {
        let state = Arc::new(MemoryStateStore::new());
        let params = Arc::new(ParameterResolver::new(
            Arc::clone(&state) as Arc<dyn StateStore>,
            Arc::new(StaticHierarchy::new().with_merchant("m-1", "org-1", "bank-1")),
            catalog::standard_definitions(),
            ParameterResolverConfig::default(),
        ));
        ApprovalEngine::new(state, params, rules)
    }

    fn engine() -> ApprovalEngine {
        engine_with_rules(Vec::new())
    }

    async fn opened(engine: &ApprovalEngine, levels: &[&str]) -> ApprovalRequest {
        let plan = ApprovalPlan {
            rule: "test-rule".into(),
            required_levels: levels.iter().map(|s| (*s).to_owned()).collect(),
            escalate_after: Duration::from_secs(4 * 3600),
        };
        engine.open(&refund(15_000), &plan).await.unwrap()
    }

    #[tokio::test]
    async fn threshold_plan_uses_parameters() {
        let engine = engine();
        let plan = engine.plan(&refund(15_000), true).await.unwrap().unwrap();
        assert_eq!(plan.rule, catalog::APPROVAL_THRESHOLD);
        assert_eq!(plan.required_levels, vec!["L1", "L2"]);
        assert_eq!(plan.escalate_after, Duration::from_secs(4 * 3600));
    }

    #[tokio::test]
    async fn no_plan_when_threshold_untripped() {
        let engine = engine();
        assert!(engine.plan(&refund(100), false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn explicit_rule_beats_threshold() {
        let engine = engine_with_rules(vec![ApprovalRule {
            name: "all-large".into(),
            condition: crate::rule::RuleCondition {
                amount_at_least: Some(10_000),
                ..Default::default()
            },
            required_levels: vec!["RISK".into()],
            escalate_after: Duration::from_secs(3600),
        }]);

        let plan = engine.plan(&refund(15_000), true).await.unwrap().unwrap();
        assert_eq!(plan.rule, "all-large");
        assert_eq!(plan.required_levels, vec!["RISK"]);
    }

    #[tokio::test]
    async fn open_then_lookup_by_refund() {
        let engine = engine();
        let request = opened(&engine, &["L1", "L2"]).await;

        let found = engine
            .pending_for_refund(&request.refund_id)
            .await
            .unwrap()
            .expect("pending approval should be indexed");
        assert_eq!(found.approval_id, request.approval_id);
        assert_eq!(found.status, ApprovalRequestStatus::Pending);
        assert_eq!(found.current_level_name(), "L1");
    }

    #[tokio::test]
    async fn approve_at_mid_level_advances() {
        let engine = engine();
        let request = opened(&engine, &["L1", "L2"]).await;

        let (updated, outcome) = engine
            .decide(&request.approval_id, "alice", "L1", true, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DecisionOutcome::Advanced {
                next_level: "L2".into()
            }
        );
        assert_eq!(updated.status, ApprovalRequestStatus::Pending);
        assert_eq!(updated.decisions.len(), 1);
    }

    #[tokio::test]
    async fn approve_at_final_level_approves() {
        let engine = engine();
        let request = opened(&engine, &["L1"]).await;

        let (updated, outcome) = engine
            .decide(&request.approval_id, "alice", "L1", true, None)
            .await
            .unwrap();
        assert_eq!(outcome, DecisionOutcome::Approved);
        assert_eq!(updated.status, ApprovalRequestStatus::Approved);

        // The pending index is cleaned up.
        assert!(
            engine
                .pending_for_refund(&request.refund_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn reject_closes_request() {
        let engine = engine();
        let request = opened(&engine, &["L1", "L2"]).await;

        let (updated, outcome) = engine
            .decide(
                &request.approval_id,
                "bob",
                "L1",
                false,
                Some("suspicious".into()),
            )
            .await
            .unwrap();
        assert_eq!(outcome, DecisionOutcome::Rejected);
        assert_eq!(updated.status, ApprovalRequestStatus::Rejected);

        // A second decision is refused.
        let err = engine
            .decide(&request.approval_id, "carol", "L1", true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::AlreadyDecided(_)));
    }

    #[tokio::test]
    async fn wrong_level_is_rejected() {
        let engine = engine();
        let request = opened(&engine, &["L1", "L2"]).await;

        let err = engine
            .decide(&request.approval_id, "mallory", "L2", true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::WrongLevel { .. }));
    }

    #[tokio::test]
    async fn tick_escalates_past_deadline() {
        let engine = engine();
        let request = opened(&engine, &["L1", "L2"]).await;

        // Before the deadline: nothing happens.
        let none = engine.tick(Utc::now()).await.unwrap();
        assert!(none.is_empty());

        // Past the deadline: escalates to L2 with a fresh deadline.
        let later = Utc::now() + TimeDelta::hours(5);
        let escalations = engine.tick(later).await.unwrap();
        assert_eq!(escalations.len(), 1);
        assert_eq!(
            escalations[0].outcome,
            EscalationOutcome::Escalated {
                to_level: "L2".into()
            }
        );

        let reloaded = engine.get(&request.approval_id).await.unwrap();
        assert_eq!(reloaded.current_level_name(), "L2");
        assert_eq!(reloaded.escalations, 1);
        assert!(reloaded.escalation_deadline > later);
    }

    #[tokio::test]
    async fn fallback_rejects_past_last_level() {
        let engine = engine();
        let request = opened(&engine, &["L1"]).await;

        let later = Utc::now() + TimeDelta::hours(5);
        let escalations = engine.tick(later).await.unwrap();
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].outcome, EscalationOutcome::AutoRejected);

        let reloaded = engine.get(&request.approval_id).await.unwrap();
        assert_eq!(reloaded.status, ApprovalRequestStatus::Rejected);
    }

    #[tokio::test]
    async fn tick_is_idempotent_after_close() {
        let engine = engine();
        let request = opened(&engine, &["L1"]).await;

        let later = Utc::now() + TimeDelta::hours(5);
        let first = engine.tick(later).await.unwrap();
        assert_eq!(first.len(), 1);

        let second = engine.tick(later + TimeDelta::hours(1)).await.unwrap();
        assert!(second.is_empty(), "closed requests are not re-escalated");

        let _ = request;
    }
}
