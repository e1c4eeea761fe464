use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use refundry_approval::ApprovalEngine;
use refundry_compliance::{ComplianceEngine, ComplianceInput};
use refundry_connector::ConnectorRegistry;
use refundry_core::{
    money::Currency, ApprovalState, GatewayKind, MerchantId, Money, RefundId, RefundMethod,
    RefundRequest, RefundStatus, RequestContext, Transaction,
};
use refundry_notify::NotificationEvent;
use refundry_params::ParameterResolver;
use refundry_queue::{Queue, QueueMessage};
use refundry_repository::{
    BalanceStore, BankAccountRepository, IdempotencyClaim, IdempotencyStore, RefundFilter,
    RefundPage, RefundRepository, TransactionStore,
};
use refundry_state::{DistributedLock, LockGuard, StateError, StateKey};

use crate::commands::{CreateRefund, RefundStatistics, UpdateRefund};
use crate::ManagerError;

/// Tunables for the manager's locking behavior.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Lease on the per-refund lock.
    pub lock_ttl: Duration,
    /// How long a mutation waits for a contended lock before failing.
    pub lock_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// The refund lifecycle orchestrator.
///
/// Create runs: validate → approval gate → persist → enqueue. Mutations of
/// existing refunds run: lock → re-read → check state → mutate → CAS commit.
pub struct RefundManager {
    pub(crate) refunds: RefundRepository,
    pub(crate) transactions: TransactionStore,
    pub(crate) bank_accounts: BankAccountRepository,
    pub(crate) balances: BalanceStore,
    pub(crate) idempotency: IdempotencyStore,
    pub(crate) lock: Arc<dyn DistributedLock>,
    pub(crate) approvals: Arc<ApprovalEngine>,
    pub(crate) params: Arc<ParameterResolver>,
    pub(crate) registry: Arc<ConnectorRegistry>,
    pub(crate) queue: Arc<dyn Queue>,
    pub(crate) config: ManagerConfig,
}

impl RefundManager {
    /// The transaction read-model store (ingestion and lookups).
    #[must_use]
    pub fn transactions(&self) -> &TransactionStore {
        &self.transactions
    }

    /// The bank account repository.
    #[must_use]
    pub fn bank_accounts(&self) -> &BankAccountRepository {
        &self.bank_accounts
    }

    /// The merchant balance store.
    #[must_use]
    pub fn balances(&self) -> &BalanceStore {
        &self.balances
    }

    /// Create a refund.
    ///
    /// Idempotent by `(merchant, transaction, client_idempotency_key)`:
    /// a replay within the record TTL returns the original refund. Nothing
    /// is persisted or enqueued when validation fails.
    #[instrument(skip(self, cmd, ctx), fields(
        merchant_id = %cmd.merchant_id,
        transaction_id = %cmd.transaction_id,
        correlation_id = %ctx.correlation_id,
    ))]
    pub async fn create(
        &self,
        cmd: CreateRefund,
        ctx: &RequestContext,
    ) -> Result<RefundRequest, ManagerError> {
        let currency = Currency::parse(&cmd.currency).map_err(|_| {
            ManagerError::Validation(vec![refundry_core::FieldError::new(
                "currency",
                "INVALID_CURRENCY",
                format!("{:?} is not an ISO-4217 code", cmd.currency),
            )])
        })?;

        // Claim the idempotency key before any work.
        let idem_key = cmd.client_idempotency_key.as_ref().map(|key| {
            format!("create:{}:{}:{key}", cmd.merchant_id, cmd.transaction_id)
        });
        if let Some(key) = &idem_key {
            match self.idempotency.claim(key).await? {
                IdempotencyClaim::Claimed => {}
                IdempotencyClaim::Completed(refund_id) => {
                    info!(%refund_id, "idempotent create replayed");
                    let existing = self.refunds.fetch(&RefundId::from(refund_id)).await?;
                    return Ok(existing.refund);
                }
                IdempotencyClaim::InFlight => {
                    return Err(ManagerError::Conflict(
                        "an identical create is already in flight".into(),
                    ));
                }
            }
        }

        let result = self.create_inner(cmd, currency, ctx).await;

        match (&result, &idem_key) {
            (Ok(refund), Some(key)) => {
                self.idempotency
                    .complete(key, refund.refund_id.as_str())
                    .await?;
            }
            (Err(_), Some(key)) => {
                // Nothing was persisted; free the key so a corrected retry
                // can run fresh.
                if let Err(e) = self.idempotency.release(key).await {
                    warn!(error = %e, "failed to release idempotency claim");
                }
            }
            _ => {}
        }

        result
    }

    async fn create_inner(
        &self,
        cmd: CreateRefund,
        currency: Currency,
        ctx: &RequestContext,
    ) -> Result<RefundRequest, ManagerError> {
        let transaction = self.transactions.fetch(&cmd.transaction_id).await?;

        // OTHER refunds travel the ACH rail regardless of the capturing
        // gateway. The fallback kind for a missing transaction is never
        // persisted: validation rejects first.
        let gateway_kind = match cmd.refund_method {
            RefundMethod::Other => GatewayKind::Ach,
            _ => transaction
                .as_ref()
                .map_or(GatewayKind::Stripe, |t| t.gateway_kind),
        };

        let mut refund = RefundRequest::new(
            cmd.transaction_id.clone(),
            cmd.merchant_id.clone(),
            Money::new(cmd.amount, currency.clone()),
            cmd.refund_method,
            gateway_kind,
            cmd.reason,
        )
        .with_metadata(cmd.metadata);
        if let Some(customer) = cmd.customer_id {
            refund = refund.with_customer(customer);
        }
        if let Some(code) = cmd.reason_code {
            refund = refund.with_reason_code(code);
        }
        if let Some(account_id) = cmd.bank_account_id {
            refund = refund.with_bank_account(account_id);
        }

        let outcome = self.run_compliance(&refund, transaction.as_ref()).await?;

        refund
            .transition(RefundStatus::Submitted, &ctx.actor, None)
            .map_err(|e| ManagerError::Internal(e.to_string()))?;

        let plan = self
            .approvals
            .plan(&refund, outcome.approval_required)
            .await?;

        if let Some(plan) = plan {
            refund
                .transition(
                    RefundStatus::PendingApproval,
                    "system",
                    Some(format!("approval required by {}", plan.rule)),
                )
                .map_err(|e| ManagerError::Internal(e.to_string()))?;
            refund.approval_state = ApprovalState::Pending;

            self.refunds.insert(&refund).await?;
            let request = self.approvals.open(&refund, &plan).await?;

            self.enqueue_notification(
                NotificationEvent::ApprovalRequested {
                    refund_id: refund.refund_id.clone(),
                    approval_id: request.approval_id.clone(),
                    merchant_id: refund.merchant_id.clone(),
                    level: request.current_level_name().to_owned(),
                    amount_minor: refund.amount.amount,
                    currency: refund.amount.currency.as_str().to_owned(),
                },
                ctx,
            )
            .await?;

            info!(refund_id = %refund.refund_id, approval_id = %request.approval_id,
                "refund blocked pending approval");
        } else {
            self.refunds.insert(&refund).await?;
            self.queue
                .send(QueueMessage::process_refund(&refund.refund_id, ctx))
                .await?;
            info!(refund_id = %refund.refund_id, "refund accepted and enqueued");
        }

        Ok(refund)
    }

    /// Fetch one refund.
    pub async fn get(&self, refund_id: &RefundId) -> Result<RefundRequest, ManagerError> {
        Ok(self.refunds.fetch(refund_id).await?.refund)
    }

    /// List refunds with filters and paging.
    pub async fn list(
        &self,
        filter: &RefundFilter,
        page: usize,
        page_size: usize,
    ) -> Result<RefundPage, ManagerError> {
        Ok(self.refunds.list(filter, page, page_size).await?)
    }

    /// Aggregate statistics, optionally scoped to one merchant.
    pub async fn statistics(
        &self,
        merchant_id: Option<MerchantId>,
    ) -> Result<RefundStatistics, ManagerError> {
        let filter = RefundFilter {
            merchant_id,
            ..RefundFilter::default()
        };

        let mut stats = RefundStatistics::default();
        let mut completion_seconds = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.refunds.list(&filter, page, 100).await?;
            for refund in &batch.items {
                stats.total_count += 1;
                *stats
                    .by_status
                    .entry(refund.status.as_str().to_owned())
                    .or_insert(0) += 1;
                if refund.status == RefundStatus::Completed {
                    *stats
                        .completed_minor_by_currency
                        .entry(refund.amount.currency.as_str().to_owned())
                        .or_insert(0) += refund.amount.amount;
                    if let Some(completed_at) = refund.completed_at {
                        completion_seconds
                            .push((completed_at - refund.created_at).num_seconds());
                    }
                }
            }
            if page >= batch.total_pages || batch.items.is_empty() {
                break;
            }
            page += 1;
        }

        if !completion_seconds.is_empty() {
            let sum: i64 = completion_seconds.iter().sum();
            stats.average_completion_seconds =
                Some(sum / completion_seconds.len() as i64);
        }

        Ok(stats)
    }

    /// Update a refund. Permitted only before processing starts; the patch
    /// re-runs the full validation and is refused wholesale if anything
    /// fails.
    #[instrument(skip(self, patch, ctx), fields(refund_id = %refund_id, correlation_id = %ctx.correlation_id))]
    pub async fn update(
        &self,
        refund_id: &RefundId,
        patch: UpdateRefund,
        ctx: &RequestContext,
    ) -> Result<RefundRequest, ManagerError> {
        if patch.is_empty() {
            return self.get(refund_id).await;
        }

        let guard = self.acquire_lock(refund_id).await?;
        let result = self.update_locked(refund_id, patch, ctx).await;
        release_quietly(guard).await;
        result
    }

    async fn update_locked(
        &self,
        refund_id: &RefundId,
        patch: UpdateRefund,
        ctx: &RequestContext,
    ) -> Result<RefundRequest, ManagerError> {
        // Re-read under the lock: another mutator may have won the race.
        let versioned = self.refunds.fetch(refund_id).await?;
        let mut refund = versioned.refund;

        if !refund.status.is_updatable() {
            return Err(ManagerError::IllegalState {
                operation: "update",
                state: refund.status.as_str(),
            });
        }

        if let Some(amount) = patch.amount {
            refund.amount = Money::new(amount, refund.amount.currency.clone());
        }
        if let Some(reason) = patch.reason {
            refund.reason = reason;
        }
        if let Some(code) = patch.reason_code {
            refund.reason_code = Some(code);
        }
        if let Some(account_id) = patch.bank_account_id {
            refund.bank_account_id = Some(account_id);
        }
        if let Some(metadata) = patch.metadata {
            refund.metadata = metadata;
        }

        let transaction = self.transactions.fetch(&refund.transaction_id).await?;
        self.run_compliance(&refund, transaction.as_ref()).await?;

        refund.updated_at = chrono::Utc::now();
        self.refunds.update(&refund, versioned.version).await?;
        info!(actor = %ctx.actor, "refund updated");
        Ok(refund)
    }

    /// Cancel a refund.
    ///
    /// Honored only while no worker holds the refund's lock and the state
    /// still permits cancellation — once the gateway has been asked to
    /// refund, the side effect exists and cancel is refused.
    #[instrument(skip(self, ctx), fields(refund_id = %refund_id, correlation_id = %ctx.correlation_id))]
    pub async fn cancel(
        &self,
        refund_id: &RefundId,
        reason: impl Into<String> + std::fmt::Debug,
        ctx: &RequestContext,
    ) -> Result<RefundRequest, ManagerError> {
        let guard = self
            .lock
            .try_acquire(&lock_name(refund_id), self.config.lock_ttl)
            .await
            .map_err(|e| ManagerError::Internal(e.to_string()))?
            .ok_or_else(|| {
                ManagerError::Conflict("refund is currently being processed".into())
            })?;

        let result = self.cancel_locked(refund_id, reason.into(), ctx).await;
        release_quietly(guard).await;
        result
    }

    async fn cancel_locked(
        &self,
        refund_id: &RefundId,
        reason: String,
        ctx: &RequestContext,
    ) -> Result<RefundRequest, ManagerError> {
        let versioned = self.refunds.fetch(refund_id).await?;
        let mut refund = versioned.refund;

        if !refund.status.is_cancelable() {
            return Err(ManagerError::IllegalState {
                operation: "cancel",
                state: refund.status.as_str(),
            });
        }

        let was_pending_approval = refund.status == RefundStatus::PendingApproval;
        refund
            .transition(RefundStatus::Canceled, &ctx.actor, Some(reason))
            .map_err(|e| ManagerError::Internal(e.to_string()))?;

        self.refunds.update(&refund, versioned.version).await?;

        // A pending approval must not keep escalating for a dead refund.
        if was_pending_approval {
            self.approvals.abandon(refund_id).await?;
        }

        info!("refund canceled");
        Ok(refund)
    }

    /// Apply an approval decision to the refund (internal, from the approval
    /// flow). Approval advances the refund to `Processing` and enqueues it;
    /// rejection is terminal.
    #[instrument(skip(self, ctx), fields(refund_id = %refund_id, approved, correlation_id = %ctx.correlation_id))]
    pub async fn record_decision(
        &self,
        refund_id: &RefundId,
        approved: bool,
        ctx: &RequestContext,
    ) -> Result<RefundRequest, ManagerError> {
        let guard = self.acquire_lock(refund_id).await?;
        let result = self.record_decision_locked(refund_id, approved, ctx).await;
        release_quietly(guard).await;
        result
    }

    async fn record_decision_locked(
        &self,
        refund_id: &RefundId,
        approved: bool,
        ctx: &RequestContext,
    ) -> Result<RefundRequest, ManagerError> {
        let versioned = self.refunds.fetch(refund_id).await?;
        let mut refund = versioned.refund;

        if refund.status != RefundStatus::PendingApproval {
            return Err(ManagerError::IllegalState {
                operation: "record_decision",
                state: refund.status.as_str(),
            });
        }

        if approved {
            refund
                .transition(RefundStatus::Processing, &ctx.actor, Some("approved".into()))
                .map_err(|e| ManagerError::Internal(e.to_string()))?;
            refund.approval_state = ApprovalState::Approved;
            self.refunds.update(&refund, versioned.version).await?;
            self.queue
                .send(QueueMessage::process_refund(refund_id, ctx))
                .await?;
        } else {
            refund
                .transition(RefundStatus::Rejected, &ctx.actor, Some("rejected".into()))
                .map_err(|e| ManagerError::Internal(e.to_string()))?;
            refund.approval_state = ApprovalState::Rejected;
            self.refunds.update(&refund, versioned.version).await?;
        }

        info!("approval decision applied to refund");
        Ok(refund)
    }

    /// Mark that an approval escalated, for audit on the refund document.
    pub async fn record_escalation(&self, refund_id: &RefundId) -> Result<(), ManagerError> {
        let guard = self.acquire_lock(refund_id).await?;
        let result = async {
            let versioned = self.refunds.fetch(refund_id).await?;
            let mut refund = versioned.refund;
            if refund.status == RefundStatus::PendingApproval {
                refund.approval_state = ApprovalState::Escalated;
                refund.updated_at = chrono::Utc::now();
                self.refunds.update(&refund, versioned.version).await?;
            }
            Ok(())
        }
        .await;
        release_quietly(guard).await;
        result
    }

    async fn run_compliance(
        &self,
        refund: &RefundRequest,
        transaction: Option<&Transaction>,
    ) -> Result<refundry_compliance::ComplianceOutcome, ManagerError> {
        let bank_account = match &refund.bank_account_id {
            Some(account_id) => {
                self.bank_accounts
                    .fetch(&refund.merchant_id, account_id)
                    .await?
            }
            None => None,
        };

        let prior_refunded_minor = self
            .refunds
            .completed_refund_total(&refund.transaction_id)
            .await?;

        let merchant_balance_minor = self
            .balances
            .get(&refund.merchant_id, &refund.amount.currency)
            .await?;

        let gateway_supports_refunds = transaction
            .map(|t| self.registry.get(t.gateway_kind).is_ok())
            .unwrap_or(false);

        let engine = ComplianceEngine::new(&self.params);
        let input = ComplianceInput {
            refund,
            transaction,
            bank_account: bank_account.as_ref(),
            prior_refunded_minor,
            merchant_balance_minor,
            gateway_supports_refunds,
        };
        Ok(engine.validate(&input).await?)
    }

    async fn enqueue_notification(
        &self,
        event: NotificationEvent,
        ctx: &RequestContext,
    ) -> Result<(), ManagerError> {
        let payload = serde_json::to_value(&event)
            .map_err(|e| ManagerError::Internal(e.to_string()))?;
        self.queue
            .send(QueueMessage::notify(payload, ctx))
            .await?;
        Ok(())
    }

    async fn acquire_lock(
        &self,
        refund_id: &RefundId,
    ) -> Result<Box<dyn LockGuard>, ManagerError> {
        self.lock
            .acquire(
                &lock_name(refund_id),
                self.config.lock_ttl,
                self.config.lock_timeout,
            )
            .await
            .map_err(|e| match e {
                StateError::Timeout(_) => ManagerError::LockTimeout(refund_id.to_string()),
                other => ManagerError::Internal(other.to_string()),
            })
    }
}

impl std::fmt::Debug for RefundManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefundManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The per-refund lock name shared by the manager and workers.
#[must_use]
pub(crate) fn lock_name(refund_id: &RefundId) -> String {
    StateKey::refund_lock(refund_id).canonical()
}

async fn release_quietly(guard: Box<dyn LockGuard>) {
    if let Err(e) = guard.release().await {
        warn!(error = %e, "lock release failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{CreateRefund, UpdateRefund};
    use crate::RefundManagerBuilder;

    use chrono::{Duration as ChronoDuration, Utc};
    use refundry_connector::testing::MockConnector;
    use refundry_core::{
        bank_account::{AccountType, BankAccount, BankAccountStatus, VerificationStatus},
        transaction::TransactionStatus,
        BankAccountId, TransactionId,
    };
    use refundry_params::{
        catalog, EntityLevel, Parameter, ParameterResolverConfig, ParameterValue,
        StaticHierarchy,
    };
    use refundry_queue::{MemoryQueue, MessageKind};
    use refundry_state_memory::{MemoryDistributedLock, MemoryStateStore};

    struct Harness {
        manager: RefundManager,
        queue: Arc<MemoryQueue>,
        approvals: Arc<ApprovalEngine>,
        params: Arc<ParameterResolver>,
    }

    async fn harness() -> Harness {
        let state: Arc<MemoryStateStore> = Arc::new(MemoryStateStore::new());
        let state_dyn: Arc<dyn refundry_state::StateStore> = Arc::clone(&state) as _;
        let queue = Arc::new(MemoryQueue::new());
        let params = Arc::new(ParameterResolver::new(
            Arc::clone(&state_dyn),
            Arc::new(StaticHierarchy::new().with_merchant("m-1", "org-1", "bank-1")),
            catalog::standard_definitions(),
            ParameterResolverConfig::default(),
        ));
        let approvals = Arc::new(ApprovalEngine::new(
            Arc::clone(&state_dyn),
            Arc::clone(&params),
            Vec::new(),
        ));
        let registry = Arc::new(
            ConnectorRegistry::new()
                .with_connector(Arc::new(MockConnector::succeeding(
                    GatewayKind::Stripe,
                    "re_1",
                )))
                .with_connector(Arc::new(MockConnector::succeeding(GatewayKind::Ach, "tr_1"))),
        );

        let manager = RefundManagerBuilder::new()
            .with_state(Arc::clone(&state_dyn))
            .with_lock(Arc::new(MemoryDistributedLock::new()))
            .with_queue(Arc::clone(&queue) as Arc<dyn Queue>)
            .with_approvals(Arc::clone(&approvals))
            .with_params(Arc::clone(&params))
            .with_registry(registry)
            .build()
            .expect("harness builds");

        // Seed the captured transaction every test refunds against.
        manager
            .transactions
            .put(&Transaction {
                id: TransactionId::from("T1"),
                merchant_id: MerchantId::from("m-1"),
                amount: Money::new(10_000, Currency::parse("USD").unwrap()),
                gateway_kind: GatewayKind::Stripe,
                gateway_transaction_id: "ch_1".into(),
                captured_at: Utc::now() - ChronoDuration::days(3),
                status: TransactionStatus::Captured,
            })
            .await
            .unwrap();

        Harness {
            manager,
            queue,
            approvals,
            params,
        }
    }

    fn create_cmd(amount: i64) -> CreateRefund {
        CreateRefund {
            merchant_id: MerchantId::from("m-1"),
            transaction_id: TransactionId::from("T1"),
            amount,
            currency: "USD".into(),
            refund_method: RefundMethod::OriginalPayment,
            reason: "customer_request".into(),
            reason_code: None,
            customer_id: None,
            bank_account_id: None,
            client_idempotency_key: None,
            metadata: std::collections::HashMap::new(),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::with_correlation("corr-mgr", "api")
    }

    async fn drain_kinds(queue: &MemoryQueue) -> Vec<MessageKind> {
        let batch = queue.receive(50, Duration::ZERO).await.unwrap();
        let kinds = batch.iter().map(|m| m.message.kind).collect();
        for m in &batch {
            queue.ack(&m.receipt).await.unwrap();
        }
        kinds
    }

    #[tokio::test]
    async fn create_happy_path_enqueues_processing() {
        let h = harness().await;
        let refund = h.manager.create(create_cmd(2_500), &ctx()).await.unwrap();

        assert_eq!(refund.status, RefundStatus::Submitted);
        assert_eq!(refund.approval_state, ApprovalState::None);
        let history: Vec<_> = refund.status_history.iter().map(|e| e.to).collect();
        assert_eq!(history, vec![RefundStatus::Submitted]);

        assert_eq!(drain_kinds(&h.queue).await, vec![MessageKind::ProcessRefund]);
    }

    #[tokio::test]
    async fn idempotent_create_replays_same_refund() {
        let h = harness().await;
        let mut cmd = create_cmd(2_500);
        cmd.client_idempotency_key = Some("key-1".into());

        let first = h.manager.create(cmd.clone(), &ctx()).await.unwrap();
        let second = h.manager.create(cmd, &ctx()).await.unwrap();

        assert_eq!(first.refund_id, second.refund_id);
        // Only one processing message was ever enqueued.
        assert_eq!(drain_kinds(&h.queue).await, vec![MessageKind::ProcessRefund]);
    }

    #[tokio::test]
    async fn amount_exceeding_remaining_persists_nothing() {
        let h = harness().await;

        // A prior completed refund of 4000 against the 10000 capture leaves
        // 6000 refundable; simulate via a completed document.
        let mut prior = RefundRequest::new(
            TransactionId::from("T1"),
            MerchantId::from("m-1"),
            Money::new(4_000, Currency::parse("USD").unwrap()),
            RefundMethod::OriginalPayment,
            GatewayKind::Stripe,
            "previous",
        );
        prior.transition(RefundStatus::Submitted, "t", None).unwrap();
        prior.transition(RefundStatus::Processing, "t", None).unwrap();
        prior.transition(RefundStatus::Completed, "t", None).unwrap();
        h.manager.refunds.insert(&prior).await.unwrap();

        let err = h.manager.create(create_cmd(7_000), &ctx()).await.unwrap_err();
        let ManagerError::Validation(errors) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, "MAX_REFUND_AMOUNT_EXCEEDED");
        assert_eq!(errors[0].field, "amount");

        // Nothing new persisted, nothing enqueued.
        let page = h
            .manager
            .list(&RefundFilter::default(), 1, 10)
            .await
            .unwrap();
        assert_eq!(page.total_items, 1, "only the seeded prior refund exists");
        assert!(drain_kinds(&h.queue).await.is_empty());
    }

    #[tokio::test]
    async fn other_method_requires_verified_account() {
        let h = harness().await;
        h.manager
            .bank_accounts
            .insert(&BankAccount {
                account_id: BankAccountId::from("B9"),
                merchant_id: MerchantId::from("m-1"),
                holder_name: "Acme".into(),
                account_type: AccountType::Checking,
                routing_number: "021000021".into(),
                account_number_last4: "6789".into(),
                encrypted_account_number: "ENC[AES256-GCM,data:x,iv:y,tag:z]".into(),
                status: BankAccountStatus::Active,
                verification_status: VerificationStatus::Unverified,
                is_default: false,
            })
            .await
            .unwrap();

        let mut cmd = create_cmd(2_500);
        cmd.refund_method = RefundMethod::Other;
        cmd.bank_account_id = Some(BankAccountId::from("B9"));

        let err = h.manager.create(cmd, &ctx()).await.unwrap_err();
        let ManagerError::Validation(errors) = err else {
            panic!("expected validation failure");
        };
        assert_eq!(errors[0].field, "bank_account_id");
        assert_eq!(errors[0].code, "BANK_ACCOUNT_NOT_VERIFIED");
    }

    async fn set_merchant_threshold(h: &Harness, threshold: i64) {
        h.params
            .write(Parameter {
                name: catalog::APPROVAL_THRESHOLD.into(),
                entity_level: EntityLevel::Merchant,
                entity_id: "m-1".into(),
                value: ParameterValue::Number(threshold),
                effective_date: Utc::now() - ChronoDuration::hours(1),
                expiration_date: None,
                overridable: true,
                version: 1,
                created_at: Utc::now(),
                created_by: "test".into(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn threshold_blocks_in_pending_approval() {
        let h = harness().await;
        set_merchant_threshold(&h, 5_000).await;

        let refund = h.manager.create(create_cmd(9_000), &ctx()).await.unwrap();

        assert_eq!(refund.status, RefundStatus::PendingApproval);
        assert_eq!(refund.approval_state, ApprovalState::Pending);

        // An approval request exists with the configured deadline window.
        let request = h
            .approvals
            .pending_for_refund(&refund.refund_id)
            .await
            .unwrap()
            .expect("approval opened");
        let lead = request.escalation_deadline - Utc::now();
        assert!(lead > ChronoDuration::hours(3) && lead <= ChronoDuration::hours(4));

        // Only a notification went out; processing waits on the decision.
        assert_eq!(drain_kinds(&h.queue).await, vec![MessageKind::Notify]);
    }

    #[tokio::test]
    async fn approved_decision_starts_processing() {
        let h = harness().await;
        set_merchant_threshold(&h, 5_000).await;

        let refund = h.manager.create(create_cmd(9_000), &ctx()).await.unwrap();
        assert_eq!(refund.status, RefundStatus::PendingApproval);
        let _ = drain_kinds(&h.queue).await;

        let updated = h
            .manager
            .record_decision(&refund.refund_id, true, &ctx())
            .await
            .unwrap();
        assert_eq!(updated.status, RefundStatus::Processing);
        assert_eq!(updated.approval_state, ApprovalState::Approved);
        assert_eq!(drain_kinds(&h.queue).await, vec![MessageKind::ProcessRefund]);
    }

    #[tokio::test]
    async fn rejected_decision_is_terminal() {
        let h = harness().await;
        set_merchant_threshold(&h, 5_000).await;

        let refund = h.manager.create(create_cmd(9_000), &ctx()).await.unwrap();
        let _ = drain_kinds(&h.queue).await;

        let updated = h
            .manager
            .record_decision(&refund.refund_id, false, &ctx())
            .await
            .unwrap();
        assert_eq!(updated.status, RefundStatus::Rejected);
        assert!(drain_kinds(&h.queue).await.is_empty());

        // Terminal: another decision attempt is refused.
        let err = h
            .manager
            .record_decision(&refund.refund_id, true, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::IllegalState { .. }));
    }

    #[tokio::test]
    async fn cancel_before_processing() {
        let h = harness().await;
        let refund = h.manager.create(create_cmd(2_500), &ctx()).await.unwrap();

        let canceled = h
            .manager
            .cancel(&refund.refund_id, "customer changed their mind", &ctx())
            .await
            .unwrap();
        assert_eq!(canceled.status, RefundStatus::Canceled);
    }

    #[tokio::test]
    async fn cancel_refused_once_processing() {
        let h = harness().await;
        set_merchant_threshold(&h, 1_000).await;
        let refund = h.manager.create(create_cmd(2_500), &ctx()).await.unwrap();
        let _ = drain_kinds(&h.queue).await;
        h.manager
            .record_decision(&refund.refund_id, true, &ctx())
            .await
            .unwrap();

        let err = h
            .manager
            .cancel(&refund.refund_id, "too late", &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::IllegalState { .. }));
    }

    #[tokio::test]
    async fn cancel_abandons_pending_approval() {
        let h = harness().await;
        set_merchant_threshold(&h, 1_000).await;
        let refund = h.manager.create(create_cmd(2_500), &ctx()).await.unwrap();

        h.manager
            .cancel(&refund.refund_id, "changed mind", &ctx())
            .await
            .unwrap();

        assert!(
            h.approvals
                .pending_for_refund(&refund.refund_id)
                .await
                .unwrap()
                .is_none(),
            "pending approval is closed with the refund"
        );
    }

    #[tokio::test]
    async fn update_revalidates_amount() {
        let h = harness().await;
        let refund = h.manager.create(create_cmd(2_500), &ctx()).await.unwrap();

        // Raising beyond the captured amount must be refused wholesale.
        let err = h
            .manager
            .update(
                &refund.refund_id,
                UpdateRefund {
                    amount: Some(50_000),
                    ..UpdateRefund::default()
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Validation(_)));

        // The stored document is untouched.
        let unchanged = h.manager.get(&refund.refund_id).await.unwrap();
        assert_eq!(unchanged.amount.amount, 2_500);

        // A legal raise goes through.
        let updated = h
            .manager
            .update(
                &refund.refund_id,
                UpdateRefund {
                    amount: Some(3_000),
                    ..UpdateRefund::default()
                },
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(updated.amount.amount, 3_000);
    }

    #[tokio::test]
    async fn update_refused_after_processing_starts() {
        let h = harness().await;
        set_merchant_threshold(&h, 1_000).await;
        let refund = h.manager.create(create_cmd(2_500), &ctx()).await.unwrap();
        let _ = drain_kinds(&h.queue).await;
        h.manager
            .record_decision(&refund.refund_id, true, &ctx())
            .await
            .unwrap();

        let err = h
            .manager
            .update(
                &refund.refund_id,
                UpdateRefund {
                    reason: Some("new reason".into()),
                    ..UpdateRefund::default()
                },
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::IllegalState { .. }));
    }

    #[tokio::test]
    async fn balance_method_checks_funds() {
        let h = harness().await;
        let usd = Currency::parse("USD").unwrap();
        h.manager
            .balances
            .credit(&MerchantId::from("m-1"), &usd, 10_000)
            .await
            .unwrap();

        let mut cmd = create_cmd(2_500);
        cmd.refund_method = RefundMethod::Balance;
        let refund = h.manager.create(cmd, &ctx()).await.unwrap();
        assert_eq!(refund.status, RefundStatus::Submitted);

        let mut too_big = create_cmd(50_000);
        too_big.refund_method = RefundMethod::Balance;
        let err = h.manager.create(too_big, &ctx()).await.unwrap_err();
        assert!(matches!(err, ManagerError::Validation(_)));
    }

    #[tokio::test]
    async fn statistics_aggregate() {
        let h = harness().await;
        h.manager.create(create_cmd(2_500), &ctx()).await.unwrap();
        h.manager.create(create_cmd(1_000), &ctx()).await.unwrap();

        let stats = h
            .manager
            .statistics(Some(MerchantId::from("m-1")))
            .await
            .unwrap();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.by_status.get("SUBMITTED"), Some(&2));
        assert!(stats.completed_minor_by_currency.is_empty());
    }
}
