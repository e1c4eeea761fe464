use std::sync::Arc;

use refundry_approval::ApprovalEngine;
use refundry_connector::ConnectorRegistry;
use refundry_core::RefundId;
use refundry_credentials::CredentialManager;
use refundry_manager::RefundManager;
use refundry_notify::NotificationDispatcher;
use refundry_params::ParameterResolver;
use refundry_queue::Queue;
use refundry_repository::{
    BalanceStore, BankAccountRepository, RefundRepository, TransactionStore,
};
use refundry_state::{DistributedLock, LockGuard, StateError, StateKey, StateStore};

use crate::config::WorkerConfig;
use crate::WorkerError;

/// Shared collaborators handed to every handler.
///
/// Handlers receive the context explicitly; nothing is read from globals.
pub struct WorkerContext {
    pub refunds: RefundRepository,
    pub transactions: TransactionStore,
    pub bank_accounts: BankAccountRepository,
    pub balances: BalanceStore,
    pub state: Arc<dyn StateStore>,
    pub lock: Arc<dyn DistributedLock>,
    pub registry: Arc<ConnectorRegistry>,
    pub credentials: Arc<CredentialManager>,
    pub approvals: Arc<ApprovalEngine>,
    pub params: Arc<ParameterResolver>,
    pub manager: Arc<RefundManager>,
    pub queue: Arc<dyn Queue>,
    pub notifications: Arc<NotificationDispatcher>,
    pub config: WorkerConfig,
}

impl WorkerContext {
    /// Assemble a context; repositories derive from the state store.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<dyn StateStore>,
        lock: Arc<dyn DistributedLock>,
        registry: Arc<ConnectorRegistry>,
        credentials: Arc<CredentialManager>,
        approvals: Arc<ApprovalEngine>,
        params: Arc<ParameterResolver>,
        manager: Arc<RefundManager>,
        queue: Arc<dyn Queue>,
        notifications: Arc<NotificationDispatcher>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            refunds: RefundRepository::new(Arc::clone(&state)),
            transactions: TransactionStore::new(Arc::clone(&state)),
            bank_accounts: BankAccountRepository::new(Arc::clone(&state)),
            balances: BalanceStore::new(Arc::clone(&state)),
            state,
            lock,
            registry,
            credentials,
            approvals,
            params,
            manager,
            queue,
            notifications,
            config,
        }
    }

    /// Take the per-refund lock shared with the manager.
    pub(crate) async fn lock_refund(
        &self,
        refund_id: &RefundId,
    ) -> Result<Box<dyn LockGuard>, WorkerError> {
        let name = StateKey::refund_lock(refund_id).canonical();
        match self
            .lock
            .acquire(&name, self.config.lock_ttl, self.config.lock_timeout)
            .await
        {
            Ok(guard) => Ok(guard),
            Err(StateError::Timeout(_)) => Err(WorkerError::LockBusy(refund_id.to_string())),
            Err(e) => Err(WorkerError::State(e.to_string())),
        }
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
