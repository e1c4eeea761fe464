use std::sync::Arc;
use std::time::Duration;

use refundry_approval::ApprovalEngine;
use refundry_connector::ConnectorRegistry;
use refundry_params::ParameterResolver;
use refundry_queue::Queue;
use refundry_repository::{
    BalanceStore, BankAccountRepository, IdempotencyStore, RefundRepository, TransactionStore,
};
use refundry_state::{DistributedLock, StateStore};

use crate::manager::{ManagerConfig, RefundManager};
use crate::ManagerError;

/// Default TTL on idempotency records (24 hours).
const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 3600);

/// Assembles a [`RefundManager`] from its collaborators.
///
/// The repositories all derive from the one state store; only the store,
/// lock, queue, approval engine, parameter resolver, and connector registry
/// must be supplied.
pub struct RefundManagerBuilder {
    state: Option<Arc<dyn StateStore>>,
    lock: Option<Arc<dyn DistributedLock>>,
    queue: Option<Arc<dyn Queue>>,
    approvals: Option<Arc<ApprovalEngine>>,
    params: Option<Arc<ParameterResolver>>,
    registry: Option<Arc<ConnectorRegistry>>,
    idempotency_ttl: Duration,
    config: ManagerConfig,
}

impl RefundManagerBuilder {
    /// Start an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: None,
            lock: None,
            queue: None,
            approvals: None,
            params: None,
            registry: None,
            idempotency_ttl: DEFAULT_IDEMPOTENCY_TTL,
            config: ManagerConfig::default(),
        }
    }

    /// Set the state store backing all repositories.
    #[must_use]
    pub fn with_state(mut self, state: Arc<dyn StateStore>) -> Self {
        self.state = Some(state);
        self
    }

    /// Set the distributed lock.
    #[must_use]
    pub fn with_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Set the queue connecting to the worker pipeline.
    #[must_use]
    pub fn with_queue(mut self, queue: Arc<dyn Queue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Set the approval engine.
    #[must_use]
    pub fn with_approvals(mut self, approvals: Arc<ApprovalEngine>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    /// Set the parameter resolver.
    #[must_use]
    pub fn with_params(mut self, params: Arc<ParameterResolver>) -> Self {
        self.params = Some(params);
        self
    }

    /// Set the connector registry.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ConnectorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override the idempotency record TTL.
    #[must_use]
    pub fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    /// Override the locking configuration.
    #[must_use]
    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the manager.
    pub fn build(self) -> Result<RefundManager, ManagerError> {
        let state = self
            .state
            .ok_or_else(|| ManagerError::Internal("builder: state store is required".into()))?;
        let lock = self
            .lock
            .ok_or_else(|| ManagerError::Internal("builder: distributed lock is required".into()))?;
        let queue = self
            .queue
            .ok_or_else(|| ManagerError::Internal("builder: queue is required".into()))?;
        let approvals = self
            .approvals
            .ok_or_else(|| ManagerError::Internal("builder: approval engine is required".into()))?;
        let params = self
            .params
            .ok_or_else(|| ManagerError::Internal("builder: parameter resolver is required".into()))?;
        let registry = self
            .registry
            .ok_or_else(|| ManagerError::Internal("builder: connector registry is required".into()))?;

        Ok(RefundManager {
            refunds: RefundRepository::new(Arc::clone(&state)),
            transactions: TransactionStore::new(Arc::clone(&state)),
            bank_accounts: BankAccountRepository::new(Arc::clone(&state)),
            balances: BalanceStore::new(Arc::clone(&state)),
            idempotency: IdempotencyStore::new(Arc::clone(&state), self.idempotency_ttl),
            lock,
            approvals,
            params,
            registry,
            queue,
            config: self.config,
        })
    }
}

impl Default for RefundManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
