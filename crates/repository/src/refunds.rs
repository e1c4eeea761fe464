use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::instrument;

use refundry_core::{MerchantId, RefundId, RefundRequest, RefundStatus, TransactionId};
use refundry_state::{CasResult, KeyKind, StateKey, StateStore};

use crate::RepoError;

/// A refund document together with its storage version.
///
/// The version feeds the compare-and-swap on update; two concurrent writers
/// holding the same version cannot both commit.
#[derive(Debug, Clone)]
pub struct VersionedRefund {
    pub refund: RefundRequest,
    pub version: u64,
}

/// Filters for listing refunds.
#[derive(Debug, Clone, Default)]
pub struct RefundFilter {
    pub merchant_id: Option<MerchantId>,
    pub status: Option<RefundStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// One page of refunds plus paging totals.
#[derive(Debug, Clone)]
pub struct RefundPage {
    pub items: Vec<RefundRequest>,
    pub total_items: usize,
    pub total_pages: usize,
    pub current_page: usize,
    pub page_size: usize,
}

/// Refund persistence with optimistic concurrency.
pub struct RefundRepository {
    state: Arc<dyn StateStore>,
}

impl RefundRepository {
    /// Create a repository over the given state backend.
    pub fn new(state: Arc<dyn StateStore>) -> Self {
        Self { state }
    }

    fn key(refund_id: &RefundId) -> StateKey {
        StateKey::global(KeyKind::Refund, refund_id.as_str())
    }

    /// Insert a new refund. Fails with [`RepoError::AlreadyExists`] when the
    /// id is taken.
    #[instrument(skip_all, fields(refund_id = %refund.refund_id))]
    pub async fn insert(&self, refund: &RefundRequest) -> Result<(), RepoError> {
        let raw = serde_json::to_string(refund)
            .map_err(|e| RepoError::Serialization(e.to_string()))?;
        // set() would overwrite; an insert must claim the key.
        let created = self
            .state
            .check_and_set(&Self::key(&refund.refund_id), &raw, None)
            .await?;
        if created {
            Ok(())
        } else {
            Err(RepoError::AlreadyExists(refund.refund_id.to_string()))
        }
    }

    /// Fetch a refund with its version.
    pub async fn fetch(&self, refund_id: &RefundId) -> Result<VersionedRefund, RepoError> {
        let (raw, version) = self
            .state
            .get_versioned(&Self::key(refund_id))
            .await?
            .ok_or_else(|| RepoError::NotFound(refund_id.to_string()))?;
        let refund =
            serde_json::from_str(&raw).map_err(|e| RepoError::Serialization(e.to_string()))?;
        Ok(VersionedRefund { refund, version })
    }

    /// Persist a mutated refund if nobody else wrote since `expected_version`.
    ///
    /// The status-history append travels inside the document, so transition
    /// and history land atomically. Returns the new version.
    #[instrument(skip_all, fields(refund_id = %refund.refund_id, expected_version))]
    pub async fn update(
        &self,
        refund: &RefundRequest,
        expected_version: u64,
    ) -> Result<u64, RepoError> {
        let key = Self::key(&refund.refund_id);
        let raw = serde_json::to_string(refund)
            .map_err(|e| RepoError::Serialization(e.to_string()))?;

        match self
            .state
            .compare_and_swap(&key, expected_version, &raw, None)
            .await?
        {
            CasResult::Ok => Ok(expected_version + 1),
            CasResult::Conflict {
                current_version, ..
            } => Err(RepoError::VersionConflict {
                key: key.canonical(),
                expected: expected_version,
                found: current_version,
            }),
        }
    }

    /// List refunds matching the filter, newest first, paged.
    ///
    /// `page` is 1-based; `page_size` is clamped to `1..=100`. Scans the
    /// refund keyspace; acceptable for the document counts one deployment
    /// holds, and backends may index later without changing callers.
    pub async fn list(
        &self,
        filter: &RefundFilter,
        page: usize,
        page_size: usize,
    ) -> Result<RefundPage, RepoError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);

        let entries = self.state.scan_keys_by_kind(KeyKind::Refund).await?;
        let mut refunds = Vec::with_capacity(entries.len());
        for (_, raw) in entries {
            let refund: RefundRequest = serde_json::from_str(&raw)
                .map_err(|e| RepoError::Serialization(e.to_string()))?;
            if Self::matches(&refund, filter) {
                refunds.push(refund);
            }
        }

        refunds.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total_items = refunds.len();
        let total_pages = total_items.div_ceil(page_size).max(1);
        let items = refunds
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();

        Ok(RefundPage {
            items,
            total_items,
            total_pages,
            current_page: page,
            page_size,
        })
    }

    /// Find the refund a gateway-side reference belongs to.
    ///
    /// Webhook events carry only the gateway's refund id; this resolves it
    /// back to our aggregate.
    pub async fn find_by_gateway_reference(
        &self,
        gateway_reference: &str,
    ) -> Result<Option<RefundRequest>, RepoError> {
        let entries = self.state.scan_keys_by_kind(KeyKind::Refund).await?;
        for (_, raw) in entries {
            let refund: RefundRequest = serde_json::from_str(&raw)
                .map_err(|e| RepoError::Serialization(e.to_string()))?;
            if refund.gateway_reference.as_deref() == Some(gateway_reference) {
                return Ok(Some(refund));
            }
        }
        Ok(None)
    }

    /// Σ of completed refund amounts for a transaction, in minor units.
    pub async fn completed_refund_total(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<i64, RepoError> {
        let entries = self.state.scan_keys_by_kind(KeyKind::Refund).await?;
        let mut total = 0i64;
        for (_, raw) in entries {
            let refund: RefundRequest = serde_json::from_str(&raw)
                .map_err(|e| RepoError::Serialization(e.to_string()))?;
            if refund.transaction_id == *transaction_id
                && refund.status == RefundStatus::Completed
            {
                total = total.saturating_add(refund.amount.amount);
            }
        }
        Ok(total)
    }

    fn matches(refund: &RefundRequest, filter: &RefundFilter) -> bool {
        if let Some(merchant) = &filter.merchant_id
            && refund.merchant_id != *merchant
        {
            return false;
        }
        if let Some(status) = filter.status
            && refund.status != status
        {
            return false;
        }
        if let Some(start) = filter.start_date
            && refund.created_at < start
        {
            return false;
        }
        if let Some(end) = filter.end_date
            && refund.created_at > end
        {
            return false;
        }
        true
    }
}

impl std::fmt::Debug for RefundRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefundRepository").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refundry_core::{
        money::Currency, GatewayKind, Money, RefundMethod,
    };
    use refundry_state_memory::MemoryStateStore;

    fn repo() -> RefundRepository {
        RefundRepository::new(Arc::new(MemoryStateStore::new()))
    }

    fn refund(merchant: &str, transaction: &str, amount: i64) -> RefundRequest {
        RefundRequest::new(
            TransactionId::from(transaction),
            MerchantId::from(merchant),
            Money::new(amount, Currency::parse("USD").unwrap()),
            RefundMethod::OriginalPayment,
            GatewayKind::Stripe,
            "customer_request",
        )
    }

    #[tokio::test]
    async fn insert_fetch_roundtrip() {
        let repo = repo();
        let r = refund("m-1", "T1", 2500);
        repo.insert(&r).await.unwrap();

        let fetched = repo.fetch(&r.refund_id).await.unwrap();
        assert_eq!(fetched.refund.refund_id, r.refund_id);
        assert_eq!(fetched.version, 1);
    }

    #[tokio::test]
    async fn double_insert_conflicts() {
        let repo = repo();
        let r = refund("m-1", "T1", 2500);
        repo.insert(&r).await.unwrap();
        let err = repo.insert(&r).await.unwrap_err();
        assert!(matches!(err, RepoError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn fetch_missing_is_not_found() {
        let repo = repo();
        let err = repo.fetch(&RefundId::from("rfd_nope")).await.unwrap_err();
        assert!(matches!(err, RepoError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_with_correct_version() {
        let repo = repo();
        let r = refund("m-1", "T1", 2500);
        repo.insert(&r).await.unwrap();

        let mut loaded = repo.fetch(&r.refund_id).await.unwrap();
        loaded
            .refund
            .transition(RefundStatus::Submitted, "system", None)
            .unwrap();

        let new_version = repo.update(&loaded.refund, loaded.version).await.unwrap();
        assert_eq!(new_version, 2);

        let reloaded = repo.fetch(&r.refund_id).await.unwrap();
        assert_eq!(reloaded.refund.status, RefundStatus::Submitted);
        assert_eq!(reloaded.refund.status_history.len(), 1);
    }

    #[tokio::test]
    async fn stale_version_conflicts() {
        let repo = repo();
        let r = refund("m-1", "T1", 2500);
        repo.insert(&r).await.unwrap();

        // Two readers load the same version.
        let first = repo.fetch(&r.refund_id).await.unwrap();
        let second = repo.fetch(&r.refund_id).await.unwrap();

        let mut a = first.refund.clone();
        a.transition(RefundStatus::Submitted, "writer-a", None).unwrap();
        repo.update(&a, first.version).await.unwrap();

        // The second writer's commit must fail; it never observed writer-a's
        // state.
        let mut b = second.refund.clone();
        b.transition(RefundStatus::Submitted, "writer-b", None).unwrap();
        let err = repo.update(&b, second.version).await.unwrap_err();
        assert!(matches!(err, RepoError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let repo = repo();
        for i in 0..5 {
            repo.insert(&refund("m-1", &format!("T{i}"), 1000 + i))
                .await
                .unwrap();
        }
        repo.insert(&refund("m-2", "T9", 500)).await.unwrap();

        let filter = RefundFilter {
            merchant_id: Some(MerchantId::from("m-1")),
            ..RefundFilter::default()
        };

        let page = repo.list(&filter, 1, 2).await.unwrap();
        assert_eq!(page.total_items, 5);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.current_page, 1);

        let last = repo.list(&filter, 3, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
    }

    #[tokio::test]
    async fn list_by_status() {
        let repo = repo();
        let mut r = refund("m-1", "T1", 1000);
        r.transition(RefundStatus::Submitted, "system", None).unwrap();
        repo.insert(&r).await.unwrap();
        repo.insert(&refund("m-1", "T2", 1000)).await.unwrap();

        let filter = RefundFilter {
            status: Some(RefundStatus::Submitted),
            ..RefundFilter::default()
        };
        let page = repo.list(&filter, 1, 10).await.unwrap();
        assert_eq!(page.total_items, 1);
    }

    #[tokio::test]
    async fn completed_total_counts_only_completed() {
        let repo = repo();

        let mut done = refund("m-1", "T1", 4000);
        done.transition(RefundStatus::Submitted, "system", None).unwrap();
        done.transition(RefundStatus::Processing, "worker", None).unwrap();
        done.transition(RefundStatus::Completed, "worker", None).unwrap();
        repo.insert(&done).await.unwrap();

        let pending = refund("m-1", "T1", 3000);
        repo.insert(&pending).await.unwrap();

        let other_txn = refund("m-1", "T2", 9999);
        repo.insert(&other_txn).await.unwrap();

        let total = repo
            .completed_refund_total(&TransactionId::from("T1"))
            .await
            .unwrap();
        assert_eq!(total, 4000);
    }
}
