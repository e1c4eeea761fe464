use std::collections::HashMap;

use async_trait::async_trait;

use refundry_core::{BankId, MerchantId, OrganizationId};

use crate::ParamError;

/// The ancestry of one merchant through the configuration hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyChain {
    pub merchant_id: MerchantId,
    pub organization_id: OrganizationId,
    pub bank_id: BankId,
}

/// Resolves a merchant to its hierarchy chain.
///
/// The chain is owned by onboarding; the resolver treats it as read-only.
#[async_trait]
pub trait HierarchyProvider: Send + Sync {
    /// Fetch the chain for a merchant.
    async fn chain(&self, merchant: &MerchantId) -> Result<HierarchyChain, ParamError>;
}

/// Static, in-memory [`HierarchyProvider`] built from a fixed mapping.
#[derive(Debug, Default)]
pub struct StaticHierarchy {
    chains: HashMap<MerchantId, HierarchyChain>,
    /// When set, unknown merchants resolve to a `DEFAULT` organization and
    /// bank instead of failing (single-tenant deployments carry no
    /// hierarchy data).
    default_chain: bool,
}

impl StaticHierarchy {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve unknown merchants to a `DEFAULT` organization and bank.
    #[must_use]
    pub fn with_default_chain(mut self) -> Self {
        self.default_chain = true;
        self
    }

    /// Register a merchant's chain.
    #[must_use]
    pub fn with_merchant(
        mut self,
        merchant: impl Into<MerchantId>,
        organization: impl Into<OrganizationId>,
        bank: impl Into<BankId>,
    ) -> Self {
        let merchant = merchant.into();
        self.chains.insert(
            merchant.clone(),
            HierarchyChain {
                merchant_id: merchant,
                organization_id: organization.into(),
                bank_id: bank.into(),
            },
        );
        self
    }
}

#[async_trait]
impl HierarchyProvider for StaticHierarchy {
    async fn chain(&self, merchant: &MerchantId) -> Result<HierarchyChain, ParamError> {
        if let Some(chain) = self.chains.get(merchant) {
            return Ok(chain.clone());
        }
        if self.default_chain {
            return Ok(HierarchyChain {
                merchant_id: merchant.clone(),
                organization_id: OrganizationId::from("DEFAULT"),
                bank_id: BankId::from("DEFAULT"),
            });
        }
        Err(ParamError::UnknownMerchant(merchant.to_string()))
    }
}
