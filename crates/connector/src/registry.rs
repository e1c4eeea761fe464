use std::collections::HashMap;
use std::sync::Arc;

use refundry_core::GatewayKind;

use crate::connector::DynConnector;
use crate::error::ConnectorError;

/// Maps gateway kinds to their adapter implementations.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<GatewayKind, Arc<dyn DynConnector>>,
}

impl ConnectorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own [`GatewayKind`]. Replaces any
    /// previous adapter for the same gateway.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn DynConnector>) -> Self {
        self.connectors.insert(connector.kind(), connector);
        self
    }

    /// Register an adapter in place.
    pub fn register(&mut self, connector: Arc<dyn DynConnector>) {
        self.connectors.insert(connector.kind(), connector);
    }

    /// Look up the adapter for a gateway.
    pub fn get(&self, kind: GatewayKind) -> Result<Arc<dyn DynConnector>, ConnectorError> {
        self.connectors
            .get(&kind)
            .cloned()
            .ok_or_else(|| ConnectorError::NotRegistered(kind.to_string()))
    }

    /// All registered gateway kinds.
    #[must_use]
    pub fn kinds(&self) -> Vec<GatewayKind> {
        self.connectors.keys().copied().collect()
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConnector;

    #[test]
    fn lookup_registered_connector() {
        let registry = ConnectorRegistry::new()
            .with_connector(Arc::new(MockConnector::succeeding(GatewayKind::Stripe, "re_1")));

        assert!(registry.get(GatewayKind::Stripe).is_ok());
        let err = registry.get(GatewayKind::Checkout).unwrap_err();
        assert!(matches!(err, ConnectorError::NotRegistered(_)));
    }

    #[test]
    fn register_replaces() {
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::succeeding(GatewayKind::Ach, "a-1")));
        registry.register(Arc::new(MockConnector::succeeding(GatewayKind::Ach, "a-2")));
        assert_eq!(registry.kinds(), vec![GatewayKind::Ach]);
    }
}
