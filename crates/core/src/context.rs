use serde::{Deserialize, Serialize};

/// Request-scoped context threaded explicitly through handlers and queue
/// messages.
///
/// Carries the correlation id end to end: HTTP request → manager → queue
/// envelope → worker → outbound gateway call. Handlers receive it as a value
/// rather than reading from task-local magic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Correlation id, propagated via `X-Correlation-ID`.
    pub correlation_id: String,
    /// Who initiated the operation (`system`, `worker`, or a caller id).
    pub actor: String,
}

impl RequestContext {
    /// Create a context with a freshly generated correlation id.
    #[must_use]
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            actor: actor.into(),
        }
    }

    /// Create a context continuing an existing correlation id.
    #[must_use]
    pub fn with_correlation(correlation_id: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            actor: actor.into(),
        }
    }

    /// Derive a child context for a different actor, keeping the correlation.
    #[must_use]
    pub fn child(&self, actor: impl Into<String>) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            actor: actor.into(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("system")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_correlation_id() {
        let ctx = RequestContext::new("api");
        assert!(!ctx.correlation_id.is_empty());
        assert_eq!(ctx.actor, "api");
    }

    #[test]
    fn child_keeps_correlation() {
        let parent = RequestContext::with_correlation("corr-1", "api");
        let child = parent.child("worker");
        assert_eq!(child.correlation_id, "corr-1");
        assert_eq!(child.actor, "worker");
    }
}
