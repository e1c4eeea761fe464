use minijinja::value::Value;
use minijinja::Environment;

use crate::event::NotificationEvent;
use crate::NotifyError;

/// A rendered notification ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNotification {
    pub subject: String,
    pub body: String,
}

/// Renders notification events through per-event templates.
///
/// Each event kind owns two templates, `{kind}.subject` and `{kind}.body`.
/// The built-in set covers every event; deployments may override any of
/// them before startup.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create an engine loaded with the built-in templates.
    pub fn new() -> Result<Self, NotifyError> {
        let mut env = Environment::new();
        for (name, source) in BUILTIN_TEMPLATES {
            env.add_template_owned((*name).to_owned(), (*source).to_owned())
                .map_err(|e| NotifyError::Template(e.to_string()))?;
        }
        Ok(Self { env })
    }

    /// Replace one template.
    pub fn set_template(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<(), NotifyError> {
        self.env
            .add_template_owned(name.into(), source.into())
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Render the subject and body for an event.
    pub fn render(&self, event: &NotificationEvent) -> Result<RenderedNotification, NotifyError> {
        let context = Value::from_serialize(event);
        let kind = event.kind();

        let subject = self.render_one(&format!("{kind}.subject"), &context)?;
        let body = self.render_one(&format!("{kind}.body"), &context)?;

        Ok(RenderedNotification { subject, body })
    }

    fn render_one(&self, name: &str, context: &Value) -> Result<String, NotifyError> {
        let template = self
            .env
            .get_template(name)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        template
            .render(context)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "refund_completed.subject",
        "Refund {{ refund_id }} completed",
    ),
    (
        "refund_completed.body",
        "Refund {{ refund_id }} for merchant {{ merchant_id }} settled: \
         {{ amount_minor }} {{ currency }} returned.",
    ),
    ("refund_failed.subject", "Refund {{ refund_id }} failed"),
    (
        "refund_failed.body",
        "Refund {{ refund_id }} for merchant {{ merchant_id }} failed: {{ reason }}.",
    ),
    (
        "approval_requested.subject",
        "Approval needed for refund {{ refund_id }}",
    ),
    (
        "approval_requested.body",
        "Refund {{ refund_id }} ({{ amount_minor }} {{ currency }}) awaits a decision \
         at level {{ level }}. Approval id: {{ approval_id }}.",
    ),
    (
        "approval_escalated.subject",
        "Approval for refund {{ refund_id }} escalated to {{ to_level }}",
    ),
    (
        "approval_escalated.body",
        "Nobody decided in time; approval {{ approval_id }} for refund {{ refund_id }} \
         now sits with {{ to_level }}.",
    ),
    (
        "approval_decided.subject",
        "Refund {{ refund_id }} {{ 'approved' if approved else 'rejected' }}",
    ),
    (
        "approval_decided.body",
        "Approval {{ approval_id }} for refund {{ refund_id }} was \
         {{ 'approved' if approved else 'rejected' }}.",
    ),
];

#[cfg(test)]
mod tests {
    use super::*;
    use refundry_core::{ApprovalId, MerchantId, RefundId};

    #[test]
    fn renders_refund_completed() {
        let engine = TemplateEngine::new().unwrap();
        let event = NotificationEvent::RefundCompleted {
            refund_id: RefundId::from("rfd_1"),
            merchant_id: MerchantId::from("m-1"),
            amount_minor: 2500,
            currency: "USD".into(),
        };

        let rendered = engine.render(&event).unwrap();
        assert_eq!(rendered.subject, "Refund rfd_1 completed");
        assert!(rendered.body.contains("2500 USD"));
    }

    #[test]
    fn renders_decision_branches() {
        let engine = TemplateEngine::new().unwrap();
        let decided = |approved: bool| NotificationEvent::ApprovalDecided {
            refund_id: RefundId::from("rfd_1"),
            approval_id: ApprovalId::from("apr_1"),
            merchant_id: MerchantId::from("m-1"),
            approved,
        };
        let approved = decided(true);
        let rejected = decided(false);

        assert!(engine.render(&approved).unwrap().subject.contains("approved"));
        assert!(engine.render(&rejected).unwrap().subject.contains("rejected"));
    }

    #[test]
    fn every_event_kind_has_templates() {
        let engine = TemplateEngine::new().unwrap();
        let events = [
            NotificationEvent::RefundCompleted {
                refund_id: RefundId::from("r"),
                merchant_id: MerchantId::from("m"),
                amount_minor: 1,
                currency: "USD".into(),
            },
            NotificationEvent::RefundFailed {
                refund_id: RefundId::from("r"),
                merchant_id: MerchantId::from("m"),
                reason: "x".into(),
            },
            NotificationEvent::ApprovalRequested {
                refund_id: RefundId::from("r"),
                approval_id: ApprovalId::from("a"),
                merchant_id: MerchantId::from("m"),
                level: "L1".into(),
                amount_minor: 1,
                currency: "USD".into(),
            },
            NotificationEvent::ApprovalEscalated {
                refund_id: RefundId::from("r"),
                approval_id: ApprovalId::from("a"),
                merchant_id: MerchantId::from("m"),
                to_level: "L2".into(),
            },
            NotificationEvent::ApprovalDecided {
                refund_id: RefundId::from("r"),
                approval_id: ApprovalId::from("a"),
                merchant_id: MerchantId::from("m"),
                approved: true,
            },
        ];

        for event in events {
            engine
                .render(&event)
                .unwrap_or_else(|e| panic!("{} failed: {e}", event.kind()));
        }
    }

    #[test]
    fn template_override() {
        let mut engine = TemplateEngine::new().unwrap();
        engine
            .set_template("refund_failed.subject", "ALERT {{ refund_id }}")
            .unwrap();

        let event = NotificationEvent::RefundFailed {
            refund_id: RefundId::from("rfd_9"),
            merchant_id: MerchantId::from("m-1"),
            reason: "exhausted retries".into(),
        };
        assert_eq!(engine.render(&event).unwrap().subject, "ALERT rfd_9");
    }
}
