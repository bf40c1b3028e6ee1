use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

use signoff_core::domain::request::RequestKind;
use signoff_core::errors::NotifyError;
use signoff_core::notifications::{RequestSnapshot, WorkflowEvent};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Condition attached to a notifier deciding which dispatches it handles.
/// Empty fields match everything, mirroring how template conditions behave in
/// the matrix configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchRule {
    pub min_amount: Option<Decimal>,
    pub kinds: Vec<RequestKind>,
}

impl DispatchRule {
    pub fn applies(&self, snapshot: &RequestSnapshot) -> bool {
        if let Some(min_amount) = self.min_amount {
            if snapshot.amount < min_amount {
                return false;
            }
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&snapshot.kind) {
            return false;
        }
        true
    }
}

const DEFAULT_TEMPLATES: &[(&str, &str, &str)] = &[
    (
        "submitted",
        "Approval needed: {{ request.name }}",
        "Request {{ request.id }} from {{ request.requester_id }} for \
         {{ request.amount }} {{ request.currency }} awaits your decision.",
    ),
    (
        "reminder",
        "Reminder: {{ request.name }} is waiting on you",
        "Request {{ request.id }} for {{ request.amount }} {{ request.currency }} \
         still needs your decision.",
    ),
    (
        "approved",
        "Approved: {{ request.name }}",
        "Request {{ request.id }} for {{ request.amount }} {{ request.currency }} \
         passed every approval level.",
    ),
    (
        "rejected",
        "Rejected: {{ request.name }}",
        "Request {{ request.id }} for {{ request.amount }} {{ request.currency }} \
         was rejected.",
    ),
    (
        "escalated",
        "Escalated: {{ request.name }}",
        "Request {{ request.id }} from {{ request.requester_id }} was escalated \
         and needs manual review.",
    ),
    (
        "timed_out",
        "Timed out: {{ request.name }}",
        "Request {{ request.id }} missed its approval deadline and needs manual \
         re-routing.",
    ),
    (
        "cancelled",
        "Cancelled: {{ request.name }}",
        "Request {{ request.id }} was cancelled by {{ request.requester_id }}.",
    ),
];

/// Tera template pair (subject + body) per workflow event. Hosts can override
/// individual events; everything else falls back to the defaults.
pub struct TemplateSet {
    tera: Tera,
}

impl TemplateSet {
    pub fn with_defaults() -> Result<Self, NotifyError> {
        let mut tera = Tera::default();
        for (event, subject, body) in DEFAULT_TEMPLATES {
            tera.add_raw_template(&format!("{event}.subject"), subject)
                .map_err(|e| NotifyError(format!("bad default template `{event}`: {e}")))?;
            tera.add_raw_template(&format!("{event}.body"), body)
                .map_err(|e| NotifyError(format!("bad default template `{event}`: {e}")))?;
        }
        Ok(Self { tera })
    }

    pub fn set_template(
        &mut self,
        event: WorkflowEvent,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let key = event.as_str();
        self.tera
            .add_raw_template(&format!("{key}.subject"), subject)
            .map_err(|e| NotifyError(format!("bad subject template for `{key}`: {e}")))?;
        self.tera
            .add_raw_template(&format!("{key}.body"), body)
            .map_err(|e| NotifyError(format!("bad body template for `{key}`: {e}")))?;
        Ok(())
    }

    pub fn render(
        &self,
        event: WorkflowEvent,
        snapshot: &RequestSnapshot,
    ) -> Result<RenderedMessage, NotifyError> {
        let context = Context::from_serialize(serde_json::json!({ "request": snapshot }))
            .map_err(|e| NotifyError(format!("snapshot context failed: {e}")))?;
        let key = event.as_str();

        let subject = self
            .tera
            .render(&format!("{key}.subject"), &context)
            .map_err(|e| NotifyError(format!("subject render failed for `{key}`: {e}")))?;
        let body = self
            .tera
            .render(&format!("{key}.body"), &context)
            .map_err(|e| NotifyError(format!("body render failed for `{key}`: {e}")))?;

        Ok(RenderedMessage { subject, body })
    }
}
