use std::sync::Mutex;

use tracing::{info, warn};

use signoff_core::errors::NotifyError;
use signoff_core::notifications::{Dispatch, Notifier, WorkflowEvent};

use crate::templates::{DispatchRule, TemplateSet};

/// One rendered message addressed to one recipient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub event: WorkflowEvent,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Delivery mechanism behind the dispatcher. Mail, chat or push gateways live
/// outside this crate; the workflow only sees this seam.
pub trait Transport: Send + Sync {
    fn send(&self, message: &OutboundMessage) -> Result<(), NotifyError>;
}

/// Logs deliveries instead of sending them. Useful as a default until a host
/// wires a real gateway.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTransport;

impl Transport for TracingTransport {
    fn send(&self, message: &OutboundMessage) -> Result<(), NotifyError> {
        info!(
            event = message.event.as_str(),
            recipient = %message.recipient,
            subject = %message.subject,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Captures outbound messages for assertions in tests.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl InMemoryTransport {
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|guard| guard.clone()).unwrap_or_default()
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, message: &OutboundMessage) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .map_err(|_| NotifyError("outbound buffer poisoned".to_string()))?
            .push(message.clone());
        Ok(())
    }
}

/// Renders dispatches through the template set and fans one message out per
/// recipient. A failed recipient is logged and counted; the remaining
/// recipients still get theirs.
pub struct TemplateNotifier<T> {
    templates: TemplateSet,
    transport: T,
    rule: DispatchRule,
}

impl<T> TemplateNotifier<T>
where
    T: Transport,
{
    pub fn new(templates: TemplateSet, transport: T) -> Self {
        Self { templates, transport, rule: DispatchRule::default() }
    }

    pub fn with_rule(mut self, rule: DispatchRule) -> Self {
        self.rule = rule;
        self
    }
}

impl<T> Notifier for TemplateNotifier<T>
where
    T: Transport,
{
    fn deliver(&self, dispatch: &Dispatch) -> Result<(), NotifyError> {
        if !self.rule.applies(&dispatch.snapshot) {
            return Ok(());
        }

        let rendered = self.templates.render(dispatch.event, &dispatch.snapshot)?;

        let mut failures = 0usize;
        for recipient in &dispatch.recipients {
            let message = OutboundMessage {
                event: dispatch.event,
                recipient: recipient.clone(),
                subject: rendered.subject.clone(),
                body: rendered.body.clone(),
            };
            if let Err(error) = self.transport.send(&message) {
                failures += 1;
                warn!(
                    event = dispatch.event.as_str(),
                    recipient = %recipient,
                    %error,
                    "notification send failed"
                );
            }
        }

        if failures > 0 {
            return Err(NotifyError(format!(
                "{failures} of {} deliveries failed",
                dispatch.recipients.len()
            )));
        }
        Ok(())
    }
}
