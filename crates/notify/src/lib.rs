//! Notification dispatcher for workflow events.
//!
//! The engine hands over `Dispatch` values (event + request snapshot +
//! recipients); this crate renders them through tera templates and pushes the
//! result into a delivery `Transport`. Delivery is at-most-once: failures are
//! logged and reported, never retried, and never roll back the workflow
//! transition that triggered them.

pub mod dispatcher;
pub mod templates;

pub use dispatcher::{
    InMemoryTransport, OutboundMessage, TemplateNotifier, TracingTransport, Transport,
};
pub use templates::{DispatchRule, RenderedMessage, TemplateSet};
