//! Message bus — queue plumbing and the event types that flow through it.

pub mod queue;
pub mod types;

pub use queue::MessageBus;
pub use types::{InboundMessage, OutboundMessage};
