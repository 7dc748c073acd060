//! Message bus — typed queues between channels and the agent loop, plus
//! system-event fan-out for observers.

pub mod queue;
pub mod types;

pub use queue::MessageBus;
pub use types::{EventStream, InboundMessage, OutboundMessage, PeerKind, SystemEvent};
