//! In-process event stream for live round observers.
//!
//! Producers call [`EventBus::emit`]; observers register a callback (or take a
//! channel receiver) with an optional [`EventFilter`]. The bus keeps a bounded
//! replay buffer so reconnecting observers can catch up with
//! [`EventBus::recent_events`].

pub mod bus;
pub mod event;

pub use bus::{CallbackError, EventBus, StreamMetrics, SubscriberId, SubscriberInfo};
pub use event::{EventFilter, StreamEvent, StreamEventType};
