//! Device side of GENA.
//!
//! The [`Publisher`] accepts subscriptions to a device's evented services
//! and owns one [`EventQueue`] per subscriber. Each subscriber has at most
//! one delivery task, which sends queued events in key order and moves on
//! to the next only once the current one was answered or dropped. A
//! subscriber that fails several deliveries in a row is cancelled.

mod endpoint;
mod publisher;
mod queue;
mod transport;

pub use endpoint::{event_path, event_route};
pub use publisher::{parse_callbacks, GenaRequest, GenaResponse, Publisher};
pub use queue::{EventQueue, QueuedEvent};
pub use transport::{HttpNotifyTransport, NotifyTransport};
