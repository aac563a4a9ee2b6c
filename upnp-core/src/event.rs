//! Events delivered to applications and the sink they are delivered through.

use std::fmt;
use std::net::SocketAddr;

use tokio::sync::mpsc;

/// Opaque subscription identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid(String);

impl Sid {
    pub fn new(sid: impl Into<String>) -> Self {
        Self(sid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Sid {
    fn from(sid: String) -> Self {
        Self(sid)
    }
}

impl From<&str> for Sid {
    fn from(sid: &str) -> Self {
        Self(sid.to_string())
    }
}

/// Application-chosen value echoed back with search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cookie(pub u64);

/// One discovery result, advertisement or withdrawal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub udn: String,
    pub device_type: String,
    pub service_type: String,
    pub location: String,
    /// SERVER header
    pub os: String,
    pub ext: String,
    pub date: String,
    /// Seconds the advertisement stays valid
    pub max_age: u32,
    /// Peer the datagram came from
    pub source: Option<SocketAddr>,
}

/// A NOTIFY accepted for one of our subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyChange {
    pub sid: Sid,
    pub event_key: u32,
    /// Variable name and value pairs in document order
    pub properties: Vec<(String, String)>,
}

/// Why a client subscription ended without an explicit unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// The renewal request failed
    RenewalFailed,
    /// The subscription ran out without a renewal being scheduled
    TimedOut,
}

/// Everything the engines report to applications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpnpEvent {
    /// Reply to one of our M-SEARCH requests
    SearchResult {
        discovery: Discovery,
        cookie: Cookie,
    },
    /// The MX window of a search has closed
    SearchTimeout { cookie: Cookie },
    /// A device announced itself
    Alive(Discovery),
    /// A device withdrew
    ByeBye(Discovery),
    /// Event delivered for an active subscription
    PropertyChange(PropertyChange),
    /// A client subscription is gone and will not deliver more events
    SubscriptionExpired {
        sid: Sid,
        event_url: String,
        reason: ExpiryReason,
    },
    /// A control point subscribed to one of our services
    SubscriptionRequest { service_id: String, sid: Sid },
}

impl UpnpEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            UpnpEvent::SearchResult { .. } => "search_result",
            UpnpEvent::SearchTimeout { .. } => "search_timeout",
            UpnpEvent::Alive(_) => "advertisement_alive",
            UpnpEvent::ByeBye(_) => "advertisement_byebye",
            UpnpEvent::PropertyChange(_) => "property_change",
            UpnpEvent::SubscriptionExpired { .. } => "subscription_expired",
            UpnpEvent::SubscriptionRequest { .. } => "subscription_request",
        }
    }
}

/// Receiver of [`UpnpEvent`]s. Called from runtime worker tasks; must not block.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: UpnpEvent);
}

impl<F> EventSink for F
where
    F: Fn(UpnpEvent) + Send + Sync,
{
    fn on_event(&self, event: UpnpEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink(mpsc::UnboundedSender<UpnpEvent>);

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UpnpEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: UpnpEvent) {
        if let Err(err) = self.0.send(event) {
            tracing::debug!(kind = err.0.kind(), "event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let sink = move |event: UpnpEvent| captured.lock().unwrap().push(event.kind());
        sink.on_event(UpnpEvent::SearchTimeout { cookie: Cookie(7) });
        assert_eq!(*seen.lock().unwrap(), vec!["search_timeout"]);
    }

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = ChannelSink::new();
        tx.on_event(UpnpEvent::ByeBye(Discovery::default()));
        assert!(matches!(rx.recv().await, Some(UpnpEvent::ByeBye(_))));

        drop(rx);
        tx.on_event(UpnpEvent::Alive(Discovery::default()));
    }

    #[test]
    fn test_sid_conversions() {
        let sid = Sid::from("uuid:1234");
        assert_eq!(sid.as_str(), "uuid:1234");
        assert_eq!(sid.to_string(), "uuid:1234");
        assert_eq!(sid.into_inner(), "uuid:1234");
    }
}
