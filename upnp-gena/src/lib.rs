//! GENA eventing for UPnP control points and devices.
//!
//! - [`GenaClient`]: subscribes to remote services, renews subscriptions
//!   before they expire and delivers their events in key order
//! - [`Publisher`]: accepts subscriptions to local services and delivers
//!   NOTIFY requests to subscribers through bounded per-subscriber queues
//!
//! Both sides talk to the network through traits
//! ([`SubscriptionTransport`], [`NotifyTransport`]) so the state machines
//! can be driven by in-memory fakes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use callback_server::CallbackServer;
//! use gena::{GenaClient, GenaClientConfig, SoapSubscriptionTransport};
//! use soap_client::SubscriptionTimeout;
//! use tokio::sync::mpsc;
//! use upnp_core::{TimerThread, UpnpEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, rx) = mpsc::unbounded_channel();
//!     let server = CallbackServer::new((49152, 49252), tx).await?;
//!     let client = GenaClient::new(
//!         GenaClientConfig::default(),
//!         TimerThread::new(100)?,
//!         Arc::new(SoapSubscriptionTransport::default()),
//!         server.router().as_ref().clone(),
//!         server.callback_url("notify"),
//!         Arc::new(|event: UpnpEvent| println!("{:?}", event)),
//!     );
//!     client.spawn_notification_pump(rx);
//!
//!     let (sid, granted) = client
//!         .subscribe("http://192.168.1.20:1400/MediaRenderer/AVTransport/Event", SubscriptionTimeout::Seconds(1800))
//!         .await?;
//!     println!("subscribed as {} for {}", sid, granted);
//!     Ok(())
//! }
//! ```

pub mod client;
mod config;
pub mod device;
mod error;

pub use client::{
    effective_grant, renewal_delay, ClientSubscription, ClientSubscriptionTable, EventSequencer,
    GenaClient, SoapSubscriptionTransport, SubscriptionTransport,
};
pub use config::{GenaClientConfig, PublisherConfig, DEFAULT_REQUESTED_TIMEOUT};
pub use device::{
    event_path, event_route, EventQueue, GenaRequest, GenaResponse, HttpNotifyTransport,
    NotifyTransport, Publisher, QueuedEvent,
};
pub use error::{GenaError, Result};
