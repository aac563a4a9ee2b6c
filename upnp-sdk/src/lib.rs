//! # UPnP SDK - handle-based API for control points and devices
//!
//! One [`UpnpSdk`] hosts at most one control point and one root device,
//! each identified by a handle:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use upnp_sdk::{SubscriptionTimeout, UpnpConfig, UpnpEvent, UpnpSdk};
//!
//! fn main() -> Result<(), upnp_sdk::SdkError> {
//!     upnp_sdk::logging::init_logging_from_env().ok();
//!     let sdk = UpnpSdk::new(UpnpConfig::default())?;
//!
//!     let client = sdk.register_client(Arc::new(|event: UpnpEvent| {
//!         if let UpnpEvent::PropertyChange(change) = event {
//!             println!("{} #{}: {:?}", change.sid, change.event_key, change.properties);
//!         }
//!     }))?;
//!
//!     let (sid, granted) = sdk.subscribe(
//!         client,
//!         "http://192.168.1.20:1400/MediaRenderer/AVTransport/Event",
//!         SubscriptionTimeout::Seconds(1800),
//!     )?;
//!     println!("subscribed as {} for {}", sid, granted);
//!
//!     std::thread::sleep(std::time::Duration::from_secs(60));
//!     sdk.unsubscribe(client, &sid)?;
//!     sdk.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ## Control point
//!
//! - `search` multicasts M-SEARCH; results and advertisements arrive as events
//! - `subscribe` / `renew` / `unsubscribe` manage GENA subscriptions, renewed
//!   automatically before they expire
//! - `send_action` invokes SOAP actions
//!
//! ## Device
//!
//! - `advertise` announces the device tree and keeps it announced
//! - `notify` updates evented state and queues NOTIFY for every subscriber
//! - `event_url` is where control points subscribe to a service
//!
//! ## Architecture
//!
//! ```text
//! upnp-sdk (handles, blocking API)
//!     ↓
//! upnp-discovery (SSDP)   upnp-gena (subscriptions, event queues)
//!                             ↓
//!                         soap-client / callback-server (HTTP)
//!     ↓
//! upnp-core (tables, config, timers, events)
//! ```

pub use error::{Result, SdkError};
pub use handle::{ClientHandle, DeviceHandle};
pub use system::UpnpSdk;

// Re-export the types applications need at the API boundary
pub use gena::{GenaRequest, GenaResponse};
pub use soap_client::{build_action, response_args, SubscriptionTimeout};
pub use upnp_core::{
    ChannelSink, Cookie, Discovery, ErrorCode, EventSink, ExpiryReason, PropertyChange, Sid,
    UpnpConfig, UpnpEvent,
};
pub use upnp_discovery::{DeviceDescription, DeviceInfo, ServiceInfo, SsdpTransport};

pub mod logging;

mod device;
mod error;
mod handle;
mod system;
