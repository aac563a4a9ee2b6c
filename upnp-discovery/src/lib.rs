//! SSDP discovery for UPnP control points and devices.
//!
//! This crate covers both sides of the Simple Service Discovery Protocol:
//! a device advertises its tree and answers searches, a control point
//! searches and listens for advertisements.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use upnp_core::{ChannelSink, Cookie, TimerThread, UpnpConfig, UpnpEvent};
//! use upnp_discovery::{SsdpConfig, SsdpEngine};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = UpnpConfig::default();
//! let timer = TimerThread::new(config.max_jobs_total)?;
//! let engine = SsdpEngine::bind(SsdpConfig::from(&config), timer)?;
//!
//! let (sink, mut events) = ChannelSink::new();
//! engine.register_client(Arc::new(sink));
//! engine.search_by_target(3, "ssdp:all", Cookie(1)).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         UpnpEvent::SearchResult { discovery, .. } => println!("{}", discovery.location),
//!         UpnpEvent::SearchTimeout { .. } => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
mod engine;
mod error;
pub mod message;
pub mod parser;
pub mod transport;

pub use config::{SsdpConfig, MAX_REPLY_MX};
pub use device::{AdFlag, Announcement, DeviceDescription, DeviceInfo, ServiceInfo};
pub use engine::{SearchId, SsdpEngine};
pub use error::{DiscoveryError, Result};
pub use message::SsdpMessage;
pub use parser::{
    classify_request, fill_event_fields, parse_message, request_type, SsdpErrorCode, SsdpEvent,
    SsdpSearchType,
};
pub use transport::{SsdpSockets, SsdpTransport, UdpTransport};
