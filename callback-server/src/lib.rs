//! Control-point HTTP endpoint for GENA event notifications.
//!
//! Publishers deliver subscribed events with NOTIFY requests to the
//! callback URL a control point handed out in its SUBSCRIBE. This crate
//! provides that endpoint:
//!
//! - [`CallbackServer`]: binds a port from a range, validates each NOTIFY
//!   and answers it with the GENA status code.
//! - [`EventRouter`]: the set of SIDs events are accepted for, and the
//!   channel accepted events go to.
//! - [`NotificationPayload`]: SID, SEQ and the decoded property set.
//!
//! Ordering by SEQ is left to the consumer; concurrent NOTIFY connections
//! can reach the channel in any order.
//!
//! ```no_run
//! use callback_server::{CallbackServer, NotificationPayload};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callback_server::CallbackServerError> {
//!     let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
//!     let server = CallbackServer::new((49152, 49252), tx).await?;
//!
//!     let pending = server.router().begin_subscribe();
//!     // ... send SUBSCRIBE with server.base_url() as CALLBACK ...
//!     server.router().register("uuid:publisher-sid".to_string()).await;
//!     drop(pending);
//!
//!     while let Some(notification) = rx.recv().await {
//!         for (name, value) in notification.properties {
//!             println!("{} = {}", name, value);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod error;
pub mod propertyset;
pub mod router;
mod server;

pub use error::{CallbackServerError, Result};
pub use propertyset::{build_propertyset, parse_propertyset};
pub use router::{EventRouter, NotificationPayload, PendingSubscribe};
pub use server::{detect_local_ip, CallbackServer, DEFAULT_SUBSCRIBE_WAIT};
