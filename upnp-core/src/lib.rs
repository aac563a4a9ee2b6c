//! Shared building blocks for the UPnP SDK crates.
//!
//! This crate has no networking of its own. It provides the pieces the
//! discovery, eventing and control engines all lean on:
//!
//! - **Token tables**: sorted string/integer tables with binary-search lookup
//!   ([`map_str_to_int`], [`HttpMethod`], [`HttpHeader`])
//! - **Status phrases**: HTTP reason phrases by code ([`get_status_text`])
//! - **Error codes**: the `UPNP_E_*` status codes and their categories ([`ErrorCode`])
//! - **Configuration**: [`UpnpConfig`] with every protocol tunable
//! - **Timers**: [`TimerThread`] for cancellable deferred jobs
//! - **Events**: [`UpnpEvent`] and the [`EventSink`] applications implement
//!
//! # Example
//!
//! ```rust
//! use upnp_core::{get_status_text, HttpHeader, HttpMethod};
//!
//! assert_eq!(HttpMethod::parse(b"M-SEARCH"), Some(HttpMethod::MSearch));
//! assert_eq!(HttpHeader::parse(b"cache-control"), Some(HttpHeader::CacheControl));
//! assert_eq!(get_status_text(412), Some("Precondition Failed"));
//! assert_eq!(get_status_text(306), None);
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod status;
pub mod str_int;
pub mod timer;

pub use config::UpnpConfig;
pub use error::{CoreError, ErrorCategory, ErrorCode, Result};
pub use event::{
    ChannelSink, Cookie, Discovery, EventSink, ExpiryReason, PropertyChange, Sid, UpnpEvent,
};
pub use status::get_status_text;
pub use str_int::{
    map_int_to_str, map_str_to_int, CaseSensitivity, HttpHeader, HttpMethod, StrIntEntry,
    HTTP_HEADER_TABLE, HTTP_METHOD_TABLE,
};
pub use timer::{JobId, TimerThread};
