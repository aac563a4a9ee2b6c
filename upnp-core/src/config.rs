//! Runtime configuration for the UPnP engines.
//!
//! Every tunable that the protocol engines consult lives in [`UpnpConfig`].
//! The discovery, eventing and control crates derive their own narrower
//! views from it, so a single value can be loaded from JSON and handed to
//! the SDK facade.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Configuration shared by all UPnP components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpnpConfig {
    /// Minimum worker threads in the runtime
    /// Default: 2
    pub min_threads: usize,

    /// Maximum worker threads in the runtime
    /// Default: 12
    pub max_threads: usize,

    /// Jobs a worker is expected to carry before the pool grows
    /// Default: 10
    pub jobs_per_thread: usize,

    /// Upper bound on scheduled timer jobs
    /// Default: 100
    pub max_jobs_total: usize,

    /// Per-subscriber bound on queued NOTIFY payloads
    /// Default: 10
    pub max_subscription_queued_events: usize,

    /// Queued events older than this are dropped instead of delivered
    /// Default: 30 seconds
    #[serde(with = "secs")]
    pub max_subscription_event_age: Duration,

    /// Renew this long before a subscription expires
    /// Default: 10 seconds
    #[serde(with = "secs")]
    pub auto_renew_time: Duration,

    /// Granted subscription timeouts are raised to at least this
    /// Default: 15 seconds
    #[serde(with = "secs")]
    pub cp_minimum_subscription_time: Duration,

    /// Longest timeout a device grants to a subscriber
    /// Default: 1800 seconds
    #[serde(with = "secs")]
    pub max_subscription_timeout: Duration,

    /// Connect and send timeout for outgoing NOTIFY requests
    /// Default: 30 seconds
    #[serde(with = "secs")]
    pub gena_notification_sending_timeout: Duration,

    /// Time allowed for the subscriber to answer a NOTIFY
    /// Default: 30 seconds
    #[serde(with = "secs")]
    pub gena_notification_answering_timeout: Duration,

    /// Consecutive failed deliveries before a device drops a subscriber
    /// Default: 3
    pub max_consecutive_notify_failures: u32,

    /// Lower clamp for the M-SEARCH MX window
    /// Default: 2 seconds
    #[serde(with = "secs")]
    pub min_search_time: Duration,

    /// Upper clamp for the M-SEARCH MX window
    /// Default: 80 seconds
    #[serde(with = "secs")]
    pub max_search_time: Duration,

    /// Copies of every SSDP datagram sent
    /// Default: 2
    pub num_ssdp_copy: u32,

    /// Pause between SSDP copies
    /// Default: 100 milliseconds
    #[serde(with = "millis")]
    pub ssdp_pause: Duration,

    /// Re-advertise this long before the advertised max-age runs out
    /// Default: 30 seconds
    #[serde(with = "secs")]
    pub auto_advertisement_time: Duration,

    /// Spread re-advertisements over half the max-age
    /// Default: true
    pub ssdp_packet_distribute: bool,

    /// Listen and advertise on the IPv6 SSDP groups as well
    /// Default: false
    pub enable_ipv6: bool,

    /// TTL of outgoing multicast datagrams
    /// Default: 4
    pub multicast_ttl: u32,

    /// Largest SOAP response body accepted
    /// Default: 16000 bytes
    pub default_soap_content_length: usize,

    /// Timeout for generic HTTP exchanges
    /// Default: 30 seconds
    #[serde(with = "secs")]
    pub http_default_timeout: Duration,

    /// Port range tried by the callback server
    /// Default: (49152, 49252)
    pub callback_port_range: (u16, u16),

    /// Product token sent in SERVER and USER-AGENT headers
    pub server_product: String,
}

impl Default for UpnpConfig {
    fn default() -> Self {
        Self {
            min_threads: 2,
            max_threads: 12,
            jobs_per_thread: 10,
            max_jobs_total: 100,
            max_subscription_queued_events: 10,
            max_subscription_event_age: Duration::from_secs(30),
            auto_renew_time: Duration::from_secs(10),
            cp_minimum_subscription_time: Duration::from_secs(15),
            max_subscription_timeout: Duration::from_secs(1800),
            gena_notification_sending_timeout: Duration::from_secs(30),
            gena_notification_answering_timeout: Duration::from_secs(30),
            max_consecutive_notify_failures: 3,
            min_search_time: Duration::from_secs(2),
            max_search_time: Duration::from_secs(80),
            num_ssdp_copy: 2,
            ssdp_pause: Duration::from_millis(100),
            auto_advertisement_time: Duration::from_secs(30),
            ssdp_packet_distribute: true,
            enable_ipv6: false,
            multicast_ttl: 4,
            default_soap_content_length: 16000,
            http_default_timeout: Duration::from_secs(30),
            callback_port_range: (49152, 49252),
            server_product: format!(
                "{}/1.0 UPnP/1.0 upnp-sdk/{}",
                std::env::consts::OS,
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

impl UpnpConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra SSDP copies and a longer pause, for wireless or congested links
    pub fn lossy_network() -> Self {
        Self {
            num_ssdp_copy: 3,
            ssdp_pause: Duration::from_millis(200),
            ..Default::default()
        }
    }

    /// Short per-subscriber queues for constrained devices
    pub fn low_memory() -> Self {
        Self {
            max_subscription_queued_events: 4,
            max_subscription_event_age: Duration::from_secs(10),
            max_jobs_total: 50,
            ..Default::default()
        }
    }

    /// Load from a JSON document. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Validate the configuration and return the first issue found
    pub fn validate(&self) -> Result<()> {
        if self.min_threads == 0 || self.min_threads > self.max_threads {
            return Err(CoreError::InvalidConfig(
                "Invalid thread limits: need 0 < min_threads <= max_threads".to_string(),
            ));
        }

        if self.max_jobs_total == 0 {
            return Err(CoreError::InvalidConfig(
                "max_jobs_total must be greater than 0".to_string(),
            ));
        }

        if self.max_subscription_queued_events == 0 {
            return Err(CoreError::InvalidConfig(
                "max_subscription_queued_events must be greater than 0".to_string(),
            ));
        }

        if self.cp_minimum_subscription_time <= self.auto_renew_time {
            return Err(CoreError::InvalidConfig(
                "cp_minimum_subscription_time must exceed auto_renew_time".to_string(),
            ));
        }

        if self.min_search_time > self.max_search_time {
            return Err(CoreError::InvalidConfig(
                "Invalid search window: min must not exceed max".to_string(),
            ));
        }

        if self.num_ssdp_copy == 0 {
            return Err(CoreError::InvalidConfig(
                "num_ssdp_copy must be greater than 0".to_string(),
            ));
        }

        if self.callback_port_range.0 > self.callback_port_range.1 {
            return Err(CoreError::InvalidConfig(
                "Invalid callback port range: start must not exceed end".to_string(),
            ));
        }

        if self.default_soap_content_length == 0 {
            return Err(CoreError::InvalidConfig(
                "default_soap_content_length must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_ssdp_copies(mut self, copies: u32, pause: Duration) -> Self {
        self.num_ssdp_copy = copies;
        self.ssdp_pause = pause;
        self
    }

    pub fn with_search_window(mut self, min: Duration, max: Duration) -> Self {
        self.min_search_time = min;
        self.max_search_time = max;
        self
    }

    pub fn with_queue_limits(mut self, max_events: usize, max_age: Duration) -> Self {
        self.max_subscription_queued_events = max_events;
        self.max_subscription_event_age = max_age;
        self
    }

    pub fn with_auto_renew(mut self, renew_before: Duration, minimum: Duration) -> Self {
        self.auto_renew_time = renew_before;
        self.cp_minimum_subscription_time = minimum;
        self
    }

    pub fn with_thread_limits(mut self, min: usize, max: usize) -> Self {
        self.min_threads = min;
        self.max_threads = max;
        self
    }

    pub fn with_callback_ports(mut self, start: u16, end: u16) -> Self {
        self.callback_port_range = (start, end);
        self
    }

    pub fn with_ipv6(mut self, enabled: bool) -> Self {
        self.enable_ipv6 = enabled;
        self
    }

    /// Worker count for the runtime: enough for the job budget, within the thread limits.
    pub fn worker_threads(&self) -> usize {
        let wanted = self.max_jobs_total.div_ceil(self.jobs_per_thread.max(1));
        wanted.clamp(self.min_threads, self.max_threads.max(self.min_threads))
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
