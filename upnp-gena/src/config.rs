//! Eventing settings derived from [`UpnpConfig`].

use std::time::Duration;

use upnp_core::UpnpConfig;

/// Timeout a device grants when SUBSCRIBE carries no TIMEOUT header.
pub const DEFAULT_REQUESTED_TIMEOUT: Duration = Duration::from_secs(1800);

/// Tunables read by [`crate::GenaClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct GenaClientConfig {
    /// Renew this long before the granted timeout runs out
    pub auto_renew_time: Duration,
    /// Granted timeouts shorter than this are treated as this long
    pub minimum_subscription_time: Duration,
    /// Out-of-order events buffered per subscription before a gap is skipped
    pub max_buffered_events: usize,
    /// How long a missing event is waited for before it is skipped
    pub event_gap_timeout: Duration,
}

impl Default for GenaClientConfig {
    fn default() -> Self {
        Self::from(&UpnpConfig::default())
    }
}

impl From<&UpnpConfig> for GenaClientConfig {
    fn from(config: &UpnpConfig) -> Self {
        Self {
            auto_renew_time: config.auto_renew_time,
            minimum_subscription_time: config.cp_minimum_subscription_time,
            max_buffered_events: config.max_subscription_queued_events,
            // Publishers never send an event older than the age limit, and a
            // delivery already under way ends within the answering timeout.
            event_gap_timeout: config.max_subscription_event_age
                + config.gena_notification_answering_timeout,
        }
    }
}

/// Tunables read by [`crate::Publisher`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    pub max_queued_events: usize,
    /// Queued events older than this are skipped
    pub max_event_age: Duration,
    /// Longest timeout granted to a subscriber
    pub max_timeout: Duration,
    pub max_consecutive_failures: u32,
    pub sending_timeout: Duration,
    pub answering_timeout: Duration,
    /// SERVER header on SUBSCRIBE responses
    pub server_product: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self::from(&UpnpConfig::default())
    }
}

impl From<&UpnpConfig> for PublisherConfig {
    fn from(config: &UpnpConfig) -> Self {
        Self {
            max_queued_events: config.max_subscription_queued_events,
            max_event_age: config.max_subscription_event_age,
            max_timeout: config.max_subscription_timeout,
            max_consecutive_failures: config.max_consecutive_notify_failures,
            sending_timeout: config.gena_notification_sending_timeout,
            answering_timeout: config.gena_notification_answering_timeout,
            server_product: config.server_product.clone(),
        }
    }
}
