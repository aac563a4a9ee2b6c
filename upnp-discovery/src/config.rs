//! Discovery settings derived from [`UpnpConfig`].

use std::time::Duration;

use upnp_core::UpnpConfig;

/// Largest MX a device honours before scheduling a reply. Protects
/// against requests asking for replies far in the future.
pub const MAX_REPLY_MX: u32 = 120;

/// Tunables read by [`crate::SsdpEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct SsdpConfig {
    /// Copies of every datagram sent
    pub num_copies: u32,
    /// Pause between copies
    pub copy_pause: Duration,
    /// MX clamp for outgoing searches, in seconds
    pub min_search_time: u32,
    pub max_search_time: u32,
    /// Re-advertise this long before max-age runs out
    pub auto_advertisement_time: Duration,
    /// Re-advertise at half the max-age instead of near its end
    pub packet_distribute: bool,
    pub enable_ipv6: bool,
    pub multicast_ttl: u32,
    /// SERVER / USER-AGENT value
    pub server_product: String,
    /// Delayed search replies that may be outstanding at once
    pub max_pending_replies: usize,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self::from(&UpnpConfig::default())
    }
}

impl From<&UpnpConfig> for SsdpConfig {
    fn from(config: &UpnpConfig) -> Self {
        Self {
            num_copies: config.num_ssdp_copy,
            copy_pause: config.ssdp_pause,
            min_search_time: saturating_secs(config.min_search_time),
            max_search_time: saturating_secs(config.max_search_time),
            auto_advertisement_time: config.auto_advertisement_time,
            packet_distribute: config.ssdp_packet_distribute,
            enable_ipv6: config.enable_ipv6,
            multicast_ttl: config.multicast_ttl,
            server_product: config.server_product.clone(),
            max_pending_replies: config.max_jobs_total,
        }
    }
}

fn saturating_secs(value: Duration) -> u32 {
    u32::try_from(value.as_secs()).unwrap_or(u32::MAX)
}

impl SsdpConfig {
    /// Clamp a requested MX into the configured search window.
    pub fn clamp_mx(&self, mx: u32) -> u32 {
        mx.clamp(self.min_search_time, self.max_search_time.max(self.min_search_time))
    }

    /// Delay before the next advertisement salvo for a given max-age.
    pub fn readvertise_delay(&self, max_age: u32) -> Duration {
        let lead = saturating_secs(self.auto_advertisement_time);
        let base = if self.packet_distribute {
            max_age / 2
        } else {
            max_age
        };
        Duration::from_secs(u64::from(base.saturating_sub(lead).max(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 2)]
    #[case(1, 2)]
    #[case(2, 2)]
    #[case(5, 5)]
    #[case(80, 80)]
    #[case(500, 80)]
    fn test_clamp_mx(#[case] requested: u32, #[case] expected: u32) {
        assert_eq!(SsdpConfig::default().clamp_mx(requested), expected);
    }

    #[test]
    fn test_readvertise_delay() {
        let mut config = SsdpConfig::default();
        assert_eq!(config.readvertise_delay(1800), Duration::from_secs(870));
        assert_eq!(config.readvertise_delay(40), Duration::from_secs(1));

        config.packet_distribute = false;
        assert_eq!(config.readvertise_delay(1800), Duration::from_secs(1770));
        assert_eq!(config.readvertise_delay(10), Duration::from_secs(1));
    }

    #[test]
    fn test_from_upnp_config() {
        let upnp = UpnpConfig::lossy_network();
        let config = SsdpConfig::from(&upnp);
        assert_eq!(config.num_copies, 3);
        assert_eq!(config.copy_pause, Duration::from_millis(200));
        assert_eq!(config.max_search_time, 80);
        assert_eq!(config.max_pending_replies, 100);
    }
}
