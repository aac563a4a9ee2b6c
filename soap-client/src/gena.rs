//! GENA SUBSCRIBE, renew and UNSUBSCRIBE requests

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, SoapError};
use crate::SoapClient;

/// Value of a GENA `TIMEOUT` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionTimeout {
    Seconds(u32),
    Infinite,
}

impl SubscriptionTimeout {
    /// Parse `Second-N` or `Second-infinite`, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let prefix = value.get(..7)?;
        if !prefix.eq_ignore_ascii_case("Second-") {
            return None;
        }
        let rest = &value[7..];
        if rest.eq_ignore_ascii_case("infinite") {
            return Some(Self::Infinite);
        }
        rest.parse().ok().map(Self::Seconds)
    }

    /// `None` for an infinite subscription.
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Seconds(secs) => Some(Duration::from_secs(u64::from(secs))),
            Self::Infinite => None,
        }
    }
}

impl fmt::Display for SubscriptionTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seconds(secs) => write!(f, "Second-{}", secs),
            Self::Infinite => f.write_str("Second-infinite"),
        }
    }
}

/// What a publisher granted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResponse {
    /// SID chosen by the publisher
    pub sid: String,
    pub timeout: SubscriptionTimeout,
}

fn host_header(event_url: &str) -> Result<String> {
    let url = url::Url::parse(event_url).map_err(|e| SoapError::InvalidUrl(format!("{}: {}", event_url, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| SoapError::InvalidUrl(format!("{}: no host", event_url)))?;
    Ok(match url.port_or_known_default() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn call(request: ureq::Request, method: &'static str) -> Result<ureq::Response> {
    match request.call() {
        Ok(response) if response.status() == 200 => Ok(response),
        Ok(response) => Err(SoapError::Unaccepted {
            method,
            status: response.status(),
        }),
        Err(ureq::Error::Status(status, _)) => Err(SoapError::Unaccepted { method, status }),
        Err(e) => Err(SoapError::Network(e.to_string())),
    }
}

fn granted(response: &ureq::Response, requested: SubscriptionTimeout) -> Result<SubscribeResponse> {
    let sid = response
        .header("SID")
        .filter(|sid| !sid.trim().is_empty())
        .ok_or_else(|| SoapError::Parse("Missing SID header in SUBSCRIBE response".to_string()))?
        .trim()
        .to_string();
    let timeout = response
        .header("TIMEOUT")
        .and_then(SubscriptionTimeout::parse)
        .unwrap_or(requested);
    Ok(SubscribeResponse { sid, timeout })
}

impl SoapClient {
    /// Subscribe to a service's events.
    ///
    /// `callback_urls` are sent in order as the CALLBACK list.
    pub fn subscribe(
        &self,
        event_url: &str,
        callback_urls: &[String],
        timeout: SubscriptionTimeout,
    ) -> Result<SubscribeResponse> {
        let callback: String = callback_urls.iter().map(|url| format!("<{}>", url)).collect();
        let request = self
            .agent()
            .request("SUBSCRIBE", event_url)
            .set("HOST", &host_header(event_url)?)
            .set("CALLBACK", &callback)
            .set("NT", "upnp:event")
            .set("TIMEOUT", &timeout.to_string());
        let response = call(request, "SUBSCRIBE")?;
        let result = granted(&response, timeout)?;
        debug!(event_url, sid = %result.sid, timeout = %result.timeout, "subscribed");
        Ok(result)
    }

    /// Renew an existing subscription. The response SID is authoritative.
    pub fn renew_subscription(
        &self,
        event_url: &str,
        sid: &str,
        timeout: SubscriptionTimeout,
    ) -> Result<SubscribeResponse> {
        let request = self
            .agent()
            .request("SUBSCRIBE", event_url)
            .set("HOST", &host_header(event_url)?)
            .set("SID", sid)
            .set("TIMEOUT", &timeout.to_string());
        let response = call(request, "SUBSCRIBE")?;
        granted(&response, timeout)
    }

    /// Cancel a subscription.
    pub fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<()> {
        let request = self
            .agent()
            .request("UNSUBSCRIBE", event_url)
            .set("HOST", &host_header(event_url)?)
            .set("SID", sid);
        call(request, "UNSUBSCRIBE")?;
        debug!(event_url, sid, "unsubscribed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Second-1800", Some(SubscriptionTimeout::Seconds(1800)))]
    #[case("second-30", Some(SubscriptionTimeout::Seconds(30)))]
    #[case(" Second-infinite ", Some(SubscriptionTimeout::Infinite))]
    #[case("Second-INFINITE", Some(SubscriptionTimeout::Infinite))]
    #[case("Second-", None)]
    #[case("Minute-5", None)]
    #[case("1800", None)]
    #[case("", None)]
    fn test_parse_timeout(#[case] value: &str, #[case] expected: Option<SubscriptionTimeout>) {
        assert_eq!(SubscriptionTimeout::parse(value), expected);
    }

    #[test]
    fn test_timeout_display_round_trip() {
        for timeout in [SubscriptionTimeout::Seconds(300), SubscriptionTimeout::Infinite] {
            assert_eq!(SubscriptionTimeout::parse(&timeout.to_string()), Some(timeout));
        }
        assert_eq!(SubscriptionTimeout::Infinite.as_duration(), None);
    }

    #[rstest]
    #[case("http://192.168.1.100:1400/MediaRenderer/AVTransport/Event", "192.168.1.100:1400")]
    #[case("http://device.local/evt", "device.local:80")]
    fn test_host_header(#[case] url: &str, #[case] expected: &str) {
        assert_eq!(host_header(url).unwrap(), expected);
    }

    #[test]
    fn test_host_header_rejects_garbage() {
        assert!(matches!(host_header("not a url"), Err(SoapError::InvalidUrl(_))));
    }
}
