//! Outgoing NOTIFY requests.

use async_trait::async_trait;
use reqwest::Method;

use crate::config::PublisherConfig;
use crate::error::{GenaError, Result};

/// Delivers one event to one callback URL.
#[async_trait]
pub trait NotifyTransport: Send + Sync {
    async fn notify(&self, callback_url: &str, sid: &str, event_key: u32, body: &str) -> Result<()>;
}

/// [`NotifyTransport`] over `reqwest`, with the short eventing timeouts.
#[derive(Debug, Clone)]
pub struct HttpNotifyTransport {
    client: reqwest::Client,
    server_product: String,
}

impl HttpNotifyTransport {
    pub fn new(config: &PublisherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.sending_timeout)
            .timeout(config.sending_timeout + config.answering_timeout)
            .build()
            .map_err(|e| GenaError::Worker(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            server_product: config.server_product.clone(),
        })
    }
}

#[async_trait]
impl NotifyTransport for HttpNotifyTransport {
    async fn notify(&self, callback_url: &str, sid: &str, event_key: u32, body: &str) -> Result<()> {
        let method = Method::from_bytes(b"NOTIFY").map_err(|e| GenaError::Worker(e.to_string()))?;
        let response = self
            .client
            .request(method, callback_url)
            .header("CONTENT-TYPE", "text/xml; charset=\"utf-8\"")
            .header("NT", "upnp:event")
            .header("NTS", "upnp:propchange")
            .header("SID", sid)
            .header("SEQ", event_key.to_string())
            .header("USER-AGENT", &self.server_product)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| GenaError::Notify {
                url: callback_url.to_string(),
                reason: e.to_string(),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(GenaError::NotifyUnaccepted {
                url: callback_url.to_string(),
                status: response.status().as_u16(),
            })
        }
    }
}
