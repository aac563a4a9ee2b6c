//! Wire side of client subscriptions.

use async_trait::async_trait;
use soap_client::{SoapClient, SubscribeResponse, SubscriptionTimeout};

use crate::error::{GenaError, Result};

/// Sends SUBSCRIBE, renew and UNSUBSCRIBE requests to publishers.
#[async_trait]
pub trait SubscriptionTransport: Send + Sync {
    async fn subscribe(
        &self,
        event_url: &str,
        callback_urls: &[String],
        timeout: SubscriptionTimeout,
    ) -> Result<SubscribeResponse>;

    async fn renew(
        &self,
        event_url: &str,
        sid: &str,
        timeout: SubscriptionTimeout,
    ) -> Result<SubscribeResponse>;

    async fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<()>;
}

/// [`SubscriptionTransport`] over the blocking [`SoapClient`], run on the
/// runtime's blocking pool.
#[derive(Debug, Clone, Default)]
pub struct SoapSubscriptionTransport {
    client: SoapClient,
}

impl SoapSubscriptionTransport {
    pub fn new(client: SoapClient) -> Self {
        Self { client }
    }
}

async fn blocking<T, F>(job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| GenaError::Worker(e.to_string()))?
}

#[async_trait]
impl SubscriptionTransport for SoapSubscriptionTransport {
    async fn subscribe(
        &self,
        event_url: &str,
        callback_urls: &[String],
        timeout: SubscriptionTimeout,
    ) -> Result<SubscribeResponse> {
        let client = self.client.clone();
        let event_url = event_url.to_string();
        let callback_urls = callback_urls.to_vec();
        blocking(move || Ok(client.subscribe(&event_url, &callback_urls, timeout)?)).await
    }

    async fn renew(
        &self,
        event_url: &str,
        sid: &str,
        timeout: SubscriptionTimeout,
    ) -> Result<SubscribeResponse> {
        let client = self.client.clone();
        let event_url = event_url.to_string();
        let sid = sid.to_string();
        blocking(move || Ok(client.renew_subscription(&event_url, &sid, timeout)?)).await
    }

    async fn unsubscribe(&self, event_url: &str, sid: &str) -> Result<()> {
        let client = self.client.clone();
        let event_url = event_url.to_string();
        let sid = sid.to_string();
        blocking(move || Ok(client.unsubscribe(&event_url, &sid)?)).await
    }
}
