//! In-memory publishers and subscribers for the GENA state machines.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callback_server::{EventRouter, NotificationPayload};
use gena::{
    GenaClient, GenaClientConfig, GenaError, NotifyTransport, Publisher, PublisherConfig,
    SubscriptionTransport,
};
use parking_lot::Mutex;
use soap_client::{SoapError, SubscribeResponse, SubscriptionTimeout};
use tokio::sync::{mpsc, Semaphore};
use upnp_core::{ChannelSink, TimerThread, UpnpEvent};

pub const EVENT_URL: &str = "http://10.0.0.5:1400/MediaRenderer/AVTransport/Event";
pub const CALLBACK_URL: &str = "http://10.0.0.9:50000/notify";
pub const AVT_ID: &str = "urn:upnp-org:serviceId:AVTransport";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Subscribe {
        event_url: String,
        callbacks: Vec<String>,
        timeout: SubscriptionTimeout,
    },
    Renew {
        sid: String,
        timeout: SubscriptionTimeout,
    },
    Unsubscribe {
        sid: String,
    },
}

/// Answers subscription requests like a publisher would.
pub struct FakePublisher {
    calls: Mutex<Vec<Call>>,
    grant: Mutex<SubscriptionTimeout>,
    next_sid: Mutex<u32>,
    renewed_sid: Mutex<Option<String>>,
    refuse_subscribe: Mutex<bool>,
    refuse_renew: Mutex<bool>,
    refuse_unsubscribe: Mutex<bool>,
}

impl FakePublisher {
    pub fn granting(grant: SubscriptionTimeout) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            grant: Mutex::new(grant),
            next_sid: Mutex::new(1),
            renewed_sid: Mutex::new(None),
            refuse_subscribe: Mutex::new(false),
            refuse_renew: Mutex::new(false),
            refuse_unsubscribe: Mutex::new(false),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn renewals(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, Call::Renew { .. }))
            .count()
    }

    pub fn set_grant(&self, grant: SubscriptionTimeout) {
        *self.grant.lock() = grant;
    }

    /// Hand out a different SID on the next renewals.
    pub fn change_sid_on_renew(&self, sid: &str) {
        *self.renewed_sid.lock() = Some(sid.to_string());
    }

    pub fn refuse_subscribe(&self) {
        *self.refuse_subscribe.lock() = true;
    }

    pub fn refuse_renew(&self) {
        *self.refuse_renew.lock() = true;
    }

    pub fn refuse_unsubscribe(&self) {
        *self.refuse_unsubscribe.lock() = true;
    }

    fn refused(method: &'static str) -> GenaError {
        GenaError::Soap(SoapError::Unaccepted { method, status: 412 })
    }
}

#[async_trait]
impl SubscriptionTransport for FakePublisher {
    async fn subscribe(
        &self,
        event_url: &str,
        callback_urls: &[String],
        timeout: SubscriptionTimeout,
    ) -> gena::Result<SubscribeResponse> {
        self.calls.lock().push(Call::Subscribe {
            event_url: event_url.to_string(),
            callbacks: callback_urls.to_vec(),
            timeout,
        });
        if *self.refuse_subscribe.lock() {
            return Err(Self::refused("SUBSCRIBE"));
        }
        let mut next = self.next_sid.lock();
        let sid = format!("uuid:RINCON_{}", *next);
        *next += 1;
        Ok(SubscribeResponse {
            sid,
            timeout: *self.grant.lock(),
        })
    }

    async fn renew(
        &self,
        _event_url: &str,
        sid: &str,
        timeout: SubscriptionTimeout,
    ) -> gena::Result<SubscribeResponse> {
        self.calls.lock().push(Call::Renew {
            sid: sid.to_string(),
            timeout,
        });
        if *self.refuse_renew.lock() {
            return Err(Self::refused("SUBSCRIBE"));
        }
        let sid = self.renewed_sid.lock().clone().unwrap_or_else(|| sid.to_string());
        Ok(SubscribeResponse {
            sid,
            timeout: *self.grant.lock(),
        })
    }

    async fn unsubscribe(&self, _event_url: &str, sid: &str) -> gena::Result<()> {
        self.calls.lock().push(Call::Unsubscribe { sid: sid.to_string() });
        if *self.refuse_unsubscribe.lock() {
            return Err(Self::refused("UNSUBSCRIBE"));
        }
        Ok(())
    }
}

pub struct ClientHarness {
    pub client: GenaClient,
    pub publisher: Arc<FakePublisher>,
    pub router: EventRouter,
    pub events: mpsc::UnboundedReceiver<UpnpEvent>,
    pub notifications: mpsc::UnboundedReceiver<NotificationPayload>,
    pub timer: TimerThread,
}

impl ClientHarness {
    pub fn new(grant: SubscriptionTimeout) -> Self {
        let publisher = FakePublisher::granting(grant);
        let (tx, notifications) = mpsc::unbounded_channel();
        let router = EventRouter::new(tx);
        let (sink, events) = ChannelSink::new();
        let timer = TimerThread::new(100).unwrap();
        let client = GenaClient::new(
            GenaClientConfig::default(),
            timer.clone(),
            publisher.clone(),
            router.clone(),
            CALLBACK_URL.to_string(),
            Arc::new(sink),
        );
        Self {
            client,
            publisher,
            router,
            events,
            notifications,
            timer,
        }
    }
}

/// One NOTIFY as the fake subscriber saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub url: String,
    pub sid: String,
    pub event_key: u32,
    pub body: String,
}

/// Records NOTIFY requests instead of sending them.
pub struct FakeSubscriber {
    delivered: Mutex<Vec<Delivery>>,
    attempts: Mutex<usize>,
    failing: Mutex<HashSet<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeSubscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
            failing: Mutex::new(HashSet::new()),
            gate: None,
        })
    }

    /// Every NOTIFY waits for a permit of the returned semaphore.
    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let subscriber = Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
            failing: Mutex::new(HashSet::new()),
            gate: Some(gate.clone()),
        });
        (subscriber, gate)
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }

    pub fn delivered(&self) -> Vec<Delivery> {
        self.delivered.lock().clone()
    }

    pub fn keys(&self) -> Vec<u32> {
        self.delivered.lock().iter().map(|d| d.event_key).collect()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl NotifyTransport for FakeSubscriber {
    async fn notify(&self, callback_url: &str, sid: &str, event_key: u32, body: &str) -> gena::Result<()> {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        *self.attempts.lock() += 1;
        if self.failing.lock().contains(callback_url) {
            return Err(GenaError::Notify {
                url: callback_url.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        self.delivered.lock().push(Delivery {
            url: callback_url.to_string(),
            sid: sid.to_string(),
            event_key,
            body: body.to_string(),
        });
        Ok(())
    }
}

pub struct PublisherHarness {
    pub publisher: Publisher,
    pub subscriber: Arc<FakeSubscriber>,
    pub events: mpsc::UnboundedReceiver<UpnpEvent>,
}

impl PublisherHarness {
    pub fn new() -> Self {
        Self::with_subscriber(FakeSubscriber::new())
    }

    pub fn with_subscriber(subscriber: Arc<FakeSubscriber>) -> Self {
        let (sink, events) = ChannelSink::new();
        let publisher = Publisher::new(
            PublisherConfig::default(),
            TimerThread::new(100).unwrap(),
            subscriber.clone(),
            Arc::new(sink),
        );
        publisher
            .register_service(
                AVT_ID,
                vec![
                    ("TransportState".to_string(), "STOPPED".to_string()),
                    ("Volume".to_string(), "10".to_string()),
                ],
            )
            .unwrap();
        Self {
            publisher,
            subscriber,
            events,
        }
    }
}

/// Poll `condition` while letting spawned tasks run.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
