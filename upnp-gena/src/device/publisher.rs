//! Device side of GENA: subscriber bookkeeping and NOTIFY delivery.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use callback_server::build_propertyset;
use parking_lot::Mutex;
use soap_client::SubscriptionTimeout;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use upnp_core::{get_status_text, EventSink, HttpHeader, HttpMethod, JobId, Sid, TimerThread, UpnpEvent};

use super::queue::{EventQueue, QueuedEvent};
use super::transport::NotifyTransport;
use crate::client::next_event_key;
use crate::config::{PublisherConfig, DEFAULT_REQUESTED_TIMEOUT};
use crate::error::{GenaError, Result};

/// A SUBSCRIBE or UNSUBSCRIBE request addressed to one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenaRequest {
    pub method: Option<HttpMethod>,
    pub service_id: String,
    pub sid: Option<String>,
    pub callback: Option<String>,
    pub nt: Option<String>,
    pub timeout: Option<String>,
}

impl GenaRequest {
    /// Build a request from a method token and raw header pairs. Header
    /// names are matched without regard to case.
    pub fn from_headers<'a, I>(method: &str, service_id: &str, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut request = Self {
            method: HttpMethod::parse(method.as_bytes()),
            service_id: service_id.to_string(),
            ..Default::default()
        };
        for (name, value) in headers {
            let value = Some(value.trim().to_string());
            match HttpHeader::parse(name.trim().as_bytes()) {
                Some(HttpHeader::Sid) => request.sid = value,
                Some(HttpHeader::Callback) => request.callback = value,
                Some(HttpHeader::Nt) => request.nt = value,
                Some(HttpHeader::Timeout) => request.timeout = value,
                _ => {}
            }
        }
        request
    }
}

/// What to answer a [`GenaRequest`] with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenaResponse {
    pub status: u16,
    pub sid: Option<String>,
    pub timeout: Option<SubscriptionTimeout>,
}

impl GenaResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            sid: None,
            timeout: None,
        }
    }

    fn granted(sid: String, timeout: SubscriptionTimeout) -> Self {
        Self {
            status: 200,
            sid: Some(sid),
            timeout: Some(timeout),
        }
    }

    pub fn reason(&self) -> &'static str {
        get_status_text(self.status).unwrap_or("")
    }
}

/// `<url1><url2>` to the list of HTTP URLs it names.
pub fn parse_callbacks(header: &str) -> Vec<String> {
    header
        .split('<')
        .filter_map(|part| part.split_once('>'))
        .map(|(url, _)| url.trim())
        .filter(|url| url.len() > 7 && url.get(..7).is_some_and(|scheme| scheme.eq_ignore_ascii_case("http://")))
        .map(str::to_string)
        .collect()
}

#[derive(Debug)]
struct Subscriber {
    callbacks: Vec<String>,
    expires_at: Instant,
    next_key: u32,
    queue: EventQueue,
    failures: u32,
    worker_active: bool,
    expiry_job: Option<JobId>,
}

#[derive(Debug, Default)]
struct Service {
    /// Current value of every evented variable, in first-set order
    state: Vec<(String, String)>,
    subscribers: HashMap<String, Subscriber>,
}

impl Service {
    fn merge(&mut self, changes: &[(&str, &str)]) {
        for (name, value) in changes {
            match self.state.iter_mut().find(|(existing, _)| existing == name) {
                Some(entry) => entry.1 = value.to_string(),
                None => self.state.push((name.to_string(), value.to_string())),
            }
        }
    }

    fn sweep_expired(&mut self, service_id: &str, now: Instant, timer: &TimerThread) {
        self.subscribers.retain(|sid, sub| {
            let alive = sub.expires_at > now;
            if !alive {
                debug!(service_id, %sid, "subscription expired");
                sub.cancel_expiry(timer);
            }
            alive
        });
    }

    fn cancel_all(&mut self, timer: &TimerThread) {
        for sub in self.subscribers.values_mut() {
            sub.cancel_expiry(timer);
        }
    }
}

impl Subscriber {
    fn cancel_expiry(&mut self, timer: &TimerThread) {
        if let Some(job) = self.expiry_job.take() {
            timer.cancel(job);
        }
    }
}

struct PublisherInner {
    config: PublisherConfig,
    transport: Arc<dyn NotifyTransport>,
    timer: TimerThread,
    sink: Arc<dyn EventSink>,
    services: Mutex<HashMap<String, Service>>,
}

/// Subscribers and pending events of every evented service of a device.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

impl Publisher {
    pub fn new(
        config: PublisherConfig,
        timer: TimerThread,
        transport: Arc<dyn NotifyTransport>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                config,
                transport,
                timer,
                sink,
                services: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.inner.config
    }

    /// Accept subscriptions for `service_id`, starting from `initial_state`.
    pub fn register_service(&self, service_id: &str, initial_state: Vec<(String, String)>) -> Result<()> {
        let mut services = self.inner.services.lock();
        if services.contains_key(service_id) {
            return Err(GenaError::AlreadyRegistered(service_id.to_string()));
        }
        services.insert(
            service_id.to_string(),
            Service {
                state: initial_state,
                subscribers: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Drop a service and all of its subscribers.
    pub fn unregister_service(&self, service_id: &str) -> bool {
        match self.inner.services.lock().remove(service_id) {
            Some(mut service) => {
                service.cancel_all(&self.inner.timer);
                true
            }
            None => false,
        }
    }

    /// SIDs of the unexpired subscribers of a service.
    pub fn subscribers(&self, service_id: &str) -> Vec<String> {
        let mut services = self.inner.services.lock();
        let Some(service) = services.get_mut(service_id) else {
            return Vec::new();
        };
        service.sweep_expired(service_id, Instant::now(), &self.inner.timer);
        service.subscribers.keys().cloned().collect()
    }

    /// Current evented state of a service.
    pub fn state(&self, service_id: &str) -> Option<Vec<(String, String)>> {
        self.inner
            .services
            .lock()
            .get(service_id)
            .map(|service| service.state.clone())
    }

    /// Answer a SUBSCRIBE, renew or UNSUBSCRIBE request.
    pub fn handle_request(&self, request: &GenaRequest) -> GenaResponse {
        match request.method {
            Some(HttpMethod::Subscribe) if request.sid.is_some() => {
                if request.callback.is_some() || request.nt.is_some() {
                    return GenaResponse::status(400);
                }
                self.renew(request)
            }
            Some(HttpMethod::Subscribe) => self.subscribe(request),
            Some(HttpMethod::Unsubscribe) => self.unsubscribe(request),
            _ => GenaResponse::status(405),
        }
    }

    fn grant(&self, requested: Option<&str>) -> SubscriptionTimeout {
        let max = self.inner.config.max_timeout;
        let requested = match requested.and_then(SubscriptionTimeout::parse) {
            Some(SubscriptionTimeout::Seconds(secs)) => Duration::from_secs(u64::from(secs)),
            Some(SubscriptionTimeout::Infinite) => max,
            None => DEFAULT_REQUESTED_TIMEOUT,
        };
        let granted = requested.min(max).as_secs();
        SubscriptionTimeout::Seconds(u32::try_from(granted).unwrap_or(u32::MAX))
    }

    fn subscribe(&self, request: &GenaRequest) -> GenaResponse {
        let service_id = request.service_id.as_str();
        if !request
            .nt
            .as_deref()
            .is_some_and(|nt| nt.eq_ignore_ascii_case("upnp:event"))
        {
            return GenaResponse::status(412);
        }
        let callbacks = request.callback.as_deref().map(parse_callbacks).unwrap_or_default();
        if callbacks.is_empty() {
            debug!(service_id, "SUBSCRIBE without usable CALLBACK");
            return GenaResponse::status(412);
        }
        let granted = self.grant(request.timeout.as_deref());
        let lifetime = granted.as_duration().unwrap_or(self.inner.config.max_timeout);
        let sid = format!("uuid:{}", uuid::Uuid::new_v4());

        {
            let mut services = self.inner.services.lock();
            let Some(service) = services.get_mut(service_id) else {
                return GenaResponse::status(404);
            };
            let now = Instant::now();
            service.sweep_expired(service_id, now, &self.inner.timer);
            let pairs: Vec<(&str, &str)> = service
                .state
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect();
            let body = match build_propertyset(pairs) {
                Ok(body) => body,
                Err(e) => {
                    warn!(service_id, error = %e, "could not build initial event");
                    return GenaResponse::status(500);
                }
            };

            let mut queue = EventQueue::new(
                self.inner.config.max_queued_events,
                self.inner.config.max_event_age,
            );
            queue.push(QueuedEvent {
                event_key: 0,
                body: Arc::from(body),
                queued_at: now,
            });
            service.subscribers.insert(
                sid.clone(),
                Subscriber {
                    callbacks,
                    expires_at: now + lifetime,
                    next_key: next_event_key(0),
                    queue,
                    failures: 0,
                    worker_active: true,
                    expiry_job: arm_expiry(&self.inner, service_id, &sid, lifetime),
                },
            );
        }

        info!(service_id, %sid, timeout = %granted, "subscriber added");
        spawn_worker(&self.inner, service_id.to_string(), sid.clone());
        self.inner.sink.on_event(UpnpEvent::SubscriptionRequest {
            service_id: service_id.to_string(),
            sid: Sid::new(sid.clone()),
        });
        GenaResponse::granted(sid, granted)
    }

    fn renew(&self, request: &GenaRequest) -> GenaResponse {
        let Some(sid) = request.sid.as_deref() else {
            return GenaResponse::status(412);
        };
        let granted = self.grant(request.timeout.as_deref());
        let lifetime = granted.as_duration().unwrap_or(self.inner.config.max_timeout);

        let mut services = self.inner.services.lock();
        let Some(service) = services.get_mut(request.service_id.as_str()) else {
            return GenaResponse::status(404);
        };
        let now = Instant::now();
        service.sweep_expired(&request.service_id, now, &self.inner.timer);
        match service.subscribers.get_mut(sid) {
            Some(sub) => {
                sub.expires_at = now + lifetime;
                sub.cancel_expiry(&self.inner.timer);
                sub.expiry_job = arm_expiry(&self.inner, &request.service_id, sid, lifetime);
                debug!(service_id = %request.service_id, sid, timeout = %granted, "subscription renewed");
                GenaResponse::granted(sid.to_string(), granted)
            }
            None => GenaResponse::status(412),
        }
    }

    fn unsubscribe(&self, request: &GenaRequest) -> GenaResponse {
        let Some(sid) = request.sid.as_deref() else {
            return GenaResponse::status(412);
        };
        if request.callback.is_some() || request.nt.is_some() {
            return GenaResponse::status(400);
        }
        let mut services = self.inner.services.lock();
        let Some(service) = services.get_mut(request.service_id.as_str()) else {
            return GenaResponse::status(404);
        };
        match service.subscribers.remove(sid) {
            Some(mut sub) => {
                sub.cancel_expiry(&self.inner.timer);
                info!(service_id = %request.service_id, sid, "subscriber removed");
                GenaResponse::status(200)
            }
            None => GenaResponse::status(412),
        }
    }

    /// Record changed variables and queue one event for every subscriber.
    ///
    /// Returns how many subscribers the event was queued for.
    pub fn notify(&self, service_id: &str, changes: &[(&str, &str)]) -> Result<usize> {
        let body: Arc<str> = Arc::from(build_propertyset(changes.iter().copied())?);

        let (queued, start) = {
            let mut services = self.inner.services.lock();
            let service = services
                .get_mut(service_id)
                .ok_or_else(|| GenaError::InvalidService(service_id.to_string()))?;
            service.merge(changes);
            let now = Instant::now();
            service.sweep_expired(service_id, now, &self.inner.timer);

            let mut start = Vec::new();
            for (sid, sub) in service.subscribers.iter_mut() {
                let event_key = sub.next_key;
                sub.next_key = next_event_key(event_key);
                if let Some(evicted) = sub.queue.push(QueuedEvent {
                    event_key,
                    body: body.clone(),
                    queued_at: now,
                }) {
                    warn!(service_id, %sid, evicted, "subscriber is falling behind");
                }
                if !sub.worker_active {
                    sub.worker_active = true;
                    start.push(sid.clone());
                }
            }
            (service.subscribers.len(), start)
        };

        for sid in start {
            spawn_worker(&self.inner, service_id.to_string(), sid);
        }
        Ok(queued)
    }

    /// Forget every service and subscriber. Deliveries in flight finish
    /// on their own.
    pub fn shutdown(&self) {
        let mut services = self.inner.services.lock();
        for service in services.values_mut() {
            service.cancel_all(&self.inner.timer);
        }
        services.clear();
    }
}

/// Drop the subscriber once `lifetime` has passed without a renewal.
fn arm_expiry(inner: &Arc<PublisherInner>, service_id: &str, sid: &str, lifetime: Duration) -> Option<JobId> {
    let weak: Weak<PublisherInner> = Arc::downgrade(inner);
    let service_id = service_id.to_string();
    let owned_sid = sid.to_string();
    let job = inner.timer.schedule(lifetime, async move {
        let sid = owned_sid;
        let Some(inner) = weak.upgrade() else { return };
        let mut services = inner.services.lock();
        let Some(service) = services.get_mut(&service_id) else {
            return;
        };
        let expired = service
            .subscribers
            .get(&sid)
            .is_some_and(|sub| sub.expires_at <= Instant::now());
        if expired {
            service.subscribers.remove(&sid);
            info!(%service_id, %sid, "subscription expired without renewal");
        }
    });
    match job {
        Ok(job) => Some(job),
        Err(e) => {
            debug!(%sid, error = %e, "could not schedule subscription expiry");
            None
        }
    }
}

fn spawn_worker(inner: &Arc<PublisherInner>, service_id: String, sid: String) {
    inner.timer.run(deliver(inner.clone(), service_id, sid));
}

async fn send_to_any(transport: &dyn NotifyTransport, callbacks: &[String], sid: &str, event: &QueuedEvent) -> bool {
    for url in callbacks {
        match transport.notify(url, sid, event.event_key, &event.body).await {
            Ok(()) => return true,
            Err(e) => debug!(%sid, event_key = event.event_key, url, error = %e, "NOTIFY attempt failed"),
        }
    }
    false
}

/// Serial delivery for one subscriber; at most one runs per subscriber.
async fn deliver(inner: Arc<PublisherInner>, service_id: String, sid: String) {
    loop {
        let claimed = {
            let mut services = inner.services.lock();
            let Some(sub) = services
                .get_mut(&service_id)
                .and_then(|service| service.subscribers.get_mut(&sid))
            else {
                return;
            };
            match sub.queue.next_deliverable(Instant::now()) {
                Some(event) => (event, sub.callbacks.clone()),
                None => {
                    sub.worker_active = false;
                    return;
                }
            }
        };
        let (event, callbacks) = claimed;

        let delivered = send_to_any(inner.transport.as_ref(), &callbacks, &sid, &event).await;

        let cancel = {
            let mut services = inner.services.lock();
            let Some(service) = services.get_mut(&service_id) else {
                return;
            };
            let failures = match service.subscribers.get_mut(&sid) {
                Some(sub) => {
                    sub.queue.complete();
                    sub.failures = if delivered { 0 } else { sub.failures + 1 };
                    sub.failures
                }
                None => return,
            };
            let cancel = failures >= inner.config.max_consecutive_failures;
            if cancel {
                if let Some(mut sub) = service.subscribers.remove(&sid) {
                    sub.cancel_expiry(&inner.timer);
                }
            }
            cancel
        };

        if !delivered {
            warn!(%service_id, %sid, event_key = event.event_key, "event dropped after failed delivery");
        }
        if cancel {
            warn!(%service_id, %sid, "cancelling unresponsive subscription");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("<http://10.0.0.9:50000/notify>", vec!["http://10.0.0.9:50000/notify"])]
    #[case("<http://a/1><http://b/2>", vec!["http://a/1", "http://b/2"])]
    #[case("<ftp://a/1><HTTP://b/2>", vec!["HTTP://b/2"])]
    #[case("http://no-brackets/", vec![])]
    #[case("<>", vec![])]
    fn test_parse_callbacks(#[case] header: &str, #[case] expected: Vec<&str>) {
        assert_eq!(parse_callbacks(header), expected);
    }

    #[test]
    fn test_request_from_headers() {
        let request = GenaRequest::from_headers(
            "SUBSCRIBE",
            "urn:upnp-org:serviceId:AVTransport",
            [
                ("callback", "<http://10.0.0.9:50000/>"),
                ("Nt", " upnp:event "),
                ("TIMEOUT", "Second-300"),
                ("X-Other", "ignored"),
            ],
        );
        assert_eq!(request.method, Some(HttpMethod::Subscribe));
        assert_eq!(request.nt.as_deref(), Some("upnp:event"));
        assert_eq!(request.timeout.as_deref(), Some("Second-300"));
        assert!(request.sid.is_none());

        let other = GenaRequest::from_headers("BREW", "x", []);
        assert_eq!(other.method, None);
    }

    #[test]
    fn test_service_merge_keeps_order() {
        let mut service = Service::default();
        service.merge(&[("Volume", "10"), ("Mute", "0")]);
        service.merge(&[("Volume", "20")]);
        assert_eq!(
            service.state,
            vec![
                ("Volume".to_string(), "20".to_string()),
                ("Mute".to_string(), "0".to_string()),
            ]
        );
    }
}
