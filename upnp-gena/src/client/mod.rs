//! Control-point side of GENA.
//!
//! [`GenaClient`] subscribes to publishers, renews each subscription
//! shortly before it runs out and turns accepted NOTIFY requests into
//! ordered [`UpnpEvent::PropertyChange`] events.
//!
//! A subscription moves through `Subscribing -> Active -> Renewing ->
//! Active` until the application unsubscribes or a renewal fails. A failed
//! renewal removes the subscription and reports
//! [`UpnpEvent::SubscriptionExpired`]; it is never re-created behind the
//! application's back, since a fresh subscription restarts at event key 0.

mod sequencer;
mod table;
mod transport;

pub use sequencer::{next_event_key, EventSequencer, Properties};
pub use table::{ClientSubscription, ClientSubscriptionTable};
pub use transport::{SoapSubscriptionTransport, SubscriptionTransport};

use std::sync::{Arc, Weak};
use std::time::Duration;

use callback_server::{EventRouter, NotificationPayload};
use parking_lot::Mutex;
use soap_client::{SubscribeResponse, SubscriptionTimeout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use upnp_core::{EventSink, ExpiryReason, PropertyChange, Sid, TimerThread, UpnpEvent};

use crate::config::GenaClientConfig;
use crate::error::{GenaError, Result};

/// A granted timeout raised to the configured minimum subscription time.
pub fn effective_grant(config: &GenaClientConfig, granted: SubscriptionTimeout) -> SubscriptionTimeout {
    match granted {
        SubscriptionTimeout::Seconds(secs) => {
            let minimum = u32::try_from(config.minimum_subscription_time.as_secs()).unwrap_or(u32::MAX);
            SubscriptionTimeout::Seconds(secs.max(minimum))
        }
        SubscriptionTimeout::Infinite => SubscriptionTimeout::Infinite,
    }
}

/// Delay until the renewal of a subscription granted `granted`.
///
/// Short grants are raised to the configured minimum first. Infinite
/// subscriptions are never renewed.
pub fn renewal_delay(config: &GenaClientConfig, granted: SubscriptionTimeout) -> Option<Duration> {
    let granted = granted.as_duration()?;
    let effective = granted.max(config.minimum_subscription_time);
    Some(effective.saturating_sub(config.auto_renew_time))
}

struct ClientInner {
    config: GenaClientConfig,
    transport: Arc<dyn SubscriptionTransport>,
    timer: TimerThread,
    router: EventRouter,
    callback_url: String,
    sink: Arc<dyn EventSink>,
    table: Mutex<ClientSubscriptionTable>,
}

/// Subscription state machine of one control point.
#[derive(Clone)]
pub struct GenaClient {
    inner: Arc<ClientInner>,
}

impl GenaClient {
    /// `router` must be the router of the callback server reachable at
    /// `callback_url`.
    pub fn new(
        config: GenaClientConfig,
        timer: TimerThread,
        transport: Arc<dyn SubscriptionTransport>,
        router: EventRouter,
        callback_url: String,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                timer,
                router,
                callback_url,
                sink,
                table: Mutex::new(ClientSubscriptionTable::new()),
            }),
        }
    }

    pub fn callback_url(&self) -> &str {
        &self.inner.callback_url
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    /// Subscribe to the service at `event_url`.
    ///
    /// Returns the local SID of the new subscription and the timeout it
    /// runs for: the publisher's grant, raised to the minimum subscription
    /// time.
    pub async fn subscribe(
        &self,
        event_url: &str,
        timeout: SubscriptionTimeout,
    ) -> Result<(Sid, SubscriptionTimeout)> {
        let inner = &self.inner;
        let pending = inner.router.begin_subscribe();
        let callbacks = [inner.callback_url.clone()];
        let response = inner.transport.subscribe(event_url, &callbacks, timeout).await?;
        let granted = effective_grant(&inner.config, response.timeout);

        let subscription = ClientSubscription::new(
            response.sid.clone(),
            event_url.to_string(),
            timeout,
            granted,
            inner.config.max_buffered_events,
            inner.config.event_gap_timeout,
        );
        let sid = subscription.sid.clone();
        inner.table.lock().add(subscription);
        inner.router.register(response.sid.clone()).await;
        drop(pending);

        if let Err(e) = schedule_renewal(inner, &sid) {
            warn!(%sid, error = %e, "could not schedule renewal, dropping subscription");
            if let Some(sub) = remove(inner, &sid).await {
                let _ = inner.transport.unsubscribe(&sub.event_url, &sub.actual_sid).await;
            }
            return Err(e);
        }

        info!(%sid, actual_sid = %response.sid, event_url, timeout = %granted, "subscribed");
        Ok((sid, granted))
    }

    /// Renew now, replacing any scheduled renewal.
    ///
    /// A failed renewal removes the subscription. The returned timeout is
    /// raised to the minimum subscription time like on subscribe.
    pub async fn renew(&self, sid: &Sid, timeout: SubscriptionTimeout) -> Result<SubscriptionTimeout> {
        let (event_url, actual_sid) = {
            let mut table = self.inner.table.lock();
            let sub = table
                .lookup_by_sid_mut(sid)
                .ok_or_else(|| GenaError::InvalidSid(sid.to_string()))?;
            if let Some(job) = sub.renew_job.take() {
                self.inner.timer.cancel(job);
            }
            sub.requested = timeout;
            (sub.event_url.clone(), sub.actual_sid.clone())
        };

        match self.inner.transport.renew(&event_url, &actual_sid, timeout).await {
            Ok(granted) => apply_renewal(&self.inner, sid, &actual_sid, granted).await,
            Err(e) => {
                warn!(%sid, error = %e, "renewal refused, removing subscription");
                remove(&self.inner, sid).await;
                Err(e)
            }
        }
    }

    /// Cancel a subscription.
    ///
    /// Local state is removed even when the UNSUBSCRIBE request fails; the
    /// request's error is still returned.
    pub async fn unsubscribe(&self, sid: &Sid) -> Result<()> {
        let sub = remove(&self.inner, sid)
            .await
            .ok_or_else(|| GenaError::InvalidSid(sid.to_string()))?;
        match self.inner.transport.unsubscribe(&sub.event_url, &sub.actual_sid).await {
            Ok(()) => {
                info!(%sid, "unsubscribed");
                Ok(())
            }
            Err(e) => {
                warn!(%sid, error = %e, "UNSUBSCRIBE failed, local state dropped anyway");
                Err(e)
            }
        }
    }

    /// Feed one NOTIFY accepted by the callback server.
    pub fn handle_notification(&self, payload: NotificationPayload) {
        let released = {
            let mut table = self.inner.table.lock();
            let Some(sub) = table.lookup_by_actual_sid_mut(payload.sid.as_bytes()) else {
                debug!(sid = %payload.sid, event_key = payload.event_key, "event for unknown subscription");
                return;
            };
            let ready = sub
                .sequencer
                .accept(payload.event_key, payload.properties, Instant::now());
            arm_gap_job(&self.inner, sub);
            (sub.sid.clone(), ready)
        };

        let (sid, ready) = released;
        deliver(&self.inner, &sid, ready);
    }

    /// Feed everything arriving on `notifications` until the channel closes
    /// or the client is dropped.
    pub fn spawn_notification_pump(
        &self,
        mut notifications: mpsc::UnboundedReceiver<NotificationPayload>,
    ) -> JoinHandle<()> {
        let weak: Weak<ClientInner> = Arc::downgrade(&self.inner);
        self.inner.timer.runtime().spawn(async move {
            while let Some(payload) = notifications.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                GenaClient { inner }.handle_notification(payload);
            }
            debug!("notification pump stopped");
        })
    }

    pub fn subscriptions(&self) -> Vec<Sid> {
        self.inner.table.lock().sids()
    }

    /// The publisher's SID for a local SID.
    pub fn actual_sid(&self, sid: &Sid) -> Option<String> {
        self.inner
            .table
            .lock()
            .lookup_by_sid(sid)
            .map(|sub| sub.actual_sid.clone())
    }

    /// Whether a renewal is scheduled for `sid`.
    pub fn renewal_pending(&self, sid: &Sid) -> bool {
        let table = self.inner.table.lock();
        table
            .lookup_by_sid(sid)
            .and_then(|sub| sub.renew_job)
            .is_some_and(|job| self.inner.timer.is_pending(job))
    }

    /// Drop every subscription, unsubscribing on a best-effort basis.
    pub async fn shutdown(&self) {
        let drained = self.inner.table.lock().drain(&self.inner.timer);
        for sub in drained {
            self.inner.router.unregister(&sub.actual_sid).await;
            if let Err(e) = self.inner.transport.unsubscribe(&sub.event_url, &sub.actual_sid).await {
                debug!(sid = %sub.sid, error = %e, "UNSUBSCRIBE during shutdown failed");
            }
        }
    }
}

fn deliver(inner: &ClientInner, sid: &Sid, ready: Vec<(u32, Properties)>) {
    for (event_key, properties) in ready {
        inner.sink.on_event(UpnpEvent::PropertyChange(PropertyChange {
            sid: sid.clone(),
            event_key,
            properties,
        }));
    }
}

/// Keep one job per subscription waiting on the open event-key gap.
fn arm_gap_job(inner: &Arc<ClientInner>, sub: &mut ClientSubscription) {
    let Some(deadline) = sub.sequencer.gap_deadline() else {
        if let Some(job) = sub.gap_job.take() {
            inner.timer.cancel(job);
        }
        return;
    };
    if sub.gap_job.is_some() {
        return;
    }
    let weak = Arc::downgrade(inner);
    let sid = sub.sid.clone();
    let delay = deadline.saturating_duration_since(Instant::now());
    match inner.timer.schedule(delay, async move {
        if let Some(inner) = weak.upgrade() {
            release_gap(&inner, &sid);
        }
    }) {
        Ok(job) => sub.gap_job = Some(job),
        Err(e) => debug!(sid = %sub.sid, error = %e, "could not schedule gap timeout"),
    }
}

fn release_gap(inner: &Arc<ClientInner>, sid: &Sid) {
    let ready = {
        let mut table = inner.table.lock();
        let Some(sub) = table.lookup_by_sid_mut(sid) else {
            return;
        };
        sub.gap_job = None;
        let ready = sub.sequencer.release_expired(Instant::now());
        arm_gap_job(inner, sub);
        ready
    };
    deliver(inner, sid, ready);
}

fn schedule_renewal(inner: &Arc<ClientInner>, sid: &Sid) -> Result<()> {
    let mut table = inner.table.lock();
    let Some(sub) = table.lookup_by_sid_mut(sid) else {
        return Ok(());
    };
    if let Some(old) = sub.renew_job.take() {
        inner.timer.cancel(old);
    }
    let Some(delay) = renewal_delay(&inner.config, sub.granted) else {
        debug!(%sid, "infinite subscription, no renewal scheduled");
        return Ok(());
    };

    let weak = Arc::downgrade(inner);
    let job_sid = sid.clone();
    let job = inner.timer.schedule(delay, async move {
        if let Some(inner) = weak.upgrade() {
            auto_renew(inner, job_sid).await;
        }
    })?;
    sub.renew_job = Some(job);
    debug!(%sid, delay_secs = delay.as_secs(), "renewal scheduled");
    Ok(())
}

async fn auto_renew(inner: Arc<ClientInner>, sid: Sid) {
    let target = {
        let mut table = inner.table.lock();
        table.lookup_by_sid_mut(&sid).map(|sub| {
            sub.renew_job = None;
            (sub.event_url.clone(), sub.actual_sid.clone(), sub.requested)
        })
    };
    let Some((event_url, actual_sid, requested)) = target else {
        return;
    };

    debug!(%sid, "renewing subscription");
    match inner.transport.renew(&event_url, &actual_sid, requested).await {
        Ok(granted) => {
            if let Err(e) = apply_renewal(&inner, &sid, &actual_sid, granted).await {
                warn!(%sid, error = %e, "renewed but could not schedule the next renewal");
                expire(&inner, &sid, ExpiryReason::TimedOut).await;
            }
        }
        Err(e) => {
            warn!(%sid, error = %e, "subscription renewal failed");
            expire(&inner, &sid, ExpiryReason::RenewalFailed).await;
        }
    }
}

async fn apply_renewal(
    inner: &Arc<ClientInner>,
    sid: &Sid,
    old_actual_sid: &str,
    granted: SubscribeResponse,
) -> Result<SubscriptionTimeout> {
    let changed = {
        let mut table = inner.table.lock();
        let sub = table
            .lookup_by_sid_mut(sid)
            .ok_or_else(|| GenaError::InvalidSid(sid.to_string()))?;
        sub.granted = effective_grant(&inner.config, granted.timeout);
        let changed = sub.actual_sid != granted.sid;
        sub.actual_sid = granted.sid.clone();
        changed
    };
    if changed {
        debug!(%sid, old = old_actual_sid, new = %granted.sid, "publisher changed SID on renewal");
        inner.router.register(granted.sid.clone()).await;
        inner.router.unregister(old_actual_sid).await;
    }
    schedule_renewal(inner, sid)?;
    Ok(effective_grant(&inner.config, granted.timeout))
}

async fn remove(inner: &ClientInner, sid: &Sid) -> Option<ClientSubscription> {
    let removed = inner.table.lock().remove_by_sid(sid, &inner.timer);
    let sub = removed?;
    inner.router.unregister(&sub.actual_sid).await;
    Some(sub)
}

async fn expire(inner: &ClientInner, sid: &Sid, reason: ExpiryReason) {
    if let Some(sub) = remove(inner, sid).await {
        inner.sink.on_event(UpnpEvent::SubscriptionExpired {
            sid: sub.sid,
            event_url: sub.event_url,
            reason,
        });
    }
}
