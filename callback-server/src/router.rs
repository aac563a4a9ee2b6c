//! Event routing for HTTP callback notifications.
//!
//! The [`EventRouter`] holds the set of subscription IDs this control point
//! accepts events for and forwards accepted notifications to a channel.
//!
//! A publisher may send the initial event (SEQ 0) before its SUBSCRIBE
//! response has been processed here. Callers bracket each SUBSCRIBE with
//! [`EventRouter::begin_subscribe`] so such an event can wait for the
//! in-flight subscribe to register its SID instead of being refused.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, trace};

/// One accepted NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    /// The SID header as sent by the publisher
    pub sid: String,
    /// The SEQ header
    pub event_key: u32,
    /// Variable name and value pairs from the property set
    pub properties: Vec<(String, String)>,
}

#[derive(Default)]
struct PendingSubscribes {
    count: AtomicUsize,
    done: Notify,
}

/// Marks a SUBSCRIBE as in flight until dropped.
pub struct PendingSubscribe {
    pending: Arc<PendingSubscribes>,
}

impl Drop for PendingSubscribe {
    fn drop(&mut self) {
        self.pending.count.fetch_sub(1, Ordering::AcqRel);
        self.pending.done.notify_waiters();
    }
}

/// Routes events from HTTP callbacks to a channel.
#[derive(Clone)]
pub struct EventRouter {
    subscriptions: Arc<RwLock<HashSet<String>>>,
    pending: Arc<PendingSubscribes>,
    event_sender: mpsc::UnboundedSender<NotificationPayload>,
}

impl EventRouter {
    /// Create a new event router.
    ///
    /// ```
    /// use tokio::sync::mpsc;
    /// use callback_server::router::{EventRouter, NotificationPayload};
    ///
    /// let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
    /// let router = EventRouter::new(tx);
    /// ```
    pub fn new(event_sender: mpsc::UnboundedSender<NotificationPayload>) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            pending: Arc::new(PendingSubscribes::default()),
            event_sender,
        }
    }

    /// Accept events for `sid`.
    pub async fn register(&self, sid: String) {
        trace!(%sid, "route registered");
        self.subscriptions.write().await.insert(sid);
    }

    /// Stop accepting events for `sid`.
    pub async fn unregister(&self, sid: &str) {
        self.subscriptions.write().await.remove(sid);
    }

    pub async fn is_registered(&self, sid: &str) -> bool {
        self.subscriptions.read().await.contains(sid)
    }

    /// Declare a SUBSCRIBE in flight. Drop the guard after registering the
    /// resulting SID, or after the request failed.
    pub fn begin_subscribe(&self) -> PendingSubscribe {
        self.pending.count.fetch_add(1, Ordering::AcqRel);
        PendingSubscribe {
            pending: self.pending.clone(),
        }
    }

    pub fn pending_subscribes(&self) -> usize {
        self.pending.count.load(Ordering::Acquire)
    }

    /// Wait up to `limit` for in-flight subscribes to finish, then report
    /// whether `sid` is registered.
    pub async fn wait_for_subscribe(&self, sid: &str, limit: Duration) -> bool {
        let wait = async {
            loop {
                let done = self.pending.done.notified();
                tokio::pin!(done);
                done.as_mut().enable();
                if self.is_registered(sid).await || self.pending_subscribes() == 0 {
                    return;
                }
                done.await;
            }
        };
        if tokio::time::timeout(limit, wait).await.is_err() {
            debug!(%sid, "gave up waiting for in-flight subscribe");
        }
        self.is_registered(sid).await
    }

    /// Forward an event if `sid` is registered. Returns `false` otherwise.
    pub async fn route_event(&self, sid: String, event_key: u32, properties: Vec<(String, String)>) -> bool {
        let subs = self.subscriptions.read().await;
        if !subs.contains(&sid) {
            return false;
        }
        let payload = NotificationPayload {
            sid,
            event_key,
            properties,
        };
        if self.event_sender.send(payload).is_err() {
            debug!("notification receiver dropped");
        }
        true
    }
}
