//! The SSDP protocol engine.
//!
//! [`SsdpEngine`] serves at most one control point and one device:
//!
//! - **Advertise/reply**: multicasts `ssdp:alive` / `ssdp:byebye` for the
//!   registered device tree, re-advertising before max-age runs out, and
//!   unicasts search responses
//! - **Search responder**: answers M-SEARCH requests after a random delay
//!   within the requester's MX window
//! - **Search requester**: sends M-SEARCH, delivers matching responses and
//!   signals the end of the MX window exactly once
//!
//! Every datagram is sent `num_copies` times with `copy_pause` between
//! copies. Incoming datagrams that fail to parse or validate are dropped
//! and logged; they never stop a receive loop.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use upnp_core::{Cookie, EventSink, HttpHeader, JobId, TimerThread, UpnpEvent};

use crate::config::{SsdpConfig, MAX_REPLY_MX};
use crate::device::{announcements, replies, AdFlag, Announcement, DeviceDescription};
use crate::error::{DiscoveryError, Result};
use crate::message::{
    build_alive, build_byebye, build_response, build_search, http_date, SsdpMessage,
    MAN_DISCOVER, NTS_ALIVE, NTS_BYEBYE, SSDP_IPV4_GROUP, SSDP_IPV6_LINK_LOCAL, SSDP_PORT,
};
use crate::parser::{classify_request, parse_message, request_type, SsdpEvent, SsdpSearchType};
use crate::transport::{SsdpSockets, SsdpTransport};

/// Receive buffer for one datagram.
const RECV_BUFFER_SIZE: usize = 2500;

/// Max-age used when replying before the first `advertise` call.
const DEFAULT_MAX_AGE: u32 = 1800;

/// Identifier of an outstanding search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SearchId(u64);

struct ActiveSearch {
    target: String,
    search_type: SsdpSearchType,
    cookie: Cookie,
    timeout_job: Option<JobId>,
    /// (USN, ST) pairs already delivered, to swallow duplicate copies
    seen: HashSet<(String, String)>,
}

impl ActiveSearch {
    fn matches(&self, event: &SsdpEvent) -> bool {
        match self.search_type {
            SsdpSearchType::All => true,
            SsdpSearchType::RootDevice => event.request_type == SsdpSearchType::RootDevice,
            SsdpSearchType::DeviceUdn => {
                !event.target.is_empty() && self.target.starts_with(&event.target)
            }
            SsdpSearchType::DeviceType | SsdpSearchType::Service => {
                let n = self.target.len().min(event.target.len());
                n > 0 && self.target.as_bytes()[..n] == event.target.as_bytes()[..n]
            }
            SsdpSearchType::Unrecognized => false,
        }
    }
}

struct ClientState {
    sink: Arc<dyn EventSink>,
    searches: HashMap<SearchId, ActiveSearch>,
}

struct DeviceState {
    description: Arc<DeviceDescription>,
    max_age: u32,
    advertising: bool,
    readvertise_job: Option<JobId>,
}

struct EngineInner {
    config: SsdpConfig,
    transport: Arc<dyn SsdpTransport>,
    timer: TimerThread,
    client: Mutex<Option<ClientState>>,
    device: Mutex<Option<DeviceState>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    next_search: AtomicU64,
    pending_replies: AtomicUsize,
}

/// SSDP engine shared between the receive loops, timers and the application.
#[derive(Clone)]
pub struct SsdpEngine {
    inner: Arc<EngineInner>,
}

impl SsdpEngine {
    pub fn new(config: SsdpConfig, transport: Arc<dyn SsdpTransport>, timer: TimerThread) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                transport,
                timer,
                client: Mutex::new(None),
                device: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_search: AtomicU64::new(1),
                pending_replies: AtomicUsize::new(0),
            }),
        }
    }

    /// Bind the SSDP sockets and start a receive loop on each.
    pub fn bind(config: SsdpConfig, timer: TimerThread) -> Result<Self> {
        let sockets = SsdpSockets::bind(&config)?;
        let engine = Self::new(config, sockets.transport.clone(), timer);
        for socket in sockets.listeners {
            engine.spawn_listener(socket);
        }
        info!("SSDP engine listening");
        Ok(engine)
    }

    pub fn config(&self) -> &SsdpConfig {
        &self.inner.config
    }

    /// Receive datagrams from `socket` until the engine is shut down.
    pub fn spawn_listener(&self, socket: Arc<UdpSocket>) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(receive_loop(weak, socket));
        self.inner.listeners.lock().push(handle);
    }

    pub fn register_client(&self, sink: Arc<dyn EventSink>) {
        *self.inner.client.lock() = Some(ClientState {
            sink,
            searches: HashMap::new(),
        });
    }

    /// Forget the control point and cancel its outstanding searches.
    pub fn unregister_client(&self) {
        if let Some(state) = self.inner.client.lock().take() {
            for search in state.searches.into_values() {
                if let Some(job) = search.timeout_job {
                    self.inner.timer.cancel(job);
                }
            }
        }
    }

    pub fn register_device(&self, description: DeviceDescription) {
        let previous = self.inner.device.lock().replace(DeviceState {
            description: Arc::new(description),
            max_age: DEFAULT_MAX_AGE,
            advertising: false,
            readvertise_job: None,
        });
        if let Some(job) = previous.and_then(|state| state.readvertise_job) {
            self.inner.timer.cancel(job);
        }
    }

    /// Withdraw the device: byebye if it was advertising, then forget it.
    pub async fn unregister_device(&self) -> Result<()> {
        let was_advertising = self
            .inner
            .device
            .lock()
            .as_ref()
            .is_some_and(|state| state.advertising);
        let result = if was_advertising {
            self.byebye().await
        } else {
            Ok(())
        };
        if let Some(job) = self
            .inner
            .device
            .lock()
            .take()
            .and_then(|state| state.readvertise_job)
        {
            self.inner.timer.cancel(job);
        }
        result
    }

    /// Announce the device with `max_age` and keep re-announcing it.
    pub async fn advertise(&self, max_age: u32) -> Result<()> {
        {
            let mut device = self.inner.device.lock();
            let state = device
                .as_mut()
                .ok_or(DiscoveryError::NotRegistered("device"))?;
            state.max_age = max_age;
            state.advertising = true;
        }
        self.inner.send_announcements(AdFlag::Advertise).await?;
        self.inner.schedule_readvertise();
        Ok(())
    }

    /// Stop re-advertising and multicast `ssdp:byebye`.
    pub async fn byebye(&self) -> Result<()> {
        {
            let mut device = self.inner.device.lock();
            let state = device
                .as_mut()
                .ok_or(DiscoveryError::NotRegistered("device"))?;
            state.advertising = false;
            if let Some(job) = state.readvertise_job.take() {
                self.inner.timer.cancel(job);
            }
        }
        self.inner.send_announcements(AdFlag::Shutdown).await
    }

    /// Run one advertise, shutdown or reply pass for the registered device.
    ///
    /// Replies need the parsed search, whose `dest_addr` is the requester.
    pub async fn advertise_and_reply(&self, flag: AdFlag, search: Option<&SsdpEvent>) -> Result<()> {
        match flag {
            AdFlag::Advertise | AdFlag::Shutdown => self.inner.send_announcements(flag).await,
            AdFlag::Reply => {
                let search = search.ok_or_else(|| {
                    DiscoveryError::InvalidParam("reply requires a search".to_string())
                })?;
                let dest = search.dest_addr.ok_or_else(|| {
                    DiscoveryError::InvalidParam("search has no source address".to_string())
                })?;
                let (description, max_age) = self.inner.device_snapshot()?;
                let selected = replies(&description, search);
                self.inner
                    .send_replies(&description, max_age, &selected, dest)
                    .await
            }
        }
    }

    /// Multicast an M-SEARCH for `target`.
    ///
    /// `mx` is clamped into the configured window. Matching responses are
    /// delivered as [`UpnpEvent::SearchResult`] until the window closes,
    /// which is reported once as [`UpnpEvent::SearchTimeout`].
    pub async fn search_by_target(&self, mx: u32, target: &str, cookie: Cookie) -> Result<SearchId> {
        let search_type = classify_request(target);
        if search_type == SsdpSearchType::Unrecognized {
            return Err(DiscoveryError::InvalidParam(format!(
                "unrecognized search target: {}",
                target
            )));
        }
        let mx = self.inner.config.clamp_mx(mx);
        let id = SearchId(self.inner.next_search.fetch_add(1, Ordering::Relaxed));

        {
            let mut client = self.inner.client.lock();
            let state = client
                .as_mut()
                .ok_or(DiscoveryError::NotRegistered("control point"))?;
            let weak = Arc::downgrade(&self.inner);
            let job = self
                .inner
                .timer
                .schedule(Duration::from_secs(u64::from(mx)), async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.expire_search(id);
                    }
                })?;
            state.searches.insert(
                id,
                ActiveSearch {
                    target: target.to_string(),
                    search_type,
                    cookie,
                    timeout_job: Some(job),
                    seen: HashSet::new(),
                },
            );
        }

        for dest in self.inner.multicast_destinations() {
            let payload = build_search(&dest, mx, target, &self.inner.config.server_product);
            if let Err(e) = self.inner.send_copies(payload.as_bytes(), dest).await {
                self.inner.cancel_search(id);
                return Err(e);
            }
        }
        debug!(?id, target, mx, "search sent");
        Ok(id)
    }

    /// Search replies waiting for their random delay.
    pub fn pending_replies(&self) -> usize {
        self.inner.pending_replies.load(Ordering::Acquire)
    }

    pub fn active_searches(&self) -> usize {
        self.inner
            .client
            .lock()
            .as_ref()
            .map_or(0, |state| state.searches.len())
    }

    /// Feed one received datagram to the engine.
    pub fn handle_datagram(&self, buf: &[u8], from: SocketAddr) {
        self.inner.handle_datagram(buf, from);
    }

    /// Byebye if advertising, cancel searches and timers, stop receive loops.
    pub async fn shutdown(&self) {
        if let Err(e) = self.unregister_device().await {
            warn!(error = %e, "byebye during shutdown failed");
        }
        self.unregister_client();
        for handle in self.inner.listeners.lock().drain(..) {
            handle.abort();
        }
        debug!("SSDP engine shut down");
    }
}

async fn receive_loop(engine: Weak<EngineInner>, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                let Some(inner) = engine.upgrade() else {
                    break;
                };
                inner.handle_datagram(&buf[..len], from);
            }
            Err(e) => {
                warn!(error = %e, "SSDP receive failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

impl EngineInner {
    fn multicast_destinations(&self) -> Vec<SocketAddr> {
        let mut out = vec![SocketAddr::new(IpAddr::V4(SSDP_IPV4_GROUP), SSDP_PORT)];
        if self.config.enable_ipv6 {
            out.push(SocketAddr::new(IpAddr::V6(SSDP_IPV6_LINK_LOCAL), SSDP_PORT));
        }
        out
    }

    async fn send_copies(&self, payload: &[u8], dest: SocketAddr) -> Result<()> {
        for copy in 0..self.config.num_copies {
            if copy > 0 {
                tokio::time::sleep(self.config.copy_pause).await;
            }
            self.transport.send_to(payload, dest).await?;
        }
        trace!(%dest, copies = self.config.num_copies, "SSDP datagram sent");
        Ok(())
    }

    fn device_snapshot(&self) -> Result<(Arc<DeviceDescription>, u32)> {
        self.device
            .lock()
            .as_ref()
            .map(|state| (state.description.clone(), state.max_age))
            .ok_or(DiscoveryError::NotRegistered("device"))
    }

    async fn send_announcements(&self, flag: AdFlag) -> Result<()> {
        let (description, max_age) = self.device_snapshot()?;
        let all = announcements(&description);
        for dest in self.multicast_destinations() {
            for announcement in &all {
                let payload = match flag {
                    AdFlag::Shutdown => {
                        build_byebye(&dest, &announcement.target, &announcement.usn)
                    }
                    AdFlag::Advertise | AdFlag::Reply => build_alive(
                        &dest,
                        max_age,
                        &description.location,
                        &announcement.target,
                        &announcement.usn,
                        &self.config.server_product,
                    ),
                };
                self.send_copies(payload.as_bytes(), dest).await?;
            }
        }
        debug!(?flag, count = all.len(), "advertisement pass sent");
        Ok(())
    }

    async fn send_replies(
        &self,
        description: &DeviceDescription,
        max_age: u32,
        selected: &[Announcement],
        dest: SocketAddr,
    ) -> Result<()> {
        let date = http_date(chrono::Utc::now());
        for reply in selected {
            let payload = build_response(
                max_age,
                &date,
                &description.location,
                &self.config.server_product,
                &reply.target,
                &reply.usn,
            );
            self.send_copies(payload.as_bytes(), dest).await?;
        }
        Ok(())
    }

    fn schedule_readvertise(self: &Arc<Self>) {
        let mut device = self.device.lock();
        let Some(state) = device.as_mut() else {
            return;
        };
        if !state.advertising {
            return;
        }
        let delay = self.config.readvertise_delay(state.max_age);
        let weak = Arc::downgrade(self);
        let scheduled = self.timer.schedule(delay, async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let still_advertising = inner
                .device
                .lock()
                .as_ref()
                .is_some_and(|state| state.advertising);
            if !still_advertising {
                return;
            }
            if let Err(e) = inner.send_announcements(AdFlag::Advertise).await {
                warn!(error = %e, "periodic advertisement failed");
            }
            inner.schedule_readvertise();
        });
        match scheduled {
            Ok(job) => {
                if let Some(old) = state.readvertise_job.replace(job) {
                    self.timer.cancel(old);
                }
                trace!(?delay, "next advertisement scheduled");
            }
            Err(e) => warn!(error = %e, "could not schedule re-advertisement"),
        }
    }

    fn expire_search(&self, id: SearchId) {
        let expired = {
            let mut client = self.client.lock();
            client.as_mut().and_then(|state| {
                state
                    .searches
                    .remove(&id)
                    .map(|search| (state.sink.clone(), search.cookie))
            })
        };
        if let Some((sink, cookie)) = expired {
            debug!(?id, "search window closed");
            sink.on_event(UpnpEvent::SearchTimeout { cookie });
        }
    }

    fn cancel_search(&self, id: SearchId) {
        let removed = self
            .client
            .lock()
            .as_mut()
            .and_then(|state| state.searches.remove(&id));
        if let Some(job) = removed.and_then(|search| search.timeout_job) {
            self.timer.cancel(job);
        }
    }

    fn handle_datagram(self: &Arc<Self>, buf: &[u8], from: SocketAddr) {
        let msg = match SsdpMessage::parse(buf) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(peer = %from, error = %e, "dropping unparseable SSDP datagram");
                return;
            }
        };
        if !msg.is_valid() {
            debug!(peer = %from, start = ?msg.start, "dropping invalid SSDP message");
            return;
        }
        if msg.is_search() {
            self.handle_search_request(&msg, from);
        } else {
            self.handle_ctrlpt_message(&msg, from);
        }
    }

    /// NOTIFY and M-SEARCH responses, for the control point.
    fn handle_ctrlpt_message(&self, msg: &SsdpMessage, from: SocketAddr) {
        let Some(sink) = self.client.lock().as_ref().map(|state| state.sink.clone()) else {
            return;
        };
        let event = parse_message(msg, Some(from));
        if !event.is_deliverable() {
            debug!(peer = %from, "dropping SSDP message with unrecognized target");
            return;
        }

        if msg.is_notify() {
            let nts = msg.header(HttpHeader::Nts).unwrap_or_default();
            if nts.eq_ignore_ascii_case(NTS_ALIVE) {
                if event.location.is_empty() {
                    debug!(peer = %from, usn = %event.usn, "alive without LOCATION dropped");
                    return;
                }
                sink.on_event(UpnpEvent::Alive(event.to_discovery()));
            } else if nts.eq_ignore_ascii_case(NTS_BYEBYE) {
                sink.on_event(UpnpEvent::ByeBye(event.to_discovery()));
            } else {
                trace!(peer = %from, nts, "ignoring NOTIFY subtype");
            }
            return;
        }

        let mut cookies = Vec::new();
        {
            let mut client = self.client.lock();
            let Some(state) = client.as_mut() else {
                return;
            };
            for search in state.searches.values_mut() {
                if search.matches(&event)
                    && search.seen.insert((event.usn.clone(), event.target.clone()))
                {
                    cookies.push(search.cookie);
                }
            }
        }
        for cookie in cookies {
            sink.on_event(UpnpEvent::SearchResult {
                discovery: event.to_discovery(),
                cookie,
            });
        }
    }

    /// M-SEARCH, for the device.
    fn handle_search_request(self: &Arc<Self>, msg: &SsdpMessage, from: SocketAddr) {
        let Ok((description, max_age)) = self.device_snapshot() else {
            return;
        };
        let man_ok = msg
            .header(HttpHeader::Man)
            .is_some_and(|man| man.eq_ignore_ascii_case(MAN_DISCOVER));
        if !man_ok {
            debug!(peer = %from, "M-SEARCH without ssdp:discover dropped");
            return;
        }
        let Some(mx) = msg.mx() else {
            debug!(peer = %from, "M-SEARCH without valid MX dropped");
            return;
        };
        let Some(st) = msg.header(HttpHeader::St) else {
            debug!(peer = %from, "M-SEARCH without ST dropped");
            return;
        };
        let mut search = SsdpEvent::default();
        if request_type(st, &mut search).is_err() {
            debug!(peer = %from, st, "M-SEARCH with unrecognized ST dropped");
            return;
        }
        search.mx = mx;
        search.dest_addr = Some(from);

        let selected = replies(&description, &search);
        if selected.is_empty() {
            return;
        }

        let limit = self.config.max_pending_replies;
        let reserved = self
            .pending_replies
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1));
        if reserved.is_err() {
            debug!(peer = %from, st, limit, "too many pending search replies, M-SEARCH dropped");
            return;
        }

        let window_ms = u64::from(mx.min(MAX_REPLY_MX)) * 1000;
        let delay = Duration::from_millis(rand::rng().random_range(0..=window_ms));
        let weak = Arc::downgrade(self);
        let scheduled = self.timer.schedule(delay, async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.pending_replies.fetch_sub(1, Ordering::AcqRel);
            if let Err(e) = inner
                .send_replies(&description, max_age, &selected, from)
                .await
            {
                warn!(peer = %from, error = %e, "search reply failed");
            }
        });
        match scheduled {
            Ok(_) => trace!(peer = %from, st, ?delay, "search reply scheduled"),
            Err(e) => {
                self.pending_replies.fetch_sub(1, Ordering::AcqRel);
                warn!(peer = %from, error = %e, "could not schedule search reply");
            }
        }
    }
}
