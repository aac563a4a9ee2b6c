//! UpnpSdk - main entry point for the SDK
//!
//! Owns the async runtime and everything that runs on it, and exposes a
//! blocking, handle-based API over it.

use std::sync::Arc;
use std::time::Duration;

use callback_server::CallbackServer;
use gena::{
    GenaClient, GenaClientConfig, GenaError, GenaRequest, GenaResponse, HttpNotifyTransport,
    Publisher, PublisherConfig, SoapSubscriptionTransport,
};
use parking_lot::Mutex;
use soap_client::{SoapClient, SubscriptionTimeout};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use upnp_core::{Cookie, EventSink, Sid, TimerThread, UpnpConfig};
use upnp_discovery::{DeviceDescription, SsdpConfig, SsdpEngine, SsdpTransport};
use xmltree::Element;

use crate::device::EventServer;
use crate::error::{Result, SdkError};
use crate::handle::{ClientHandle, DeviceHandle};

/// Path of the control point's NOTIFY callback on its callback server.
const CALLBACK_PATH: &str = "notify";

/// How long `shutdown` waits for runtime tasks to stop.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

struct ClientEntry {
    handle: ClientHandle,
    gena: GenaClient,
    callback: CallbackServer,
    pump: JoinHandle<()>,
}

struct DeviceEntry {
    handle: DeviceHandle,
    description: DeviceDescription,
    publisher: Publisher,
    server: EventServer,
}

#[derive(Default)]
struct Registry {
    ssdp: Option<SsdpEngine>,
    client: Option<ClientEntry>,
    device: Option<DeviceEntry>,
    last_handle: i32,
}

impl Registry {
    fn next_handle(&mut self) -> i32 {
        self.last_handle += 1;
        self.last_handle
    }

    fn client(&self, handle: ClientHandle) -> Result<&ClientEntry> {
        self.client
            .as_ref()
            .filter(|entry| entry.handle == handle)
            .ok_or(SdkError::InvalidHandle(handle.value()))
    }

    fn device(&self, handle: DeviceHandle) -> Result<&DeviceEntry> {
        self.device
            .as_ref()
            .filter(|entry| entry.handle == handle)
            .ok_or(SdkError::InvalidHandle(handle.value()))
    }
}

/// Main system entry point
///
/// `UpnpSdk` is fully synchronous: every call blocks the calling thread
/// until the work on the SDK's own runtime is done. Do not call it from
/// inside an async context.
///
/// One control point and one root device can be registered at a time.
/// Events reach the [`EventSink`] given at registration, on runtime
/// worker threads.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use upnp_sdk::{Cookie, UpnpConfig, UpnpEvent, UpnpSdk};
///
/// fn main() -> Result<(), upnp_sdk::SdkError> {
///     let sdk = UpnpSdk::new(UpnpConfig::default())?;
///
///     let handle = sdk.register_client(Arc::new(|event: UpnpEvent| {
///         if let UpnpEvent::SearchResult { discovery, .. } = event {
///             println!("found {} at {}", discovery.device_type, discovery.location);
///         }
///     }))?;
///     sdk.search(handle, 3, "ssdp:all", Cookie(1))?;
///
///     std::thread::sleep(std::time::Duration::from_secs(4));
///     sdk.shutdown();
///     Ok(())
/// }
/// ```
pub struct UpnpSdk {
    config: UpnpConfig,
    runtime: Runtime,
    timer: TimerThread,
    soap: SoapClient,
    ssdp_transport: Option<Arc<dyn SsdpTransport>>,
    registry: Mutex<Registry>,
}

impl UpnpSdk {
    /// Validate `config` and start the runtime.
    ///
    /// Sockets are bound lazily: the SSDP sockets with the first handle,
    /// the HTTP servers with the handle that needs them.
    pub fn new(config: UpnpConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Like [`UpnpSdk::new`], sending SSDP datagrams through `transport`
    /// instead of multicast sockets. Nothing is received over SSDP.
    pub fn with_ssdp_transport(config: UpnpConfig, transport: Arc<dyn SsdpTransport>) -> Result<Self> {
        Self::build(config, Some(transport))
    }

    fn build(config: UpnpConfig, ssdp_transport: Option<Arc<dyn SsdpTransport>>) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads())
            .thread_name("upnp-worker")
            .enable_all()
            .build()
            .map_err(|e| SdkError::Runtime(e.to_string()))?;
        let timer = TimerThread::with_handle(runtime.handle().clone(), config.max_jobs_total);
        let soap = SoapClient::with_config(&config);

        info!(
            workers = config.worker_threads(),
            max_jobs = config.max_jobs_total,
            "UPnP SDK started"
        );
        Ok(Self {
            config,
            runtime,
            timer,
            soap,
            ssdp_transport,
            registry: Mutex::new(Registry::default()),
        })
    }

    pub fn config(&self) -> &UpnpConfig {
        &self.config
    }

    /// Register the control point.
    ///
    /// Starts the callback server for GENA NOTIFY requests and starts
    /// listening for SSDP advertisements.
    pub fn register_client(&self, sink: Arc<dyn EventSink>) -> Result<ClientHandle> {
        if self.registry.lock().client.is_some() {
            return Err(SdkError::OutOfHandle("client"));
        }

        let ssdp = self.ssdp()?;
        let (tx, notifications) = mpsc::unbounded_channel();
        let callback = self
            .runtime
            .block_on(CallbackServer::with_subscribe_wait(
                self.config.callback_port_range,
                tx,
                self.config.http_default_timeout,
            ))?;
        let gena = GenaClient::new(
            GenaClientConfig::from(&self.config),
            self.timer.clone(),
            Arc::new(SoapSubscriptionTransport::new(self.soap.clone())),
            callback.router().as_ref().clone(),
            callback.callback_url(CALLBACK_PATH),
            sink.clone(),
        );
        let pump = gena.spawn_notification_pump(notifications);

        let mut registry = self.registry.lock();
        if registry.client.is_some() {
            drop(registry);
            pump.abort();
            self.runtime.block_on(callback.shutdown());
            return Err(SdkError::OutOfHandle("client"));
        }
        ssdp.register_client(sink);
        let handle = ClientHandle::from(registry.next_handle());
        info!(%handle, callback = %callback.base_url(), "control point registered");
        registry.client = Some(ClientEntry {
            handle,
            gena,
            callback,
            pump,
        });
        Ok(handle)
    }

    /// Unsubscribe everything, stop the callback server and forget the control point.
    pub fn unregister_client(&self, handle: ClientHandle) -> Result<()> {
        let entry = {
            let mut registry = self.registry.lock();
            registry.client(handle)?;
            let entry = registry.client.take();
            if let Some(ssdp) = &registry.ssdp {
                ssdp.unregister_client();
            }
            entry
        };
        if let Some(entry) = entry {
            self.stop_client(entry);
        }
        Ok(())
    }

    fn stop_client(&self, entry: ClientEntry) {
        let ClientEntry {
            handle,
            gena,
            callback,
            pump,
        } = entry;
        self.runtime.block_on(async move {
            gena.shutdown().await;
            pump.abort();
            callback.shutdown().await;
        });
        info!(%handle, "control point unregistered");
    }

    /// Register a root device and the services in its tree.
    ///
    /// Each service starts with no evented state; [`UpnpSdk::notify`]
    /// sets it. Nothing is advertised until [`UpnpSdk::advertise`].
    pub fn register_root_device(
        &self,
        description: DeviceDescription,
        sink: Arc<dyn EventSink>,
    ) -> Result<DeviceHandle> {
        if self.registry.lock().device.is_some() {
            return Err(SdkError::OutOfHandle("device"));
        }

        let ssdp = self.ssdp()?;
        let publisher_config = PublisherConfig::from(&self.config);
        let transport = HttpNotifyTransport::new(&publisher_config)?;
        let publisher = Publisher::new(
            publisher_config,
            self.timer.clone(),
            Arc::new(transport),
            sink,
        );
        for device in description.devices() {
            for service in &device.services {
                publisher.register_service(&service.service_id, Vec::new())?;
            }
        }
        let server = self
            .runtime
            .block_on(EventServer::bind(publisher.clone(), self.config.callback_port_range))?;

        let mut registry = self.registry.lock();
        if registry.device.is_some() {
            drop(registry);
            publisher.shutdown();
            self.runtime.block_on(server.shutdown());
            return Err(SdkError::OutOfHandle("device"));
        }
        ssdp.register_device(description.clone());
        let handle = DeviceHandle::from(registry.next_handle());
        info!(%handle, udn = %description.root.udn, "root device registered");
        registry.device = Some(DeviceEntry {
            handle,
            description,
            publisher,
            server,
        });
        Ok(handle)
    }

    /// Send byebye if advertising, drop all subscribers and stop the event server.
    pub fn unregister_device(&self, handle: DeviceHandle) -> Result<()> {
        let (entry, ssdp) = {
            let mut registry = self.registry.lock();
            registry.device(handle)?;
            (registry.device.take(), registry.ssdp.clone())
        };
        if let Some(ssdp) = ssdp {
            if let Err(e) = self.runtime.block_on(ssdp.unregister_device()) {
                warn!(error = %e, "byebye failed");
            }
        }
        if let Some(entry) = entry {
            self.stop_device(entry);
        }
        Ok(())
    }

    fn stop_device(&self, entry: DeviceEntry) {
        let DeviceEntry {
            handle,
            publisher,
            server,
            ..
        } = entry;
        publisher.shutdown();
        self.runtime.block_on(server.shutdown());
        info!(%handle, "root device unregistered");
    }

    /// Multicast an M-SEARCH for `target`.
    ///
    /// Results arrive as [`UpnpEvent::SearchResult`](upnp_core::UpnpEvent)
    /// tagged with `cookie`, followed by one `SearchTimeout` when the MX
    /// window closes.
    pub fn search(&self, handle: ClientHandle, mx: u32, target: &str, cookie: Cookie) -> Result<()> {
        let ssdp = {
            let registry = self.registry.lock();
            registry.client(handle)?;
            registry.ssdp.clone()
        };
        let ssdp = ssdp.ok_or(SdkError::InvalidHandle(handle.value()))?;
        let id = self.runtime.block_on(ssdp.search_by_target(mx, target, cookie))?;
        debug!(?id, target, "search started");
        Ok(())
    }

    /// Subscribe to the service behind `event_url`.
    ///
    /// Returns the SID events are reported under and the granted timeout.
    /// The subscription is renewed automatically until unsubscribed.
    pub fn subscribe(
        &self,
        handle: ClientHandle,
        event_url: &str,
        timeout: SubscriptionTimeout,
    ) -> Result<(Sid, SubscriptionTimeout)> {
        let gena = self.gena(handle)?;
        Ok(self.runtime.block_on(gena.subscribe(event_url, timeout))?)
    }

    /// Renew a subscription now, replacing its scheduled renewal.
    pub fn renew(
        &self,
        handle: ClientHandle,
        sid: &Sid,
        timeout: SubscriptionTimeout,
    ) -> Result<SubscriptionTimeout> {
        let gena = self.gena(handle)?;
        Ok(self.runtime.block_on(gena.renew(sid, timeout))?)
    }

    pub fn unsubscribe(&self, handle: ClientHandle, sid: &Sid) -> Result<()> {
        let gena = self.gena(handle)?;
        Ok(self.runtime.block_on(gena.unsubscribe(sid))?)
    }

    /// SIDs of the control point's active subscriptions.
    pub fn subscriptions(&self, handle: ClientHandle) -> Result<Vec<Sid>> {
        Ok(self.gena(handle)?.subscriptions())
    }

    /// Invoke `action` on the control URL `url`.
    pub fn send_action(
        &self,
        handle: ClientHandle,
        url: &str,
        service_type: &str,
        action: &Element,
    ) -> Result<Element> {
        self.send_action_ex(handle, url, service_type, None, action)
    }

    /// Invoke `action` with an optional SOAP header element.
    pub fn send_action_ex(
        &self,
        handle: ClientHandle,
        url: &str,
        service_type: &str,
        header: Option<&Element>,
        action: &Element,
    ) -> Result<Element> {
        self.registry.lock().client(handle)?;
        Ok(self.soap.send_action_ex(url, service_type, header, action)?)
    }

    /// Announce the device with max-age `duration` seconds and keep it announced.
    pub fn advertise(&self, handle: DeviceHandle, duration: u32) -> Result<()> {
        let ssdp = {
            let registry = self.registry.lock();
            registry.device(handle)?;
            registry.ssdp.clone()
        };
        let ssdp = ssdp.ok_or(SdkError::InvalidHandle(handle.value()))?;
        self.runtime.block_on(ssdp.advertise(duration))?;
        Ok(())
    }

    /// Update evented variables of a service and notify its subscribers.
    ///
    /// Returns how many subscribers the event was queued for.
    pub fn notify(&self, handle: DeviceHandle, service_id: &str, changes: &[(&str, &str)]) -> Result<usize> {
        let publisher = self.publisher(handle)?;
        let _guard = self.runtime.enter();
        Ok(publisher.notify(service_id, changes)?)
    }

    /// Event subscription URL of one of the device's services.
    pub fn event_url(&self, handle: DeviceHandle, service_id: &str) -> Result<String> {
        let registry = self.registry.lock();
        let entry = registry.device(handle)?;
        if entry.description.find_service(service_id).is_none() {
            return Err(GenaError::InvalidService(service_id.to_string()).into());
        }
        Ok(entry.server.event_url(service_id))
    }

    /// Answer a SUBSCRIBE or UNSUBSCRIBE request received by the application's own HTTP server.
    pub fn handle_gena_request(&self, handle: DeviceHandle, request: &GenaRequest) -> Result<GenaResponse> {
        let publisher = self.publisher(handle)?;
        let _guard = self.runtime.enter();
        Ok(publisher.handle_request(request))
    }

    /// Unregister every handle, stop SSDP and the timers, then the runtime.
    pub fn shutdown(self) {
        let (client, device, ssdp) = {
            let mut registry = self.registry.lock();
            (
                registry.client.take(),
                registry.device.take(),
                registry.ssdp.take(),
            )
        };
        if let Some(ssdp) = ssdp {
            self.runtime.block_on(ssdp.shutdown());
        }
        if let Some(entry) = client {
            self.stop_client(entry);
        }
        if let Some(entry) = device {
            self.stop_device(entry);
        }
        self.timer.shutdown();
        self.runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
        info!("UPnP SDK stopped");
    }

    fn gena(&self, handle: ClientHandle) -> Result<GenaClient> {
        Ok(self.registry.lock().client(handle)?.gena.clone())
    }

    fn publisher(&self, handle: DeviceHandle) -> Result<Publisher> {
        Ok(self.registry.lock().device(handle)?.publisher.clone())
    }

    /// The shared SSDP engine, created on first use.
    fn ssdp(&self) -> Result<SsdpEngine> {
        if let Some(engine) = &self.registry.lock().ssdp {
            return Ok(engine.clone());
        }

        let config = SsdpConfig::from(&self.config);
        let engine = {
            let _guard = self.runtime.enter();
            match &self.ssdp_transport {
                Some(transport) => SsdpEngine::new(config, transport.clone(), self.timer.clone()),
                None => SsdpEngine::bind(config, self.timer.clone())?,
            }
        };

        let mut registry = self.registry.lock();
        Ok(registry.ssdp.get_or_insert(engine).clone())
    }
}
