//! HTTP endpoint answering SUBSCRIBE and UNSUBSCRIBE for a registered device.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use callback_server::{detect_local_ip, CallbackServerError};
use gena::{event_path, event_route, Publisher};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Serves [`event_route`] on the first free port of a range.
pub(crate) struct EventServer {
    port: u16,
    base_url: String,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<JoinHandle<()>>,
}

impl EventServer {
    pub(crate) async fn bind(publisher: Publisher, port_range: (u16, u16)) -> Result<Self> {
        let local_ip = detect_local_ip().unwrap_or_else(|| {
            warn!("could not detect local IP address, advertising loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });

        let (start, end) = port_range;
        for port in start..=end {
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            let bound = warp::serve(event_route(publisher.clone())).try_bind_with_graceful_shutdown(
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
                async move {
                    let _ = shutdown_rx.await;
                },
            );
            let (addr, server) = match bound {
                Ok(bound) => bound,
                Err(e) => {
                    debug!(port, error = %e, "event port unavailable");
                    continue;
                }
            };

            let base_url = format!("http://{}:{}", local_ip, addr.port());
            info!(%addr, %base_url, "device event server listening");
            return Ok(Self {
                port: addr.port(),
                base_url,
                shutdown_tx: Some(shutdown_tx),
                server_handle: Some(tokio::spawn(server)),
            });
        }

        Err(CallbackServerError::NoPortAvailable { start, end }.into())
    }

    /// Absolute event subscription URL of a service.
    pub(crate) fn event_url(&self, service_id: &str) -> String {
        format!("{}{}", self.base_url, event_path(service_id))
    }

    pub(crate) async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        debug!(port = self.port, "device event server stopped");
    }
}

impl Drop for EventServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
