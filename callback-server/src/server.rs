//! HTTP server for receiving GENA NOTIFY requests.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use warp::http::StatusCode;
use warp::Filter;

use crate::error::{CallbackServerError, Result};
use crate::propertyset::parse_propertyset;
use crate::router::{EventRouter, NotificationPayload};

/// How long a SEQ 0 event for an unknown SID waits for in-flight subscribes.
pub const DEFAULT_SUBSCRIBE_WAIT: Duration = Duration::from_secs(30);

/// HTTP callback server for a control point.
///
/// Binds to the first free port of a range and accepts NOTIFY on any path.
/// Requests are checked the way GENA requires:
///
/// - missing SID: `412 Precondition Failed`
/// - NT other than `upnp:event`, NTS other than `upnp:propchange`, missing
///   or non-numeric SEQ, or a body that is not a property set: `400`
/// - SID not registered with the router: `412`
///
/// Accepted events reach the router's channel and are answered `200`.
///
/// ```no_run
/// use tokio::sync::mpsc;
/// use callback_server::{CallbackServer, NotificationPayload};
///
/// #[tokio::main]
/// async fn main() {
///     let (tx, mut rx) = mpsc::unbounded_channel::<NotificationPayload>();
///     let server = CallbackServer::new((49152, 49252), tx)
///         .await
///         .expect("Failed to create callback server");
///     println!("Server listening at: {}", server.base_url());
///
///     while let Some(notification) = rx.recv().await {
///         println!("SEQ {} for {}", notification.event_key, notification.sid);
///     }
/// }
/// ```
pub struct CallbackServer {
    port: u16,
    base_url: String,
    event_router: Arc<EventRouter>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl CallbackServer {
    /// Start a server on the first free port in `port_range`.
    pub async fn new(
        port_range: (u16, u16),
        event_sender: tokio::sync::mpsc::UnboundedSender<NotificationPayload>,
    ) -> Result<Self> {
        Self::with_subscribe_wait(port_range, event_sender, DEFAULT_SUBSCRIBE_WAIT).await
    }

    /// Like [`CallbackServer::new`], bounding how long an early SEQ 0 event
    /// waits for its subscription to be registered.
    pub async fn with_subscribe_wait(
        port_range: (u16, u16),
        event_sender: tokio::sync::mpsc::UnboundedSender<NotificationPayload>,
        subscribe_wait: Duration,
    ) -> Result<Self> {
        let event_router = Arc::new(EventRouter::new(event_sender));
        let local_ip = detect_local_ip().unwrap_or_else(|| {
            warn!("could not detect local IP address, advertising loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });

        let (start, end) = port_range;
        for port in start..=end {
            let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
            let routes = notify_route(event_router.clone(), subscribe_wait);
            let bound = warp::serve(routes).try_bind_with_graceful_shutdown(
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
                async move {
                    let _ = shutdown_rx.await;
                },
            );
            let (addr, server) = match bound {
                Ok(bound) => bound,
                Err(e) => {
                    debug!(port, error = %e, "callback port unavailable");
                    continue;
                }
            };

            let base_url = format!("http://{}:{}", local_ip, addr.port());
            info!(%addr, %base_url, "callback server listening");
            return Ok(Self {
                port: addr.port(),
                base_url,
                event_router,
                shutdown_tx: Some(shutdown_tx),
                server_handle: Some(tokio::spawn(server)),
            });
        }

        Err(CallbackServerError::NoPortAvailable { start, end })
    }

    /// Base URL publishers should deliver to, `http://<local_ip>:<port>`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Callback URL for one subscription, distinct per SID path suffix.
    pub fn callback_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.event_router
    }

    /// Stop accepting requests and wait for in-flight ones.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
        debug!(port = self.port, "callback server stopped");
    }

}

/// Local address used for outbound traffic. No data is sent.
pub fn detect_local_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let local_addr = socket.local_addr().ok()?;
    Some(local_addr.ip())
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn notify_route(
    router: Arc<EventRouter>,
    subscribe_wait: Duration,
) -> impl Filter<Extract = (impl warp::Reply,), Error = std::convert::Infallible> + Clone {
    warp::method()
        .and(warp::header::optional::<String>("sid"))
        .and(warp::header::optional::<String>("nt"))
        .and(warp::header::optional::<String>("nts"))
        .and(warp::header::optional::<String>("seq"))
        .and(warp::body::bytes())
        .then(
            move |method: warp::http::Method,
                  sid: Option<String>,
                  nt: Option<String>,
                  nts: Option<String>,
                  seq: Option<String>,
                  body: bytes::Bytes| {
                let router = router.clone();
                async move {
                    let status = if method.as_str() == "NOTIFY" {
                        let headers = NotifyHeaders { sid, nt, nts, seq };
                        handle_notify(&router, subscribe_wait, headers, &body).await
                    } else {
                        StatusCode::METHOD_NOT_ALLOWED
                    };
                    warp::reply::with_status(warp::reply(), status)
                }
            },
        )
        .recover(|_rejection: warp::Rejection| async {
            Ok::<_, std::convert::Infallible>(warp::reply::with_status(
                warp::reply(),
                StatusCode::BAD_REQUEST,
            ))
        })
        .unify()
}

struct NotifyHeaders {
    sid: Option<String>,
    nt: Option<String>,
    nts: Option<String>,
    seq: Option<String>,
}

fn header_is(value: &Option<String>, expected: &str) -> bool {
    value
        .as_deref()
        .is_some_and(|v| v.trim().eq_ignore_ascii_case(expected))
}

async fn handle_notify(
    router: &EventRouter,
    subscribe_wait: Duration,
    headers: NotifyHeaders,
    body: &[u8],
) -> StatusCode {
    let Some(sid) = headers.sid.map(|sid| sid.trim().to_string()) else {
        debug!("NOTIFY without SID");
        return StatusCode::PRECONDITION_FAILED;
    };
    if !header_is(&headers.nt, "upnp:event") || !header_is(&headers.nts, "upnp:propchange") {
        debug!(%sid, nt = ?headers.nt, nts = ?headers.nts, "NOTIFY with bad NT/NTS");
        return StatusCode::BAD_REQUEST;
    }
    let Some(event_key) = headers.seq.and_then(|seq| seq.trim().parse::<u32>().ok()) else {
        debug!(%sid, "NOTIFY without valid SEQ");
        return StatusCode::BAD_REQUEST;
    };
    let properties = match std::str::from_utf8(body)
        .map_err(|e| e.to_string())
        .and_then(|xml| parse_propertyset(xml).map_err(|e| e.to_string()))
    {
        Ok(properties) => properties,
        Err(e) => {
            debug!(%sid, event_key, error = %e, "NOTIFY body rejected");
            return StatusCode::BAD_REQUEST;
        }
    };

    if !router.is_registered(&sid).await {
        let late = event_key == 0 && router.wait_for_subscribe(&sid, subscribe_wait).await;
        if !late {
            debug!(%sid, event_key, "NOTIFY for unknown subscription");
            return StatusCode::PRECONDITION_FAILED;
        }
    }

    if router.route_event(sid.clone(), event_key, properties).await {
        StatusCode::OK
    } else {
        debug!(%sid, event_key, "subscription vanished while routing");
        StatusCode::PRECONDITION_FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tokio::sync::mpsc;

    fn headers(sid: Option<&str>, nt: Option<&str>, nts: Option<&str>, seq: Option<&str>) -> NotifyHeaders {
        NotifyHeaders {
            sid: sid.map(String::from),
            nt: nt.map(String::from),
            nts: nts.map(String::from),
            seq: seq.map(String::from),
        }
    }

    const BODY: &[u8] = br#"<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0"><e:property><Status>1</Status></e:property></e:propertyset>"#;

    async fn registered_router() -> (EventRouter, mpsc::UnboundedReceiver<NotificationPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = EventRouter::new(tx);
        router.register("uuid:sub-1".to_string()).await;
        (router, rx)
    }

    #[rstest]
    #[case::missing_sid(None, Some("upnp:event"), Some("upnp:propchange"), Some("0"), StatusCode::PRECONDITION_FAILED)]
    #[case::wrong_nt(Some("uuid:sub-1"), Some("wrong"), Some("upnp:propchange"), Some("0"), StatusCode::BAD_REQUEST)]
    #[case::missing_nts(Some("uuid:sub-1"), Some("upnp:event"), None, Some("0"), StatusCode::BAD_REQUEST)]
    #[case::missing_seq(Some("uuid:sub-1"), Some("upnp:event"), Some("upnp:propchange"), None, StatusCode::BAD_REQUEST)]
    #[case::negative_seq(Some("uuid:sub-1"), Some("upnp:event"), Some("upnp:propchange"), Some("-1"), StatusCode::BAD_REQUEST)]
    #[case::unknown_sid(Some("uuid:other"), Some("upnp:event"), Some("upnp:propchange"), Some("4"), StatusCode::PRECONDITION_FAILED)]
    #[case::padded_sid(Some(" uuid:sub-1 "), Some("upnp:event"), Some("upnp:propchange"), Some("0"), StatusCode::OK)]
    #[tokio::test]
    async fn test_header_validation(
        #[case] sid: Option<&str>,
        #[case] nt: Option<&str>,
        #[case] nts: Option<&str>,
        #[case] seq: Option<&str>,
        #[case] expected: StatusCode,
    ) {
        let (router, _rx) = registered_router().await;
        let status = handle_notify(&router, Duration::from_millis(10), headers(sid, nt, nts, seq), BODY).await;
        assert_eq!(status, expected);
    }

    #[tokio::test]
    async fn test_bad_body_is_rejected() {
        let (router, mut rx) = registered_router().await;
        let status = handle_notify(
            &router,
            Duration::from_millis(10),
            headers(Some("uuid:sub-1"), Some("upnp:event"), Some("upnp:propchange"), Some("1")),
            b"<not-a-propertyset/>",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_accepted_event_reaches_channel() {
        let (router, mut rx) = registered_router().await;
        let status = handle_notify(
            &router,
            Duration::from_millis(10),
            headers(Some("uuid:sub-1"), Some("upnp:event"), Some("upnp:propchange"), Some("7")),
            BODY,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let payload = rx.recv().await.unwrap();
        assert_eq!(payload.event_key, 7);
        assert_eq!(payload.properties, vec![("Status".to_string(), "1".to_string())]);
    }

    #[tokio::test]
    async fn test_callback_server_creation() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let server = CallbackServer::new((50000, 50100), tx).await.unwrap();
        assert!(server.port() >= 50000 && server.port() <= 50100);
        assert!(server.base_url().ends_with(&format!(":{}", server.port())));
        assert_eq!(
            server.callback_url("/notify/1"),
            format!("{}/notify/1", server.base_url())
        );
        server.shutdown().await;
    }
}
