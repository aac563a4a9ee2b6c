//! UDP sockets for SSDP and the send seam the engine talks through.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::config::SsdpConfig;
use crate::error::Result;
use crate::message::{SSDP_IPV4_GROUP, SSDP_IPV6_LINK_LOCAL, SSDP_IPV6_SITE_LOCAL, SSDP_PORT};

/// Outgoing side of SSDP. Implemented over real sockets by
/// [`UdpTransport`]; tests substitute a recorder.
#[async_trait]
pub trait SsdpTransport: Send + Sync {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<()>;
}

fn udp_socket(domain: Domain) -> io::Result<Socket> {
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn into_tokio(socket: Socket) -> io::Result<UdpSocket> {
    UdpSocket::from_std(socket.into())
}

/// Socket bound to port 1900 and joined to the IPv4 SSDP group.
pub fn multicast_listener_v4() -> io::Result<UdpSocket> {
    let socket = udp_socket(Domain::IPV4)?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), SSDP_PORT);
    socket.bind(&SockAddr::from(bind))?;
    socket.join_multicast_v4(&SSDP_IPV4_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    into_tokio(socket)
}

/// Socket bound to port 1900 and joined to the link- and site-local IPv6 groups.
pub fn multicast_listener_v6() -> io::Result<UdpSocket> {
    let socket = udp_socket(Domain::IPV6)?;
    socket.set_only_v6(true)?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    let bind = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), SSDP_PORT);
    socket.bind(&SockAddr::from(bind))?;
    socket.join_multicast_v6(&SSDP_IPV6_LINK_LOCAL, 0)?;
    if let Err(e) = socket.join_multicast_v6(&SSDP_IPV6_SITE_LOCAL, 0) {
        debug!(error = %e, "site-local SSDP group unavailable");
    }
    into_tokio(socket)
}

/// Ephemeral-port socket used to send searches and advertisements; search
/// replies come back to it.
pub fn request_socket_v4(ttl: u32) -> io::Result<UdpSocket> {
    let socket = udp_socket(Domain::IPV4)?;
    let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    socket.bind(&SockAddr::from(bind))?;
    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_multicast_loop_v4(true)?;
    into_tokio(socket)
}

pub fn request_socket_v6(hops: u32) -> io::Result<UdpSocket> {
    let socket = udp_socket(Domain::IPV6)?;
    socket.set_only_v6(true)?;
    let bind = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0);
    socket.bind(&SockAddr::from(bind))?;
    socket.set_multicast_hops_v6(hops)?;
    socket.set_multicast_loop_v6(true)?;
    into_tokio(socket)
}

/// Sends through the request socket of the destination's address family.
#[derive(Debug)]
pub struct UdpTransport {
    v4: Arc<UdpSocket>,
    v6: Option<Arc<UdpSocket>>,
}

impl UdpTransport {
    pub fn new(v4: Arc<UdpSocket>, v6: Option<Arc<UdpSocket>>) -> Self {
        Self { v4, v6 }
    }
}

#[async_trait]
impl SsdpTransport for UdpTransport {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<()> {
        let socket = match target {
            SocketAddr::V4(_) => &self.v4,
            SocketAddr::V6(_) => self.v6.as_ref().ok_or_else(|| {
                io::Error::new(io::ErrorKind::AddrNotAvailable, "IPv6 SSDP is disabled")
            })?,
        };
        let sent = socket.send_to(payload, target).await?;
        if sent != payload.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short SSDP send: {} of {} bytes", sent, payload.len()),
            ));
        }
        Ok(())
    }
}

/// All sockets an engine reads from, plus the transport it writes through.
#[derive(Debug)]
pub struct SsdpSockets {
    pub listeners: Vec<Arc<UdpSocket>>,
    pub transport: Arc<UdpTransport>,
}

impl SsdpSockets {
    /// Create the multicast listeners and request sockets. Must run inside
    /// a tokio runtime.
    pub fn bind(config: &SsdpConfig) -> Result<Self> {
        let request_v4 = Arc::new(request_socket_v4(config.multicast_ttl)?);
        let mut listeners = vec![Arc::new(multicast_listener_v4()?), request_v4.clone()];

        let mut request_v6 = None;
        if config.enable_ipv6 {
            match (multicast_listener_v6(), request_socket_v6(config.multicast_ttl)) {
                (Ok(listener), Ok(request)) => {
                    let request = Arc::new(request);
                    listeners.push(Arc::new(listener));
                    listeners.push(request.clone());
                    request_v6 = Some(request);
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "IPv6 SSDP sockets unavailable, continuing with IPv4 only");
                }
            }
        }

        Ok(Self {
            listeners,
            transport: Arc::new(UdpTransport::new(request_v4, request_v6)),
        })
    }
}
