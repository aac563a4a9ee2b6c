//! Shared fixtures for engine tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use upnp_core::{ChannelSink, TimerThread, UpnpConfig, UpnpEvent};
use upnp_discovery::{DeviceDescription, DeviceInfo, SsdpConfig, SsdpEngine, SsdpTransport};

pub const RENDERER: &str = "urn:schemas-upnp-org:device:MediaRenderer:1";
pub const AVT: &str = "urn:schemas-upnp-org:service:AVTransport:1";

/// Records every datagram instead of sending it.
#[derive(Default)]
pub struct FakeTransport {
    sent: Mutex<Vec<(String, SocketAddr)>>,
    fail: Mutex<bool>,
}

impl FakeTransport {
    pub fn sent(&self) -> Vec<(String, SocketAddr)> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<(String, SocketAddr)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn fail_sends(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl SsdpTransport for FakeTransport {
    async fn send_to(&self, payload: &[u8], target: SocketAddr) -> io::Result<()> {
        if *self.fail.lock() {
            return Err(io::Error::new(io::ErrorKind::Other, "network unreachable"));
        }
        self.sent
            .lock()
            .push((String::from_utf8_lossy(payload).into_owned(), target));
        Ok(())
    }
}

pub struct Harness {
    pub engine: SsdpEngine,
    pub transport: Arc<FakeTransport>,
    pub timer: TimerThread,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SsdpConfig::from(&UpnpConfig::default()))
    }

    pub fn with_config(config: SsdpConfig) -> Self {
        let transport = Arc::new(FakeTransport::default());
        let timer = TimerThread::new(100).expect("runtime");
        let engine = SsdpEngine::new(config, transport.clone(), timer.clone());
        Self {
            engine,
            transport,
            timer,
        }
    }

    pub fn client(&self) -> tokio::sync::mpsc::UnboundedReceiver<UpnpEvent> {
        let (sink, events) = ChannelSink::new();
        self.engine.register_client(Arc::new(sink));
        events
    }
}

pub fn sample_device() -> DeviceDescription {
    DeviceDescription::new(
        "http://10.0.0.5:49152/desc.xml",
        DeviceInfo::new("uuid:root", RENDERER).with_service(AVT, "urn:upnp-org:serviceId:AVTransport"),
    )
}

pub fn peer() -> SocketAddr {
    "10.0.0.9:50000".parse().expect("address")
}

pub fn alive(nt: &str, usn: &str, max_age: &str) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         CACHE-CONTROL: {}\r\n\
         LOCATION: http://10.0.0.9:1400/xml/device_description.xml\r\n\
         NT: {}\r\n\
         NTS: ssdp:alive\r\n\
         SERVER: Linux UPnP/1.0 Test/1.0\r\n\
         USN: {}\r\n\
         \r\n",
        max_age, nt, usn
    )
}

pub fn response(st: &str, usn: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age=1800\r\n\
         EXT:\r\n\
         LOCATION: http://10.0.0.9:1400/xml/device_description.xml\r\n\
         SERVER: Linux UPnP/1.0 Test/1.0\r\n\
         ST: {}\r\n\
         USN: {}\r\n\
         \r\n",
        st, usn
    )
}

pub fn msearch(st: &str, mx: u32) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: 239.255.255.250:1900\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         \r\n",
        mx, st
    )
}
