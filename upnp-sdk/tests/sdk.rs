//! Handle registry and the blocking API, with SSDP recorded and HTTP over loopback.

use std::io;
use std::net::SocketAddr;
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockito::Server;
use parking_lot::Mutex;
use upnp_core::HttpMethod;
use upnp_sdk::{
    build_action, response_args, ClientHandle, Cookie, DeviceDescription, DeviceHandle,
    ErrorCode, EventSink, GenaRequest, PropertyChange, SsdpTransport, SubscriptionTimeout,
    UpnpConfig, UpnpEvent, UpnpSdk,
};

const AVT_ID: &str = "urn:upnp-org:serviceId:AVTransport";
const RC: &str = "urn:schemas-upnp-org:service:RenderingControl:1";

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<String>>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    fn count(&self, needle: &str) -> usize {
        self.sent.lock().iter().filter(|d| d.contains(needle)).count()
    }
}

#[async_trait]
impl SsdpTransport for RecordingTransport {
    async fn send_to(&self, payload: &[u8], _target: SocketAddr) -> io::Result<()> {
        self.sent
            .lock()
            .push(String::from_utf8_lossy(payload).into_owned());
        Ok(())
    }
}

fn config(ports: (u16, u16)) -> UpnpConfig {
    UpnpConfig::default()
        .with_callback_ports(ports.0, ports.1)
        .with_search_window(Duration::from_secs(1), Duration::from_secs(5))
}

fn sdk(ports: (u16, u16)) -> (UpnpSdk, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let sdk = UpnpSdk::with_ssdp_transport(config(ports), transport.clone()).unwrap();
    (sdk, transport)
}

fn sink() -> (Arc<dyn EventSink>, Receiver<UpnpEvent>) {
    let (tx, rx) = channel();
    let sink = move |event: UpnpEvent| {
        let _ = tx.send(event);
    };
    (Arc::new(sink), rx)
}

fn renderer() -> DeviceDescription {
    serde_json::from_str(
        r#"{
            "location": "http://127.0.0.1:8080/description.xml",
            "root": {
                "UDN": "uuid:renderer-1",
                "deviceType": "urn:schemas-upnp-org:device:MediaRenderer:1",
                "services": [
                    {
                        "serviceType": "urn:schemas-upnp-org:service:AVTransport:1",
                        "serviceId": "urn:upnp-org:serviceId:AVTransport"
                    }
                ]
            }
        }"#,
    )
    .unwrap()
}

fn next_change(events: &Receiver<UpnpEvent>) -> PropertyChange {
    loop {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(UpnpEvent::PropertyChange(change)) => return change,
            Ok(_) => continue,
            Err(e) => panic!("Expected PropertyChange, got {:?}", e),
        }
    }
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = UpnpConfig::default().with_ssdp_copies(0, Duration::from_millis(100));
    let err = UpnpSdk::new(config).err().unwrap();
    assert_eq!(err.code(), ErrorCode::InvalidParam);
}

#[test]
fn test_unknown_handles_have_no_side_effects() {
    let (sdk, transport) = sdk((52200, 52300));
    let client = ClientHandle::from(41);
    let device = DeviceHandle::from(42);

    assert_eq!(sdk.unregister_client(client).unwrap_err().code().code(), -100);
    assert_eq!(
        sdk.search(client, 2, "ssdp:all", Cookie(1)).unwrap_err().code(),
        ErrorCode::InvalidHandle
    );
    assert_eq!(
        sdk.subscribe(client, "http://127.0.0.1:1/event", SubscriptionTimeout::Seconds(60))
            .unwrap_err()
            .code(),
        ErrorCode::InvalidHandle
    );
    assert_eq!(
        sdk.send_action(client, "http://127.0.0.1:1/ctl", RC, &build_action(RC, "GetVolume", &[]))
            .unwrap_err()
            .code(),
        ErrorCode::InvalidHandle
    );
    assert_eq!(sdk.advertise(device, 100).unwrap_err().code(), ErrorCode::InvalidHandle);
    assert_eq!(
        sdk.notify(device, AVT_ID, &[("TransportState", "PLAYING")])
            .unwrap_err()
            .code(),
        ErrorCode::InvalidHandle
    );
    assert_eq!(sdk.unregister_device(device).unwrap_err().code(), ErrorCode::InvalidHandle);

    assert!(transport.sent().is_empty());
    sdk.shutdown();
}

#[test]
fn test_one_client_handle_at_a_time() {
    let (sdk, _transport) = sdk((52300, 52400));
    let (events, _rx) = sink();

    let first = sdk.register_client(events.clone()).unwrap();
    let err = sdk.register_client(events.clone()).unwrap_err();
    assert_eq!(err.code(), ErrorCode::OutOfHandle);

    sdk.unregister_client(first).unwrap();
    assert_eq!(sdk.unregister_client(first).unwrap_err().code(), ErrorCode::InvalidHandle);

    let second = sdk.register_client(events).unwrap();
    assert_ne!(first, second);
    assert!(sdk.subscriptions(second).unwrap().is_empty());
    assert_eq!(sdk.subscriptions(first).unwrap_err().code(), ErrorCode::InvalidHandle);
    sdk.shutdown();
}

#[test]
fn test_search_reports_timeout_with_cookie() {
    let (sdk, transport) = sdk((52400, 52500));
    let (events, rx) = sink();
    let client = sdk.register_client(events).unwrap();

    sdk.search(client, 1, "ssdp:all", Cookie(9)).unwrap();
    assert_eq!(transport.count("M-SEARCH * HTTP/1.1"), 2);

    match rx.recv_timeout(Duration::from_secs(5)) {
        Ok(UpnpEvent::SearchTimeout { cookie }) => assert_eq!(cookie, Cookie(9)),
        other => panic!("Expected SearchTimeout, got {:?}", other),
    }

    let err = sdk.search(client, 1, "not-a-target", Cookie(10)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidParam);
    sdk.shutdown();
}

#[test]
fn test_device_advertises_and_withdraws() {
    let (sdk, transport) = sdk((52500, 52600));
    let (events, _rx) = sink();
    let device = sdk.register_root_device(renderer(), events.clone()).unwrap();
    assert_eq!(
        sdk.register_root_device(renderer(), events).unwrap_err().code(),
        ErrorCode::OutOfHandle
    );
    assert!(transport.sent().is_empty());

    sdk.advertise(device, 100).unwrap();
    // rootdevice, UDN, device type and one service, two copies each
    assert_eq!(transport.count("NTS: ssdp:alive"), 8);
    assert_eq!(transport.count("CACHE-CONTROL: max-age=100"), 8);

    let url = sdk.event_url(device, AVT_ID).unwrap();
    assert!(url.starts_with("http://"));
    assert!(url.ends_with("/event/urn:upnp-org:serviceId:AVTransport"));
    assert_eq!(
        sdk.event_url(device, "urn:upnp-org:serviceId:Nope").unwrap_err().code(),
        ErrorCode::InvalidService
    );

    sdk.unregister_device(device).unwrap();
    assert_eq!(transport.count("NTS: ssdp:byebye"), 8);
    sdk.shutdown();
}

#[test]
fn test_gena_requests_are_answered_for_the_device() {
    let (sdk, _transport) = sdk((52600, 52700));
    let (events, _rx) = sink();
    let device = sdk.register_root_device(renderer(), events).unwrap();

    let missing_callback = GenaRequest::from_headers("SUBSCRIBE", AVT_ID, [("NT", "upnp:event")]);
    assert_eq!(sdk.handle_gena_request(device, &missing_callback).unwrap().status, 412);

    let unknown_service = GenaRequest {
        method: Some(HttpMethod::Subscribe),
        service_id: "urn:upnp-org:serviceId:Nope".to_string(),
        callback: Some("<http://127.0.0.1:1/notify>".to_string()),
        nt: Some("upnp:event".to_string()),
        ..Default::default()
    };
    assert_eq!(sdk.handle_gena_request(device, &unknown_service).unwrap().status, 404);
    sdk.shutdown();
}

#[test]
fn test_send_action_through_client_handle() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/ctl/rc")
        .with_status(200)
        .with_body(
            r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:GetVolumeResponse xmlns:u="urn:schemas-upnp-org:service:RenderingControl:1">
      <CurrentVolume>17</CurrentVolume>
    </u:GetVolumeResponse>
  </s:Body>
</s:Envelope>"#,
        )
        .create();

    let (sdk, _transport) = sdk((52700, 52800));
    let (events, _rx) = sink();
    let client = sdk.register_client(events).unwrap();

    let action = build_action(RC, "GetVolume", &[("InstanceID", "0"), ("Channel", "Master")]);
    let response = sdk
        .send_action(client, &format!("{}/ctl/rc", server.url()), RC, &action)
        .unwrap();
    assert_eq!(response.name, "GetVolumeResponse");
    assert_eq!(
        response_args(&response),
        vec![("CurrentVolume".to_string(), "17".to_string())]
    );
    mock.assert();
    sdk.shutdown();
}

#[test]
fn test_control_point_subscribes_to_device_over_http() {
    let (sdk, _transport) = sdk((52000, 52100));
    let (device_events, device_rx) = sink();
    let (client_events, client_rx) = sink();

    let device = sdk.register_root_device(renderer(), device_events).unwrap();
    assert_eq!(sdk.notify(device, AVT_ID, &[("TransportState", "STOPPED")]).unwrap(), 0);
    let client = sdk.register_client(client_events).unwrap();

    let event_url = sdk.event_url(device, AVT_ID).unwrap();
    let (sid, granted) = sdk
        .subscribe(client, &event_url, SubscriptionTimeout::Seconds(300))
        .unwrap();
    assert_eq!(granted, SubscriptionTimeout::Seconds(300));
    assert_eq!(sdk.subscriptions(client).unwrap(), vec![sid.clone()]);

    match device_rx.recv_timeout(Duration::from_secs(5)) {
        Ok(UpnpEvent::SubscriptionRequest { service_id, .. }) => assert_eq!(service_id, AVT_ID),
        other => panic!("Expected SubscriptionRequest, got {:?}", other),
    }

    let initial = next_change(&client_rx);
    assert_eq!(initial.sid, sid);
    assert_eq!(initial.event_key, 0);
    assert_eq!(
        initial.properties,
        vec![("TransportState".to_string(), "STOPPED".to_string())]
    );

    assert_eq!(sdk.notify(device, AVT_ID, &[("TransportState", "PLAYING")]).unwrap(), 1);
    let change = next_change(&client_rx);
    assert_eq!(change.event_key, 1);
    assert_eq!(
        change.properties,
        vec![("TransportState".to_string(), "PLAYING".to_string())]
    );

    assert_eq!(
        sdk.renew(client, &sid, SubscriptionTimeout::Seconds(600)).unwrap(),
        SubscriptionTimeout::Seconds(600)
    );
    sdk.unsubscribe(client, &sid).unwrap();
    assert!(sdk.subscriptions(client).unwrap().is_empty());
    assert_eq!(
        sdk.unsubscribe(client, &sid).unwrap_err().code(),
        ErrorCode::InvalidSid
    );

    sdk.shutdown();
}
