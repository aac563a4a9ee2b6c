//! The advertised device tree and the message set derived from it.
//!
//! A root device announces three notification types (`upnp:rootdevice`,
//! its UDN, its device type), every embedded device two (UDN, device type)
//! and every service one (service type). Search replies pick from the same
//! set according to what the search asked for.

use serde::{Deserialize, Serialize};

use crate::parser::{SsdpEvent, SsdpSearchType};

pub const ROOT_DEVICE_NT: &str = "upnp:rootdevice";

/// One service of an advertised device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub service_type: String,
    pub service_id: String,
}

/// A device and the devices embedded in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(rename = "UDN")]
    pub udn: String,
    pub device_type: String,
    #[serde(default)]
    pub services: Vec<ServiceInfo>,
    #[serde(default)]
    pub embedded: Vec<DeviceInfo>,
}

/// What a device handle advertises: its tree and description URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescription {
    pub location: String,
    pub root: DeviceInfo,
}

impl DeviceDescription {
    pub fn new(location: impl Into<String>, root: DeviceInfo) -> Self {
        Self {
            location: location.into(),
            root,
        }
    }

    /// Every device in the tree, root first, depth-first.
    pub fn devices(&self) -> Vec<&DeviceInfo> {
        let mut out = Vec::new();
        collect(&self.root, &mut out);
        out
    }

    pub fn find_service(&self, service_id: &str) -> Option<(&DeviceInfo, &ServiceInfo)> {
        self.devices().into_iter().find_map(|device| {
            device
                .services
                .iter()
                .find(|s| s.service_id == service_id)
                .map(|s| (device, s))
        })
    }
}

fn collect<'a>(device: &'a DeviceInfo, out: &mut Vec<&'a DeviceInfo>) {
    out.push(device);
    for child in &device.embedded {
        collect(child, out);
    }
}

impl DeviceInfo {
    pub fn new(udn: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            udn: udn.into(),
            device_type: device_type.into(),
            services: Vec::new(),
            embedded: Vec::new(),
        }
    }

    pub fn with_service(mut self, service_type: impl Into<String>, service_id: impl Into<String>) -> Self {
        self.services.push(ServiceInfo {
            service_type: service_type.into(),
            service_id: service_id.into(),
        });
        self
    }

    pub fn with_embedded(mut self, device: DeviceInfo) -> Self {
        self.embedded.push(device);
        self
    }
}

/// What an advertise/reply pass does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum AdFlag {
    /// Multicast `ssdp:byebye`
    Shutdown = -1,
    /// Unicast search responses
    Reply = 0,
    /// Multicast `ssdp:alive`
    Advertise = 1,
}

/// One (NT or ST, USN) pair to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub target: String,
    pub usn: String,
}

impl Announcement {
    fn new(target: impl Into<String>, usn: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            usn: usn.into(),
        }
    }
}

fn usn_for(udn: &str, target: &str) -> String {
    format!("{}::{}", udn, target)
}

fn device_announcements(device: &DeviceInfo, is_root: bool, out: &mut Vec<Announcement>) {
    if is_root {
        out.push(Announcement::new(ROOT_DEVICE_NT, usn_for(&device.udn, ROOT_DEVICE_NT)));
    }
    out.push(Announcement::new(device.udn.clone(), device.udn.clone()));
    out.push(Announcement::new(
        device.device_type.clone(),
        usn_for(&device.udn, &device.device_type),
    ));
}

fn service_announcements(device: &DeviceInfo, out: &mut Vec<Announcement>) {
    for service in &device.services {
        out.push(Announcement::new(
            service.service_type.clone(),
            usn_for(&device.udn, &service.service_type),
        ));
    }
}

/// The full alive/byebye set for the tree.
pub fn announcements(description: &DeviceDescription) -> Vec<Announcement> {
    let mut out = Vec::new();
    for (i, device) in description.devices().into_iter().enumerate() {
        device_announcements(device, i == 0, &mut out);
        service_announcements(device, &mut out);
    }
    out
}

/// Whether a local `urn:...:<name>:<version>` type satisfies a requested one.
///
/// Types match when everything before the version is equal (ignoring case)
/// and the local version is at least the requested one.
pub fn type_satisfies(requested: &str, local: &str) -> bool {
    if requested.eq_ignore_ascii_case(local) {
        return true;
    }
    let (Some((req_base, req_version)), Some((local_base, local_version))) =
        (requested.rsplit_once(':'), local.rsplit_once(':'))
    else {
        return false;
    };
    if !req_base.eq_ignore_ascii_case(local_base) {
        return false;
    }
    match (req_version.parse::<u32>(), local_version.parse::<u32>()) {
        (Ok(req), Ok(have)) => have >= req,
        _ => false,
    }
}

/// The responses a search deserves. Type matches echo the requested ST.
pub fn replies(description: &DeviceDescription, search: &SsdpEvent) -> Vec<Announcement> {
    let mut out = Vec::new();
    for (i, device) in description.devices().into_iter().enumerate() {
        let is_root = i == 0;
        match search.request_type {
            SsdpSearchType::All => {
                device_announcements(device, is_root, &mut out);
                service_announcements(device, &mut out);
            }
            SsdpSearchType::RootDevice => {
                if is_root {
                    out.push(Announcement::new(ROOT_DEVICE_NT, usn_for(&device.udn, ROOT_DEVICE_NT)));
                }
            }
            SsdpSearchType::DeviceUdn => {
                if search.udn.eq_ignore_ascii_case(&device.udn) {
                    out.push(Announcement::new(device.udn.clone(), device.udn.clone()));
                }
            }
            SsdpSearchType::DeviceType => {
                if type_satisfies(&search.device_type, &device.device_type) {
                    out.push(Announcement::new(
                        search.device_type.clone(),
                        usn_for(&device.udn, &search.device_type),
                    ));
                }
            }
            SsdpSearchType::Service => {
                for service in &device.services {
                    if type_satisfies(&search.service_type, &service.service_type) {
                        out.push(Announcement::new(
                            search.service_type.clone(),
                            usn_for(&device.udn, &search.service_type),
                        ));
                    }
                }
            }
            SsdpSearchType::Unrecognized => {}
        }
    }
    out
}
