//! Turning SSDP messages into [`SsdpEvent`]s.

use std::net::SocketAddr;

use upnp_core::{Cookie, Discovery, HttpHeader};

use crate::error::{DiscoveryError, Result};
use crate::message::SsdpMessage;

/// Maximum length of a copied field, including the terminator slot the
/// wire format reserves.
pub const LINE_SIZE: usize = 180;

/// What a search target or notification type refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SsdpSearchType {
    /// `ssdp:all`
    All,
    /// `upnp:rootdevice`
    RootDevice,
    /// `uuid:...`
    DeviceUdn,
    /// `urn:...:device:...`
    DeviceType,
    /// `urn:...:service:...`
    Service,
    /// Anything else. Events of this type are never delivered.
    #[default]
    Unrecognized,
}

/// Parse outcome recorded on the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SsdpErrorCode {
    #[default]
    None,
    /// The search target or notification type could not be classified
    HttpSyntax,
}

/// One discovery datagram, decomposed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsdpEvent {
    pub request_type: SsdpSearchType,
    pub error_code: SsdpErrorCode,
    pub max_age: u32,
    pub mx: u32,
    pub udn: String,
    pub device_type: String,
    pub service_type: String,
    pub location: String,
    /// HOST header as received
    pub host_addr: String,
    pub os: String,
    pub ext: String,
    pub date: String,
    /// Unique service name, needed to suppress duplicate copies
    pub usn: String,
    /// NT or ST, whichever the message carried
    pub target: String,
    pub dest_addr: Option<SocketAddr>,
    pub cookie: Option<Cookie>,
}

impl SsdpEvent {
    pub fn is_deliverable(&self) -> bool {
        self.request_type != SsdpSearchType::Unrecognized
    }

    pub fn to_discovery(&self) -> Discovery {
        Discovery {
            udn: self.udn.clone(),
            device_type: self.device_type.clone(),
            service_type: self.service_type.clone(),
            location: self.location.clone(),
            os: self.os.clone(),
            ext: self.ext.clone(),
            date: self.date.clone(),
            max_age: self.max_age,
            source: self.dest_addr,
        }
    }
}

/// Copy at most `LINE_SIZE - 1` bytes, cutting on a char boundary.
pub(crate) fn bounded(value: &str) -> String {
    let limit = LINE_SIZE - 1;
    if value.len() <= limit {
        return value.to_string();
    }
    let mut end = limit;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Classify a search target or notification type.
///
/// Checks run in a fixed order, so `uuid:x::upnp:rootdevice` is a root
/// device target and `urn:...:device:...` wins over `:service:`.
pub fn classify_request(command: &str) -> SsdpSearchType {
    let is_urn = command.contains("urn:");
    if command.contains(":all") {
        SsdpSearchType::All
    } else if command.contains(":rootdevice") {
        SsdpSearchType::RootDevice
    } else if command.contains("uuid:") {
        SsdpSearchType::DeviceUdn
    } else if is_urn && command.contains(":device:") {
        SsdpSearchType::DeviceType
    } else if is_urn && command.contains(":service:") {
        SsdpSearchType::Service
    } else {
        SsdpSearchType::Unrecognized
    }
}

fn malformed(command: &str) -> DiscoveryError {
    DiscoveryError::Parse(format!("malformed unique service name: {}", command))
}

/// Split a USN or search target into UDN, device type and service type.
///
/// On error the event may hold some of the fields; callers must not use
/// them.
pub fn fill_event_fields(command: &str, event: &mut SsdpEvent) -> Result<()> {
    if command.contains("uuid:schemas") {
        return fill_legacy_fields(command, event);
    }

    let mut found = false;

    if let Some(start) = command.find("uuid") {
        let tail = &command[start..];
        let udn = match tail.find("::") {
            Some(end) => &tail[..end],
            None => tail,
        };
        event.udn = bounded(udn);
        found = true;
    }

    if command.contains("urn:") && command.contains(":service:") {
        if let Some(start) = command.find("urn") {
            event.service_type = bounded(&command[start..]);
            found = true;
        }
    }

    if command.contains("urn:") && command.contains(":device:") {
        if let Some(start) = command.find("urn") {
            event.device_type = bounded(&command[start..]);
            found = true;
        }
    }

    if let Some(end) = command.find("::upnp:rootdevice") {
        if end != 0 {
            event.udn = bounded(&command[..end]);
            found = true;
        }
    }

    if found {
        Ok(())
    } else {
        Err(malformed(command))
    }
}

/// `uuid:schemas-...:device:<type>:<version>:<id>` as sent by old stacks.
fn fill_legacy_fields(command: &str, event: &mut SsdpEvent) -> Result<()> {
    let device = command.find(":device").ok_or_else(|| malformed(command))?;
    let second = command[device + 1..]
        .find(':')
        .map(|i| device + 1 + i)
        .ok_or_else(|| malformed(command))?;
    let third = command[second + 1..]
        .find(':')
        .map(|i| second + 1 + i)
        .ok_or_else(|| malformed(command))?;

    let id = &command[third + 1..];
    if "uuid:".len() + id.len() >= LINE_SIZE {
        return Err(malformed(command));
    }
    event.udn = format!("uuid:{}", id);

    let first = command.find(':').ok_or_else(|| malformed(command))?;
    let mut type_part = &command[first..third];
    if type_part.len() >= LINE_SIZE - 3 {
        let mut end = LINE_SIZE - 4;
        while !type_part.is_char_boundary(end) {
            end -= 1;
        }
        type_part = &type_part[..end];
    }
    if "urn".len() + type_part.len() >= LINE_SIZE {
        return Err(malformed(command));
    }
    event.device_type = format!("urn{}", type_part);
    Ok(())
}

/// Reset `event`, fill it from `command` and classify.
///
/// Decomposition failures are tolerated here; only an unclassifiable
/// command is an error, recorded as [`SsdpErrorCode::HttpSyntax`].
pub fn request_type(command: &str, event: &mut SsdpEvent) -> Result<()> {
    *event = SsdpEvent::default();
    let _ = fill_event_fields(command, event);
    event.request_type = classify_request(command);
    if event.request_type == SsdpSearchType::Unrecognized {
        event.error_code = SsdpErrorCode::HttpSyntax;
        return Err(DiscoveryError::Parse(format!(
            "unrecognized search target: {}",
            command
        )));
    }
    Ok(())
}

/// Build an [`SsdpEvent`] from a parsed message.
///
/// Missing optional headers leave their fields empty. A missing NT/ST, or
/// one that cannot be classified, yields an event of type
/// [`SsdpSearchType::Unrecognized`].
pub fn parse_message(msg: &SsdpMessage, dest_addr: Option<SocketAddr>) -> SsdpEvent {
    let target_header = if msg.is_notify() {
        HttpHeader::Nt
    } else {
        HttpHeader::St
    };

    let mut event = SsdpEvent::default();
    match msg.header(target_header) {
        Some(target) => {
            let _ = request_type(target, &mut event);
            event.target = bounded(target);
        }
        None => event.error_code = SsdpErrorCode::HttpSyntax,
    }

    // Advertisements and replies name the device in USN; searches only have ST.
    if let Some(usn) = msg.header(HttpHeader::Usn) {
        event.usn = bounded(usn);
        let mut named = SsdpEvent::default();
        if fill_event_fields(usn, &mut named).is_ok() {
            event.udn = named.udn;
            if !named.device_type.is_empty() {
                event.device_type = named.device_type;
            }
            if !named.service_type.is_empty() {
                event.service_type = named.service_type;
            }
        }
    }

    event.max_age = msg.max_age().unwrap_or(0);
    event.mx = msg.mx().unwrap_or(0);
    event.location = bounded(msg.header(HttpHeader::Location).unwrap_or_default());
    event.host_addr = bounded(msg.header(HttpHeader::Host).unwrap_or_default());
    let os = msg
        .header(HttpHeader::Server)
        .or_else(|| msg.header(HttpHeader::UserAgent))
        .unwrap_or_default();
    event.os = bounded(os);
    event.ext = bounded(msg.header(HttpHeader::Ext).unwrap_or_default());
    event.date = bounded(msg.header(HttpHeader::Date).unwrap_or_default());
    event.dest_addr = dest_addr;
    event
}
