//! Blocking SOAP client for UPnP control
//!
//! This crate sends SOAP action requests to UPnP services and decodes their
//! responses. It also carries the GENA SUBSCRIBE, renew and UNSUBSCRIBE
//! requests, which share the same HTTP agent.
//!
//! Every call is one HTTP request answered by one HTTP response. Nothing is
//! retried here; retry policy belongs to the caller.

mod error;
mod gena;

pub use error::{Result, SoapError};
pub use gena::{SubscribeResponse, SubscriptionTimeout};

use std::io::Read;
use std::time::Duration;

use tracing::{debug, trace};
use upnp_core::UpnpConfig;
use xmltree::{Element, EmitterConfig, Namespace, XMLNode};

const ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const ENCODING_STYLE: &str = "http://schemas.xmlsoap.org/soap/encoding/";
const CONTENT_TYPE: &str = "text/xml; charset=\"utf-8\"";

/// A SOAP/GENA client over a shared `ureq` agent
#[derive(Debug, Clone)]
pub struct SoapClient {
    agent: ureq::Agent,
    max_content_length: usize,
}

impl SoapClient {
    /// Create a client with the default timeouts and body limit
    pub fn new() -> Self {
        Self::with_config(&UpnpConfig::default())
    }

    /// Create a client using the HTTP timeout and SOAP body limit of `config`
    pub fn with_config(config: &UpnpConfig) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(Duration::from_secs(5))
                .timeout(config.http_default_timeout)
                .build(),
            max_content_length: config.default_soap_content_length,
        }
    }

    /// Invoke an action. `action` is the `<u:ActionName>` element.
    pub fn send_action(&self, url: &str, service_type: &str, action: &Element) -> Result<Element> {
        self.send_action_ex(url, service_type, None, action)
    }

    /// Invoke an action with an optional SOAP header element.
    ///
    /// Returns the `<ActionNameResponse>` element. A SOAP fault becomes
    /// [`SoapError::Action`]; an error status without a fault becomes
    /// [`SoapError::Http`].
    pub fn send_action_ex(
        &self,
        url: &str,
        service_type: &str,
        header: Option<&Element>,
        action: &Element,
    ) -> Result<Element> {
        let body = build_envelope(header, action)?;
        let soap_action = format!("\"{}#{}\"", service_type, action.name);
        debug!(url, action = %action.name, "sending SOAP action");

        let response = match self
            .agent
            .post(url)
            .set("Content-Type", CONTENT_TYPE)
            .set("SOAPACTION", &soap_action)
            .send_string(&body)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(e) => return Err(SoapError::Network(e.to_string())),
        };

        let status = response.status();
        let text = read_capped(response, self.max_content_length)?;
        trace!(status, bytes = text.len(), "SOAP response received");

        if status >= 400 {
            let fault = Element::parse(text.as_bytes())
                .ok()
                .and_then(|xml| fault_of(&xml));
            return Err(fault.unwrap_or(SoapError::Http(status)));
        }

        let xml = Element::parse(text.as_bytes()).map_err(|e| SoapError::Parse(e.to_string()))?;
        extract_response(&xml, &action.name)
    }

    pub(crate) fn agent(&self) -> &ureq::Agent {
        &self.agent
    }
}

impl Default for SoapClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Build `<u:action xmlns:u="service_type">` with one child per argument.
pub fn build_action(service_type: &str, action: &str, args: &[(&str, &str)]) -> Element {
    let mut namespaces = Namespace::empty();
    namespaces.put("u", service_type);

    let mut element = Element::new(action);
    element.prefix = Some("u".to_string());
    element.namespace = Some(service_type.to_string());
    element.namespaces = Some(namespaces);
    for (name, value) in args {
        let mut arg = Element::new(name);
        arg.children.push(XMLNode::Text((*value).to_string()));
        element.children.push(XMLNode::Element(arg));
    }
    element
}

/// Output arguments of a response element, in document order.
pub fn response_args(response: &Element) -> Vec<(String, String)> {
    response
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .map(|arg| {
            let value = arg.get_text().map(|t| t.into_owned()).unwrap_or_default();
            (arg.name.clone(), value)
        })
        .collect()
}

fn to_xml_string(element: &Element) -> Result<String> {
    let mut out = Vec::new();
    element
        .write_with_config(&mut out, EmitterConfig::new().write_document_declaration(false))
        .map_err(|e| SoapError::Parse(e.to_string()))?;
    String::from_utf8(out).map_err(|e| SoapError::Parse(e.to_string()))
}

fn build_envelope(header: Option<&Element>, action: &Element) -> Result<String> {
    let header = match header {
        Some(header) => format!("<s:Header>{}</s:Header>", to_xml_string(header)?),
        None => String::new(),
    };
    Ok(format!(
        r#"<?xml version="1.0"?><s:Envelope xmlns:s="{ns}" s:encodingStyle="{enc}">{header}<s:Body>{body}</s:Body></s:Envelope>"#,
        ns = ENVELOPE_NS,
        enc = ENCODING_STYLE,
        header = header,
        body = to_xml_string(action)?
    ))
}

fn read_capped(response: ureq::Response, limit: usize) -> Result<String> {
    let mut body = String::new();
    response
        .into_reader()
        .take(limit as u64 + 1)
        .read_to_string(&mut body)
        .map_err(|e| SoapError::Network(e.to_string()))?;
    if body.len() > limit {
        return Err(SoapError::TooLarge(limit));
    }
    Ok(body)
}

fn child_named<'a>(element: &'a Element, name: &str) -> Option<&'a Element> {
    element
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .find(|child| child.name.eq_ignore_ascii_case(name))
}

fn fault_of(xml: &Element) -> Option<SoapError> {
    let fault = child_named(xml, "Body").and_then(|body| child_named(body, "Fault"))?;
    let detail = child_named(fault, "detail").and_then(|d| child_named(d, "UPnPError"));
    let text = |name: &str| {
        detail
            .and_then(|d| child_named(d, name))
            .and_then(|e| e.get_text())
            .map(|t| t.trim().to_string())
    };
    Some(SoapError::Action {
        code: text("errorCode").and_then(|c| c.parse().ok()).unwrap_or(500),
        description: text("errorDescription").unwrap_or_default(),
    })
}

fn extract_response(xml: &Element, action: &str) -> Result<Element> {
    let body = child_named(xml, "Body").ok_or_else(|| SoapError::Parse("Missing SOAP Body".to_string()))?;

    if let Some(fault) = fault_of(xml) {
        return Err(fault);
    }

    let response_name = format!("{}Response", action);
    child_named(body, &response_name)
        .cloned()
        .ok_or_else(|| SoapError::Parse(format!("Missing {} element", response_name)))
}
