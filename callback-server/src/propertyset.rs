//! The `e:propertyset` body carried by GENA NOTIFY requests.

use xmltree::{Element, EmitterConfig, Namespace, XMLNode};

use crate::error::{CallbackServerError, Result};

pub const EVENT_NS: &str = "urn:schemas-upnp-org:event-1-0";

/// Serialize `(variable, value)` pairs, one `e:property` per variable.
pub fn build_propertyset<'a, I>(properties: I) -> Result<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut namespaces = Namespace::empty();
    namespaces.put("e", EVENT_NS);

    let mut root = Element::new("propertyset");
    root.prefix = Some("e".to_string());
    root.namespace = Some(EVENT_NS.to_string());
    root.namespaces = Some(namespaces);

    for (name, value) in properties {
        let mut variable = Element::new(name);
        if !value.is_empty() {
            variable.children.push(XMLNode::Text(value.to_string()));
        }
        let mut property = Element::new("property");
        property.prefix = Some("e".to_string());
        property.namespace = Some(EVENT_NS.to_string());
        property.children.push(XMLNode::Element(variable));
        root.children.push(XMLNode::Element(property));
    }

    let mut out = Vec::new();
    root.write_with_config(&mut out, EmitterConfig::new().perform_indent(false))
        .map_err(|e| CallbackServerError::Serialize(e.to_string()))?;
    String::from_utf8(out).map_err(|e| CallbackServerError::Serialize(e.to_string()))
}

/// Variables and values of a property set, in document order.
pub fn parse_propertyset(xml: &str) -> Result<Vec<(String, String)>> {
    let root = Element::parse(xml.as_bytes())
        .map_err(|e| CallbackServerError::PropertySet(e.to_string()))?;
    if root.name != "propertyset" {
        return Err(CallbackServerError::PropertySet(format!(
            "unexpected root element <{}>",
            root.name
        )));
    }

    let mut properties = Vec::new();
    for property in root
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .filter(|e| e.name == "property")
    {
        for variable in property.children.iter().filter_map(XMLNode::as_element) {
            let value = variable.get_text().map(|t| t.into_owned()).unwrap_or_default();
            properties.push((variable.name.clone(), value));
        }
    }
    Ok(properties)
}
