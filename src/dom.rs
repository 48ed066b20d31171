//! Minimal XML document-value wrapper exchanged with the server as XDM
//! `element()`/`text()` items (spec §4.4), grounded in
//! `examples/original_source/xmltype.py`'s `XMLType`.

use std::collections::HashMap;
use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;

use crate::error::{Error, Result};

/// A two-way mapping between namespace prefixes and URIs, owned by a
/// [`crate::Database`] and shared by every [`crate::Table`] over it.
#[derive(Debug, Clone, Default)]
pub struct NamespaceBindings {
    prefix_to_uri: HashMap<String, String>,
    uri_to_prefix: HashMap<String, String>,
}

impl NamespaceBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `prefix` (empty string for the default namespace) to `uri`.
    pub fn bind(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        let prefix = prefix.into();
        let uri = uri.into();
        self.uri_to_prefix.insert(uri.clone(), prefix.clone());
        self.prefix_to_uri.insert(prefix, uri);
    }

    pub fn uri_for(&self, prefix: &str) -> Option<&str> {
        self.prefix_to_uri.get(prefix).map(String::as_str)
    }

    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.uri_to_prefix.get(uri).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.prefix_to_uri.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.prefix_to_uri.iter().map(|(p, u)| (p.as_str(), u.as_str()))
    }
}

/// A namespace-qualified element or attribute name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub namespace: Option<String>,
    pub local: String,
}

impl QName {
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local: local.into(),
        }
    }

    /// Render as `prefix:local`, falling back to the bare local name if the
    /// namespace has no bound prefix.
    fn render(&self, ns: &NamespaceBindings) -> String {
        match &self.namespace {
            Some(uri) => match ns.prefix_for(uri) {
                Some(prefix) if !prefix.is_empty() => format!("{prefix}:{}", self.local),
                _ => self.local.clone(),
            },
            None => self.local.clone(),
        }
    }
}

/// An XML element: tag name, attributes, and child content.
#[derive(Debug, Clone)]
pub struct Element {
    pub tag: QName,
    pub attributes: Vec<(QName, String)>,
    pub children: Vec<DomValue>,
}

/// A value exchanged as an XDM `element()` or `text()` item (spec §4.4).
#[derive(Debug, Clone)]
pub enum DomValue {
    Element(Element),
    Text(String),
}

impl DomValue {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(e) => Some(e),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t.as_str()),
            Self::Element(_) => None,
        }
    }

    /// Parse a serialized XML fragment into a `DomValue` tree, resolving
    /// element/attribute namespaces against `xmlns`/`xmlns:*` declarations
    /// as they're encountered.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml.trim());
        reader.config_mut().trim_text(true);

        let mut scopes: Vec<HashMap<String, String>> = vec![HashMap::new()];
        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<DomValue> = None;

        loop {
            match reader
                .read_event()
                .map_err(|e| Error::Xml(format!("malformed XML: {e}")))?
            {
                Event::Start(start) => {
                    let scope = push_scope(&scopes, &start)?;
                    let element = build_element(&start, &scope)?;
                    scopes.push(scope);
                    stack.push(element);
                }
                Event::Empty(start) => {
                    let scope = push_scope(&scopes, &start)?;
                    let element = build_element(&start, &scope)?;
                    attach(&mut stack, &mut root, DomValue::Element(element))?;
                }
                Event::End(end) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| Error::Xml(format!("unmatched closing tag {:?}", tag_name(&end))))?;
                    scopes.pop();
                    attach(&mut stack, &mut root, DomValue::Element(element))?;
                }
                Event::Text(text) => {
                    let text = decode_text(&text)?;
                    if let Some(parent) = stack.last_mut() {
                        if !text.is_empty() {
                            parent.children.push(DomValue::Text(text));
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        root.ok_or_else(|| Error::Xml("empty XML document".to_string()))
    }

    /// Render this value back to XML, resolving namespaces through `ns`.
    pub fn to_xml_string(&self, ns: &NamespaceBindings) -> Result<String> {
        let mut writer = Writer::new(Cursor::new(Vec::new()));
        write_value(&mut writer, self, ns)?;
        String::from_utf8(writer.into_inner().into_inner())
            .map_err(|e| Error::Xml(format!("non-UTF-8 XML output: {e}")))
    }
}

fn tag_name(end: &BytesEnd<'_>) -> String {
    String::from_utf8_lossy(end.name().as_ref()).into_owned()
}

fn decode_text(text: &BytesText<'_>) -> Result<String> {
    text.unescape()
        .map(|cow| cow.into_owned())
        .map_err(|e| Error::Xml(format!("invalid text content: {e}")))
}

/// Compute the namespace scope visible inside `start`, inheriting from the
/// parent scope and applying any `xmlns`/`xmlns:*` attributes declared here.
fn push_scope(scopes: &[HashMap<String, String>], start: &BytesStart<'_>) -> Result<HashMap<String, String>> {
    let mut scope = scopes.last().cloned().unwrap_or_default();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::Xml(format!("malformed attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key == "xmlns" {
            scope.insert(String::new(), attr.unescape_value().unwrap_or_default().into_owned());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(
                prefix.to_string(),
                attr.unescape_value().unwrap_or_default().into_owned(),
            );
        }
    }
    Ok(scope)
}

fn resolve(name: &str, scope: &HashMap<String, String>) -> QName {
    match name.split_once(':') {
        Some((prefix, local)) => QName {
            namespace: scope.get(prefix).cloned(),
            local: local.to_string(),
        },
        None => QName {
            namespace: scope.get("").cloned(),
            local: name.to_string(),
        },
    }
}

fn build_element(start: &BytesStart<'_>, scope: &HashMap<String, String>) -> Result<Element> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let tag = resolve(&name, scope);

    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::Xml(format!("malformed attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|e| Error::Xml(format!("invalid attribute value: {e}")))?
            .into_owned();
        attributes.push((resolve(&key, scope), value));
    }

    Ok(Element {
        tag,
        attributes,
        children: Vec::new(),
    })
}

fn attach(stack: &mut [Element], root: &mut Option<DomValue>, value: DomValue) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(value),
        None => *root = Some(value),
    }
    Ok(())
}

fn write_value<W: std::io::Write>(writer: &mut Writer<W>, value: &DomValue, ns: &NamespaceBindings) -> Result<()> {
    match value {
        DomValue::Text(text) => writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(|e| Error::Xml(format!("failed to write text: {e}"))),
        DomValue::Element(element) => {
            let tag = element.tag.render(ns);
            let mut start = BytesStart::new(tag.clone());
            for (name, value) in &element.attributes {
                start.push_attribute((name.render(ns).as_str(), value.as_str()));
            }

            if element.children.is_empty() {
                writer
                    .write_event(Event::Empty(start))
                    .map_err(|e| Error::Xml(format!("failed to write element: {e}")))
            } else {
                writer
                    .write_event(Event::Start(start))
                    .map_err(|e| Error::Xml(format!("failed to write element: {e}")))?;
                for child in &element.children {
                    write_value(writer, child, ns)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new(tag)))
                    .map_err(|e| Error::Xml(format!("failed to write element: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_simple_element() {
        let doc = DomValue::parse("<person name=\"ada\">hi</person>").unwrap();
        let element = doc.as_element().unwrap();
        assert_eq!(element.tag.local, "person");
        assert_eq!(element.attributes[0].1, "ada");
        assert_eq!(element.children[0].as_text(), Some("hi"));

        let ns = NamespaceBindings::new();
        let rendered = doc.to_xml_string(&ns).unwrap();
        assert_eq!(rendered, "<person name=\"ada\">hi</person>");
    }

    #[test]
    fn resolves_default_namespace() {
        let doc = DomValue::parse(r#"<root xmlns="urn:example"><child/></root>"#).unwrap();
        let root = doc.as_element().unwrap();
        assert_eq!(root.tag.namespace.as_deref(), Some("urn:example"));
        let child = root.children[0].as_element().unwrap();
        assert_eq!(child.tag.namespace.as_deref(), Some("urn:example"));
    }

    #[test]
    fn renders_with_bound_prefix() {
        let doc = DomValue::parse(r#"<root xmlns="urn:example"/>"#).unwrap();
        let mut ns = NamespaceBindings::new();
        ns.bind("ex", "urn:example");
        assert_eq!(doc.to_xml_string(&ns).unwrap(), "<ex:root/>");
    }

    #[test]
    fn rejects_malformed_xml() {
        assert!(DomValue::parse("<unterminated>").is_err());
    }
}
