//! Native-value/XQuery-type coercion (spec §4.4).

use crate::dom::{DomValue, NamespaceBindings};
use crate::error::{Error, Result};

const INTEGER_TYPES: &[&str] = &[
    "xs:integer",
    "xs:nonPositiveInteger",
    "xs:negativeInteger",
    "xs:long",
    "xs:int",
    "xs:short",
    "xs:byte",
    "xs:nonNegativeInteger",
    "xs:unsignedLong",
    "xs:unsignedInt",
    "xs:unsignedShort",
    "xs:unsignedByte",
    "xs:positiveInteger",
];

const FLOAT_TYPES: &[&str] = &["xs:float", "xs:double", "xs:decimal", "xs:precisionDecimal"];

const ELEMENT_TYPES: &[&str] = &[
    "element()",
    "document-node()",
    "document-node(element())",
];

/// A value that can be bound to an XQuery external variable or decoded
/// from a streamed query result.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Element(DomValue),
    Text(String),
}

impl Value {
    /// The XQuery type name to declare when binding this value.
    pub fn xquery_type(&self) -> &'static str {
        match self {
            Self::Bool(_) => "xs:boolean",
            Self::Int(_) => "xs:int",
            Self::Float(_) => "xs:double",
            Self::Str(_) => "xs:string",
            Self::Element(_) => "element()",
            Self::Text(_) => "text()",
        }
    }

    /// Serialize for sending over the wire (spec §4.4 "Serialization").
    pub fn serialize(&self, ns: &NamespaceBindings) -> Result<String> {
        match self {
            Self::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
            Self::Int(i) => Ok(i.to_string()),
            Self::Float(f) => Ok(format!("{f}")),
            Self::Str(s) => Ok(s.clone()),
            Self::Element(dom) => dom.to_xml_string(ns),
            Self::Text(s) => Ok(s.clone()),
        }
    }

    /// Decode a streamed query result item given its XDM type name (spec
    /// §4.4 "Return-side").
    pub fn decode(xdm_name: Option<&str>, raw: String) -> Result<Self> {
        let Some(name) = xdm_name else {
            return Ok(Self::Str(raw));
        };
        if name == "xs:boolean" {
            Ok(Self::Bool(raw == "true"))
        } else if INTEGER_TYPES.contains(&name) {
            raw.parse().map(Self::Int).map_err(|e| Error::TypeCoercion {
                xquery_type: name.to_string(),
                reason: e.to_string(),
            })
        } else if FLOAT_TYPES.contains(&name) {
            raw.parse().map(Self::Float).map_err(|e| Error::TypeCoercion {
                xquery_type: name.to_string(),
                reason: e.to_string(),
            })
        } else if ELEMENT_TYPES.contains(&name) {
            DomValue::parse(&raw).map(Self::Element)
        } else if name == "text()" {
            Ok(Self::Text(raw))
        } else {
            Ok(Self::Str(raw))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_scalars() {
        let ns = NamespaceBindings::new();
        assert_eq!(Value::Bool(true).serialize(&ns).unwrap(), "true");
        assert_eq!(Value::Int(42).serialize(&ns).unwrap(), "42");
        assert_eq!(Value::Float(1.5).serialize(&ns).unwrap(), "1.5");
        assert_eq!(Value::Str("hi".into()).serialize(&ns).unwrap(), "hi");
    }

    #[test]
    fn decodes_by_xdm_type() {
        assert!(matches!(
            Value::decode(Some("xs:boolean"), "true".into()).unwrap(),
            Value::Bool(true)
        ));
        assert!(matches!(
            Value::decode(Some("xs:int"), "7".into()).unwrap(),
            Value::Int(7)
        ));
        assert!(matches!(
            Value::decode(Some("xs:double"), "2.5".into()).unwrap(),
            Value::Float(f) if f == 2.5
        ));
        assert!(matches!(
            Value::decode(Some("text()"), "hello".into()).unwrap(),
            Value::Text(s) if s == "hello"
        ));
        assert!(matches!(
            Value::decode(None, "raw".into()).unwrap(),
            Value::Str(s) if s == "raw"
        ));
    }

    #[test]
    fn rejects_unparseable_integer() {
        assert!(Value::decode(Some("xs:int"), "not-a-number".into()).is_err());
    }
}
