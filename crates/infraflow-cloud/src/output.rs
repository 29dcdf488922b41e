//! Deferred resource values
//!
//! An [`Output`] is a value the engine only knows once the resource it belongs
//! to has been applied (an identifier, an ARN, a DNS name). Outputs are embedded
//! into resource properties as small marker objects so that a property tree
//! stays plain JSON:
//!
//! ```text
//! {"$ref": "vpc:dev-network-vpc", "attr": "id"}
//! {"$concat": ["http://", {"$ref": "load-balancer:web-alb", "attr": "dns_name"}]}
//! {"$base64": ...}
//! {"$literal": ...}
//! ```
//!
//! Keys starting with `$` are reserved. A plain value that has to carry such
//! keys is wrapped with [`Output::literal`]; its contents are never resolved.

use crate::error::{CloudError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

const REF_KEY: &str = "$ref";
const ATTR_KEY: &str = "attr";
const CONCAT_KEY: &str = "$concat";
const BASE64_KEY: &str = "$base64";
const LITERAL_KEY: &str = "$literal";

/// A value that may not be known until apply time
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    /// Value known at declaration time
    Known(Value),

    /// Attribute of another resource, resolved by the engine
    Attribute { urn: String, attribute: String },

    /// String concatenation of several outputs
    Concat(Vec<Output>),

    /// Base64 encoding of the string form of an output
    Base64(Box<Output>),
}

impl Output {
    pub fn known(value: impl Into<Value>) -> Self {
        Output::Known(value.into())
    }

    pub fn attribute(urn: impl Into<String>, attribute: impl Into<String>) -> Self {
        Output::Attribute {
            urn: urn.into(),
            attribute: attribute.into(),
        }
    }

    pub fn concat(parts: impl IntoIterator<Item = Output>) -> Self {
        Output::Concat(parts.into_iter().collect())
    }

    pub fn base64(self) -> Self {
        Output::Base64(Box::new(self))
    }

    /// Known value taken verbatim, even when it looks like a marker
    pub fn literal(value: impl Into<Value>) -> Self {
        let mut map = Map::new();
        map.insert(LITERAL_KEY.to_string(), value.into());
        Output::Known(Value::Object(map))
    }

    /// Whether the value is fully known without consulting the engine
    pub fn is_known(&self) -> bool {
        match self {
            Output::Known(value) => value_references(value).is_empty(),
            Output::Attribute { .. } => false,
            Output::Concat(parts) => parts.iter().all(Output::is_known),
            Output::Base64(inner) => inner.is_known(),
        }
    }

    /// Borrow the string if this is a known string value
    pub fn as_known_str(&self) -> Option<&str> {
        match self {
            Output::Known(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// URNs this output depends on
    pub fn references(&self) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut BTreeSet<String>) {
        match self {
            Output::Known(value) => walk_references(value, refs),
            Output::Attribute { urn, .. } => {
                refs.insert(urn.clone());
            }
            Output::Concat(parts) => {
                for part in parts {
                    part.collect_references(refs);
                }
            }
            Output::Base64(inner) => inner.collect_references(refs),
        }
    }

    /// Marker-object form used inside property trees
    pub fn to_value(&self) -> Value {
        match self {
            Output::Known(value) => value.clone(),
            Output::Attribute { urn, attribute } => {
                let mut map = Map::new();
                map.insert(REF_KEY.to_string(), Value::String(urn.clone()));
                map.insert(ATTR_KEY.to_string(), Value::String(attribute.clone()));
                Value::Object(map)
            }
            Output::Concat(parts) => {
                let mut map = Map::new();
                map.insert(
                    CONCAT_KEY.to_string(),
                    Value::Array(parts.iter().map(Output::to_value).collect()),
                );
                Value::Object(map)
            }
            Output::Base64(inner) => {
                let mut map = Map::new();
                map.insert(BASE64_KEY.to_string(), inner.to_value());
                Value::Object(map)
            }
        }
    }

    /// Parse a marker object back into an output
    ///
    /// Returns `None` for plain values, which callers treat as known.
    pub fn from_marker(value: &Value) -> Option<Output> {
        let map = value.as_object()?;
        if map.len() == 2 {
            let urn = map.get(REF_KEY)?.as_str()?;
            let attribute = map.get(ATTR_KEY)?.as_str()?;
            return Some(Output::attribute(urn, attribute));
        }
        if map.len() != 1 {
            return None;
        }
        if let Some(parts) = map.get(CONCAT_KEY).and_then(Value::as_array) {
            return Some(Output::Concat(
                parts
                    .iter()
                    .map(|p| Output::from_marker(p).unwrap_or_else(|| Output::Known(p.clone())))
                    .collect(),
            ));
        }
        map.get(BASE64_KEY).map(|inner| {
            Output::from_marker(inner)
                .unwrap_or_else(|| Output::Known(inner.clone()))
                .base64()
        })
    }

    /// Resolve to a concrete value using `lookup(urn, attribute)`
    pub fn resolve<F>(&self, lookup: &F) -> Result<Value>
    where
        F: Fn(&str, &str) -> Option<Value>,
    {
        match self {
            Output::Known(value) => resolve_value(value, lookup),
            Output::Attribute { urn, attribute } => {
                lookup(urn, attribute).ok_or_else(|| CloudError::UnresolvedOutput {
                    urn: urn.clone(),
                    attribute: attribute.clone(),
                })
            }
            Output::Concat(parts) => {
                let mut joined = String::new();
                for part in parts {
                    joined.push_str(&stringify(&part.resolve(lookup)?));
                }
                Ok(Value::String(joined))
            }
            Output::Base64(inner) => {
                let plain = stringify(&inner.resolve(lookup)?);
                Ok(Value::String(STANDARD.encode(plain.as_bytes())))
            }
        }
    }
}

/// Contents of a `$literal` escape
fn literal_contents(value: &Value) -> Option<&Value> {
    let map = value.as_object()?;
    if map.len() == 1 { map.get(LITERAL_KEY) } else { None }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Resolve every output marker inside a property tree
pub fn resolve_value<F>(value: &Value, lookup: &F) -> Result<Value>
where
    F: Fn(&str, &str) -> Option<Value>,
{
    if let Some(literal) = literal_contents(value) {
        return Ok(literal.clone());
    }
    if let Some(output) = Output::from_marker(value) {
        return output.resolve(lookup);
    }
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, lookup))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut resolved = Map::new();
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_value(item, lookup)?);
            }
            Ok(Value::Object(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Collect the URNs referenced anywhere inside a property tree
pub fn value_references(value: &Value) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    walk_references(value, &mut refs);
    refs
}

fn walk_references(value: &Value, refs: &mut BTreeSet<String>) {
    if literal_contents(value).is_some() {
        return;
    }
    if let Some(output) = Output::from_marker(value) {
        output.collect_references(refs);
        return;
    }
    match value {
        Value::Array(items) => items.iter().for_each(|item| walk_references(item, refs)),
        Value::Object(map) => map.values().for_each(|item| walk_references(item, refs)),
        _ => {}
    }
}

impl Serialize for Output {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Output {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Output::from_marker(&value).unwrap_or(Output::Known(value)))
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Known(Value::String(s)) => write!(f, "{}", s),
            Output::Known(value) => write!(f, "{}", value),
            Output::Attribute { urn, attribute } => write!(f, "${{{}.{}}}", urn, attribute),
            Output::Concat(parts) => parts.iter().try_for_each(|p| write!(f, "{}", p)),
            Output::Base64(inner) => write!(f, "base64({})", inner),
        }
    }
}

impl From<&str> for Output {
    fn from(value: &str) -> Self {
        Output::Known(Value::String(value.to_string()))
    }
}

impl From<String> for Output {
    fn from(value: String) -> Self {
        Output::Known(Value::String(value))
    }
}

impl From<Vec<Output>> for Output {
    fn from(items: Vec<Output>) -> Self {
        Output::Known(Value::Array(items.iter().map(Output::to_value).collect()))
    }
}

impl From<&String> for Output {
    fn from(value: &String) -> Self {
        Output::Known(Value::String(value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup(urn: &str, attr: &str) -> Option<Value> {
        match (urn, attr) {
            ("load-balancer:web-alb", "dns_name") => Some(json!("web-alb-123.elb.amazonaws.com")),
            ("autoscaling-group:web-asg", "min_size") => Some(json!(2)),
            _ => None,
        }
    }

    #[test]
    fn test_concat_resolves_to_string() {
        let url = Output::concat([
            Output::from("http://"),
            Output::attribute("load-balancer:web-alb", "dns_name"),
        ]);
        assert_eq!(
            url.resolve(&lookup).unwrap(),
            json!("http://web-alb-123.elb.amazonaws.com")
        );
        assert_eq!(url.to_string(), "http://${load-balancer:web-alb.dns_name}");
    }

    #[test]
    fn test_attribute_keeps_json_type() {
        let min = Output::attribute("autoscaling-group:web-asg", "min_size");
        assert_eq!(min.resolve(&lookup).unwrap(), json!(2));
    }

    #[test]
    fn test_unresolved_attribute_is_an_error() {
        let missing = Output::attribute("vpc:nowhere", "id");
        let err = missing.resolve(&lookup).unwrap_err();
        assert!(matches!(err, CloudError::UnresolvedOutput { .. }));
    }

    #[test]
    fn test_markers_inside_property_tree() {
        let props = json!({
            "name": "web",
            "subnets": [Output::attribute("load-balancer:web-alb", "dns_name")],
            "user_data": Output::from("#!/bin/bash\necho hi").base64(),
        });

        let refs = value_references(&props);
        assert_eq!(refs.len(), 1);
        assert!(refs.contains("load-balancer:web-alb"));

        let resolved = resolve_value(&props, &lookup).unwrap();
        assert_eq!(resolved["subnets"][0], json!("web-alb-123.elb.amazonaws.com"));
        assert_eq!(resolved["user_data"], json!("IyEvYmluL2Jhc2gKZWNobyBoaQ=="));
    }

    #[test]
    fn test_marker_parse_back() {
        let out = Output::concat([Output::from("a"), Output::attribute("vpc:x", "id")]);
        assert_eq!(Output::from_marker(&out.to_value()), Some(out));
        assert_eq!(Output::from_marker(&json!({"name": "plain"})), None);
    }

    #[test]
    fn test_literal_is_not_read_as_marker() {
        let shaped = json!({"$ref": "load-balancer:web-alb", "attr": "dns_name"});
        let props = json!({
            "tags": Output::literal(shaped.clone()),
            "policy": Output::literal(json!({"$concat": ["a", "b"]})),
        });

        assert!(value_references(&props).is_empty());
        assert!(Output::known(props.clone()).is_known());

        let resolved = resolve_value(&props, &|_: &str, _: &str| None).unwrap();
        assert_eq!(resolved["tags"], shaped);
        assert_eq!(resolved["policy"], json!({"$concat": ["a", "b"]}));
    }
}
