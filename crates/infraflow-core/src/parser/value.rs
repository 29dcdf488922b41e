//! KDL node to JSON conversion
//!
//! - no arguments, no children: `true` (a bare flag)
//! - one argument: the scalar
//! - several arguments: an array
//! - properties or children: an object; repeated child names collect into
//!   an array
//!
//! Arguments cannot be combined with properties or children, and keys
//! starting with `$` are reserved for output markers.

use crate::error::{CoreError, Result};
use kdl::{KdlNode, KdlValue};
use serde_json::{Map, Number, Value};

const RESERVED_PREFIX: char = '$';

pub fn node_to_value(node: &KdlNode) -> Result<Value> {
    let node_name = node.name().value();
    let args: Vec<Value> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| kdl_value_to_json(e.value()))
        .collect();

    let mut object = Map::new();
    for entry in node.entries() {
        if let Some(name) = entry.name() {
            let key = checked_key(node_name, name.value())?;
            object.insert(key, kdl_value_to_json(entry.value()));
        }
    }
    if let Some(children) = node.children() {
        let mut grouped: Vec<(&str, Vec<Value>)> = Vec::new();
        for child in children.nodes() {
            let key = child.name().value();
            let value = node_to_value(child)?;
            match grouped.iter_mut().find(|(k, _)| *k == key) {
                Some((_, values)) => values.push(value),
                None => grouped.push((key, vec![value])),
            }
        }
        for (key, mut values) in grouped {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            object.insert(checked_key(node_name, key)?, value);
        }
    }

    if !object.is_empty() || node.children().is_some() {
        if !args.is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "{}: positional values cannot be combined with properties or children",
                node_name
            )));
        }
        return Ok(Value::Object(object));
    }
    Ok(match args.len() {
        0 => Value::Bool(true),
        1 => args.into_iter().next().unwrap_or(Value::Null),
        _ => Value::Array(args),
    })
}

fn checked_key(node_name: &str, key: &str) -> Result<String> {
    if key.starts_with(RESERVED_PREFIX) {
        return Err(CoreError::InvalidConfig(format!(
            "{}: key {} is reserved",
            node_name, key
        )));
    }
    Ok(key.to_string())
}

pub fn kdl_value_to_json(value: &KdlValue) -> Value {
    if let Some(s) = value.as_string() {
        Value::String(s.to_string())
    } else if let Some(i) = value.as_integer() {
        i64::try_from(i)
            .map(|i| Value::Number(i.into()))
            .unwrap_or_else(|_| Value::String(i.to_string()))
    } else if let Some(f) = value.as_float() {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    } else if let Some(b) = value.as_bool() {
        Value::Bool(b)
    } else {
        Value::Null
    }
}
